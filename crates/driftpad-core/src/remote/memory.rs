//! In-process remote store.
//!
//! Backs tests and offline development with the full `RemoteStore` contract:
//! generated document ids, per-owner change subscriptions, a served-query
//! cache for the `Cache` fetch source, and an offline toggle to exercise
//! connectivity failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    CategoryDoc, CategoryQuery, ChangeBatch, ChangeEvent, ChangeKind, ChangeSubscription,
    FetchSource, NoteDoc, NoteQuery, RemoteCategory, RemoteError, RemoteNote, RemoteResult,
    RemoteStore, SubscriptionHandle,
};

struct NoteSubscriber {
    owner_id: String,
    sender: mpsc::UnboundedSender<ChangeBatch>,
    handle: SubscriptionHandle,
}

#[derive(Default)]
struct Inner {
    notes: BTreeMap<String, NoteDoc>,
    categories: BTreeMap<String, CategoryDoc>,
    note_cache: HashMap<String, Vec<RemoteNote>>,
    category_cache: HashMap<String, Vec<RemoteCategory>>,
    subscribers: Vec<NoteSubscriber>,
}

/// In-memory implementation of [`RemoteStore`].
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
    offline: Arc<AtomicBool>,
    fail_queries: Arc<AtomicBool>,
    mark_writes_pending: Arc<AtomicBool>,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate loss of connectivity: all server-backed operations fail with
    /// [`RemoteError::Connectivity`] until re-enabled.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Simulate a backend that still accepts writes but whose query endpoint
    /// is failing, to exercise degraded download paths.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// When set, change events emitted for writes through this handle carry
    /// `pending_write = true`, mimicking the write-acknowledgement metadata a
    /// real document store attaches to a client's own unconfirmed writes.
    pub fn set_mark_writes_pending(&self, pending: bool) {
        self.mark_writes_pending.store(pending, Ordering::SeqCst);
    }

    /// Number of note documents currently stored (test helper).
    #[must_use]
    pub fn note_count(&self) -> usize {
        self.inner.lock().expect("remote state lock").notes.len()
    }

    /// Snapshot of all note documents (test helper).
    #[must_use]
    pub fn all_notes(&self) -> Vec<RemoteNote> {
        let inner = self.inner.lock().expect("remote state lock");
        inner
            .notes
            .iter()
            .map(|(doc_id, doc)| RemoteNote {
                doc_id: doc_id.clone(),
                doc: doc.clone(),
            })
            .collect()
    }

    fn ensure_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Connectivity(
                "remote store unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_queries_online(&self) -> RemoteResult<()> {
        self.ensure_online()?;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RemoteError::Connectivity(
                "remote query endpoint unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn notify(inner: &mut Inner, owner_id: Option<&str>, event: ChangeEvent) {
        inner.subscribers.retain(|subscriber| {
            if subscriber.handle.is_cancelled() {
                return false;
            }
            if owner_id.is_some_and(|owner| owner != subscriber.owner_id) {
                return true;
            }
            subscriber
                .sender
                .send(ChangeBatch {
                    events: vec![event.clone()],
                })
                .is_ok()
        });
    }

    fn matches_note(query: &NoteQuery, doc: &NoteDoc) -> bool {
        if doc.owner_id.as_deref() != Some(query.owner_id.as_str()) {
            return false;
        }
        if let Some(title) = &query.title {
            if doc.title_text() != title {
                return false;
            }
        }
        if let Some(content) = &query.content {
            if doc.content_text() != content {
                return false;
            }
        }
        if let Some(prefix) = &query.content_prefix {
            // Inclusive lower bound with a high-sentinel upper bound collapses
            // to a prefix test over the content field.
            if !doc.content_text().starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

impl RemoteStore for MemoryRemote {
    async fn put_note(&self, doc_id: Option<&str>, doc: &NoteDoc) -> RemoteResult<String> {
        self.ensure_online()?;

        let mut inner = self.inner.lock().expect("remote state lock");
        let doc_id = doc_id.map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string);
        let existed = inner.notes.insert(doc_id.clone(), doc.clone()).is_some();

        let event = ChangeEvent {
            kind: if existed {
                ChangeKind::Modified
            } else {
                ChangeKind::Added
            },
            doc_id: doc_id.clone(),
            doc: Some(doc.clone()),
            pending_write: self.mark_writes_pending.load(Ordering::SeqCst),
        };
        Self::notify(&mut inner, doc.owner_id.as_deref(), event);

        Ok(doc_id)
    }

    async fn get_note(&self, doc_id: &str) -> RemoteResult<Option<NoteDoc>> {
        self.ensure_online()?;
        let inner = self.inner.lock().expect("remote state lock");
        Ok(inner.notes.get(doc_id).cloned())
    }

    async fn query_notes(
        &self,
        query: &NoteQuery,
        source: FetchSource,
    ) -> RemoteResult<Vec<RemoteNote>> {
        let serve_from_server = |inner: &mut Inner| -> Vec<RemoteNote> {
            let results: Vec<RemoteNote> = inner
                .notes
                .iter()
                .filter(|(_, doc)| Self::matches_note(query, doc))
                .map(|(doc_id, doc)| RemoteNote {
                    doc_id: doc_id.clone(),
                    doc: doc.clone(),
                })
                .collect();

            // Only unfiltered owner queries represent a full snapshot worth
            // serving from cache later.
            if query.title.is_none() && query.content.is_none() && query.content_prefix.is_none() {
                inner
                    .note_cache
                    .insert(query.owner_id.clone(), results.clone());
            }
            results
        };

        let mut inner = self.inner.lock().expect("remote state lock");
        match source {
            FetchSource::Server => {
                self.ensure_queries_online()?;
                Ok(serve_from_server(&mut inner))
            }
            FetchSource::Cache => inner.note_cache.get(&query.owner_id).cloned().ok_or_else(|| {
                RemoteError::Connectivity("no cached snapshot for owner".to_string())
            }),
            FetchSource::Mixed => {
                if self.ensure_queries_online().is_ok() {
                    Ok(serve_from_server(&mut inner))
                } else {
                    inner.note_cache.get(&query.owner_id).cloned().ok_or_else(|| {
                        RemoteError::Connectivity("no cached snapshot for owner".to_string())
                    })
                }
            }
        }
    }

    async fn delete_note(&self, doc_id: &str) -> RemoteResult<()> {
        self.ensure_online()?;

        let mut inner = self.inner.lock().expect("remote state lock");
        let removed = inner.notes.remove(doc_id);
        if let Some(doc) = removed {
            let event = ChangeEvent {
                kind: ChangeKind::Removed,
                doc_id: doc_id.to_string(),
                doc: None,
                pending_write: self.mark_writes_pending.load(Ordering::SeqCst),
            };
            Self::notify(&mut inner, doc.owner_id.as_deref(), event);
        }
        Ok(())
    }

    async fn subscribe_notes(&self, owner_id: &str) -> RemoteResult<ChangeSubscription> {
        let (sender, subscription) = ChangeSubscription::channel();
        let mut inner = self.inner.lock().expect("remote state lock");
        inner.subscribers.push(NoteSubscriber {
            owner_id: owner_id.to_string(),
            sender,
            handle: subscription.handle(),
        });
        Ok(subscription)
    }

    async fn put_category(&self, doc_id: Option<&str>, doc: &CategoryDoc) -> RemoteResult<String> {
        self.ensure_online()?;

        let mut inner = self.inner.lock().expect("remote state lock");
        let doc_id = doc_id.map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string);
        inner.categories.insert(doc_id.clone(), doc.clone());
        Ok(doc_id)
    }

    async fn get_category(&self, doc_id: &str) -> RemoteResult<Option<CategoryDoc>> {
        self.ensure_online()?;
        let inner = self.inner.lock().expect("remote state lock");
        Ok(inner.categories.get(doc_id).cloned())
    }

    async fn query_categories(
        &self,
        query: &CategoryQuery,
        source: FetchSource,
    ) -> RemoteResult<Vec<RemoteCategory>> {
        let serve = |inner: &mut Inner| -> Vec<RemoteCategory> {
            let results: Vec<RemoteCategory> = inner
                .categories
                .iter()
                .filter(|(_, doc)| {
                    doc.owner_id.as_deref() == Some(query.owner_id.as_str())
                        && query
                            .name
                            .as_deref()
                            .map_or(true, |name| doc.name_text() == name)
                })
                .map(|(doc_id, doc)| RemoteCategory {
                    doc_id: doc_id.clone(),
                    doc: doc.clone(),
                })
                .collect();

            if query.name.is_none() {
                inner
                    .category_cache
                    .insert(query.owner_id.clone(), results.clone());
            }
            results
        };

        let mut inner = self.inner.lock().expect("remote state lock");
        match source {
            FetchSource::Server => {
                self.ensure_queries_online()?;
                Ok(serve(&mut inner))
            }
            FetchSource::Cache => inner
                .category_cache
                .get(&query.owner_id)
                .cloned()
                .ok_or_else(|| {
                    RemoteError::Connectivity("no cached snapshot for owner".to_string())
                }),
            FetchSource::Mixed => {
                if self.ensure_queries_online().is_ok() {
                    Ok(serve(&mut inner))
                } else {
                    inner
                        .category_cache
                        .get(&query.owner_id)
                        .cloned()
                        .ok_or_else(|| {
                            RemoteError::Connectivity("no cached snapshot for owner".to_string())
                        })
                }
            }
        }
    }

    async fn delete_category(&self, doc_id: &str) -> RemoteResult<()> {
        self.ensure_online()?;
        let mut inner = self.inner.lock().expect("remote state lock");
        inner.categories.remove(doc_id);
        Ok(())
    }
}
