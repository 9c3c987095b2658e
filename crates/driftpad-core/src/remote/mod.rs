//! Remote document store abstraction.
//!
//! The remote side of synchronization is a document database keyed by opaque
//! string ids, with per-field equality queries, a string prefix range filter,
//! and change subscriptions. Implementations: [`memory::MemoryRemote`] for
//! tests and offline development, [`http::HttpRemote`] for a document REST
//! API.

pub mod docs;
pub mod http;
pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};

pub use docs::{CategoryDoc, NoteDoc};

/// Errors from remote store operations. Connectivity failures are distinct
/// from API faults; a missing document is `Ok(None)`, never an error.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote connectivity error: {0}")]
    Connectivity(String),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Invalid remote document payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Which source a read should be served from.
///
/// `Server` requires connectivity; `Cache` serves the last successfully
/// fetched snapshot; `Default` tries the server and falls back to the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchSource {
    #[default]
    Server,
    Cache,
    Mixed,
}

/// Equality and prefix-range filters for note queries.
///
/// `content_prefix` narrows by an inclusive lower bound on `content` with an
/// upper bound of the same prefix followed by a high sentinel character.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteQuery {
    pub owner_id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_prefix: Option<String>,
}

impl NoteQuery {
    #[must_use]
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    #[must_use]
    pub fn with_content_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.content_prefix = Some(prefix.into());
        self
    }
}

/// Filters for category queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryQuery {
    pub owner_id: String,
    pub name: Option<String>,
}

impl CategoryQuery {
    #[must_use]
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A note document together with its remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNote {
    pub doc_id: String,
    pub doc: NoteDoc,
}

/// A category document together with its remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCategory {
    pub doc_id: String,
    pub doc: CategoryDoc,
}

/// Kind of a remote change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One remote change notification.
///
/// `pending_write` mirrors the remote store's write-acknowledgement metadata:
/// true when the originating write has not propagated past the client that
/// issued it, i.e. the event is an echo of our own write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub doc: Option<NoteDoc>,
    pub pending_write: bool,
}

/// A batch of change events delivered together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
}

/// Cancellation handle for a [`ChangeSubscription`]. Cloneable so producers
/// and consumers can both observe the cancelled state.
#[derive(Clone)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SubscriptionHandle {
    /// Cancel the subscription; wakes a consumer blocked on `next_batch`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A long-lived, cancellable subscription yielding change batches.
///
/// Each batch is finite; the subscription itself lives until cancelled or the
/// producing side goes away.
pub struct ChangeSubscription {
    receiver: mpsc::UnboundedReceiver<ChangeBatch>,
    handle: SubscriptionHandle,
}

impl ChangeSubscription {
    /// Build a subscription and the sender half that feeds it. Used by remote
    /// store implementations and by tests that inject batches directly.
    #[must_use]
    pub fn channel() -> (mpsc::UnboundedSender<ChangeBatch>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Self {
            receiver,
            handle: SubscriptionHandle {
                cancelled: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            },
        };
        (sender, subscription)
    }

    /// Cancellation handle, for producers and external controllers.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Wait for the next batch. Returns `None` once cancelled or when the
    /// producer is gone.
    pub async fn next_batch(&mut self) -> Option<ChangeBatch> {
        if self.handle.is_cancelled() {
            return None;
        }
        tokio::select! {
            () = self.handle.notify.notified() => None,
            batch = self.receiver.recv() => batch,
        }
    }

    /// Take an already-delivered batch without waiting, if any.
    pub fn try_next_batch(&mut self) -> Option<ChangeBatch> {
        if self.handle.is_cancelled() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Cancel the subscription. Subsequent `next_batch` calls return `None`.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

/// Abstraction over the remote document database.
///
/// All operations may fail with [`RemoteError::Connectivity`]; a missing
/// document is reported as `Ok(None)`.
pub trait RemoteStore: Send + Sync {
    /// Write a note document. `doc_id` of `None` creates a new document;
    /// the (possibly generated) document id is returned.
    fn put_note(
        &self,
        doc_id: Option<&str>,
        doc: &NoteDoc,
    ) -> impl std::future::Future<Output = RemoteResult<String>> + Send;

    /// Fetch a note document by id.
    fn get_note(
        &self,
        doc_id: &str,
    ) -> impl std::future::Future<Output = RemoteResult<Option<NoteDoc>>> + Send;

    /// Query note documents.
    fn query_notes(
        &self,
        query: &NoteQuery,
        source: FetchSource,
    ) -> impl std::future::Future<Output = RemoteResult<Vec<RemoteNote>>> + Send;

    /// Delete a note document.
    fn delete_note(&self, doc_id: &str)
        -> impl std::future::Future<Output = RemoteResult<()>> + Send;

    /// Subscribe to note changes for one owner, newest first per batch.
    fn subscribe_notes(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = RemoteResult<ChangeSubscription>> + Send;

    /// Write a category document.
    fn put_category(
        &self,
        doc_id: Option<&str>,
        doc: &CategoryDoc,
    ) -> impl std::future::Future<Output = RemoteResult<String>> + Send;

    /// Fetch a category document by id.
    fn get_category(
        &self,
        doc_id: &str,
    ) -> impl std::future::Future<Output = RemoteResult<Option<CategoryDoc>>> + Send;

    /// Query category documents.
    fn query_categories(
        &self,
        query: &CategoryQuery,
        source: FetchSource,
    ) -> impl std::future::Future<Output = RemoteResult<Vec<RemoteCategory>>> + Send;

    /// Delete a category document.
    fn delete_category(
        &self,
        doc_id: &str,
    ) -> impl std::future::Future<Output = RemoteResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_query_builder_sets_filters() {
        let query = NoteQuery::for_owner("user-1")
            .with_title("Shopping")
            .with_content_prefix("milk");

        assert_eq!(query.owner_id, "user-1");
        assert_eq!(query.title.as_deref(), Some("Shopping"));
        assert_eq!(query.content_prefix.as_deref(), Some("milk"));
        assert!(query.content.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_delivers_and_cancels() {
        let (sender, mut subscription) = ChangeSubscription::channel();

        sender
            .send(ChangeBatch {
                events: vec![ChangeEvent {
                    kind: ChangeKind::Added,
                    doc_id: "abc".to_string(),
                    doc: None,
                    pending_write: false,
                }],
            })
            .unwrap();

        let batch = subscription.next_batch().await.unwrap();
        assert_eq!(batch.events.len(), 1);

        subscription.cancel();
        assert!(subscription.next_batch().await.is_none());
    }
}
