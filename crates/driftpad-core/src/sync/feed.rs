//! Remote change feed.
//!
//! A long-lived consumer of the change subscription for the signed-in
//! principal. Each batch is filtered — echoes of this client's own pending
//! writes and events older than the staleness window are discarded — and the
//! survivors go through the same per-record dedup-and-merge path as the
//! download phase. Batch processing is serialized by a boolean in-flight
//! guard; a batch arriving while another is being merged is dropped, not
//! queued, since the next natural notification supersedes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::remote::{
    ChangeBatch, ChangeKind, ChangeSubscription, RemoteNote, RemoteStore, SubscriptionHandle,
};
use crate::session::SessionProvider;
use crate::util::timestamp_ms_now;

use super::{RemovalPolicy, SyncEngine};

/// Counters reported when the feed shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub applied: usize,
    pub dropped_batches: usize,
    pub skipped_echoes: usize,
    pub skipped_stale: usize,
    pub removals_seen: usize,
}

/// Outcome of merging a single batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub skipped_echoes: usize,
    pub skipped_stale: usize,
    pub removals_seen: usize,
}

/// Consumes a [`ChangeSubscription`] and applies surviving events through the
/// engine's merge path.
pub struct ChangeFeed<R: RemoteStore, S: SessionProvider> {
    engine: Arc<SyncEngine<R, S>>,
    subscription: ChangeSubscription,
    busy: AtomicBool,
}

impl<R: RemoteStore, S: SessionProvider> ChangeFeed<R, S> {
    pub fn new(engine: Arc<SyncEngine<R, S>>, subscription: ChangeSubscription) -> Self {
        Self {
            engine,
            subscription,
            busy: AtomicBool::new(false),
        }
    }

    /// Handle that stops the feed, including one blocked waiting for a batch.
    #[must_use]
    pub fn handle(&self) -> SubscriptionHandle {
        self.subscription.handle()
    }

    /// Run until the subscription is cancelled or its producer goes away.
    pub async fn run(mut self) -> Result<FeedSummary> {
        let mut summary = FeedSummary::default();

        while let Some(batch) = self.subscription.next_batch().await {
            match self.apply(&batch).await {
                Ok(Some(outcome)) => {
                    summary.applied += outcome.applied;
                    summary.skipped_echoes += outcome.skipped_echoes;
                    summary.skipped_stale += outcome.skipped_stale;
                    summary.removals_seen += outcome.removals_seen;
                }
                Ok(None) => summary.dropped_batches += 1,
                Err(error) => {
                    tracing::warn!("Change batch merge failed: {error}");
                }
            }

            // Batches that accumulated while merging are stale by
            // construction; drop them rather than replaying.
            while self.subscription.try_next_batch().is_some() {
                summary.dropped_batches += 1;
            }
        }

        tracing::info!(?summary, "Change feed stopped");
        Ok(summary)
    }

    /// Merge one batch. Returns `Ok(None)` when another batch is already in
    /// flight — the caller should treat the batch as dropped.
    pub async fn apply(&self, batch: &ChangeBatch) -> Result<Option<BatchOutcome>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            tracing::debug!("Dropping change batch: merge already in flight");
            return Ok(None);
        }

        let outcome = self.process(batch).await;
        self.busy.store(false, Ordering::SeqCst);
        outcome.map(Some)
    }

    async fn process(&self, batch: &ChangeBatch) -> Result<BatchOutcome> {
        #[allow(clippy::cast_possible_truncation)]
        let staleness_ms = self.engine.options().staleness_window.as_millis() as i64;
        let now = timestamp_ms_now();

        let mut outcome = BatchOutcome::default();
        let mut incoming = Vec::new();

        for event in &batch.events {
            if event.pending_write {
                // Our own write echoing back before the server acknowledged
                // it; reacting would double-apply.
                outcome.skipped_echoes += 1;
                tracing::trace!(doc_id = %event.doc_id, "Skipped pending-write echo");
                continue;
            }

            match event.kind {
                ChangeKind::Removed => {
                    outcome.removals_seen += 1;
                    if let Err(error) = self.handle_removal(&event.doc_id).await {
                        tracing::warn!(doc_id = %event.doc_id, "Removal handling failed: {error}");
                    }
                }
                ChangeKind::Added | ChangeKind::Modified => {
                    let Some(doc) = event.doc.clone() else {
                        continue;
                    };
                    if now - doc.modified_ms() > staleness_ms {
                        outcome.skipped_stale += 1;
                        tracing::trace!(doc_id = %event.doc_id, "Skipped stale event");
                        continue;
                    }
                    incoming.push(RemoteNote {
                        doc_id: event.doc_id.clone(),
                        doc,
                    });
                }
            }
        }

        if !incoming.is_empty() {
            let counts = self.engine.merge_remote_notes(incoming).await?;
            outcome.applied = counts.inserted + counts.overwritten + counts.linked;
        }
        Ok(outcome)
    }

    async fn handle_removal(&self, doc_id: &str) -> Result<()> {
        match self.engine.options().removal_policy {
            RemovalPolicy::Ignore => {
                tracing::info!(doc_id, "Remote removal observed; local record untouched");
                Ok(())
            }
            RemovalPolicy::Trash => {
                let Some(mut note) = self.engine.store().find_note_by_cloud_id(doc_id).await?
                else {
                    return Ok(());
                };
                // The removal originated remotely, so the trashed state is
                // already agreed upon; the record comes back clean and
                // unlinked.
                note.is_trashed = true;
                note.modified_at = note.modified_at.max(timestamp_ms_now());
                note.needs_sync = false;
                note.cloud_id = None;
                self.engine.store().upsert_note(&note).await?;
                tracing::info!(doc_id, "Remote removal trashed local record");
                Ok(())
            }
            RemovalPolicy::Delete => {
                let Some(note) = self.engine.store().find_note_by_cloud_id(doc_id).await? else {
                    return Ok(());
                };
                if let Some(id) = note.id {
                    self.engine.store().delete_note_permanent(id).await?;
                    tracing::info!(doc_id, "Remote removal deleted local record");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Note;
    use crate::remote::memory::MemoryRemote;
    use crate::remote::{ChangeEvent, NoteDoc};
    use crate::services::StoreService;
    use crate::session::StaticSession;
    use crate::sync::SyncOptions;
    use std::time::Duration;

    fn feed_with_policy(
        policy: RemovalPolicy,
    ) -> (
        Arc<SyncEngine<MemoryRemote, StaticSession>>,
        tokio::sync::mpsc::UnboundedSender<ChangeBatch>,
        ChangeFeed<MemoryRemote, StaticSession>,
    ) {
        let store = StoreService::open_in_memory().unwrap();
        let options = SyncOptions::default()
            .with_debounce(Duration::ZERO)
            .with_removal_policy(policy);
        let engine = Arc::new(SyncEngine::with_options(
            store,
            MemoryRemote::new(),
            StaticSession::signed_in("u1"),
            options,
        ));
        let (sender, subscription) = ChangeSubscription::channel();
        let feed = ChangeFeed::new(Arc::clone(&engine), subscription);
        (engine, sender, feed)
    }

    fn fresh_doc(title: &str, content: &str) -> NoteDoc {
        NoteDoc {
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            modified_date: Some(timestamp_ms_now()),
            owner_id: Some("u1".to_string()),
            ..NoteDoc::default()
        }
    }

    fn added(doc_id: &str, doc: NoteDoc) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::Added,
            doc_id: doc_id.to_string(),
            doc: Some(doc),
            pending_write: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applies_added_events_through_merge() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Ignore);

        let batch = ChangeBatch {
            events: vec![added("abc", fresh_doc("Shopping", "milk"))],
        };
        let outcome = feed.apply(&batch).await.unwrap().unwrap();
        assert_eq!(outcome.applied, 1);

        let local = engine
            .store()
            .find_note_by_cloud_id("abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.title, "Shopping");
        assert!(!local.needs_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discards_pending_write_echoes() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Ignore);

        let mut event = added("abc", fresh_doc("Shopping", "milk"));
        event.pending_write = true;
        let outcome = feed
            .apply(&ChangeBatch {
                events: vec![event],
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.skipped_echoes, 1);
        assert_eq!(outcome.applied, 0);
        assert!(engine
            .store()
            .find_note_by_cloud_id("abc")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discards_stale_events() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Ignore);

        let mut doc = fresh_doc("Old", "historical backlog");
        doc.modified_date = Some(timestamp_ms_now() - 10 * 60 * 1000);
        let outcome = feed
            .apply(&ChangeBatch {
                events: vec![added("abc", doc)],
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.skipped_stale, 1);
        assert_eq!(outcome.applied, 0);
        assert!(engine
            .store()
            .find_note_by_cloud_id("abc")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removal_policy_ignore_keeps_local_record() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Ignore);

        let mut note = Note::new("Keep", "me");
        note.cloud_id = Some("abc".to_string());
        engine.store().upsert_note(&note).await.unwrap();

        let outcome = feed
            .apply(&ChangeBatch {
                events: vec![ChangeEvent {
                    kind: ChangeKind::Removed,
                    doc_id: "abc".to_string(),
                    doc: None,
                    pending_write: false,
                }],
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.removals_seen, 1);
        let kept = engine
            .store()
            .find_note_by_cloud_id("abc")
            .await
            .unwrap()
            .unwrap();
        assert!(!kept.is_trashed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removal_policy_trash_soft_deletes() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Trash);

        let mut note = Note::new("Trash", "me");
        note.cloud_id = Some("abc".to_string());
        note.needs_sync = false;
        let id = engine.store().upsert_note(&note).await.unwrap();

        feed.apply(&ChangeBatch {
            events: vec![ChangeEvent {
                kind: ChangeKind::Removed,
                doc_id: "abc".to_string(),
                doc: None,
                pending_write: false,
            }],
        })
        .await
        .unwrap();

        let trashed = engine.store().get_note(id).await.unwrap().unwrap();
        assert!(trashed.is_trashed);
        assert!(!trashed.needs_sync);
        assert!(trashed.cloud_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removal_policy_delete_hard_deletes() {
        let (engine, _sender, feed) = feed_with_policy(RemovalPolicy::Delete);

        let mut note = Note::new("Delete", "me");
        note.cloud_id = Some("abc".to_string());
        let id = engine.store().upsert_note(&note).await.unwrap();

        feed.apply(&ChangeBatch {
            events: vec![ChangeEvent {
                kind: ChangeKind::Removed,
                doc_id: "abc".to_string(),
                doc: None,
                pending_write: false,
            }],
        })
        .await
        .unwrap();

        assert!(engine.store().get_note(id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_drops_batches_queued_while_merging() {
        let (engine, sender, feed) = feed_with_policy(RemovalPolicy::Ignore);

        sender
            .send(ChangeBatch {
                events: vec![added("a", fresh_doc("First", "one"))],
            })
            .unwrap();
        sender
            .send(ChangeBatch {
                events: vec![added("b", fresh_doc("Second", "two"))],
            })
            .unwrap();
        sender
            .send(ChangeBatch {
                events: vec![added("c", fresh_doc("Third", "three"))],
            })
            .unwrap();
        drop(sender);

        let summary = feed.run().await.unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.dropped_batches, 2);

        // Only the first batch landed locally.
        assert!(engine
            .store()
            .find_note_by_cloud_id("a")
            .await
            .unwrap()
            .is_some());
        assert!(engine
            .store()
            .find_note_by_cloud_id("b")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn live_subscription_end_to_end() {
        let store = StoreService::open_in_memory().unwrap();
        let remote = MemoryRemote::new();
        let engine = Arc::new(SyncEngine::with_options(
            store,
            remote.clone(),
            StaticSession::signed_in("u1"),
            SyncOptions::default().with_debounce(Duration::ZERO),
        ));

        let subscription = engine.subscribe_changes().await.unwrap();
        let feed = ChangeFeed::new(Arc::clone(&engine), subscription);
        let stop = feed.handle();
        let feed_task = tokio::spawn(feed.run());

        // A write from "another device" arrives through the subscription.
        remote
            .put_note(Some("abc"), &fresh_doc("Shopping", "milk"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.cancel();

        let summary = feed_task.await.unwrap().unwrap();
        assert_eq!(summary.applied, 1);

        let local = engine
            .store()
            .find_note_by_cloud_id("abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(local.title, "Shopping");
    }
}
