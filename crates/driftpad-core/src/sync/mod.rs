//! Bidirectional synchronization engine.
//!
//! One `synchronize()` pass uploads pending local changes, then downloads and
//! merges the owner's remote records. Upload strictly precedes download so a
//! record created during the pass is not perceived as a duplicate at its own
//! merge step. A single pass is in flight at a time; re-entrant calls and
//! calls inside the debounce window are rejected, which is what prevents two
//! concurrent passes from both creating a remote document for the same dirty
//! record.

pub mod feed;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::dedup::{find_local_match, DuplicateResolver};
use crate::error::{Error, Result};
use crate::models::{Category, Note, SyncReport, SyncState, SyncStatus};
use crate::remote::{
    CategoryDoc, CategoryQuery, FetchSource, NoteDoc, NoteQuery, RemoteCategory, RemoteNote,
    RemoteResult, RemoteStore,
};
use crate::services::StoreService;
use crate::session::SessionProvider;
use crate::util::timestamp_ms_now;

/// Error message when no principal is signed in.
pub const ERROR_NOT_SIGNED_IN: &str = "not signed in";
/// Error message when the network is unreachable.
pub const ERROR_NO_CONNECTION: &str = "no network connection";

const ERROR_SYNC_IN_PROGRESS: &str = "synchronization already in progress";
const ERROR_SYNC_DEBOUNCED: &str = "synchronization requested too soon after the previous run";

/// What to do locally when the change feed reports a remote document removal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemovalPolicy {
    /// Log the removal and leave the local record untouched
    #[default]
    Ignore,
    /// Soft-delete the linked local record
    Trash,
    /// Permanently delete the linked local record
    Delete,
}

/// Tuning knobs for the engine and change feed.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Minimum gap between the end of one pass and the start of the next
    pub debounce: Duration,
    /// Change-feed events older than this, relative to receipt time, are
    /// discarded as historical backlog
    pub staleness_window: Duration,
    /// Local handling of remote document removals
    pub removal_policy: RemovalPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            staleness_window: Duration::from_secs(5 * 60),
            removal_policy: RemovalPolicy::Ignore,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    #[must_use]
    pub const fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }
}

/// Per-record outcomes of one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    /// Remote records materialized as new local records
    pub inserted: usize,
    /// Remote-newer overwrites of existing local records
    pub overwritten: usize,
    /// Local-wins records whose missing cloud link was backfilled
    pub linked: usize,
    /// Records where the local copy already matched or was newer
    pub unchanged: usize,
    /// False when cancellation stopped the pass early
    pub completed: bool,
}

enum MergeDisposition {
    Inserted,
    Overwritten,
    Linked,
    Unchanged,
}

/// The bidirectional sync engine. Construction is explicit: the store, the
/// remote, and the session are injected; nothing is global.
pub struct SyncEngine<R: RemoteStore, S: SessionProvider> {
    store: StoreService,
    remote: R,
    session: S,
    options: SyncOptions,
    status: watch::Sender<SyncStatus>,
    in_flight: AtomicBool,
    cancel_requested: AtomicBool,
    last_finished: StdMutex<Option<Instant>>,
}

impl<R: RemoteStore, S: SessionProvider> std::fmt::Debug for SyncEngine<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<R: RemoteStore, S: SessionProvider> SyncEngine<R, S> {
    pub fn new(store: StoreService, remote: R, session: S) -> Self {
        Self::with_options(store, remote, session, SyncOptions::default())
    }

    pub fn with_options(store: StoreService, remote: R, session: S, options: SyncOptions) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            remote,
            session,
            options,
            status,
            in_flight: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            last_finished: StdMutex::new(None),
        }
    }

    /// Observable sync status for display by the UI collaborator.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    #[must_use]
    pub const fn store(&self) -> &StoreService {
        &self.store
    }

    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Request cooperative cancellation of the pass in flight. Per-record
    /// writes already committed stand; only further processing stops.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn cancel_pending(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: SyncState) {
        self.status.send_modify(|status| status.state = state);
    }

    /// Run one full synchronization pass for the signed-in principal.
    ///
    /// Returns a rejected report without touching any state when a pass is
    /// already in flight or the debounce window has not elapsed.
    pub async fn synchronize(&self) -> SyncReport {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::info!("Rejected re-entrant synchronize call");
            return SyncReport::rejected(ERROR_SYNC_IN_PROGRESS);
        }

        let debounced = {
            let last = self.last_finished.lock().expect("sync guard lock");
            last.is_some_and(|finished| finished.elapsed() < self.options.debounce)
        };
        if debounced {
            self.in_flight.store(false, Ordering::SeqCst);
            tracing::info!("Ignored synchronize call inside debounce window");
            return SyncReport::rejected(ERROR_SYNC_DEBOUNCED);
        }

        self.cancel_requested.store(false, Ordering::SeqCst);
        let report = self.run().await;

        *self.last_finished.lock().expect("sync guard lock") = Some(Instant::now());
        self.in_flight.store(false, Ordering::SeqCst);
        report
    }

    async fn run(&self) -> SyncReport {
        let mut report = SyncReport::default();

        self.set_state(SyncState::Connecting);
        if !self.session.is_connected() {
            self.set_state(SyncState::ErrorConnection);
            return SyncReport::rejected(ERROR_NO_CONNECTION);
        }

        self.set_state(SyncState::Authenticating);
        let owner_id = if self.session.is_authenticated() {
            self.session.owner_id()
        } else {
            None
        };
        let Some(owner_id) = owner_id else {
            self.set_state(SyncState::ErrorAuth);
            return SyncReport::rejected(ERROR_NOT_SIGNED_IN);
        };

        self.set_state(SyncState::SyncingUp);
        match self.upload(&owner_id, &mut report).await {
            Ok(true) => {}
            Ok(false) => {
                self.set_state(SyncState::Cancelled);
                return report;
            }
            Err(error) => {
                tracing::warn!("Upload phase failed: {error}");
                report.error_message = Some(error.to_string());
                self.set_state(SyncState::ErrorSync);
                return report;
            }
        }

        self.set_state(SyncState::SyncingDown);
        match self.download(&owner_id, &mut report).await {
            Ok(true) => {
                report.success = true;
                self.status.send_modify(|status| {
                    status.state = SyncState::Success;
                    status.last_sync_time = Some(timestamp_ms_now());
                });
            }
            Ok(false) => {
                self.set_state(SyncState::Cancelled);
            }
            Err(error) => {
                // Upload results are preserved; only the download phase is
                // reported as failed.
                tracing::warn!("Download phase failed: {error}");
                report.error_message = Some(error.to_string());
                self.set_state(SyncState::ErrorSync);
            }
        }
        report
    }

    /// Upload phase: categories first so note references resolve, then notes.
    /// Each record is processed independently; a failed record is logged,
    /// stays dirty, and does not abort the batch. Returns `Ok(false)` when
    /// cancelled.
    async fn upload(&self, owner_id: &str, report: &mut SyncReport) -> Result<bool> {
        let categories = self.store.dirty_categories().await?;
        for category in categories {
            if self.cancel_pending() {
                return Ok(false);
            }
            match self.upload_category(owner_id, &category).await {
                Ok(()) => report.uploaded += 1,
                Err(error) => {
                    tracing::warn!(category = %category.name, "Category upload failed: {error}");
                }
            }
        }

        let notes = self.store.dirty_notes().await?;
        tracing::info!(pending = notes.len(), "Upload phase starting");
        for note in notes {
            if self.cancel_pending() {
                return Ok(false);
            }
            match self.upload_note(owner_id, &note).await {
                Ok(()) => report.uploaded += 1,
                Err(error) => {
                    tracing::warn!(note = ?note.id, "Note upload failed: {error}");
                }
            }
        }
        Ok(true)
    }

    async fn upload_note(&self, owner_id: &str, note: &Note) -> Result<()> {
        let id = note
            .id
            .ok_or_else(|| Error::InvalidInput("note has no local id".to_string()))?;

        let category_cloud_id = match note.category_id {
            Some(category_id) => self
                .store
                .get_category(category_id)
                .await?
                .and_then(|category| category.cloud_id),
            None => None,
        };
        let doc = NoteDoc::from_note(note, owner_id, category_cloud_id);

        let resolver = DuplicateResolver::new(&self.remote);
        let doc_id = match resolver.resolve(note, owner_id).await? {
            Some(existing) => {
                self.store.set_note_cloud_link(id, &existing).await?;
                self.remote.put_note(Some(&existing), &doc).await?;
                existing
            }
            None => {
                let created = self.remote.put_note(None, &doc).await?;
                self.store.set_note_cloud_link(id, &created).await?;
                created
            }
        };

        self.store.set_note_sync_flag(id, false).await?;
        tracing::debug!(note = id, doc_id = %doc_id, "Note uploaded");
        Ok(())
    }

    async fn upload_category(&self, owner_id: &str, category: &Category) -> Result<()> {
        let id = category
            .id
            .ok_or_else(|| Error::InvalidInput("category has no local id".to_string()))?;
        let doc = CategoryDoc::from_category(category, owner_id);

        // Identity first, then exact name — the only dedup rule categories get.
        let mut existing = None;
        if let Some(cloud_id) = category.cloud_id.as_deref().filter(|v| !v.is_empty()) {
            if self.remote.get_category(cloud_id).await?.is_some() {
                existing = Some(cloud_id.to_string());
            }
        }
        if existing.is_none() {
            existing = self
                .remote
                .query_categories(
                    &CategoryQuery::for_owner(owner_id).with_name(category.name.clone()),
                    FetchSource::Server,
                )
                .await?
                .into_iter()
                .next()
                .map(|remote_category| remote_category.doc_id);
        }

        let doc_id = match existing {
            Some(doc_id) => {
                self.store.set_category_cloud_link(id, &doc_id).await?;
                self.remote.put_category(Some(&doc_id), &doc).await?;
                doc_id
            }
            None => {
                let created = self.remote.put_category(None, &doc).await?;
                self.store.set_category_cloud_link(id, &created).await?;
                created
            }
        };

        self.store.set_category_sync_flag(id, false).await?;
        tracing::debug!(category = id, doc_id = %doc_id, "Category uploaded");
        Ok(())
    }

    /// Download phase. Returns `Ok(false)` when cancelled; an error means the
    /// whole phase failed after exhausting every fetch source.
    async fn download(&self, owner_id: &str, report: &mut SyncReport) -> Result<bool> {
        let categories = self.fetch_owner_categories(owner_id).await?;
        for remote_category in &categories {
            if self.cancel_pending() {
                return Ok(false);
            }
            match self.merge_category(remote_category).await {
                Ok(changed) => {
                    if changed {
                        report.downloaded += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(doc_id = %remote_category.doc_id, "Category merge failed: {error}");
                }
            }
        }

        let notes = self.fetch_owner_notes(owner_id).await?;
        tracing::info!(incoming = notes.len(), "Download phase merging");
        let counts = self.merge_remote_notes(notes).await?;
        report.downloaded += counts.inserted + counts.overwritten;
        report.conflicts += counts.overwritten;
        Ok(counts.completed)
    }

    async fn fetch_owner_notes(&self, owner_id: &str) -> RemoteResult<Vec<RemoteNote>> {
        let query = NoteQuery::for_owner(owner_id);
        let mut last_error = None;

        for source in [FetchSource::Server, FetchSource::Cache, FetchSource::Mixed] {
            match self.remote.query_notes(&query, source).await {
                Ok(notes) => {
                    if last_error.is_some() {
                        tracing::warn!(?source, "Download degraded to fallback source");
                    }
                    return Ok(notes);
                }
                Err(error) => {
                    tracing::warn!(?source, "Note query failed: {error}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one fetch source attempted"))
    }

    async fn fetch_owner_categories(&self, owner_id: &str) -> RemoteResult<Vec<RemoteCategory>> {
        let query = CategoryQuery::for_owner(owner_id);
        let mut last_error = None;

        for source in [FetchSource::Server, FetchSource::Cache, FetchSource::Mixed] {
            match self.remote.query_categories(&query, source).await {
                Ok(categories) => {
                    if last_error.is_some() {
                        tracing::warn!(?source, "Download degraded to fallback source");
                    }
                    return Ok(categories);
                }
                Err(error) => {
                    tracing::warn!(?source, "Category query failed: {error}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one fetch source attempted"))
    }

    /// Merge a batch of incoming remote notes into the local store. This is
    /// the single merge path shared by the download phase and the change
    /// feed. Per-record failures are logged and skipped.
    pub async fn merge_remote_notes(&self, incoming: Vec<RemoteNote>) -> Result<MergeCounts> {
        let mut counts = MergeCounts::default();
        let mut local_pool = self.store.active_notes().await?;

        for remote_note in incoming {
            if self.cancel_pending() {
                return Ok(counts);
            }
            match self.merge_one(&remote_note, &mut local_pool).await {
                Ok(MergeDisposition::Inserted) => counts.inserted += 1,
                Ok(MergeDisposition::Overwritten) => counts.overwritten += 1,
                Ok(MergeDisposition::Linked) => counts.linked += 1,
                Ok(MergeDisposition::Unchanged) => counts.unchanged += 1,
                Err(error) => {
                    tracing::warn!(doc_id = %remote_note.doc_id, "Merge failed: {error}");
                }
            }
        }
        counts.completed = true;
        Ok(counts)
    }

    /// Merge rule for one incoming remote record: look up by cloud id, fall
    /// back to the duplicate rules against unlinked local records, then apply
    /// last-writer-wins on `modified_at` with a strictly-greater bar for the
    /// remote side.
    async fn merge_one(
        &self,
        remote_note: &RemoteNote,
        local_pool: &mut Vec<Note>,
    ) -> Result<MergeDisposition> {
        let doc = &remote_note.doc;
        let doc_id = remote_note.doc_id.as_str();

        let category_local_id = match &doc.category_id {
            Some(category_cloud_id) => self
                .store
                .find_category_by_cloud_id(category_cloud_id)
                .await?
                .and_then(|category| category.id),
            None => None,
        };

        let matched = match self.store.find_note_by_cloud_id(doc_id).await? {
            Some(note) => Some(note),
            None => match find_local_match(local_pool, doc) {
                // Fresh read before the read-modify-write below
                Some(local_id) => self.store.get_note(local_id).await?,
                None => None,
            },
        };

        let Some(local) = matched else {
            let mut note = doc.to_note(doc_id, category_local_id);
            let id = self.store.upsert_note(&note).await?;
            note.id = Some(id);
            tracing::debug!(note = id, doc_id = %doc_id, "Merged as new local note");
            local_pool.push(note);
            return Ok(MergeDisposition::Inserted);
        };

        let local_id = local
            .id
            .ok_or_else(|| Error::Database("stored note row missing id".to_string()))?;

        if doc.modified_ms() > local.modified_at {
            // Remote wins. Unsynced local style fields survive the overwrite.
            let mut merged = local.clone();
            let preserve_style = merged.needs_sync;
            doc.overwrite_note(&mut merged, doc_id, category_local_id, preserve_style);
            self.store.upsert_note(&merged).await?;

            if let Some(slot) = local_pool.iter_mut().find(|note| note.id == Some(local_id)) {
                *slot = merged;
            } else {
                local_pool.push(merged);
            }
            tracing::debug!(note = local_id, doc_id = %doc_id, "Remote overwrote local note");
            return Ok(MergeDisposition::Overwritten);
        }

        // Local wins. Backfill the cloud link if missing so the record is
        // never re-created remotely, touching nothing else.
        if !local.is_linked() {
            self.store.set_note_cloud_link(local_id, doc_id).await?;
            if let Some(slot) = local_pool.iter_mut().find(|note| note.id == Some(local_id)) {
                slot.cloud_id = Some(doc_id.to_string());
            }
            tracing::debug!(note = local_id, doc_id = %doc_id, "Backfilled cloud link");
            return Ok(MergeDisposition::Linked);
        }
        Ok(MergeDisposition::Unchanged)
    }

    async fn merge_category(&self, remote_category: &RemoteCategory) -> Result<bool> {
        let doc = &remote_category.doc;
        let doc_id = remote_category.doc_id.as_str();

        let matched = match self.store.find_category_by_cloud_id(doc_id).await? {
            Some(category) => Some(category),
            None => self.store.find_category_by_name(doc.name_text()).await?,
        };

        let Some(local) = matched else {
            let category = doc.to_category(doc_id);
            self.store.upsert_category(&category).await?;
            return Ok(true);
        };

        let local_id = local
            .id
            .ok_or_else(|| Error::Database("stored category row missing id".to_string()))?;

        if doc.modified_ms() > local.modified_at {
            let mut merged = local;
            doc.overwrite_category(&mut merged, doc_id);
            self.store.upsert_category(&merged).await?;
            return Ok(true);
        }

        if !local.is_linked() {
            self.store.set_category_cloud_link(local_id, doc_id).await?;
        }
        Ok(false)
    }

    /// Permanently delete a note, remotely first when linked. The remote
    /// delete failing leaves the local record in place for a retry.
    pub async fn delete_note_permanently(&self, id: i64) -> Result<()> {
        let note = self
            .store
            .get_note(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("note {id}")))?;

        if let Some(cloud_id) = note.cloud_id.as_deref().filter(|v| !v.is_empty()) {
            self.remote.delete_note(cloud_id).await?;
        }
        self.store.delete_note_permanent(id).await
    }

    /// Open the change subscription for the signed-in principal.
    pub async fn subscribe_changes(&self) -> Result<crate::remote::ChangeSubscription> {
        let owner_id = self
            .session
            .owner_id()
            .ok_or_else(|| Error::InvalidInput(ERROR_NOT_SIGNED_IN.to_string()))?;
        Ok(self.remote.subscribe_notes(&owner_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use crate::session::StaticSession;
    use pretty_assertions::assert_eq;

    fn test_engine(
        remote: MemoryRemote,
        session: StaticSession,
    ) -> SyncEngine<MemoryRemote, StaticSession> {
        let store = StoreService::open_in_memory().unwrap();
        let options = SyncOptions::default().with_debounce(Duration::ZERO);
        SyncEngine::with_options(store, remote, session, options)
    }

    fn remote_doc(owner: &str, title: &str, content: &str, modified: i64) -> NoteDoc {
        NoteDoc {
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            modified_date: Some(modified),
            created_date: Some(modified),
            owner_id: Some(owner.to_string()),
            ..NoteDoc::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_links_new_note() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let note = engine
            .store()
            .create_note("Shopping", "milk eggs bread", Some("u1"))
            .await
            .unwrap();
        let id = note.id.unwrap();

        let report = engine.synchronize().await;
        assert!(report.success);
        assert_eq!(report.uploaded, 1);

        let synced = engine.store().get_note(id).await.unwrap().unwrap();
        assert!(synced.is_linked());
        assert!(!synced.needs_sync);
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_run_is_idempotent() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        engine
            .store()
            .create_note("Shopping", "milk eggs bread", Some("u1"))
            .await
            .unwrap();

        let first = engine.synchronize().await;
        assert_eq!(first.uploaded, 1);

        let second = engine.synchronize().await;
        assert!(second.success);
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.downloaded, 0);
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_deduplicates_against_existing_remote() {
        let remote = MemoryRemote::new();
        let doc_id = remote
            .put_note(None, &remote_doc("u1", "Shopping", "milk eggs bread", 500))
            .await
            .unwrap();

        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));
        let note = engine
            .store()
            .create_note("Shopping", "milk eggs bread", Some("u1"))
            .await
            .unwrap();

        let report = engine.synchronize().await;
        assert!(report.success);
        assert_eq!(report.uploaded, 1);
        // Linked to the existing document instead of creating a duplicate.
        assert_eq!(remote.note_count(), 1);

        let linked = engine
            .store()
            .get_note(note.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.cloud_id.as_deref(), Some(doc_id.as_str()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_merges_remote_newer_and_counts_conflict() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let mut note = Note::new("Shopping", "milk eggs bread");
        note.modified_at = 1000;
        note.owner_id = Some("u1".to_string());
        let id = engine.store().upsert_note(&note).await.unwrap();

        let incoming = vec![RemoteNote {
            doc_id: "abc".to_string(),
            doc: remote_doc("u1", "Shopping", "milk eggs bread", 2000),
        }];
        let counts = engine.merge_remote_notes(incoming).await.unwrap();
        assert_eq!(counts.overwritten, 1);
        assert!(counts.completed);

        let merged = engine.store().get_note(id).await.unwrap().unwrap();
        assert_eq!(merged.cloud_id.as_deref(), Some("abc"));
        assert_eq!(merged.modified_at, 2000);
        assert_eq!(merged.title, "Shopping");
        assert_eq!(merged.body, "milk eggs bread");
        assert!(!merged.needs_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_newer_wins_and_backfills_link() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let mut note = Note::new("Shopping", "local edits");
        note.modified_at = 5000;
        note.owner_id = Some("u1".to_string());
        let id = engine.store().upsert_note(&note).await.unwrap();

        let incoming = vec![RemoteNote {
            doc_id: "abc".to_string(),
            doc: remote_doc("u1", "Shopping", "older remote", 4000),
        }];
        let counts = engine.merge_remote_notes(incoming).await.unwrap();
        assert_eq!(counts.overwritten, 0);
        assert_eq!(counts.linked, 1);

        let local = engine.store().get_note(id).await.unwrap().unwrap();
        assert_eq!(local.cloud_id.as_deref(), Some("abc"));
        assert_eq!(local.body, "local edits");
        assert_eq!(local.modified_at, 5000);
        // Backfilling the link does not clear the dirty flag.
        assert!(local.needs_sync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn equal_timestamps_leave_local_untouched() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let mut note = Note::new("Shopping", "same");
        note.modified_at = 3000;
        note.cloud_id = Some("abc".to_string());
        note.needs_sync = false;
        engine.store().upsert_note(&note).await.unwrap();

        let incoming = vec![RemoteNote {
            doc_id: "abc".to_string(),
            doc: remote_doc("u1", "Shopping", "same", 3000),
        }];
        let counts = engine.merge_remote_notes(incoming).await.unwrap();
        assert_eq!(counts.unchanged, 1);
        assert_eq!(counts.overwritten, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dirty_local_keeps_style_fields_on_overwrite() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let mut note = Note::new("Shopping", "old");
        note.modified_at = 1000;
        note.color_tag = Some(4);
        note.is_favorite = true;
        note.needs_sync = true;
        let id = engine.store().upsert_note(&note).await.unwrap();

        let mut doc = remote_doc("u1", "Shopping", "new", 2000);
        doc.color_id = Some(9);
        doc.is_favorite = Some(false);

        let counts = engine
            .merge_remote_notes(vec![RemoteNote {
                doc_id: "abc".to_string(),
                doc,
            }])
            .await
            .unwrap();
        assert_eq!(counts.overwritten, 1);

        let merged = engine.store().get_note(id).await.unwrap().unwrap();
        assert_eq!(merged.body, "new");
        assert_eq!(merged.color_tag, Some(4));
        assert!(merged.is_favorite);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn precondition_failures_reject_without_work() {
        let remote = MemoryRemote::new();

        let session = StaticSession::signed_in("u1");
        session.set_connected(false);
        let engine = test_engine(remote.clone(), session);
        let report = engine.synchronize().await;
        assert!(!report.success);
        assert_eq!(report.error_message.as_deref(), Some(ERROR_NO_CONNECTION));
        assert_eq!(engine.status().borrow().state, SyncState::ErrorConnection);

        let session = StaticSession::signed_out();
        let engine = test_engine(remote, session);
        let report = engine.synchronize().await;
        assert!(!report.success);
        assert_eq!(report.error_message.as_deref(), Some(ERROR_NOT_SIGNED_IN));
        assert_eq!(engine.status().borrow().state, SyncState::ErrorAuth);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn debounce_rejects_rapid_second_call() {
        let remote = MemoryRemote::new();
        let store = StoreService::open_in_memory().unwrap();
        let engine = SyncEngine::with_options(
            store,
            remote,
            StaticSession::signed_in("u1"),
            SyncOptions::default().with_debounce(Duration::from_secs(60)),
        );

        let first = engine.synchronize().await;
        assert!(first.success);

        let second = engine.synchronize().await;
        assert!(!second.success);
        assert_eq!(
            second.error_message.as_deref(),
            Some(ERROR_SYNC_DEBOUNCED)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_failure_preserves_upload_counts() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        // An untitled short note skips every resolver query, so the upload
        // succeeds even with the query endpoint down.
        engine
            .store()
            .create_note("", "quick thought", Some("u1"))
            .await
            .unwrap();
        remote.set_fail_queries(true);

        let report = engine.synchronize().await;
        assert!(!report.success);
        assert!(report.error_message.is_some());
        assert_eq!(engine.status().borrow().state, SyncState::ErrorSync);
        // The completed upload phase is still reported.
        assert_eq!(report.uploaded, 1);
        assert_eq!(remote.note_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_survives_on_cached_snapshot() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        remote
            .put_note(None, &remote_doc("u1", "Seeded", "from another device", 100))
            .await
            .unwrap();

        // First pass primes the cache.
        let report = engine.synchronize().await;
        assert!(report.success);
        assert_eq!(report.downloaded, 1);

        // Offline: server source fails, cache source serves the snapshot.
        remote.set_offline(true);
        let report = engine.synchronize().await;
        assert!(report.success);
        assert_eq!(report.downloaded, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_stops_merge_without_rollback() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote, StaticSession::signed_in("u1"));

        engine.request_cancel();
        let counts = engine
            .merge_remote_notes(vec![RemoteNote {
                doc_id: "abc".to_string(),
                doc: remote_doc("u1", "Shopping", "milk", 100),
            }])
            .await
            .unwrap();
        assert!(!counts.completed);
        assert_eq!(counts.inserted, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn categories_sync_before_notes_and_map_references() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let category = engine
            .store()
            .create_category("Groceries", Some("u1"))
            .await
            .unwrap();
        let mut note = Note::new("Shopping", "milk");
        note.category_id = category.id;
        note.owner_id = Some("u1".to_string());
        let note_id = engine.store().upsert_note(&note).await.unwrap();

        let report = engine.synchronize().await;
        assert!(report.success);
        assert_eq!(report.uploaded, 2);

        let category = engine
            .store()
            .get_category(category.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(category.is_linked());

        // The uploaded note document carries the category's cloud id.
        let note = engine.store().get_note(note_id).await.unwrap().unwrap();
        let remote_note = remote
            .get_note(note.cloud_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote_note.category_id, category.cloud_id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn permanent_delete_removes_remote_document() {
        let remote = MemoryRemote::new();
        let engine = test_engine(remote.clone(), StaticSession::signed_in("u1"));

        let note = engine
            .store()
            .create_note("Doomed", "delete me", Some("u1"))
            .await
            .unwrap();
        engine.synchronize().await;
        assert_eq!(remote.note_count(), 1);

        engine
            .delete_note_permanently(note.id.unwrap())
            .await
            .unwrap();
        assert_eq!(remote.note_count(), 0);
        assert!(engine
            .store()
            .get_note(note.id.unwrap())
            .await
            .unwrap()
            .is_none());
    }
}
