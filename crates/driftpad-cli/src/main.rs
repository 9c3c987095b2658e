//! driftpad CLI - Local-first notes that reconcile themselves across devices
//!
//! Capture and list notes locally; `sync` reconciles them against the
//! configured remote store, `watch` follows remote changes live.

mod config;

use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use driftpad_core::remote::http::{HttpRemote, HttpRemoteConfig};
use driftpad_core::session::StaticSession;
use driftpad_core::sync::feed::ChangeFeed;
use driftpad_core::{Note, StoreService, SyncEngine, SyncReport};
use serde::Serialize;
use thiserror::Error;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "driftpad")]
#[command(about = "Local-first notes with bidirectional cloud sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Optional path to config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title
        #[arg(short, long, default_value = "")]
        title: String,
        /// Note body (reads stdin when omitted)
        body: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a note to the trash
    Trash {
        /// Local note id
        id: i64,
    },
    /// Permanently delete a note, remotely too when linked
    Delete {
        /// Local note id
        id: i64,
    },
    /// Synchronize with the remote store
    Sync,
    /// Show sync configuration and pending changes
    Status,
    /// Follow remote changes until interrupted
    Watch,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] driftpad_core::Error),
    #[error(transparent)]
    Remote(#[from] driftpad_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Note not found: {0}")]
    NoteNotFound(i64),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set remote_url and owner_id in the config file \
         or DRIFTPAD_REMOTE_URL / DRIFTPAD_OWNER_ID to enable syncing."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("driftpad=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config = CliConfig::load(Some(&resolve_config_path(cli.config)))
        .map_err(CliError::Config)?;
    let store = open_store(&db_path)?;

    match cli.command {
        Commands::Add { title, body } => run_add(&store, &config, &title, &body).await?,
        Commands::List { limit, json } => run_list(&store, limit, json).await?,
        Commands::Trash { id } => run_trash(&store, id).await?,
        Commands::Delete { id } => run_delete(&store, &config, id).await?,
        Commands::Sync => run_sync(&store, &config).await?,
        Commands::Status => run_status(&store, &config).await?,
        Commands::Watch => run_watch(&store, &config).await?,
    }

    Ok(())
}

async fn run_add(
    store: &StoreService,
    config: &CliConfig,
    title: &str,
    body_parts: &[String],
) -> Result<(), CliError> {
    let body = resolve_body(body_parts)?;
    let note = store
        .create_note(title, &body, config.owner_id.as_deref())
        .await?;
    println!("{}", note.id.unwrap_or_default());
    Ok(())
}

#[derive(Debug, Serialize)]
struct NoteListItem {
    id: i64,
    title: String,
    preview: String,
    modified_at: i64,
    relative_time: String,
    needs_sync: bool,
    linked: bool,
}

async fn run_list(store: &StoreService, limit: usize, as_json: bool) -> Result<(), CliError> {
    let notes = store.list_notes(limit, 0).await?;

    if as_json {
        let items = notes.iter().map(note_to_list_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_trash(store: &StoreService, id: i64) -> Result<(), CliError> {
    match store.trash_note(id).await {
        Ok(note) => {
            println!("{}", note.id.unwrap_or_default());
            Ok(())
        }
        Err(driftpad_core::Error::NotFound(_)) => Err(CliError::NoteNotFound(id)),
        Err(error) => Err(error.into()),
    }
}

async fn run_delete(store: &StoreService, config: &CliConfig, id: i64) -> Result<(), CliError> {
    let Some(note) = store.get_note(id).await? else {
        return Err(CliError::NoteNotFound(id));
    };

    if note.is_linked() {
        // A linked note must be deleted remotely too.
        let engine = build_engine(store.clone(), config)?;
        engine.delete_note_permanently(id).await?;
    } else {
        store.delete_note_permanent(id).await?;
    }
    println!("{id}");
    Ok(())
}

async fn run_sync(store: &StoreService, config: &CliConfig) -> Result<(), CliError> {
    let engine = build_engine(store.clone(), config)?;
    let report = engine.synchronize().await;
    print_report(&report);

    if report.success {
        Ok(())
    } else {
        Err(CliError::Config(
            report
                .error_message
                .unwrap_or_else(|| "synchronization failed".to_string()),
        ))
    }
}

async fn run_status(store: &StoreService, config: &CliConfig) -> Result<(), CliError> {
    let dirty = store.dirty_notes().await?;
    let total = store.active_notes().await?.len();

    if config.is_remote_configured() {
        println!(
            "remote: {}",
            config.remote_url.as_deref().unwrap_or_default()
        );
        println!("owner: {}", config.owner_id.as_deref().unwrap_or_default());
    } else {
        println!("remote: not configured");
    }
    println!("notes: {total}");
    println!("pending sync: {}", dirty.len());
    Ok(())
}

async fn run_watch(store: &StoreService, config: &CliConfig) -> Result<(), CliError> {
    let engine = Arc::new(build_engine(store.clone(), config)?);
    let subscription = engine.subscribe_changes().await?;
    let feed = ChangeFeed::new(Arc::clone(&engine), subscription);
    let stop = feed.handle();

    println!("Watching for remote changes (Ctrl-C to stop)...");
    let feed_task = tokio::spawn(feed.run());

    tokio::signal::ctrl_c().await?;
    stop.cancel();

    match feed_task.await {
        Ok(Ok(summary)) => {
            println!(
                "applied {} change(s), dropped {} batch(es)",
                summary.applied, summary.dropped_batches
            );
            Ok(())
        }
        Ok(Err(error)) => Err(error.into()),
        Err(join_error) => Err(CliError::Config(join_error.to_string())),
    }
}

fn build_engine(
    store: StoreService,
    config: &CliConfig,
) -> Result<SyncEngine<HttpRemote, StaticSession>, CliError> {
    if !config.is_remote_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let remote_url = config.remote_url.clone().unwrap_or_default();
    let owner_id = config.owner_id.clone().unwrap_or_default();

    let mut remote_config = HttpRemoteConfig::new(remote_url);
    if let Some(api_key) = &config.api_key {
        remote_config = remote_config.with_api_key(api_key.clone());
    }
    if let Some(secs) = config.poll_interval_secs {
        remote_config = remote_config.with_poll_interval(Duration::from_secs(secs));
    }

    let remote = HttpRemote::new(remote_config)?;
    let session = StaticSession::signed_in(owner_id);
    tracing::info!(
        "Remote sync enabled: {}",
        config.remote_url.as_deref().unwrap_or_default()
    );
    Ok(SyncEngine::new(store, remote, session))
}

fn print_report(report: &SyncReport) {
    println!(
        "uploaded {}, downloaded {}, conflicts {}",
        report.uploaded, report.downloaded, report.conflicts
    );
    if let Some(message) = &report.error_message {
        println!("error: {message}");
    }
}

fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = chrono::Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.unwrap_or_default(),
        title: note.title.clone(),
        preview: note_preview(note, 60),
        modified_at: note.modified_at,
        relative_time: format_relative_time(note.modified_at, now_ms),
        needs_sync: note.needs_sync,
        linked: note.is_linked(),
    }
}

fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let id = note.id.unwrap_or_default();
            let title = truncate_chars(&note.title, 24);
            let preview = note_preview(note, 48);
            let marker = if note.needs_sync { "*" } else { " " };
            let relative_time = format_relative_time(note.modified_at, now_ms);
            format!("{id:>5}{marker} {title:<24}  {preview:<48}  {relative_time}")
        })
        .collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.body.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let take_len = max_chars.saturating_sub(3);
    let mut truncated = text.chars().take(take_len).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn resolve_body(body_parts: &[String]) -> Result<String, CliError> {
    let joined = body_parts.join(" ");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        return Ok(trimmed.to_string());
    }

    if let Some(piped) = read_piped_stdin()? {
        return Ok(piped);
    }
    Err(CliError::EmptyContent)
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("DRIFTPAD_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("driftpad")
        .join("driftpad.db")
}

fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("DRIFTPAD_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("driftpad")
                .join("config.json")
        })
}

fn open_store(path: &Path) -> Result<StoreService, CliError> {
    Ok(StoreService::open_path(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn add_and_list_round_trip() {
        let store = StoreService::open_in_memory().unwrap();
        let config = CliConfig::default();

        run_add(
            &store,
            &config,
            "Shopping",
            &["milk".to_string(), "eggs".to_string()],
        )
        .await
        .unwrap();

        let notes = store.list_notes(10, 0).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Shopping");
        assert_eq!(notes[0].body, "milk eggs");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn trash_hides_note_from_list() {
        let store = StoreService::open_in_memory().unwrap();
        let note = store.create_note("a", "b", None).await.unwrap();

        run_trash(&store, note.id.unwrap()).await.unwrap();
        assert!(store.list_notes(10, 0).await.unwrap().is_empty());

        let missing = run_trash(&store, 999).await;
        assert!(matches!(missing, Err(CliError::NoteNotFound(999))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_unlinked_note_works_without_remote() {
        let store = StoreService::open_in_memory().unwrap();
        let config = CliConfig::default();
        let note = store.create_note("a", "b", None).await.unwrap();

        run_delete(&store, &config, note.id.unwrap()).await.unwrap();
        assert!(store.get_note(note.id.unwrap()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_requires_configuration() {
        let store = StoreService::open_in_memory().unwrap();
        let config = CliConfig::default();

        let error = run_sync(&store, &config).await.unwrap_err();
        assert!(matches!(error, CliError::SyncNotConfigured));
    }

    #[test]
    fn build_engine_rejects_missing_config() {
        let store = StoreService::open_in_memory().unwrap();
        let error = build_engine(store, &CliConfig::default()).unwrap_err();
        assert!(matches!(error, CliError::SyncNotConfigured));
    }

    #[test]
    fn format_note_lines_marks_dirty_notes() {
        let mut clean = Note::new("Synced", "body text");
        clean.id = Some(1);
        clean.needs_sync = false;
        let mut dirty = Note::new("Pending", "body text");
        dirty.id = Some(2);

        let lines = format_note_lines(&[clean, dirty]);
        assert!(lines[0].starts_with("    1  "));
        assert!(lines[1].starts_with("    2* "));
    }

    #[test]
    fn note_preview_collapses_and_truncates() {
        let note = Note::new("t", "first   line with    spaces\nsecond line");
        assert_eq!(note_preview(&note, 60), "first line with spaces");

        let long = Note::new("t", "a".repeat(100));
        assert_eq!(note_preview(&long, 10).chars().count(), 10);
        assert!(note_preview(&long, 10).ends_with("..."));
    }

    #[test]
    fn resolve_db_path_prefers_cli_flag() {
        let explicit = resolve_db_path(Some(PathBuf::from("/tmp/custom.db")));
        assert_eq!(explicit, PathBuf::from("/tmp/custom.db"));
    }

    #[test]
    fn format_relative_time_units() {
        let now = 10_000_000;
        assert_eq!(format_relative_time(now - 30_000, now), "just now");
        assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
        assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notes_persist_across_store_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("driftpad.db");

        {
            let store = open_store(&db_path).unwrap();
            store.create_note("Durable", "still here", None).await.unwrap();
        }

        let store = open_store(&db_path).unwrap();
        let notes = store.list_notes(10, 0).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Durable");
    }
}
