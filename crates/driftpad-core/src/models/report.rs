//! Sync status and result types surfaced to client interfaces.

use serde::Serialize;

/// Current phase of the synchronization state machine.
///
/// `Cancelled` is reachable from any non-terminal state via cooperative
/// cancellation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SyncState {
    #[default]
    Idle,
    Connecting,
    Authenticating,
    SyncingUp,
    SyncingDown,
    Success,
    ErrorConnection,
    ErrorAuth,
    ErrorSync,
    Cancelled,
}

impl SyncState {
    /// Whether a synchronization pass is currently executing.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticating | Self::SyncingUp | Self::SyncingDown
        )
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::SyncingUp => "syncing up",
            Self::SyncingDown => "syncing down",
            Self::Success => "success",
            Self::ErrorConnection => "connection error",
            Self::ErrorAuth => "auth error",
            Self::ErrorSync => "sync error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Observable sync status: current state plus the completion time of the last
/// successful pass (Unix ms).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_sync_time: Option<i64>,
}

/// Outcome of one `synchronize()` call, handed to the UI collaborator.
///
/// `conflicts` counts remote-newer overwrites of local state. This is an
/// approximation of true concurrent-edit conflicts: it also fires when the
/// local copy was clean and merely older.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records successfully written to the remote store
    pub uploaded: usize,
    /// Remote records that produced a local insert or overwrite
    pub downloaded: usize,
    /// Remote-newer overwrites applied during merge
    pub conflicts: usize,
    /// Whether every attempted phase completed
    pub success: bool,
    /// Human-readable failure description, when not successful
    pub error_message: Option<String>,
}

impl SyncReport {
    /// A report for a run that never started (precondition or guard failure).
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}
