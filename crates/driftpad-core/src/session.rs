//! Session state consumed as sync preconditions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Authenticated-principal and connectivity state, provided by the host
/// application. The sync engine only reads it; establishing sessions is an
/// external collaborator's job.
pub trait SessionProvider: Send + Sync {
    /// The principal whose records are being synchronized.
    fn owner_id(&self) -> Option<String>;

    /// Whether a principal is currently signed in.
    fn is_authenticated(&self) -> bool;

    /// Whether the network is currently reachable.
    fn is_connected(&self) -> bool;
}

/// A session with externally toggled flags. Suits CLI wiring and tests.
#[derive(Clone)]
pub struct StaticSession {
    owner_id: Option<String>,
    authenticated: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl StaticSession {
    /// A signed-in, connected session for the given principal.
    #[must_use]
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            authenticated: Arc::new(AtomicBool::new(true)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A session with no principal.
    #[must_use]
    pub fn signed_out() -> Self {
        Self {
            owner_id: None,
            authenticated: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SessionProvider for StaticSession {
    fn owner_id(&self) -> Option<String> {
        self.owner_id.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
