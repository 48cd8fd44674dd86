use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::error::ControlError;
use crate::metrics;
use crate::profile::Profile;
use crate::protocol::{ServerEvent, SessionInfo};
use crate::registry::SessionRegistry;

/// Generate a new session ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-session credential for the HTTP control routes. Only ever sent to
/// the session it belongs to.
pub fn generate_session_secret() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Per-connection state owned by the registry.
///
/// The host flag is only ever written while the registry's room lock is held,
/// so readers outside the lock see a committed value.
pub(crate) struct SessionState {
    id: String,
    secret: String,
    profile: Profile,
    connected_at: DateTime<Utc>,
    host: AtomicBool,
    tx: mpsc::Sender<ServerEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Dropped,
    Closed,
}

impl SessionState {
    pub(crate) fn new(id: String, profile: Profile, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            secret: generate_session_secret(),
            profile,
            connected_at: Utc::now(),
            host: AtomicBool::new(false),
            tx,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub(crate) fn profile(&self) -> Profile {
        self.profile
    }

    pub(crate) fn is_host(&self) -> bool {
        self.host.load(Ordering::Acquire)
    }

    pub(crate) fn set_host_flag(&self, host: bool) {
        self.host.store(host, Ordering::Release);
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            profile: self.profile,
            is_host: self.is_host(),
            connected_at: self.connected_at,
        }
    }

    /// Non-blocking enqueue onto this session's outbound queue. A full queue
    /// drops the event for this recipient only.
    pub(crate) fn deliver(&self, event: ServerEvent) -> Delivery {
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                warn!(session_id = %self.id, event = name, "outbound queue full; dropping event");
                metrics::record_dropped(name);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// A connected participant, as seen by handlers.
///
/// Host transitions go through the owning registry, which serializes them
/// and clears any previous host first.
#[derive(Clone)]
pub struct Session {
    state: Arc<SessionState>,
    registry: SessionRegistry,
}

impl Session {
    pub(crate) fn new(state: Arc<SessionState>, registry: SessionRegistry) -> Self {
        Self { state, registry }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn profile(&self) -> Profile {
        self.state.profile()
    }

    pub fn secret(&self) -> &str {
        self.state.secret()
    }

    /// Whether `presented` is this session's secret.
    pub fn verify_secret(&self, presented: &str) -> bool {
        let expected = self.state.secret().as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len()
            && expected
                .iter()
                .zip(presented)
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.state.connected_at
    }

    pub fn is_host(&self) -> bool {
        self.state.is_host()
    }

    pub fn info(&self) -> SessionInfo {
        self.state.info()
    }

    /// Become host, preempting whoever holds control.
    pub fn set_as_host(&self) -> Result<(), ControlError> {
        self.registry.set_host(self.id(), self.id())
    }

    /// Become host on behalf of `grantor`, who is named in the announcement.
    pub fn set_as_host_by(&self, grantor: &Session) -> Result<(), ControlError> {
        self.registry.set_host(self.id(), grantor.id())
    }

    /// Drop control. Returns false when this session was not the host.
    pub fn clear_host(&self) -> bool {
        self.registry.clear_host(self.id(), self.id())
    }

    /// Strip this session of control on behalf of `by`.
    pub fn clear_host_by(&self, by: &Session) -> bool {
        self.registry.clear_host(self.id(), by.id())
    }

    /// Directed event to this session. Best effort: a full or closed queue is
    /// reported, never an error.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.state.deliver(event) == Delivery::Queued
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("profile", &self.profile())
            .field("is_host", &self.is_host())
            .finish()
    }
}
