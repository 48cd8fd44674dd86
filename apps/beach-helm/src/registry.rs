//! Per-room session registry.
//!
//! The registry is the single source of truth for who holds control. Every
//! membership change and host transition runs inside one critical section
//! (`RegistryInner::room`), and the events describing a transition are
//! enqueued before that section is left. Enqueueing is a non-blocking
//! `try_send` onto each recipient's bounded queue, so a stalled recipient can
//! never hold up the lock, and every recipient observes host changes in the
//! order they were committed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::desktop::ScreenSize;
use crate::error::ControlError;
use crate::metrics;
use crate::profile::Profile;
use crate::protocol::{
    ControlHost, ServerEvent, SessionInfo, SessionRef, Settings, SettingsPatch, SettingsUpdate,
    SystemInit,
};
use crate::session::{generate_session_id, Delivery, Session, SessionState};

pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    room: Mutex<Room>,
    outbound_buffer: usize,
}

struct Room {
    sessions: HashMap<String, Arc<SessionState>>,
    settings: Settings,
}

/// Handed to the transport when a connection is admitted.
pub struct Registration {
    pub session: Session,
    pub receiver: mpsc::Receiver<ServerEvent>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Result of asking for control without preempting anyone.
#[derive(Debug)]
pub enum HostClaim {
    /// The requester now holds control (or already did).
    Granted,
    /// Someone else holds control; nothing changed. The host was sent a
    /// `control/request` before the lock was released; `notified` is false
    /// when its queue was full or closed.
    Pending { host: Session, notified: bool },
}

impl Room {
    /// The unique host, if any. Two flagged sessions means the locking
    /// discipline was broken and the room state can no longer be trusted.
    fn host(&self) -> Option<&Arc<SessionState>> {
        let mut hosts = self.sessions.values().filter(|session| session.is_host());
        let host = hosts.next();
        if let Some(second) = hosts.next() {
            let first = host.map(|session| session.id()).unwrap_or_default();
            error!(first = %first, second = %second.id(), "more than one session holds control");
            panic!("room invariant violated: sessions {first} and {} are both host", second.id());
        }
        host
    }

    fn control_host(&self) -> ControlHost {
        let host_id = self.host().map(|session| session.id().to_string());
        ControlHost {
            has_host: host_id.is_some(),
            host_id,
            id: None,
        }
    }

    fn fan_out(&self, event: &ServerEvent, except: Option<&str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for session in self.sessions.values() {
            if except == Some(session.id()) {
                continue;
            }
            match session.deliver(event.clone()) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Closed => report.closed += 1,
            }
        }
        report
    }

    fn announce_host(&self, host_id: Option<&str>, by: &str) {
        self.fan_out(
            &ServerEvent::ControlHost(ControlHost {
                has_host: host_id.is_some(),
                host_id: host_id.map(str::to_string),
                id: Some(by.to_string()),
            }),
            None,
        );
    }
}

impl SessionRegistry {
    pub fn new(settings: Settings, outbound_buffer: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                room: Mutex::new(Room {
                    sessions: HashMap::new(),
                    settings,
                }),
                outbound_buffer: outbound_buffer.max(1),
            }),
        }
    }

    /// Admit a connection. The new session's queue starts with `system/init`;
    /// everyone else is told about the newcomer.
    pub fn register(&self, profile: Profile, screen_size: ScreenSize) -> Registration {
        let (tx, receiver) = mpsc::channel(self.inner.outbound_buffer);
        let id = generate_session_id();
        let state = Arc::new(SessionState::new(id.clone(), profile, tx));

        let mut room = self.inner.room.lock();
        room.fan_out(
            &ServerEvent::SessionConnected(SessionRef { id: id.clone() }),
            None,
        );
        room.sessions.insert(id.clone(), Arc::clone(&state));

        let init = SystemInit {
            session_id: id.clone(),
            session_secret: state.secret().to_string(),
            profile,
            control: room.control_host(),
            settings: room.settings,
            screen_size,
            sessions: room.sessions.values().map(|session| session.info()).collect(),
        };
        state.deliver(ServerEvent::SystemInit(init));
        let active = room.sessions.len();
        drop(room);

        metrics::record_sessions_active(active);
        info!(session_id = %id, ?profile, active, "session registered");

        Registration {
            session: Session::new(state, self.clone()),
            receiver,
        }
    }

    /// Drop a session. If it held control, the room becomes hostless in the
    /// same critical section and that is announced once.
    pub fn remove(&self, id: &str) -> bool {
        let mut room = self.inner.room.lock();
        let Some(state) = room.sessions.remove(id) else {
            return false;
        };

        let was_host = state.is_host();
        if was_host {
            state.set_host_flag(false);
            room.announce_host(None, id);
        }
        room.fan_out(
            &ServerEvent::SessionDisconnected(SessionRef { id: id.to_string() }),
            None,
        );
        let active = room.sessions.len();
        drop(room);

        if was_host {
            metrics::record_transition("disconnect");
        }
        metrics::record_sessions_active(active);
        info!(session_id = %id, was_host, active, "session removed");
        true
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        let room = self.inner.room.lock();
        room.sessions
            .get(id)
            .map(|state| Session::new(Arc::clone(state), self.clone()))
    }

    pub fn get_host(&self) -> Option<Session> {
        let room = self.inner.room.lock();
        room.host()
            .map(|state| Session::new(Arc::clone(state), self.clone()))
    }

    pub fn control_host(&self) -> ControlHost {
        self.inner.room.lock().control_host()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let room = self.inner.room.lock();
        room.sessions.values().map(|session| session.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.room.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> Settings {
        self.inner.room.lock().settings
    }

    pub fn update_settings(&self, by: &str, patch: &SettingsPatch) -> Settings {
        let mut room = self.inner.room.lock();
        patch.apply(&mut room.settings);
        let settings = room.settings;
        room.fan_out(
            &ServerEvent::SettingsUpdated(SettingsUpdate {
                id: by.to_string(),
                settings,
            }),
            None,
        );
        info!(by = %by, ?settings, "room settings updated");
        settings
    }

    /// Deliver to every registered session. Per-recipient failures are
    /// counted, never propagated.
    pub fn broadcast(&self, event: ServerEvent) -> BroadcastReport {
        let room = self.inner.room.lock();
        let report = room.fan_out(&event, None);
        if report.dropped > 0 || report.closed > 0 {
            debug!(
                event = event.name(),
                delivered = report.delivered,
                dropped = report.dropped,
                closed = report.closed,
                "broadcast partially delivered"
            );
        }
        report
    }

    /// Make `target` the host, clearing the previous one. `by` is the session
    /// credited with the change. Reassigning the current host is a no-op.
    pub(crate) fn set_host(&self, target: &str, by: &str) -> Result<(), ControlError> {
        let room = self.inner.room.lock();
        let session = room
            .sessions
            .get(target)
            .ok_or_else(|| ControlError::not_found("target session was not found"))?;
        if !session.profile().can_host {
            return Err(ControlError::bad_request(
                "target session is not allowed to host",
            ));
        }
        if session.is_host() {
            return Ok(());
        }

        let previous = room.host().map(|prev| {
            prev.set_host_flag(false);
            prev.id().to_string()
        });
        session.set_host_flag(true);
        room.announce_host(Some(target), by);

        info!(host_id = %target, by = %by, previous = ?previous, "control transferred");
        Ok(())
    }

    /// Clear `target`'s host flag if it still has it.
    pub(crate) fn clear_host(&self, target: &str, by: &str) -> bool {
        self.clear_host_with(Some(target), by, || {}).is_some()
    }

    /// Clear the host flag of `target`, or of whoever holds control when
    /// `target` is `None`, and return the cleared session's id.
    ///
    /// `on_clear` runs inside the critical section right before the flag is
    /// dropped, so it only ever runs for a clear that actually happens. It
    /// must not call back into the registry.
    pub(crate) fn clear_host_with(
        &self,
        target: Option<&str>,
        by: &str,
        on_clear: impl FnOnce(),
    ) -> Option<String> {
        let room = self.inner.room.lock();
        let session = match target {
            Some(target) => room.sessions.get(target).filter(|session| session.is_host()),
            None => room.host(),
        }?;

        on_clear();
        session.set_host_flag(false);
        room.announce_host(None, by);

        let previous = session.id().to_string();
        info!(previous = %previous, by = %by, "control released");
        Some(previous)
    }

    /// Take control only if nobody holds it. Locked rooms only let admins
    /// bootstrap control.
    pub(crate) fn claim_host(&self, requester: &str) -> Result<HostClaim, ControlError> {
        let room = self.inner.room.lock();
        let session = room
            .sessions
            .get(requester)
            .ok_or_else(|| ControlError::not_found("session was not found"))?;

        if let Some(host) = room.host() {
            if host.id() == requester {
                return Ok(HostClaim::Granted);
            }
            let notified = host.deliver(ServerEvent::ControlRequest(SessionRef {
                id: requester.to_string(),
            })) == Delivery::Queued;
            return Ok(HostClaim::Pending {
                host: Session::new(Arc::clone(host), self.clone()),
                notified,
            });
        }

        let profile = session.profile();
        if room.settings.locked_controls && !profile.is_admin {
            return Err(ControlError::forbidden("controls are locked"));
        }
        if !profile.can_host {
            return Err(ControlError::forbidden("session is not allowed to host"));
        }

        session.set_host_flag(true);
        room.announce_host(Some(requester), requester);

        info!(host_id = %requester, "control granted on request");
        Ok(HostClaim::Granted)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Settings::default(), DEFAULT_OUTBOUND_BUFFER)
    }
}
