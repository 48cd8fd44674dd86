//! Control transfer protocol: status, request, release, take, give, reset.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::desktop::Desktop;
use crate::error::ControlError;
use crate::metrics;
use crate::registry::{HostClaim, SessionRegistry};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub has_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The requester holds control now.
    Granted,
    /// The current host was asked; control did not move.
    Pending,
}

#[derive(Clone)]
pub struct Control {
    registry: SessionRegistry,
    desktop: Arc<dyn Desktop>,
}

impl Control {
    pub fn new(registry: SessionRegistry, desktop: Arc<dyn Desktop>) -> Self {
        Self { registry, desktop }
    }

    pub fn status(&self) -> ControlStatus {
        let host = self.registry.control_host();
        ControlStatus {
            has_host: host.has_host,
            host_id: host.host_id,
        }
    }

    /// Ask for control. Never preempts: with a host present only that host is
    /// notified, and the eventual `control/host` broadcast is the answer.
    pub fn request(&self, session: &Session) -> Result<RequestOutcome, ControlError> {
        // TODO: throttle repeated requests from the same session once clients retry on a timer.
        match self.registry.claim_host(session.id()) {
            Ok(HostClaim::Granted) => {
                metrics::record_transition("request");
                Ok(RequestOutcome::Granted)
            }
            Ok(HostClaim::Pending { host, notified }) => {
                debug!(
                    session_id = %session.id(),
                    host_id = %host.id(),
                    notified,
                    "control request forwarded to host"
                );
                Ok(RequestOutcome::Pending)
            }
            Err(err) => Err(denied("request", session, err)),
        }
    }

    /// Give up control. Keys are reset only when this session still held
    /// control at the moment it was cleared.
    pub fn release(&self, session: &Session) -> Result<(), ControlError> {
        let desktop = &self.desktop;
        self.registry
            .clear_host_with(Some(session.id()), session.id(), || desktop.reset_keys())
            .ok_or_else(|| {
                denied(
                    "release",
                    session,
                    ControlError::unprocessable("session is not the host"),
                )
            })?;
        metrics::record_transition("release");
        Ok(())
    }

    /// Unconditional takeover; whoever held control loses it.
    pub fn take(&self, session: &Session) -> Result<(), ControlError> {
        session
            .set_as_host()
            .map_err(|err| denied("take", session, err))?;
        metrics::record_transition("take");
        info!(session_id = %session.id(), "control taken");
        Ok(())
    }

    pub fn give(&self, session: &Session, target_id: &str) -> Result<(), ControlError> {
        let target = self.registry.get(target_id).ok_or_else(|| {
            denied(
                "give",
                session,
                ControlError::not_found("target session was not found"),
            )
        })?;

        if !target.profile().can_host {
            return Err(denied(
                "give",
                session,
                ControlError::bad_request("target session is not allowed to host"),
            ));
        }

        target
            .set_as_host_by(session)
            .map_err(|err| denied("give", session, err))?;
        metrics::record_transition("give");
        info!(session_id = %session.id(), target_id = %target_id, "control given");
        Ok(())
    }

    /// Strip control from whoever holds it. Succeeds when the room is already hostless.
    pub fn reset(&self, session: &Session) -> Result<(), ControlError> {
        let desktop = &self.desktop;
        if let Some(previous) =
            self.registry
                .clear_host_with(None, session.id(), || desktop.reset_keys())
        {
            metrics::record_transition("reset");
            info!(session_id = %session.id(), previous = %previous, "control reset");
        }
        Ok(())
    }
}

fn denied(op: &'static str, session: &Session, err: ControlError) -> ControlError {
    metrics::record_denied(op, &err);
    debug!(op, session_id = %session.id(), error = %err, "control operation declined");
    err
}
