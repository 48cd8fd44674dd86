use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::control::Control;
use crate::desktop::{Desktop, ScreenSize};
use crate::error::ControlError;
use crate::metrics;
use crate::profile::Capability;
use crate::protocol::{ClientMessage, ScreenSizeUpdate, ServerEvent, SettingsPatch};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Routes inbound session messages to their handlers after checking the
/// sender's profile against what the message requires.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    desktop: Arc<dyn Desktop>,
    control: Control,
    // Serializes apply + announce so screen/updated events follow apply order.
    screen: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, desktop: Arc<dyn Desktop>, control: Control) -> Self {
        Self {
            registry,
            desktop,
            control,
            screen: Arc::new(Mutex::new(())),
        }
    }

    pub fn required_capability(message: &ClientMessage) -> Capability {
        match message {
            ClientMessage::ScreenSet(_) | ClientMessage::SettingsSet(_) => Capability::Admin,
            ClientMessage::ControlRequest | ClientMessage::ControlRelease => Capability::CanHost,
            ClientMessage::ControlGive(_) => Capability::HostOrAdmin,
            ClientMessage::Ping => Capability::Any,
        }
    }

    pub fn dispatch(&self, session: &Session, message: ClientMessage) -> Result<(), ControlError> {
        let kind = message.name();
        metrics::record_message(kind);

        let capability = Self::required_capability(&message);
        if !capability.permits(&session.profile(), session.is_host()) {
            let err = ControlError::forbidden(capability.denial_reason());
            metrics::record_denied(kind, &err);
            debug!(
                session_id = %session.id(),
                message = kind,
                required = capability.label(),
                "message rejected by permission check"
            );
            return Err(err);
        }

        match message {
            ClientMessage::ScreenSet(size) => self.screen_set(session, size),
            ClientMessage::SettingsSet(patch) => self.settings_set(session, &patch),
            ClientMessage::ControlRequest => self.control.request(session).map(|_| ()),
            ClientMessage::ControlRelease => self.control.release(session),
            ClientMessage::ControlGive(target) => self.control.give(session, &target.id),
            ClientMessage::Ping => {
                session.send(ServerEvent::Pong);
                Ok(())
            }
        }
    }

    fn screen_set(&self, session: &Session, requested: ScreenSize) -> Result<(), ControlError> {
        let _ordered = self.screen.lock();
        let actual = self.desktop.set_screen_size(requested)?;
        self.registry
            .broadcast(ServerEvent::ScreenUpdated(ScreenSizeUpdate {
                id: session.id().to_string(),
                screen_size: actual,
            }));
        info!(session_id = %session.id(), %requested, %actual, "screen size updated");
        Ok(())
    }

    fn settings_set(&self, session: &Session, patch: &SettingsPatch) -> Result<(), ControlError> {
        self.registry.update_settings(session.id(), patch);
        Ok(())
    }
}
