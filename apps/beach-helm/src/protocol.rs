use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::desktop::ScreenSize;
use crate::profile::Profile;

/// Room-wide control settings, changed by admins only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub locked_controls: bool,
}

/// Partial settings update sent by an admin; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_controls: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(locked) = self.locked_controls {
            settings.locked_controls = locked;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub profile: Profile,
    pub is_host: bool,
    pub connected_at: DateTime<Utc>,
}

/// Host status as announced to every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlHost {
    pub has_host: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Session that caused the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSizeUpdate {
    pub id: String,
    #[serde(flatten)]
    pub screen_size: ScreenSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub id: String,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInit {
    pub session_id: String,
    /// Credential for the HTTP control routes; never shown to other sessions.
    pub session_secret: String,
    pub profile: Profile,
    pub control: ControlHost,
    pub settings: Settings,
    pub screen_size: ScreenSize,
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Events the server pushes to connected sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "system/init")]
    SystemInit(SystemInit),
    #[serde(rename = "system/settings")]
    SettingsUpdated(SettingsUpdate),
    #[serde(rename = "system/pong")]
    Pong,
    #[serde(rename = "session/connected")]
    SessionConnected(SessionRef),
    #[serde(rename = "session/disconnected")]
    SessionDisconnected(SessionRef),
    #[serde(rename = "control/request")]
    ControlRequest(SessionRef),
    #[serde(rename = "control/host")]
    ControlHost(ControlHost),
    #[serde(rename = "screen/updated")]
    ScreenUpdated(ScreenSizeUpdate),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SystemInit(_) => "system/init",
            ServerEvent::SettingsUpdated(_) => "system/settings",
            ServerEvent::Pong => "system/pong",
            ServerEvent::SessionConnected(_) => "session/connected",
            ServerEvent::SessionDisconnected(_) => "session/disconnected",
            ServerEvent::ControlRequest(_) => "control/request",
            ServerEvent::ControlHost(_) => "control/host",
            ServerEvent::ScreenUpdated(_) => "screen/updated",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

/// Messages sessions send over their WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "screen/set")]
    ScreenSet(ScreenSize),
    #[serde(rename = "system/settings")]
    SettingsSet(SettingsPatch),
    #[serde(rename = "control/request")]
    ControlRequest,
    #[serde(rename = "control/release")]
    ControlRelease,
    #[serde(rename = "control/give")]
    ControlGive(SessionRef),
    #[serde(rename = "system/ping")]
    Ping,
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::ScreenSet(_) => "screen/set",
            ClientMessage::SettingsSet(_) => "system/settings",
            ClientMessage::ControlRequest => "control/request",
            ClientMessage::ControlRelease => "control/release",
            ClientMessage::ControlGive(_) => "control/give",
            ClientMessage::Ping => "system/ping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn screen_update_flattens_size() {
        let event = ServerEvent::ScreenUpdated(ScreenSizeUpdate {
            id: "s1".into(),
            screen_size: ScreenSize::new(1920, 1080, 30),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "screen/updated",
                "payload": {"id": "s1", "width": 1920, "height": 1080, "rate": 30}
            })
        );
    }

    #[test_timeout::timeout]
    fn no_host_event_omits_host_id() {
        let event = ServerEvent::ControlHost(ControlHost {
            has_host: false,
            host_id: None,
            id: Some("s2".into()),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "control/host", "payload": {"has_host": false, "id": "s2"}})
        );
    }

    #[test_timeout::timeout]
    fn client_messages_parse_with_and_without_payload() {
        let request: ClientMessage =
            serde_json::from_str(r#"{"event":"control/request"}"#).unwrap();
        assert_eq!(request, ClientMessage::ControlRequest);

        let screen: ClientMessage = serde_json::from_value(json!({
            "event": "screen/set",
            "payload": {"width": 1920, "height": 1080, "rate": 60}
        }))
        .unwrap();
        assert_eq!(screen, ClientMessage::ScreenSet(ScreenSize::new(1920, 1080, 60)));

        let settings: ClientMessage = serde_json::from_value(json!({
            "event": "system/settings",
            "payload": {}
        }))
        .unwrap();
        assert_eq!(settings, ClientMessage::SettingsSet(SettingsPatch::default()));
    }

    #[test_timeout::timeout]
    fn unknown_client_event_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"control/steal"}"#).is_err());
    }

    #[test_timeout::timeout]
    fn settings_patch_only_touches_present_fields() {
        let mut settings = Settings {
            locked_controls: true,
        };
        SettingsPatch::default().apply(&mut settings);
        assert!(settings.locked_controls);
        SettingsPatch {
            locked_controls: Some(false),
        }
        .apply(&mut settings);
        assert!(!settings.locked_controls);
    }
}
