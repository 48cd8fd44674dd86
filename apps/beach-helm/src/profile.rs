use serde::{Deserialize, Serialize};

/// Capability flags resolved for a session when it is admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub is_admin: bool,
    pub can_host: bool,
}

impl Profile {
    pub const fn admin() -> Self {
        Self {
            is_admin: true,
            can_host: true,
        }
    }

    pub const fn user() -> Self {
        Self {
            is_admin: false,
            can_host: true,
        }
    }

    /// Watch-only participant.
    pub const fn viewer() -> Self {
        Self {
            is_admin: false,
            can_host: false,
        }
    }
}

/// What a route or inbound message demands of its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Any,
    CanHost,
    Admin,
    /// Admins, or whoever holds control right now.
    HostOrAdmin,
}

impl Capability {
    pub fn permits(self, profile: &Profile, is_host: bool) -> bool {
        match self {
            Capability::Any => true,
            Capability::CanHost => profile.can_host,
            Capability::Admin => profile.is_admin,
            Capability::HostOrAdmin => profile.is_admin || (is_host && profile.can_host),
        }
    }

    pub fn denial_reason(self) -> &'static str {
        match self {
            Capability::Any => "not permitted",
            Capability::CanHost => "session is not allowed to host",
            Capability::Admin => "session is not an admin",
            Capability::HostOrAdmin => "session is neither the host nor an admin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Capability::Any => "any",
            Capability::CanHost => "can_host",
            Capability::Admin => "admin",
            Capability::HostOrAdmin => "host_or_admin",
        }
    }
}
