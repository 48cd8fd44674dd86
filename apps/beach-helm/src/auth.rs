use crate::profile::Profile;

/// Resolves the credential presented on connect into capability flags.
/// Credential issuance lives elsewhere; only the resulting profile matters here.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<Profile>;
}

/// Shared-secret resolver: one token each for admins, regular users and
/// watch-only viewers.
#[derive(Debug, Clone, Default)]
pub struct TokenResolver {
    admin_token: Option<String>,
    user_token: Option<String>,
    viewer_token: Option<String>,
}

impl TokenResolver {
    pub fn new(admin_token: Option<String>, user_token: Option<String>) -> Self {
        Self {
            admin_token: non_empty(admin_token),
            user_token: non_empty(user_token),
            viewer_token: None,
        }
    }

    pub fn with_viewer_token(mut self, viewer_token: Option<String>) -> Self {
        self.viewer_token = non_empty(viewer_token);
        self
    }

    /// No tokens configured: every connection is admitted as a regular user.
    pub fn is_open(&self) -> bool {
        self.admin_token.is_none() && self.user_token.is_none() && self.viewer_token.is_none()
    }
}

fn non_empty(token: Option<String>) -> Option<String> {
    token.filter(|value| !value.trim().is_empty())
}

impl ProfileResolver for TokenResolver {
    fn resolve(&self, token: &str) -> Option<Profile> {
        if self.admin_token.as_deref() == Some(token) {
            return Some(Profile::admin());
        }
        if self.user_token.as_deref() == Some(token) || self.is_open() {
            return Some(Profile::user());
        }
        if self.viewer_token.as_deref() == Some(token) {
            return Some(Profile::viewer());
        }
        None
    }
}
