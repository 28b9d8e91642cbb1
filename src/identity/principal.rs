use serde::{Deserialize, Serialize};

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self { username: username.into(), roles: Vec::new() }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}
