use std::fmt;

use super::ENV_PREFIX;

const MASK: &str = "***";

/// Site account credentials, read from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
    pub user_id: Option<String>,
}

/// Which field an identity is typed into on the login form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Email,
    UserId,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            email: get("EMAIL"),
            password: get("PASSWORD"),
            user_id: get("USER_ID"),
        }
    }

    /// Login identities in priority order: email first, then user id.
    ///
    /// Empty when no password is configured.
    pub fn identities(&self) -> Vec<(IdentityKind, &str)> {
        if self.password.is_none() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(2);
        if let Some(email) = self.email.as_deref() {
            out.push((IdentityKind::Email, email));
        }
        if let Some(user_id) = self.user_id.as_deref() {
            out.push((IdentityKind::UserId, user_id));
        }
        out
    }

    pub fn is_configured(&self) -> bool {
        !self.identities().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| MASK))
            .field("user_id", &self.user_id)
            .finish()
    }
}
