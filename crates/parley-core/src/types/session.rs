use serde::{Deserialize, Serialize};

/// Bearer-token credential for an authenticated user
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub username: String,
}

impl Session {
    pub fn new(token: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: username.into(),
        }
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new("deadbeef", "curtis");
        let printed = format!("{:?}", session);
        assert!(printed.contains("curtis"));
        assert!(!printed.contains("deadbeef"));
        assert_eq!(session.bearer(), "Bearer deadbeef");
    }
}
