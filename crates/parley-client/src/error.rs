//! Client error taxonomy

use thiserror::Error;

/// Local persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {message}")]
    Other { message: String },
}

impl StorageError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the session, sync and completion layers.
///
/// A failed round trip is split by cause: `Transport` when the server was
/// not reached, `Http` for an unexpected status and `InvalidResponse` for a
/// body that does not parse. [`ClientError::is_transport`] groups the three.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Registration not allowed for this username")]
    NotAllowed,

    #[error("Account already exists. Please log in.")]
    AlreadyRegistered,

    #[error("Session is invalid or expired")]
    Unauthorized,

    #[error("Site quota exhausted for today")]
    QuotaExhausted,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx answer not covered by a more specific variant
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ClientError {
    /// The request did not complete usefully: unreachable server, unexpected
    /// status or unreadable body
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http { .. } | Self::InvalidResponse(_)
        )
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::NotAllowed => "not_allowed",
            Self::AlreadyRegistered => "already_registered",
            Self::Unauthorized => "unauthorized",
            Self::QuotaExhausted => "quota_exhausted",
            Self::Cancelled => "cancelled",
            Self::NotSignedIn => "not_signed_in",
            Self::Transport(_) => "transport",
            Self::Http { .. } => "http",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_messages() {
        assert_eq!(ClientError::QuotaExhausted.kind(), "quota_exhausted");
        assert_eq!(
            ClientError::QuotaExhausted.to_string(),
            "Site quota exhausted for today"
        );

        let err: ClientError = StorageError::other("disk full").into();
        assert_eq!(err.kind(), "storage");
        assert_eq!(err.to_string(), "Storage error: disk full");
    }

    #[test]
    fn test_is_transport() {
        assert!(ClientError::Transport("refused".to_string()).is_transport());
        assert!(ClientError::Http {
            status: 500,
            message: "boom".to_string()
        }
        .is_transport());
        assert!(ClientError::InvalidResponse("not json".to_string()).is_transport());
        assert!(!ClientError::Unauthorized.is_transport());
        assert!(!ClientError::InvalidCredentials.is_transport());
        assert!(!ClientError::from(StorageError::other("x")).is_transport());
    }
}
