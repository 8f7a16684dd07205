//! Error type for logging setup

#[derive(Debug, thiserror::Error, Clone)]
pub enum ObservabilityError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Logging error: {message}")]
    Logging { message: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl ObservabilityError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for ObservabilityError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(ObservabilityError::config("bad").category(), "config");
        assert_eq!(ObservabilityError::logging("bad").category(), "logging");
        let io: ObservabilityError =
            std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(io.category(), "io");
    }
}
