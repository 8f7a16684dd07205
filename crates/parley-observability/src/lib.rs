//! Parley observability
//!
//! Installs the `tracing` subscriber used by every Parley binary.

pub mod error;
pub mod logging;

pub use error::{ObservabilityError, Result};
pub use logging::{create_request_span, new_request_id, LogManager};

/// Install logging from a config section
pub fn init_logging(config: &parley_config::LoggingConfig) -> Result<LogManager> {
    LogManager::init(config)
}

pub mod prelude {
    pub use crate::{init_logging, LogManager, Result};
    pub use tracing::{debug, error, info, instrument, trace, warn, Span};
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_config::{LogLevel, LoggingConfig};

    #[test]
    fn test_init_logging_once() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            json: true,
            file: None,
        };
        let mut manager = init_logging(&config).unwrap();
        manager.update_level("warn").unwrap();
        assert_eq!(manager.level(), "warn");
        assert!(manager.update_level("warn,[[[").is_err());

        // global subscriber already installed
        assert!(init_logging(&config).is_err());
    }
}
