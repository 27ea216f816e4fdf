//! CLI error type.

use std::fmt;

use tileflow::config::ConfigError;
use tileflow::dispatcher::PoolError;
use tileflow::loader::FetchError;
use tileflow::logging::LoggingError;
use tileflow::source::SourceError;

/// Everything a command can fail with. Printed by `main` before exiting 1.
#[derive(Debug)]
pub enum CliError {
    /// Bad or missing configuration.
    Config(String),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// The worker pool could not start.
    Workers(PoolError),
    /// The source rejected its configuration.
    Source(SourceError),
    /// The HTTP client could not be built.
    Http(FetchError),
    /// Runtime or filesystem failure.
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Workers(e) => write!(f, "Worker pool error: {}", e),
            CliError::Source(e) => write!(f, "Source error: {}", e),
            CliError::Http(e) => write!(f, "HTTP client error: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<PoolError> for CliError {
    fn from(e: PoolError) -> Self {
        CliError::Workers(e)
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Http(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
