//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the failures that can occur between the serial port and the time-series sink.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the device could not be opened. Fatal at startup.
//! - **`NotConnected`**: an exchange was attempted on a closed session. Programming error.
//! - **`Transport`**: an I/O error on an open stream. Triggers a reconnect attempt.
//! - **`Parse`**: a reply did not match its command's shape. Recoverable, one reading is skipped.
//! - **`Publish`**: the sink refused a data point. Recoverable, one point is skipped.
//! - **`Config`** / **`Configuration`**: the configuration could not be loaded or is invalid.
//!
//! `ParseFailure` and `PublishError` are standalone types so that the parser and the sink
//! can return them without depending on the full enum; `#[from]` folds them into `DaqError`.

use crate::instrument::command::Command;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// A reply that did not match the shape expected for its command.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("could not parse reply for command {command}: raw='{raw}' ({reason})")]
pub struct ParseFailure {
    /// Command whose reply failed to parse.
    pub command: Command,
    /// Trimmed reply text as received.
    pub raw: String,
    /// What did not match.
    pub reason: String,
}

impl ParseFailure {
    pub(crate) fn new(command: Command, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            command,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// The sink rejected or failed to accept a data point.
#[derive(Error, Debug)]
#[error("sink rejected field '{field}': {message}")]
pub struct PublishError {
    /// Field name of the rejected point.
    pub field: String,
    /// Cause reported by the sink or the client.
    pub message: String,
    /// HTTP status, when the sink answered at all.
    pub status: Option<u16>,
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("could not open device at {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Whether the poll loop may continue after this error.
    ///
    /// Parse and publish failures cost one value. Transport errors are recoverable
    /// through a reconnect. Everything else ends the process.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Parse(_) | DaqError::Publish(_) | DaqError::Transport(_)
        )
    }
}
