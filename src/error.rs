//! Custom error types for the framework.
//!
//! This module defines the primary error type, `DaoError`, shared by every part of the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the failures that can occur in a component process, from configuration loading
//! to socket I/O to lifecycle violations.
//!
//! ## Error Hierarchy
//!
//! `DaoError` consolidates the following sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in a TOML settings file.
//! - **`Configuration`**: Semantic errors in configuration that parse fine but are
//!   logically wrong (e.g. an ingress and egress endpoint binding the same port).
//! - **`Io`**: Wraps `std::io::Error`, covering file and socket failures.
//! - **`Decode`**: A frame that could not be decoded as the expected protocol message.
//! - **`InvalidTransition`** / **`UnknownTransition`**: Lifecycle violations. These are
//!   always recoverable and are reported to remote callers as a FAILURE reply.
//! - **`Hook`**: A user-supplied hook failed or panicked.
//!
//! By using `#[from]`, `DaoError` can be created from the underlying error types with the
//! `?` operator.

use crate::state_machine::{State, Transition};
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaoError>;

/// Errors raised by components, the bus and the tools.
#[derive(Error, Debug)]
pub enum DaoError {
    /// Settings file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings that parsed but are unusable
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Undecodable wire message
    #[error("Protocol error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Malformed endpoint string
    #[error("Invalid endpoint '{0}'")]
    Endpoint(String),

    /// Transition fired from a state other than its source
    #[error("transition not allowed in current state: [{state} : {transition}]")]
    InvalidTransition {
        /// State the machine was in
        state: State,
        /// Transition that was refused
        transition: Transition,
    },

    /// EXEC payload naming no transition
    #[error("Failed to change state unknown transition {0}")]
    UnknownTransition(String),

    /// Unrecognised log level name
    #[error("Failed to set unknown log level: {0}")]
    UnknownLogLevel(String),

    /// User hook returned an error or panicked
    #[error("Hook failed: {0}")]
    Hook(String),

    /// A worker thread panicked
    #[error("Thread '{0}' panicked")]
    ThreadPanicked(String),

    /// No reply within the timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Peer or worker channel went away
    #[error("Channel closed")]
    ChannelClosed,

    /// Worker already running
    #[error("Resource busy: {0}")]
    Busy(String),

    /// Log file could not be opened
    #[error("Log file error: {0}")]
    LogFile(String),
}

impl From<figment::Error> for DaoError {
    fn from(value: figment::Error) -> Self {
        DaoError::Config(Box::new(value))
    }
}

impl DaoError {
    /// Whether a component can keep serving after this error.
    ///
    /// Configuration failures are the only class treated as fatal; everything else is
    /// answered to the caller and the component carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaoError::Config(_) | DaoError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_state_and_transition() {
        let err = DaoError::InvalidTransition {
            state: State::Off,
            transition: Transition::Run,
        };
        let text = err.to_string();
        assert!(text.contains("Off"));
        assert!(text.contains("Run"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(DaoError::Configuration("bad port".into()).is_fatal());
        assert!(!DaoError::UnknownLogLevel("LOUD".into()).is_fatal());
        assert!(!DaoError::Hook("boom".into()).is_fatal());
    }

    #[test]
    fn io_errors_convert_with_question_mark() {
        fn open_missing() -> AppResult<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here")?)
        }
        assert!(matches!(open_missing(), Err(DaoError::Io(_))));
    }
}
