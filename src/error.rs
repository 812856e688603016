//! Error taxonomy for the dialog engine
//!
//! Only `ActionExecution` may ever surface to an end user (through the
//! configured fallback message). Every other kind affects routing only.

use thiserror::Error;

/// Errors raised while loading flows, querying context or running a turn
#[derive(Debug, Error)]
pub enum DialogError {
    /// Malformed flow graph, ambiguous query filters, transition cap exceeded
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transition target is absent from the graph
    #[error("State {target} does not exist (staying at {current})")]
    UnknownState { target: String, current: String },

    /// Intent present but no state or flow accepts it
    #[error("No flow or state accepts intent \"{0}\"")]
    UnknownIntent(String),

    /// An init/accept/requirement handler failed
    #[error("Action failed in state {state}: {message}")]
    ActionExecution { state: String, message: String },

    /// Stored schema version differs from the running engine
    #[error("Session schema version {stored} does not match {running}")]
    SessionVersionMismatch { stored: String, running: String },

    /// A deferred event fired after the session moved on
    #[error("Scheduled event for turn {guard} is stale (session at turn {counter})")]
    StaleScheduledEvent { guard: u64, counter: u64 },

    /// A context value had the wrong shape
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Another turn for the same session is already running
    #[error("Session {0} is already being processed")]
    SessionBusy(String),

    /// Session store failure
    #[error("Session store error: {0}")]
    Store(String),

    /// Channel adapter failure
    #[error("Channel error: {0}")]
    Channel(String),
}

impl DialogError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue(message.into())
    }

    /// Whether this error should abort the process rather than a single turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type DialogResult<T> = Result<T, DialogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(DialogError::configuration("cycle").is_fatal());
        assert!(!DialogError::UnknownIntent("greeting".into()).is_fatal());
        assert!(!DialogError::SessionBusy("s1".into()).is_fatal());
    }

    #[test]
    fn test_messages_name_the_states() {
        let err = DialogError::UnknownState {
            target: "help.missing".into(),
            current: "default.root".into(),
        };
        assert_eq!(
            err.to_string(),
            "State help.missing does not exist (staying at default.root)"
        );
    }
}
