//! Environment configuration

use crate::context::DEFAULT_MAX_DEPTH;
use crate::error::{DialogError, DialogResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default root state of every new session
pub const DEFAULT_ROOT_STATE: &str = "default.root";
/// Default cap on state hops per turn
pub const DEFAULT_MAX_TRANSITIONS: usize = 32;

/// Behavior of the dialog engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sent to the user once when an action fails
    pub error_message: Option<String>,
    /// Return action failures to the caller instead of degrading
    pub strict: bool,
    /// Values kept per entity
    pub max_depth: usize,
    pub max_transitions: usize,
    pub root_state: String,
    /// Callbacks fired after a period without user events
    pub inactive_callbacks: Vec<(String, Duration)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_message: None,
            strict: false,
            max_depth: DEFAULT_MAX_DEPTH,
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            root_state: DEFAULT_ROOT_STATE.to_string(),
            inactive_callbacks: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> DialogResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` uses the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DialogResult<Self> {
        let defaults = Self::default();
        let inactive_callbacks = match lookup("DIALOG_INACTIVE_CALLBACKS") {
            Some(raw) => parse_callbacks(&raw)?,
            None => Vec::new(),
        };
        Ok(Self {
            error_message: lookup("DIALOG_ERROR_MESSAGE").filter(|m| !m.trim().is_empty()),
            strict: lookup("DIALOG_STRICT").is_some_and(|v| parse_flag(&v)),
            max_depth: parsed(&lookup, "DIALOG_MAX_DEPTH", defaults.max_depth).max(1),
            max_transitions: parsed(&lookup, "DIALOG_MAX_TRANSITIONS", defaults.max_transitions)
                .max(1),
            root_state: lookup("DIALOG_ROOT_STATE").unwrap_or(defaults.root_state),
            inactive_callbacks,
        })
    }

    #[must_use]
    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_inactive_callback(mut self, name: impl Into<String>, after: Duration) -> Self {
        self.inactive_callbacks.push((name.into(), after));
        self
    }
}

/// Settings of the HTTP server binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub flows_path: PathBuf,
    /// Idle time after which a session worker shuts down
    pub session_idle: Duration,
}

impl ServerConfig {
    pub fn from_env() -> DialogResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DialogResult<Self> {
        let db_path = lookup("DIALOG_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.dialog-engine/sessions.db"))
            },
            PathBuf::from,
        );
        let flows_path = lookup("DIALOG_FLOWS_PATH").map(PathBuf::from).ok_or_else(|| {
            DialogError::configuration("DIALOG_FLOWS_PATH must point to a flow definition file")
        })?;
        Ok(Self {
            db_path,
            port: parsed(&lookup, "DIALOG_PORT", 8000),
            flows_path,
            session_idle: Duration::from_secs(parsed(&lookup, "DIALOG_SESSION_IDLE_SECS", 300)),
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting, using default");
            default
        }),
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse `name=seconds,name=seconds`
fn parse_callbacks(raw: &str) -> DialogResult<Vec<(String, Duration)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, seconds) = part.split_once('=').ok_or_else(|| {
                DialogError::configuration(format!(
                    "inactive callback \"{part}\" is not of the form name=seconds"
                ))
            })?;
            let seconds: u64 = seconds.trim().parse().map_err(|_| {
                DialogError::configuration(format!(
                    "inactive callback \"{part}\" has an invalid number of seconds"
                ))
            })?;
            Ok((name.trim().to_string(), Duration::from_secs(seconds)))
        })
        .collect()
}
