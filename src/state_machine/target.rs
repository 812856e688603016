//! Transition target grammar
//!
//! `flow.state`, bare `state` (qualified against the current flow), either
//! with an optional `:init`, `:accept` or `:none` suffix, or an integer `n`
//! meaning "re-enter the state recorded at history offset `n - 1`".

use crate::error::{DialogError, DialogResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle hook to run after entering a state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    #[default]
    Init,
    Accept,
    None,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Accept => "accept",
            Self::None => "none",
        }
    }
}

impl FromStr for LifecycleAction {
    type Err = DialogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "accept" => Ok(Self::Accept),
            "none" => Ok(Self::None),
            other => Err(DialogError::invalid_value(format!(
                "unknown lifecycle action \"{other}\" (expected init, accept or none)"
            ))),
        }
    }
}

/// Where a transition should go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum TransitionTarget {
    /// A qualified or bare state name
    Named {
        name: String,
        action: LifecycleAction,
    },
    /// History offset target, `n` re-enters history entry `n - 1`
    History(i64),
}

impl TransitionTarget {
    /// Target entering `name` with its init action
    pub fn state(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            action: LifecycleAction::Init,
        }
    }

    /// Target entering `name` with its accept action
    pub fn accept(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            action: LifecycleAction::Accept,
        }
    }

    /// Same target with another lifecycle action
    #[must_use]
    pub fn with_action(self, action: LifecycleAction) -> Self {
        match self {
            Self::Named { name, .. } => Self::Named { name, action },
            history @ Self::History(_) => history,
        }
    }

    /// Parse a target from a JSON string or integer
    pub fn from_value(value: &Value) -> DialogResult<Self> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => n.as_i64().map(Self::History).ok_or_else(|| {
                DialogError::invalid_value(format!("history offset {n} is not an integer"))
            }),
            other => Err(DialogError::invalid_value(format!(
                "transition target must be a string or an integer, got {other}"
            ))),
        }
    }
}

impl FromStr for TransitionTarget {
    type Err = DialogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, action) = match s.split_once(':') {
            Some((name, action)) => (name, action.parse()?),
            None => (s, LifecycleAction::Init),
        };
        if name.is_empty() {
            return Err(DialogError::invalid_value(format!(
                "transition target \"{s}\" has no state name"
            )));
        }
        if name.split('.').any(str::is_empty) || name.matches('.').count() > 1 {
            return Err(DialogError::invalid_value(format!(
                "transition target \"{s}\" is not of the form flow.state or state"
            )));
        }
        Ok(Self::Named {
            name: name.to_string(),
            action,
        })
    }
}

impl fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named {
                name,
                action: LifecycleAction::Init,
            } => write!(f, "{name}"),
            Self::Named { name, action } => write!(f, "{name}:{}", action.as_str()),
            Self::History(n) => write!(f, "{n}"),
        }
    }
}

impl TryFrom<Value> for TransitionTarget {
    type Error = DialogError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl From<TransitionTarget> for Value {
    fn from(target: TransitionTarget) -> Self {
        match target {
            TransitionTarget::History(n) => Value::from(n),
            named @ TransitionTarget::Named { .. } => Value::String(named.to_string()),
        }
    }
}

impl From<&str> for TransitionTarget {
    /// Lenient conversion for targets written in code; malformed names are
    /// kept verbatim and surface as unknown states when followed.
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| Self::state(s))
    }
}

impl From<i64> for TransitionTarget {
    fn from(n: i64) -> Self {
        Self::History(n)
    }
}

/// Qualify a possibly bare state name against the flow of `current`
pub fn qualify(name: &str, current: &str) -> String {
    if name.contains('.') {
        return name.to_string();
    }
    let flow = current.split('.').next().unwrap_or(current);
    format!("{flow}.{name}")
}
