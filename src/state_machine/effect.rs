//! Responses and outcomes produced by state actions

use super::target::TransitionTarget;
use crate::context::EntityBatch;
use crate::error::{DialogError, DialogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// What a button does when pressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonAction {
    /// Send the payload entities back as a postback event
    Postback { payload: EntityBatch },
    WebUrl { url: String },
    PhoneNumber { phone_number: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub title: String,
    #[serde(flatten)]
    pub action: ButtonAction,
}

impl Button {
    pub fn postback(title: impl Into<String>, payload: EntityBatch) -> Self {
        Self {
            title: title.into(),
            action: ButtonAction::Postback { payload },
        }
    }

    pub fn url(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            action: ButtonAction::WebUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickReply {
    pub title: String,
    #[serde(default)]
    pub payload: EntityBatch,
}

impl QuickReply {
    pub fn new(title: impl Into<String>, payload: EntityBatch) -> Self {
        Self {
            title: title.into(),
            payload,
        }
    }
}

/// A message sent back to the user through the channel adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        buttons: Vec<Button>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<QuickReply>,
    },
    /// Channel-specific payload passed through untouched
    Payload { data: Value },
}

impl Response {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            buttons: Vec::new(),
            quick_replies: Vec::new(),
        }
    }

    /// Attach buttons; a message cannot carry both buttons and quick replies
    pub fn with_buttons(self, new: impl IntoIterator<Item = Button>) -> DialogResult<Self> {
        match self {
            Self::Text {
                text,
                mut buttons,
                quick_replies,
            } => {
                if !quick_replies.is_empty() {
                    return Err(DialogError::invalid_value(
                        "cannot add buttons to a message with quick replies",
                    ));
                }
                buttons.extend(new);
                Ok(Self::Text {
                    text,
                    buttons,
                    quick_replies,
                })
            }
            Self::Payload { .. } => Err(DialogError::invalid_value(
                "buttons can only be attached to text messages",
            )),
        }
    }

    /// Attach quick replies; a message cannot carry both buttons and quick replies
    pub fn with_quick_replies(
        self,
        new: impl IntoIterator<Item = QuickReply>,
    ) -> DialogResult<Self> {
        match self {
            Self::Text {
                text,
                buttons,
                mut quick_replies,
            } => {
                if !buttons.is_empty() {
                    return Err(DialogError::invalid_value(
                        "cannot add quick replies to a message with buttons",
                    ));
                }
                quick_replies.extend(new);
                Ok(Self::Text {
                    text,
                    buttons,
                    quick_replies,
                })
            }
            Self::Payload { .. } => Err(DialogError::invalid_value(
                "quick replies can only be attached to text messages",
            )),
        }
    }

    /// Text content, if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Payload { .. } => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text {
                text,
                buttons,
                quick_replies,
            } => {
                write!(f, "{text}")?;
                for button in buttons {
                    write!(f, "\n button: {}", button.title)?;
                }
                for reply in quick_replies {
                    write!(f, "\n quick_reply: {}", reply.title)?;
                }
                Ok(())
            }
            Self::Payload { data } => write!(f, "payload: {data}"),
        }
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// When a deferred callback should fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleWhen {
    At(DateTime<Utc>),
    After(Duration),
}

/// Deferred callback requested by an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub callback: String,
    pub when: ScheduleWhen,
}

/// Result of running one action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// Responses in emission order
    pub responses: Vec<Response>,
    /// Further transition, `None` ends the trampoline
    pub next: Option<TransitionTarget>,
    pub schedule: Vec<ScheduleRequest>,
}

impl ActionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome with a single text response and no transition
    pub fn reply(text: impl Into<Response>) -> Self {
        Self::new().say(text)
    }

    /// Outcome that only moves on
    pub fn go(target: impl Into<TransitionTarget>) -> Self {
        Self::new().then(target)
    }

    #[must_use]
    pub fn say(mut self, response: impl Into<Response>) -> Self {
        self.responses.push(response.into());
        self
    }

    #[must_use]
    pub fn then(mut self, target: impl Into<TransitionTarget>) -> Self {
        self.next = Some(target.into());
        self
    }

    #[must_use]
    pub fn schedule_after(mut self, callback: impl Into<String>, delay: Duration) -> Self {
        self.schedule.push(ScheduleRequest {
            callback: callback.into(),
            when: ScheduleWhen::After(delay),
        });
        self
    }

    #[must_use]
    pub fn schedule_at(mut self, callback: impl Into<String>, at: DateTime<Utc>) -> Self {
        self.schedule.push(ScheduleRequest {
            callback: callback.into(),
            when: ScheduleWhen::At(at),
        });
        self
    }
}
