//! Prefix-anchored regular expressions
//!
//! Intent patterns and flow filters match from the start of the subject but
//! do not have to consume all of it: `greet` accepts `greeting`.

use crate::error::{DialogError, DialogResult};
use regex::Regex;
use std::fmt;

/// A regex that only matches at the beginning of the subject
#[derive(Clone)]
pub struct StartPattern {
    source: String,
    regex: Regex,
}

impl StartPattern {
    pub fn new(source: &str) -> DialogResult<Self> {
        let regex = Regex::new(&format!("^(?:{source})")).map_err(|e| {
            DialogError::configuration(format!("invalid pattern \"{source}\": {e}"))
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Pattern matching exactly the given literal as a prefix
    pub fn literal(text: &str) -> Self {
        Self {
            source: text.to_string(),
            regex: Regex::new(&format!("^(?:{})", regex::escape(text)))
                .unwrap_or_else(|_| unreachable!("escaped literal is always a valid regex")),
        }
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for StartPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StartPattern").field(&self.source).finish()
    }
}

impl PartialEq for StartPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
