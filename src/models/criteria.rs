//! Filter criteria attached to a watcher.

use std::fmt::{Display, Formatter};

use serde::Deserialize;

use crate::models::message::Priority;

/// Optional, AND-combined match constraints.
///
/// An unset field places no constraint. An empty keyword list places no
/// constraint either.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FilterCriteria {
    /// Only match messages addressed to this agent.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Only match messages from this agent.
    #[serde(default)]
    pub sender: Option<String>,
    /// Only match this exact priority.
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Match if any keyword appears in the subject or body.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl FilterCriteria {
    /// Whether no constraint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipient.is_none()
            && self.sender.is_none()
            && self.priority.is_none()
            && self.keywords.is_empty()
    }

    /// Builder: constrain the recipient.
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Builder: constrain the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Builder: constrain the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder: set the keyword list.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// Split a comma-separated keyword list, dropping blank entries.
#[must_use]
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|kw| !kw.is_empty())
        .map(str::to_owned)
        .collect()
}

impl Display for FilterCriteria {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut parts = Vec::new();
        if let Some(recipient) = &self.recipient {
            parts.push(format!("to={recipient}"));
        }
        if let Some(sender) = &self.sender {
            parts.push(format!("from={sender}"));
        }
        if let Some(priority) = &self.priority {
            parts.push(format!("priority={priority}"));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("keywords={}", self.keywords.join(",")));
        }
        f.write_str(&parts.join(" "))
    }
}
