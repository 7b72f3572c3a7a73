//! Message record parsed from one file in the watched directory.

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Sender recorded when a message names no originating agent.
pub const UNKNOWN_SENDER: &str = "UNKNOWN";

/// Message priority.
///
/// Parsing is exact and case-sensitive. Any value outside the known set is
/// kept verbatim as [`Priority::Other`] rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    /// Background traffic.
    Low,
    /// Default priority when a message declares none.
    #[default]
    Normal,
    /// Needs attention soon.
    High,
    /// Needs attention now.
    Critical,
    /// Unrecognized but valid priority label.
    Other(String),
}

impl Priority {
    /// Canonical label for this priority.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Other(label) => label,
        }
    }
}

impl FromStr for Priority {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        match value.as_str() {
            "LOW" => Self::Low,
            "NORMAL" => Self::Normal,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Other(value),
        }
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        match value {
            Priority::Other(label) => label,
            known => known.as_str().to_owned(),
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message observed in the watched directory.
///
/// `identity` comes from the file name and is the only key used for
/// deduplication; two records with the same identity are the same message
/// even if the file content changed in between.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// File stem of the source file.
    pub identity: String,
    /// Originating agent name.
    pub sender: String,
    /// Addressed agents; empty means unaddressed.
    pub recipients: Vec<String>,
    /// Declared priority.
    pub priority: Priority,
    /// Free-form subject line.
    pub subject: String,
    /// Structured payload, if any.
    pub body: Option<Value>,
    /// Identifier declared inside the file. Informational only.
    pub declared_id: Option<String>,
    /// Timestamp declared by the producer. Untrusted.
    pub sent_at: Option<String>,
    /// When this watcher read the file.
    pub observed_at: DateTime<Utc>,
    /// Source file path.
    pub path: PathBuf,
}

/// `to` is accepted either as a single agent or a list of agents.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecipients {
    One(String),
    Many(Vec<String>),
}

/// Wire shape of a message file. Every field is optional.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    msg_id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_agent: Option<String>,
    #[serde(default)]
    to: Option<RawRecipients>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl Message {
    /// Read and parse a message file. The identity is the file stem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read (the error keeps
    /// the underlying [`std::io::ErrorKind`] text) and
    /// `AppError::MalformedMessage` if the content does not parse.
    pub fn from_file(path: &Path) -> Result<Self> {
        let identity = identity_of(path).ok_or_else(|| {
            AppError::MalformedMessage(format!("{}: no usable file name", path.display()))
        })?;
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("{}: {err}", path.display())))?;
        Self::from_json(&identity, path, &raw)
    }

    /// Parse message content that was read from `path`.
    ///
    /// Missing `subject` becomes empty, missing `priority` becomes
    /// [`Priority::Normal`], missing `to` becomes an empty recipient list and
    /// a missing sender becomes [`UNKNOWN_SENDER`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedMessage` naming the file when the content
    /// is not JSON, is not a JSON object, or a field has the wrong type.
    pub fn from_json(identity: &str, path: &Path, raw: &str) -> Result<Self> {
        let malformed = |reason: String| {
            AppError::MalformedMessage(format!("{}: {reason}", path.display()))
        };

        let value: Value = serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;
        if !value.is_object() {
            return Err(malformed("top-level value is not an object".into()));
        }
        let parsed: RawMessage =
            serde_json::from_value(value).map_err(|err| malformed(err.to_string()))?;

        let recipients = match parsed.to {
            Some(RawRecipients::One(agent)) => vec![agent],
            Some(RawRecipients::Many(agents)) => agents,
            None => Vec::new(),
        };

        Ok(Self {
            identity: identity.to_owned(),
            sender: parsed
                .from
                .or(parsed.from_agent)
                .unwrap_or_else(|| UNKNOWN_SENDER.to_owned()),
            recipients,
            priority: parsed.priority.map(Priority::from).unwrap_or_default(),
            subject: parsed.subject.unwrap_or_default(),
            body: parsed.body.filter(|body| !body.is_null()),
            declared_id: parsed.msg_id.or(parsed.message_id),
            sent_at: parsed.timestamp,
            observed_at: Utc::now(),
            path: path.to_owned(),
        })
    }

    /// Text searched by keyword filters: the subject followed by the body
    /// rendered as compact JSON.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        match &self.body {
            Some(body) => format!("{} {body}", self.subject),
            None => self.subject.clone(),
        }
    }
}

/// Identity for a message file: its name without the extension.
#[must_use]
pub fn identity_of(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_owned)
}
