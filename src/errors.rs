//! Error types shared across the watcher.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all watcher failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure. Fatal before the loop runs.
    Config(String),
    /// A single message file could not be read or parsed.
    MalformedMessage(String),
    /// The watched directory could not be listed for one poll cycle.
    Scan(String),
    /// A registered handler reported a failure.
    Handler(String),
    /// Lifecycle call made from a state that does not allow it.
    InvalidTransition(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::Scan(msg) => write!(f, "scan: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedMessage(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
