//! Directory scanner for message files.
//!
//! The scanner never writes to the watched directory. Anything that is not
//! a regular `*.json` file is ignored, and a file that disappears between
//! listing and reading is skipped rather than reported.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::models::message::{identity_of, Message};
use crate::{AppError, Result};

/// Extension carried by message files.
pub const MESSAGE_EXTENSION: &str = "json";

/// A message file found by a listing, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Identity derived from the file name.
    pub identity: String,
    /// Full path of the file.
    pub path: PathBuf,
}

impl Candidate {
    /// Read and parse the file.
    ///
    /// Returns `None` when the file no longer exists. Any other read or
    /// parse problem is returned as `AppError::MalformedMessage`.
    #[must_use]
    pub fn load(&self) -> Option<Result<Message>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Some(Message::from_json(&self.identity, &self.path, &raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(identity = %self.identity, "message file vanished before read");
                None
            }
            Err(err) => Some(Err(AppError::MalformedMessage(format!(
                "{}: unreadable: {err}",
                self.path.display()
            )))),
        }
    }
}

/// Outcome of scanning one candidate.
#[derive(Debug)]
pub struct ScanEntry {
    /// Identity derived from the file name.
    pub identity: String,
    /// Parsed record or the reason it could not be parsed.
    pub result: Result<Message>,
}

/// List message files in `dir`, sorted by identity.
///
/// # Errors
///
/// Returns `AppError::Scan` if the directory itself cannot be read.
pub fn list_candidates(dir: &Path) -> Result<Vec<Candidate>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| AppError::Scan(format!("cannot read {}: {err}", dir.display())))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(%err, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if !is_message_file(&path) {
            continue;
        }
        if let Some(identity) = identity_of(&path) {
            candidates.push(Candidate { identity, path });
        }
    }

    candidates.sort_by(|a, b| a.identity.cmp(&b.identity));
    Ok(candidates)
}

/// Scan `dir` and parse every message file found.
///
/// Files that vanish mid-scan are omitted from the result.
///
/// # Errors
///
/// Returns `AppError::Scan` if the directory itself cannot be read.
pub fn scan(dir: &Path) -> Result<Vec<ScanEntry>> {
    let entries = list_candidates(dir)?
        .into_iter()
        .filter_map(|candidate| {
            candidate.load().map(|result| ScanEntry {
                identity: candidate.identity,
                result,
            })
        })
        .collect();
    Ok(entries)
}

/// Identities of every message file currently in `dir`.
///
/// # Errors
///
/// Returns `AppError::Scan` if the directory itself cannot be read.
pub fn snapshot_identities(dir: &Path) -> Result<Vec<String>> {
    Ok(list_candidates(dir)?
        .into_iter()
        .map(|candidate| candidate.identity)
        .collect())
}

fn is_message_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext == MESSAGE_EXTENSION)
}
