#![forbid(unsafe_code)]

//! Watch a shared directory for new agent message files and dispatch the
//! ones that match a filter to registered handlers.

pub mod config;
pub mod errors;
pub mod models;
pub mod watcher;

pub use config::WatcherConfig;
pub use errors::{AppError, Result};
