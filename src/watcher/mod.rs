//! Directory watching: scanning, deduplication, filtering and dispatch.
//!
//! [`poll_loop::Watcher`] ties the pieces together; the other modules are
//! usable on their own.

pub mod filter;
pub mod fs_events;
pub mod handlers;
pub mod poll_loop;
pub mod scanner;
pub mod seen;

pub use handlers::{ConsoleHandler, FnHandler, HandlerRegistry, MessageHandler};
pub use poll_loop::{Watcher, WatcherState, WatcherStats};
