//! Handler registry with isolated dispatch.
//!
//! Every handler sees every dispatched message in registration order. A
//! handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run and the poll loop carries on.
//!
//! There is no per-handler timeout. Handlers run on the blocking pool; one
//! that blocks stalls the poll loop, and therefore shutdown, until it
//! returns, but leaves other async tasks alone.

use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::models::Message;
use crate::{AppError, Result};

/// A dispatch target for newly seen, matching messages.
pub trait MessageHandler: Send + Sync {
    /// Name used in logs when the handler fails.
    fn name(&self) -> &str;

    /// Process one message.
    ///
    /// # Errors
    ///
    /// Any error is absorbed by the registry and logged.
    fn handle(&self, message: &Message) -> Result<()>;
}

/// Adapter turning a named closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    /// Wrap `func` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, message: &Message) -> Result<()> {
        (self.func)(message)
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub succeeded: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Ordered collection of handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl Debug for HandlerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        debug!(handler = handler.name(), "registered handler");
        self.handlers.push(handler);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Invoke every handler with `message`, absorbing failures.
    #[must_use]
    pub fn dispatch(&self, message: &Message) -> DispatchReport {
        let mut report = DispatchReport::default();

        for handler in &self.handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(message)))
                .unwrap_or_else(|payload| {
                    Err(AppError::Handler(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        handler = handler.name(),
                        identity = %message.identity,
                        %err,
                        "handler failed"
                    );
                }
            }
        }

        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Default handler that prints each message to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHandler;

impl ConsoleHandler {
    /// Render the banner printed for `message`.
    #[must_use]
    pub fn render(message: &Message) -> String {
        let rule = "=".repeat(80);
        format!(
            "\n{rule}\n[NEW MESSAGE] {}\nFrom: {}\nTo: {}\nPriority: {}\nSubject: {}\nTime: {}\n{rule}\n",
            message.identity,
            message.sender,
            message.recipients.join(", "),
            message.priority,
            message.subject,
            message.sent_at.as_deref().unwrap_or(""),
        )
    }
}

impl MessageHandler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    fn handle(&self, message: &Message) -> Result<()> {
        println!("{}", Self::render(message));
        Ok(())
    }
}
