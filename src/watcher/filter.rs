//! Filter predicate applied to newly seen messages.
//!
//! Evaluation order mirrors the criteria fields; the first failing
//! constraint rejects the message:
//! 1. Recipient (exact, or a broadcast marker in the recipient list).
//! 2. Sender (exact).
//! 3. Priority (exact, no ordinal escalation).
//! 4. Keywords (case-insensitive substring, any keyword suffices).

use crate::models::{FilterCriteria, Message};

/// Recipient entries that address every agent.
pub const BROADCAST_RECIPIENTS: &[&str] = &["ALL", "ALL_AGENTS"];

/// Check whether `message` satisfies every populated field of `criteria`.
#[must_use]
pub fn matches(message: &Message, criteria: &FilterCriteria) -> bool {
    if let Some(ref recipient) = criteria.recipient {
        if !addressed_to(message, recipient) {
            return false;
        }
    }

    if let Some(ref sender) = criteria.sender {
        if message.sender != *sender {
            return false;
        }
    }

    if let Some(ref priority) = criteria.priority {
        if message.priority != *priority {
            return false;
        }
    }

    if !criteria.keywords.is_empty() && !contains_any_keyword(message, &criteria.keywords) {
        return false;
    }

    true
}

fn addressed_to(message: &Message, recipient: &str) -> bool {
    message
        .recipients
        .iter()
        .any(|to| to == recipient || BROADCAST_RECIPIENTS.contains(&to.as_str()))
}

fn contains_any_keyword(message: &Message, keywords: &[String]) -> bool {
    let text = message.searchable_text().to_lowercase();
    keywords
        .iter()
        .any(|kw| text.contains(kw.to_lowercase().as_str()))
}
