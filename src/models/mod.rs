//! Domain model module declarations.

pub mod criteria;
pub mod message;

pub use criteria::FilterCriteria;
pub use message::{Message, Priority};
