//! `journal-core`: domain building blocks for the journal service.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the journal entry record and the pagination math.

pub mod error;
pub mod id;
pub mod journal;
pub mod page;

pub use error::DomainError;
pub use id::{JournalId, OwnerId};
pub use journal::{JournalEntry, NewJournalEntry};
pub use page::{Page, PageDescriptor, PageRequest};
