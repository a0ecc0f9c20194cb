//! Request-path services over a [`JournalStore`](crate::store::JournalStore).

pub mod creation;
pub mod query;

pub use creation::JournalCreator;
pub use query::{JournalQueries, QueryError};
