//! Broker-driven consumers.

pub mod account_deletion;

pub use account_deletion::AccountDeletionConsumer;
