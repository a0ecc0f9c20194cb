//! Integration messages and the message-broker boundary.
//!
//! - `message`: messages consumed from other services (account deletion)
//! - `broker`: broker-client abstraction (`subscribe(queue, handler)`, ack/nack)
//! - `in_memory_broker`: tokio-backed broker for tests/dev

pub mod broker;
pub mod in_memory_broker;
pub mod message;

pub use broker::{
    BrokerClient, DEFAULT_MAX_DELIVERIES, DeadLetter, Delivery, HandlerError, MessageHandler,
    SubscriptionHandle, dead_letter_queue,
};
pub use in_memory_broker::{InMemoryBroker, InMemoryBrokerError};
pub use message::{ACCOUNT_DELETION_QUEUE, AccountDeletionEvent};
