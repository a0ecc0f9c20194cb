//! Durable broker adapters.
//!
//! The in-memory broker lives in `journal-events`; production adapters live here.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsError};
