//! Infrastructure layer: storage, broker adapters, services, consumers, config.

pub mod broker;
pub mod config;
pub mod consumers;
pub mod services;
pub mod store;

mod integration_tests;
