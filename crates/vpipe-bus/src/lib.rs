//! Redis-backed message bus.
//!
//! This crate provides:
//! - Durable work and event queues over Redis Streams with consumer
//!   groups and manual acknowledgment (at-least-once delivery)
//! - Correlated PGS request/reply over Redis Pub/Sub

pub mod bus;
pub mod error;

pub use bus::{BusConfig, MessageBus};
pub use error::{BusError, BusResult};
