//! Shared types and broker topology for the Newsroom platform
//!
//! Producers (auth, user and article services) and consumers (the
//! notification service) agree on exchange names, routing keys and payload
//! shapes through this crate.

pub mod topology;
pub mod types;

pub use topology::{exchanges, queues, routing_keys};
pub use types::*;
