//! Message State Tracker
//!
//! Deduplication and processing-status bookkeeping for a message-consuming client,
//! stored in a replicated key-value backend with master/replica failover.
//!
//! ## Architecture Modules
//! - **`backend`**: The key-value contract consumed by the tracker (`Backend`,
//!   `Connector`) with a Redis implementation and an in-memory replica set.
//! - **`store`**: Key naming, the connection/failover manager, the per-message
//!   operations and the garbage-collection sweep.
//! - **`error`**: The errors callers can observe.

pub mod backend;
pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{GarbageCollector, MessageId, MessageStore, StoreConfig, Suffix};
