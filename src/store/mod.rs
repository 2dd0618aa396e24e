//! Message State Module
//!
//! Tracks, per inbound message, how often it was delivered, whether its handler
//! completed, how many attempts and exceptions it saw, when it may run next, and
//! whether another process holds its execution lock.
//!
//! ## Core Concepts
//! - **Key Space**: Each attribute of a message is an independent key sharing the
//!   `msgid:<namespace>:<token>:` prefix (`keys`).
//! - **Failover**: All operations go through `ConnectionManager`, which discovers the
//!   single master of the replica set and transparently recovers from its loss.
//! - **Operations**: `MessageStore` exposes get/set/increment/delete/exists and the
//!   conditional sets used for exactly-once initialisation and locking.
//! - **Garbage Collection**: `GarbageCollector` sweeps the `expires` index and
//!   deletes records past their lifetime.

pub mod config;
pub mod connection;
pub mod gc;
pub mod keys;
pub mod state;
pub mod types;


pub use config::StoreConfig;
pub use connection::ConnectionManager;
pub use gc::GarbageCollector;
pub use keys::{MessageId, Suffix};
pub use state::MessageStore;
pub use types::{ConnectionState, MessageRecord, SweepReport};
