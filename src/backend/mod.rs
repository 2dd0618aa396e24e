//! Key-Value Backend Module
//!
//! Defines the contract this crate consumes from the replicated key-value store,
//! plus the two implementations shipped with it.
//!
//! ## Core Concepts
//! - **Backend**: A handle to one replica endpoint. Exposes the primitive commands
//!   (get/set/set-if-absent/increment/delete/exists/flush/scan) and role introspection.
//! - **Connector**: Turns an `Endpoint` into a live `Backend` handle. The connection
//!   manager uses it during master discovery.
//! - **Implementations**: `redis` talks to a real Redis replica set; `memory` is an
//!   in-process replica set with a shared key space, used by the tests and for local runs.

pub mod memory;
pub mod redis;
pub mod types;

#[cfg(test)]
mod tests;

pub use types::{BackendError, Endpoint, EndpointParseError, Role};

use async_trait::async_trait;
use std::sync::Arc;

/// A connected handle to a single replica.
///
/// Every method is one round trip. Absent keys are never an error: reads return
/// `None`/`false`, deletes report zero removed keys.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The endpoint this handle is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Asks the replica whether it currently accepts writes.
    async fn role(&self) -> Result<Role, BackendError>;

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Reads several keys in one request. The result has one slot per requested key.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Returns `true` when the key was absent and has been written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, BackendError>;

    /// Writes every entry only if none of the keys exist. All or nothing.
    async fn multi_set_if_absent(&self, entries: &[(String, String)]) -> Result<bool, BackendError>;

    /// Atomically adds one, treating an absent key as zero. Returns the new value.
    async fn increment(&self, key: &str) -> Result<i64, BackendError>;

    /// Deletes the given keys and returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Removes every key of the selected database.
    async fn flush_all(&self) -> Result<(), BackendError>;

    /// Lists keys matching a glob pattern (`*` and `?` wildcards).
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, BackendError>;
}

/// Opens handles to replica endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Backend>, BackendError>;
}
