//! In-Memory Replica Set
//!
//! An in-process stand-in for the replicated store. All replicas of a
//! `MemoryCluster` share one key space (replication is synchronous), while each
//! replica keeps its own role and availability so failover can be exercised.
//!
//! ## Behaviour
//! - **Roles**: writes sent to a replica that is not the master fail with
//!   `Unavailable`, the way a Redis replica answers `READONLY`.
//! - **Faults**: a replica can be taken down (connect and every call fail) or told
//!   to fail its next `n` calls.
//! - **Atomicity**: single-key commands are atomic through `DashMap` entries; the
//!   multi-key conditional set takes the key space's write gate so no other command
//!   observes a partial batch.

use super::{Backend, BackendError, Connector, Endpoint, Role};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// The data shared by every replica of a cluster.
#[derive(Default)]
pub struct Keyspace {
    entries: DashMap<String, String>,
    /// Shared by single-key commands, exclusive for multi-key commands and flushes.
    gate: RwLock<()>,
}

impl Keyspace {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct read that bypasses roles and fault injection.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|value| value.clone())
    }
}

pub struct MemoryReplica {
    endpoint: Endpoint,
    keyspace: Arc<Keyspace>,
    master: AtomicBool,
    down: AtomicBool,
    failures_pending: AtomicUsize,
    role_queries: AtomicUsize,
}

impl MemoryReplica {
    fn new(endpoint: Endpoint, keyspace: Arc<Keyspace>, role: Role) -> Self {
        Self {
            endpoint,
            keyspace,
            master: AtomicBool::new(role == Role::Master),
            down: AtomicBool::new(false),
            failures_pending: AtomicUsize::new(0),
            role_queries: AtomicUsize::new(0),
        }
    }

    pub fn set_role(&self, role: Role) {
        self.master.store(role == Role::Master, Ordering::SeqCst);
        tracing::debug!("Memory replica {} is now {:?}", self.endpoint, role);
    }

    pub fn current_role(&self) -> Role {
        if self.master.load(Ordering::SeqCst) {
            Role::Master
        } else {
            Role::Replica
        }
    }

    /// Takes the replica offline (`true`) or brings it back (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Makes the next `count` calls on this replica fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of role queries answered, i.e. how often discovery probed this replica.
    pub fn role_queries(&self) -> usize {
        self.role_queries.load(Ordering::SeqCst)
    }

    fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.is_down() {
            return Err(BackendError::unavailable(&self.endpoint, "connection refused"));
        }

        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BackendError::unavailable(&self.endpoint, "connection reset"));
        }

        Ok(())
    }

    fn check_writable(&self) -> Result<(), BackendError> {
        self.check_available()?;
        if !self.master.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable(
                &self.endpoint,
                "READONLY You can't write against a read only replica",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryReplica {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn role(&self) -> Result<Role, BackendError> {
        self.check_available()?;
        self.role_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.current_role())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        self.check_available()?;
        let _shared = self.keyspace.gate.read().await;
        Ok(self.keyspace.peek(key))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError> {
        self.check_available()?;
        let _shared = self.keyspace.gate.read().await;
        Ok(keys.iter().map(|key| self.keyspace.peek(key)).collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.check_writable()?;
        let _shared = self.keyspace.gate.read().await;
        self.keyspace
            .entries
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        self.check_writable()?;
        let _shared = self.keyspace.gate.read().await;
        match self.keyspace.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn multi_set_if_absent(&self, entries: &[(String, String)]) -> Result<bool, BackendError> {
        self.check_writable()?;
        let _exclusive = self.keyspace.gate.write().await;

        if entries
            .iter()
            .any(|(key, _)| self.keyspace.entries.contains_key(key))
        {
            return Ok(false);
        }

        for (key, value) in entries {
            self.keyspace.entries.insert(key.clone(), value.clone());
        }
        Ok(true)
    }

    async fn increment(&self, key: &str) -> Result<i64, BackendError> {
        self.check_writable()?;
        let _shared = self.keyspace.gate.read().await;
        match self.keyspace.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let next = slot
                    .get()
                    .parse::<i64>()
                    .ok()
                    .and_then(|current| current.checked_add(1))
                    .ok_or_else(|| {
                        BackendError::rejected(
                            &self.endpoint,
                            "ERR value is not an integer or out of range",
                        )
                    })?;
                slot.insert(next.to_string());
                Ok(next)
            }
            Entry::Vacant(slot) => {
                slot.insert("1".to_string());
                Ok(1)
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        self.check_writable()?;
        let _shared = self.keyspace.gate.read().await;
        let removed = keys
            .iter()
            .filter(|key| self.keyspace.entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.check_available()?;
        let _shared = self.keyspace.gate.read().await;
        Ok(self.keyspace.entries.contains_key(key))
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        self.check_writable()?;
        let _exclusive = self.keyspace.gate.write().await;
        self.keyspace.entries.clear();
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        self.check_available()?;
        let _shared = self.keyspace.gate.read().await;
        let mut keys: Vec<String> = self
            .keyspace
            .entries
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// A replica set living in this process.
pub struct MemoryCluster {
    keyspace: Arc<Keyspace>,
    replicas: DashMap<Endpoint, Arc<MemoryReplica>>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keyspace: Arc::new(Keyspace::default()),
            replicas: DashMap::new(),
        })
    }

    /// Builds a cluster with one replica per `(endpoint, role)` pair.
    pub fn with_replicas(replicas: &[(Endpoint, Role)]) -> Arc<Self> {
        let cluster = Self::new();
        for (endpoint, role) in replicas {
            cluster.add_replica(endpoint.clone(), *role);
        }
        cluster
    }

    pub fn add_replica(&self, endpoint: Endpoint, role: Role) -> Arc<MemoryReplica> {
        let replica = Arc::new(MemoryReplica::new(
            endpoint.clone(),
            self.keyspace.clone(),
            role,
        ));
        self.replicas.insert(endpoint, replica.clone());
        replica
    }

    pub fn replica(&self, endpoint: &Endpoint) -> Option<Arc<MemoryReplica>> {
        self.replicas.get(endpoint).map(|entry| entry.value().clone())
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .replicas
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Moves the master role from `from` to `to`, like a sentinel-driven failover.
    pub fn failover(&self, from: &Endpoint, to: &Endpoint) {
        if let Some(old) = self.replica(from) {
            old.set_role(Role::Replica);
        }
        if let Some(new) = self.replica(to) {
            new.set_role(Role::Master);
        }
        tracing::info!("Memory cluster failed over from {} to {}", from, to);
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }
}

#[async_trait]
impl Connector for MemoryCluster {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Backend>, BackendError> {
        let replica = self
            .replica(endpoint)
            .ok_or_else(|| BackendError::unavailable(endpoint, "unknown endpoint"))?;

        if replica.is_down() {
            return Err(BackendError::unavailable(endpoint, "connection refused"));
        }

        Ok(replica as Arc<dyn Backend>)
    }
}

/// Redis-style glob matching with `*` (any run) and `?` (any single character).
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == candidate[c]) {
            p += 1;
            c += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, c));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            c = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
