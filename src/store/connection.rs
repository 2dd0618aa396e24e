//! Connection & Failover Manager
//!
//! Owns the single live handle to the current master of the replica set and
//! recovers it transparently when an operation fails.
//!
//! ## Responsibilities
//! - **Discovery**: Probes every configured endpoint for its role. Endpoints that
//!   fail the probe are skipped. Exactly one master is required; none is reported as
//!   `NoMaster`, several as `SplitBrain`.
//! - **Caching**: The discovered handle is shared by every caller until an operation
//!   on it fails. It is swapped wholesale, never mutated in place.
//! - **Failover**: `perform` runs an operation against the cached handle, and on a
//!   transient failure drops the handle, waits one backoff interval and retries with a
//!   freshly discovered master, up to the retry bound.

use super::config::{DEFAULT_BACKOFF, DEFAULT_RETRY_BOUND, StoreConfig};
use super::types::ConnectionState;
use crate::backend::{Backend, BackendError, Connector, Endpoint, Role};
use crate::error::StoreError;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

pub struct ConnectionManager {
    /// Replica set, probed in this order.
    endpoints: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    /// The cached master handle. `None` until discovery succeeds.
    current: RwLock<Option<Arc<dyn Backend>>>,
    /// Operations currently between a failed attempt and their final outcome.
    recovering: AtomicUsize,
    retry_bound: u32,
    backoff: Duration,
}

impl ConnectionManager {
    pub fn new(endpoints: Vec<Endpoint>, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoints,
            connector,
            current: RwLock::new(None),
            recovering: AtomicUsize::new(0),
            retry_bound: DEFAULT_RETRY_BOUND,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn from_config(config: &StoreConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(config.nodes.clone(), connector)
            .with_retry_policy(config.retry_bound, config.backoff())
    }

    /// Overrides the number of attempts and the wait between them.
    /// A bound of zero is treated as one attempt.
    pub fn with_retry_policy(mut self, retry_bound: u32, backoff: Duration) -> Self {
        self.retry_bound = retry_bound.max(1);
        self.backoff = backoff;
        self
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn retry_bound(&self) -> u32 {
        self.retry_bound
    }

    pub async fn state(&self) -> ConnectionState {
        if self.current.read().await.is_some() {
            ConnectionState::Connected
        } else if self.recovering.load(Ordering::SeqCst) > 0 {
            ConnectionState::Recovering
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Endpoint of the cached master, if any.
    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|handle| handle.endpoint().clone())
    }

    /// Probes every endpoint and returns a handle to the single master.
    ///
    /// Does not touch the cached handle; see [`ConnectionManager::connection`].
    pub async fn discover(&self) -> Result<Arc<dyn Backend>, StoreError> {
        let mut masters: Vec<Arc<dyn Backend>> = Vec::new();
        let mut last_error: Option<BackendError> = None;

        for endpoint in &self.endpoints {
            let handle = match self.connector.connect(endpoint).await {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!("Skipping {} during discovery: {}", endpoint, e);
                    last_error = Some(e);
                    continue;
                }
            };

            match handle.role().await {
                Ok(Role::Master) => {
                    tracing::debug!("{} reports master role", endpoint);
                    masters.push(handle);
                }
                Ok(Role::Replica) => {
                    tracing::debug!("{} reports replica role", endpoint);
                }
                Err(e) => {
                    tracing::warn!("Role query on {} failed: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        match masters.len() {
            0 => Err(StoreError::NoMaster { last_error }),
            1 => Ok(masters.remove(0)),
            _ => {
                let masters: Vec<Endpoint> = masters
                    .iter()
                    .map(|handle| handle.endpoint().clone())
                    .collect();
                tracing::error!(
                    "Split brain: {} endpoints report the master role: {:?}",
                    masters.len(),
                    masters
                );
                Err(StoreError::SplitBrain { masters })
            }
        }
    }

    /// Returns the cached master handle, running discovery first if there is none.
    ///
    /// Concurrent callers that find the cache empty wait for a single discovery.
    pub async fn connection(&self) -> Result<Arc<dyn Backend>, StoreError> {
        if let Some(handle) = self.current.read().await.clone() {
            return Ok(handle);
        }

        let mut current = self.current.write().await;
        if let Some(handle) = current.clone() {
            return Ok(handle);
        }

        let handle = self.discover().await?;
        tracing::info!("Connected to master {}", handle.endpoint());
        *current = Some(handle.clone());
        Ok(handle)
    }

    /// Drops the cached handle so the next call rediscovers the master.
    pub async fn reset(&self) {
        *self.current.write().await = None;
    }

    /// Clears the cache only if it still holds the handle that failed, so a caller
    /// holding a stale handle never throws away a fresher one.
    async fn invalidate(&self, failed: &Arc<dyn Backend>) {
        let mut current = self.current.write().await;
        if current
            .as_ref()
            .is_some_and(|handle| Arc::ptr_eq(handle, failed))
        {
            *current = None;
        }
    }

    /// Runs `operation` against the current master with bounded failover.
    ///
    /// # Returns
    /// * `Ok` with the operation's value, possibly after one or more failovers.
    /// * `SplitBrain` as soon as discovery sees more than one master.
    /// * `Rejected` when the backend refuses the command itself.
    /// * `NoMaster` once `retry_bound` attempts have failed, carrying the last
    ///   backend error.
    pub async fn perform<T, F, Fut>(&self, name: &str, operation: F) -> Result<T, StoreError>
    where
        F: Fn(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut last_error: Option<BackendError> = None;
        let mut recovery = Recovery::new(&self.recovering);

        for attempt in 1..=self.retry_bound {
            match self.connection().await {
                Ok(handle) => match operation(handle.clone()).await {
                    Ok(value) => {
                        if attempt > 1 {
                            tracing::info!(
                                "{} recovered on attempt {} via master {}",
                                name,
                                attempt,
                                handle.endpoint()
                            );
                        }
                        return Ok(value);
                    }
                    Err(e) if !e.is_transient() => {
                        return Err(StoreError::Rejected {
                            operation: name.to_string(),
                            source: e,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{} failed (attempt {}/{}): {}",
                            name,
                            attempt,
                            self.retry_bound,
                            e
                        );
                        self.invalidate(&handle).await;
                        last_error = Some(e);
                    }
                },
                Err(StoreError::NoMaster { last_error: cause }) => {
                    tracing::warn!(
                        "{}: no master available (attempt {}/{})",
                        name,
                        attempt,
                        self.retry_bound
                    );
                    if cause.is_some() {
                        last_error = cause;
                    }
                }
                Err(e) => return Err(e),
            }

            recovery.begin();
            if attempt < self.retry_bound {
                tokio::time::sleep(self.backoff).await;
            }
        }

        tracing::error!(
            "{} gave up after {} attempts; no master available",
            name,
            self.retry_bound
        );
        Err(StoreError::NoMaster { last_error })
    }
}

/// Counts one operation as recovering from its first failure until it returns or
/// is dropped.
struct Recovery<'a> {
    counter: &'a AtomicUsize,
    active: bool,
}

impl<'a> Recovery<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        Self {
            counter,
            active: false,
        }
    }

    fn begin(&mut self) {
        if !self.active {
            self.counter.fetch_add(1, Ordering::SeqCst);
            self.active = true;
        }
    }
}

impl Drop for Recovery<'_> {
    fn drop(&mut self) {
        if self.active {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
