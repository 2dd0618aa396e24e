//! Garbage Collector
//!
//! Reclaims the keys of records whose lifetime has passed. The `expires`
//! attribute is the only index: records without one are never collected.
//!
//! ## Sweep
//! 1. Scan every `msgid:*:expires` key in the database.
//! 2. Recover the message id from the key; malformed keys are skipped.
//! 3. Read the stored expiry and compare it against `now + threshold`. The grace
//!    window reclaims records slightly early, which tolerates clock skew and scan
//!    latency.
//! 4. Strictly earlier expiries get all eight keys deleted in one request.
//!
//! The sweep is idempotent and safe to run next to live traffic and next to
//! another sweep: keys that disappear mid-sweep are skipped, deleting a deleted key
//! is a no-op.

use super::config::StoreConfig;
use super::keys::{MessageId, Suffix};
use super::state::MessageStore;
use super::types::{SweepReport, now_secs};
use crate::error::StoreError;

use std::sync::Arc;
use std::time::Duration;

/// What the sweep does with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDecision {
    Delete,
    Retain,
    /// The stored value is neither empty nor a timestamp.
    Unreadable,
}

/// Decides a record's fate from its raw `expires` value.
///
/// An empty value counts as already expired. Fractional epoch seconds are accepted.
pub fn expiry_decision(raw: &str, cutoff: i64) -> ExpiryDecision {
    let raw = raw.trim();
    if raw.is_empty() {
        return ExpiryDecision::Delete;
    }

    let expired = match raw.parse::<i64>() {
        Ok(expires) => expires < cutoff,
        Err(_) => match raw.parse::<f64>() {
            Ok(expires) if expires.is_finite() => expires < cutoff as f64,
            _ => return ExpiryDecision::Unreadable,
        },
    };

    if expired {
        ExpiryDecision::Delete
    } else {
        ExpiryDecision::Retain
    }
}

pub struct GarbageCollector {
    store: Arc<MessageStore>,
    threshold_secs: i64,
}

impl GarbageCollector {
    pub fn new(store: Arc<MessageStore>, threshold_secs: i64) -> Self {
        Self {
            store,
            threshold_secs,
        }
    }

    pub fn from_config(store: Arc<MessageStore>, config: &StoreConfig) -> Self {
        Self::new(store, config.gc_threshold_secs)
    }

    pub fn threshold_secs(&self) -> i64 {
        self.threshold_secs
    }

    /// Sweeps using the wall clock.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        self.sweep_at(now_secs()).await
    }

    /// Sweeps as if the current time were `now` (epoch seconds).
    pub async fn sweep_at(&self, now: i64) -> Result<SweepReport, StoreError> {
        let cutoff = now.saturating_add(self.threshold_secs);
        let keys = self.store.expires_keys().await?;

        let mut report = SweepReport {
            scanned: keys.len(),
            ..SweepReport::default()
        };

        for key in keys {
            let Some(id) = MessageId::from_expires_key(&key) else {
                tracing::warn!("Skipping key {} with unrecognised message id", key);
                report.skipped += 1;
                continue;
            };

            let Some(raw) = self.store.get(&id, Suffix::Expires).await? else {
                // Removed concurrently by another sweep or an explicit delete.
                report.skipped += 1;
                continue;
            };

            match expiry_decision(&raw, cutoff) {
                ExpiryDecision::Delete => {
                    let removed = self.store.delete_all(&id).await?;
                    tracing::info!(
                        "GC: deleted {} ({} keys, expires={:?}, cutoff={})",
                        id,
                        removed,
                        raw,
                        cutoff
                    );
                    report.deleted += 1;
                }
                ExpiryDecision::Retain => {
                    tracing::debug!("GC: retained {} (expires={}, cutoff={})", id, raw, cutoff);
                    report.retained += 1;
                }
                ExpiryDecision::Unreadable => {
                    tracing::warn!("GC: skipping {} with unreadable expiry {:?}", id, raw);
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            "GC sweep finished: scanned={} deleted={} retained={} skipped={}",
            report.scanned,
            report.deleted,
            report.retained,
            report.skipped
        );

        Ok(report)
    }

    /// Sweeps every `interval` until a sweep fails with a fatal error.
    ///
    /// `NoMaster` is logged and the loop keeps going; split brain stops it. A zero
    /// interval is refused with `InvalidConfig` before the first sweep.
    pub async fn run_every(&self, interval: Duration) -> Result<(), StoreError> {
        if interval.is_zero() {
            return Err(StoreError::InvalidConfig {
                reason: "sweep interval must be greater than zero".to_string(),
            });
        }

        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(_) => {}
                Err(e @ StoreError::SplitBrain { .. }) => {
                    tracing::error!("GC stopped: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("GC sweep failed: {}", e);
                }
            }
        }
    }
}
