//! Message State Store
//!
//! The per-message, per-attribute operations used by the consuming client to
//! deduplicate deliveries and track handler progress. Every call maps a
//! `(MessageId, Suffix)` pair to a backend key and runs through the connection
//! manager's failover wrapper.
//!
//! Values are stored as strings for compatibility with existing deployments and
//! decoded to real types here, at the public boundary.

use super::config::StoreConfig;
use super::connection::ConnectionManager;
use super::keys::{EXPIRES_PATTERN, MessageId, Suffix};
use super::types::MessageRecord;
use crate::backend::redis::RedisConnector;
use crate::error::StoreError;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

/// Value stored in the `mutex` key while the lock is held.
const MUTEX_HELD: &str = "1";

pub struct MessageStore {
    connection: Arc<ConnectionManager>,
}

impl MessageStore {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Builds a store backed by the Redis replica set described in `config`.
    pub fn connect(config: &StoreConfig) -> Self {
        let connector = Arc::new(RedisConnector::new(config.db, config.connect_timeout()));
        Self::new(Arc::new(ConnectionManager::from_config(config, connector)))
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Unconditional overwrite.
    pub async fn set<V: ToString>(
        &self,
        id: &MessageId,
        suffix: Suffix,
        value: V,
    ) -> Result<(), StoreError> {
        let key = id.key(suffix);
        let value = value.to_string();
        let (key, value) = (key.as_str(), value.as_str());

        self.connection
            .perform("set", |conn| async move { conn.set(key, value).await })
            .await
    }

    /// Writes the value only if the key is absent. Returns whether it was written.
    pub async fn set_if_absent<V: ToString>(
        &self,
        id: &MessageId,
        suffix: Suffix,
        value: V,
    ) -> Result<bool, StoreError> {
        let key = id.key(suffix);
        let value = value.to_string();
        let (key, value) = (key.as_str(), value.as_str());

        self.connection
            .perform("set_if_absent", |conn| async move {
                conn.set_if_absent(key, value).await
            })
            .await
    }

    /// Writes every given attribute only if none of them exists yet.
    ///
    /// This is how a record is initialised exactly once when the same message is
    /// delivered to several consumers at the same time. Either all attributes are
    /// written or none. Repeated suffixes keep their last value; an empty set is
    /// trivially applied without a round trip.
    pub async fn multi_set_if_absent<I, V>(
        &self,
        id: &MessageId,
        values: I,
    ) -> Result<bool, StoreError>
    where
        I: IntoIterator<Item = (Suffix, V)>,
        V: ToString,
    {
        let entries: Vec<(String, String)> = values
            .into_iter()
            .map(|(suffix, value)| (suffix, value.to_string()))
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .map(|(suffix, value)| (id.key(suffix), value))
            .collect();

        if entries.is_empty() {
            return Ok(true);
        }

        let entries = entries.as_slice();
        self.connection
            .perform("multi_set_if_absent", |conn| async move {
                conn.multi_set_if_absent(entries).await
            })
            .await
    }

    /// Atomically adds one (an absent counter starts from zero) and returns the new
    /// value.
    pub async fn increment(&self, id: &MessageId, suffix: Suffix) -> Result<u64, StoreError> {
        let key = id.key(suffix);
        let key_ref = key.as_str();

        let value = self
            .connection
            .perform("increment", |conn| async move { conn.increment(key_ref).await })
            .await?;

        u64::try_from(value).map_err(|_| StoreError::InvalidValue {
            key,
            value: value.to_string(),
            expected: "a non-negative counter",
        })
    }

    pub async fn get(&self, id: &MessageId, suffix: Suffix) -> Result<Option<String>, StoreError> {
        let key = id.key(suffix);
        let key = key.as_str();

        self.connection
            .perform("get", |conn| async move { conn.get(key).await })
            .await
    }

    /// Reads an attribute and decodes it as `T`. Absent attributes yield `None`.
    pub async fn get_parsed<T: FromStr>(
        &self,
        id: &MessageId,
        suffix: Suffix,
    ) -> Result<Option<T>, StoreError> {
        match self.get(id, suffix).await? {
            Some(raw) => decode(&id.key(suffix), raw, type_label::<T>()).map(Some),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &MessageId, suffix: Suffix) -> Result<bool, StoreError> {
        let key = [id.key(suffix)];
        let key = key.as_slice();

        let removed = self
            .connection
            .perform("delete", |conn| async move { conn.delete(key).await })
            .await?;
        Ok(removed > 0)
    }

    /// Deletes every attribute of the message in one request and returns how many
    /// keys existed. Attributes that were never set are ignored.
    pub async fn delete_all(&self, id: &MessageId) -> Result<u64, StoreError> {
        let keys = id.keys();
        let keys = keys.as_slice();

        self.connection
            .perform("delete_all", |conn| async move { conn.delete(keys).await })
            .await
    }

    pub async fn exists(&self, id: &MessageId, suffix: Suffix) -> Result<bool, StoreError> {
        let key = id.key(suffix);
        let key = key.as_str();

        self.connection
            .perform("exists", |conn| async move { conn.exists(key).await })
            .await
    }

    /// Wipes the whole selected database. For tests and resets only.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        tracing::warn!("Flushing every key of the selected database");
        self.connection
            .perform("flush_all", |conn| async move { conn.flush_all().await })
            .await
    }

    /// Every `...:expires` key currently stored, for the garbage collector.
    pub async fn expires_keys(&self) -> Result<Vec<String>, StoreError> {
        self.connection
            .perform("scan_expires", |conn| async move {
                conn.keys_matching(EXPIRES_PATTERN).await
            })
            .await
    }

    /// Reads all eight attributes in a single round trip.
    pub async fn record(&self, id: &MessageId) -> Result<MessageRecord, StoreError> {
        let keys = id.keys();
        let keys_ref = keys.as_slice();

        let values = self
            .connection
            .perform("record", |conn| async move { conn.get_many(keys_ref).await })
            .await?;

        let mut record = MessageRecord {
            id: id.to_string(),
            ..MessageRecord::default()
        };

        for ((suffix, key), value) in Suffix::ALL.iter().zip(keys.iter()).zip(values) {
            let Some(raw) = value else { continue };
            match suffix {
                Suffix::Status => record.status = Some(raw),
                Suffix::AckCount => record.ack_count = decode(key, raw, "an integer counter")?,
                Suffix::Timeout => record.timeout = Some(decode(key, raw, "an integer")?),
                Suffix::Delay => record.delay = Some(decode(key, raw, "an integer")?),
                Suffix::Attempts => record.attempts = decode(key, raw, "an integer counter")?,
                Suffix::Exceptions => record.exceptions = decode(key, raw, "an integer counter")?,
                Suffix::Mutex => record.mutex = true,
                Suffix::Expires => record.expires = Some(decode(key, raw, "an integer")?),
            }
        }

        Ok(record)
    }

    // --- Typed accessors ---

    pub async fn status(&self, id: &MessageId) -> Result<Option<String>, StoreError> {
        self.get(id, Suffix::Status).await
    }

    pub async fn ack_count(&self, id: &MessageId) -> Result<u64, StoreError> {
        self.counter(id, Suffix::AckCount).await
    }

    pub async fn attempts(&self, id: &MessageId) -> Result<u64, StoreError> {
        self.counter(id, Suffix::Attempts).await
    }

    pub async fn exceptions(&self, id: &MessageId) -> Result<u64, StoreError> {
        self.counter(id, Suffix::Exceptions).await
    }

    pub async fn timeout(&self, id: &MessageId) -> Result<Option<i64>, StoreError> {
        self.get_parsed(id, Suffix::Timeout).await
    }

    pub async fn delay(&self, id: &MessageId) -> Result<Option<i64>, StoreError> {
        self.get_parsed(id, Suffix::Delay).await
    }

    pub async fn expires(&self, id: &MessageId) -> Result<Option<i64>, StoreError> {
        self.get_parsed(id, Suffix::Expires).await
    }

    async fn counter(&self, id: &MessageId, suffix: Suffix) -> Result<u64, StoreError> {
        Ok(self.get_parsed::<u64>(id, suffix).await?.unwrap_or(0))
    }

    // --- Execution lock ---

    /// Takes the advisory execution lock. Returns `false` if another process holds it.
    ///
    /// The lock carries no owner token and no expiry of its own; it goes away with
    /// `release_mutex` or when the record is reclaimed.
    pub async fn acquire_mutex(&self, id: &MessageId) -> Result<bool, StoreError> {
        let acquired = self.set_if_absent(id, Suffix::Mutex, MUTEX_HELD).await?;
        tracing::debug!("Mutex for {} acquired: {}", id, acquired);
        Ok(acquired)
    }

    /// Releases the execution lock. Returns whether it was held.
    pub async fn release_mutex(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.delete(id, Suffix::Mutex).await
    }
}

fn decode<T: FromStr>(key: &str, raw: String, expected: &'static str) -> Result<T, StoreError> {
    raw.trim().parse::<T>().map_err(|_| StoreError::InvalidValue {
        key: key.to_string(),
        value: raw,
        expected,
    })
}

fn type_label<T>() -> &'static str {
    std::any::type_name::<T>()
}
