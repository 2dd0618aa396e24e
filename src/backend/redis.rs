//! Redis Backend
//!
//! Maps the `Backend` contract onto Redis commands over a tokio multiplexed
//! connection. Every command is bounded by the configured timeout so a hung
//! replica surfaces as `Unavailable` instead of blocking the caller forever.

use super::{Backend, BackendError, Connector, Endpoint, Role};

use ::redis::aio::MultiplexedConnection;
use ::redis::{Cmd, ErrorKind, FromRedisValue, RedisError, RedisResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// Opens Redis connections against a fixed database index.
pub struct RedisConnector {
    db: i64,
    timeout: Duration,
}

impl RedisConnector {
    pub fn new(db: i64, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    fn url(&self, endpoint: &Endpoint) -> String {
        format!("redis://{}:{}/{}", endpoint.host, endpoint.port, self.db)
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Backend>, BackendError> {
        let client =
            ::redis::Client::open(self.url(endpoint)).map_err(|e| classify(endpoint, e))?;

        let conn = tokio::time::timeout(self.timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| BackendError::unavailable(endpoint, "connect timed out"))?
            .map_err(|e| classify(endpoint, e))?;

        tracing::debug!("Opened redis connection to {} (db {})", endpoint, self.db);

        Ok(Arc::new(RedisBackend {
            endpoint: endpoint.clone(),
            conn,
            timeout: self.timeout,
        }))
    }
}

pub struct RedisBackend {
    endpoint: Endpoint,
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl RedisBackend {
    async fn query<T: FromRedisValue>(&self, cmd: Cmd) -> Result<T, BackendError> {
        let mut conn = self.conn.clone();
        let reply = tokio::time::timeout(self.timeout, async move {
            let result: RedisResult<T> = cmd.query_async(&mut conn).await;
            result
        })
        .await;

        match reply {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify(&self.endpoint, e)),
            Err(_) => Err(BackendError::unavailable(&self.endpoint, "command timed out")),
        }
    }
}

#[async_trait]
impl Backend for RedisBackend {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn role(&self) -> Result<Role, BackendError> {
        let reply: Vec<::redis::Value> = self.query(::redis::cmd("ROLE")).await?;
        let name = reply
            .first()
            .ok_or_else(|| BackendError::rejected(&self.endpoint, "empty ROLE reply"))?;
        let name: String =
            ::redis::from_redis_value(name).map_err(|e| classify(&self.endpoint, e))?;
        Ok(Role::from_name(&name))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, BackendError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = ::redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        self.query(cmd).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.query(cmd).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, BackendError> {
        let mut cmd = ::redis::cmd("SETNX");
        cmd.arg(key).arg(value);
        self.query(cmd).await
    }

    async fn multi_set_if_absent(&self, entries: &[(String, String)]) -> Result<bool, BackendError> {
        let mut cmd = ::redis::cmd("MSETNX");
        for (key, value) in entries {
            cmd.arg(key).arg(value);
        }
        self.query(cmd).await
    }

    async fn increment(&self, key: &str) -> Result<i64, BackendError> {
        let mut cmd = ::redis::cmd("INCR");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = ::redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        self.query(cmd).await
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut cmd = ::redis::cmd("EXISTS");
        cmd.arg(key);
        self.query(cmd).await
    }

    async fn flush_all(&self) -> Result<(), BackendError> {
        self.query(::redis::cmd("FLUSHDB")).await
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, BackendError> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = ::redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.query(cmd).await?;
            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once while the table is rehashing.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Connection loss, timeouts and the replies a replica set gives while its master is
/// moving (READONLY, LOADING, MASTERDOWN, TRYAGAIN, cluster redirects) are worth a
/// failover retry. Every other error is deterministic: retrying it against a new
/// master would only fail again.
fn classify(endpoint: &Endpoint, error: RedisError) -> BackendError {
    let transient = error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || matches!(
            error.kind(),
            ErrorKind::IoError
                | ErrorKind::ReadOnly
                | ErrorKind::BusyLoadingError
                | ErrorKind::MasterDown
                | ErrorKind::TryAgain
                | ErrorKind::ClusterDown
                | ErrorKind::Moved
                | ErrorKind::Ask
        );

    if transient {
        BackendError::unavailable(endpoint, error.to_string())
    } else {
        BackendError::rejected(endpoint, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes a raw RESP error line the way the connection does.
    fn server_error(reply: &str) -> RedisError {
        let raw = format!("{reply}\r\n");
        match ::redis::parse_redis_value(raw.as_bytes()) {
            Err(e) => e,
            Ok(value) => value.extract_error().unwrap_err(),
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("10.0.0.1", 6379)
    }

    #[test]
    fn test_deterministic_server_errors_are_rejected() {
        let replies = [
            "-WRONGTYPE Operation against a key holding the wrong kind of value",
            "-ERR value is not an integer or out of range",
            "-NOPERM this user has no permissions to run the 'flushdb' command",
        ];

        for reply in replies {
            let classified = classify(&endpoint(), server_error(reply));
            assert!(
                matches!(classified, BackendError::Rejected { .. }),
                "{reply} classified as {classified:?}"
            );
        }
    }

    #[test]
    fn test_failover_replies_are_transient() {
        let replies = [
            "-READONLY You can't write against a read only replica.",
            "-LOADING Redis is loading the dataset in memory",
            "-MASTERDOWN Link with MASTER is down and replica-serve-stale-data is set to 'no'.",
            "-TRYAGAIN Multiple keys request during rehashing of slot",
        ];

        for reply in replies {
            let classified = classify(&endpoint(), server_error(reply));
            assert!(classified.is_transient(), "{reply} classified as {classified:?}");
        }
    }

    #[test]
    fn test_io_errors_are_transient() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let classified = classify(&endpoint(), RedisError::from(refused));

        assert!(classified.is_transient());
    }
}
