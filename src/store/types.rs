use serde::Serialize;

/// Lifecycle of the cached master connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No master has been identified yet (or the last call gave up).
    Disconnected,
    /// A master handle is cached and used by every operation.
    Connected,
    /// An operation failed and the manager is probing for a new master.
    Recovering,
}

/// Snapshot of every tracked attribute of one message, decoded.
///
/// Counters read as zero when absent; the other attributes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub status: Option<String>,
    pub ack_count: u64,
    pub timeout: Option<i64>,
    pub delay: Option<i64>,
    pub attempts: u64,
    pub exceptions: u64,
    /// Whether some process currently holds the execution lock.
    pub mutex: bool,
    pub expires: Option<i64>,
}

/// Outcome of one garbage-collection sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// `expires` keys returned by the scan.
    pub scanned: usize,
    /// Records whose keys were deleted.
    pub deleted: usize,
    /// Records still inside their lifetime.
    pub retained: usize,
    /// Malformed keys, vanished keys and unreadable expiry values.
    pub skipped: usize,
}

/// Current wall-clock time in epoch seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
