//! Public error taxonomy.
//!
//! Transport failures never reach callers directly: they are absorbed by the
//! failover wrapper and only surface as `NoMaster` once the retry bound is spent.

use crate::backend::{BackendError, Endpoint};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Discovery found no replica reporting the master role, or every failover
    /// attempt failed. The whole store should be treated as unavailable.
    #[error("no master available")]
    NoMaster {
        #[source]
        last_error: Option<BackendError>,
    },

    /// More than one replica claims to be master. Never retried or auto-resolved.
    #[error("ambiguous master: {} replicas report the master role ({})", masters.len(), join(masters))]
    SplitBrain { masters: Vec<Endpoint> },

    /// The backend answered but refused the command (e.g. incrementing a
    /// non-integer). Deterministic, so it is not retried.
    #[error("{operation} rejected by the backend")]
    Rejected {
        operation: String,
        #[source]
        source: BackendError,
    },

    /// A caller-supplied setting cannot be used (e.g. a zero sweep interval).
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A stored value could not be decoded into the requested type.
    #[error("invalid value {value:?} stored at {key}: expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

fn join(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(|endpoint| endpoint.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
