use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address of one replica in the configured replica set.
///
/// Parsed from and rendered as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint '{0}' is not in host:port form")]
    MissingPort(String),
    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),
    #[error("endpoint '{input}' has an invalid port '{port}'")]
    InvalidPort { input: String, port: String },
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(input.to_string()))?;

        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(input.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort {
                input: input.to_string(),
                port: port.to_string(),
            })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

/// Replication role reported by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts writes.
    Master,
    /// Anything else (replica, sentinel, loading). Never written to.
    Replica,
}

impl Role {
    /// Maps a role name as reported by the store (`master`, `slave`, `replica`, ...).
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("master") {
            Role::Master
        } else {
            Role::Replica
        }
    }
}

/// Failure of a single backend round trip.
///
/// `Unavailable` covers everything that a new master could fix: refused or dropped
/// connections, timeouts, and writes sent to a replica that lost the master role.
/// `Rejected` means the replica answered and refused the command itself, so retrying
/// against another master gives the same answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("endpoint {endpoint} unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    #[error("endpoint {endpoint} rejected the command: {reason}")]
    Rejected { endpoint: String, reason: String },
}

impl BackendError {
    pub fn unavailable(endpoint: &Endpoint, reason: impl Into<String>) -> Self {
        BackendError::Unavailable {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rejected(endpoint: &Endpoint, reason: impl Into<String>) -> Self {
        BackendError::Rejected {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failover wrapper should drop the connection and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable { .. })
    }
}
