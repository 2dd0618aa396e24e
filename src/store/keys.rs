//! Key-space naming.
//!
//! Every tracked attribute of a message lives under its own key,
//! `msgid:<namespace>:<token>:<suffix>`. The layout is shared with existing
//! deployments and must not change.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Leading component of every message id.
pub const ID_PREFIX: &str = "msgid";

const DELIMITER: char = ':';

/// Pattern matching the `expires` key of every tracked message in the database.
pub const EXPIRES_PATTERN: &str = "msgid:*:expires";

/// The attributes tracked per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suffix {
    /// Handler completion state.
    Status,
    /// Deliveries observed.
    AckCount,
    /// Handler execution timeout.
    Timeout,
    /// Earliest epoch second at which the next attempt may run.
    Delay,
    /// Handler invocations so far.
    Attempts,
    /// Handler exceptions recorded.
    Exceptions,
    /// Present while some process executes the handler.
    Mutex,
    /// Epoch second after which the whole record may be reclaimed.
    Expires,
}

impl Suffix {
    /// All suffixes in their canonical order.
    pub const ALL: [Suffix; 8] = [
        Suffix::Status,
        Suffix::AckCount,
        Suffix::Timeout,
        Suffix::Delay,
        Suffix::Attempts,
        Suffix::Exceptions,
        Suffix::Mutex,
        Suffix::Expires,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Suffix::Status => "status",
            Suffix::AckCount => "ack_count",
            Suffix::Timeout => "timeout",
            Suffix::Delay => "delay",
            Suffix::Attempts => "attempts",
            Suffix::Exceptions => "exceptions",
            Suffix::Mutex => "mutex",
            Suffix::Expires => "expires",
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown attribute '{0}'")]
pub struct UnknownSuffix(pub String);

impl FromStr for Suffix {
    type Err = UnknownSuffix;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Suffix::ALL
            .into_iter()
            .find(|suffix| suffix.as_str() == s)
            .ok_or_else(|| UnknownSuffix(s.to_string()))
    }
}

/// Identifier of one inbound message, already carrying the `msgid:<namespace>:`
/// prefix. The token part is opaque to every operation except garbage collection,
/// which only recognises hex-and-dash tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(namespace: &str, token: &str) -> Self {
        Self(format!("{ID_PREFIX}{DELIMITER}{namespace}{DELIMITER}{token}"))
    }

    /// Generates a fresh id with a random UUID token.
    pub fn generate(namespace: &str) -> Self {
        Self::new(namespace, &uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an id that the caller already built with the full prefix.
    pub fn from_prefixed(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Strict parse of `msgid:<namespace>:<token>` where the token is made of hex
    /// digits and dashes. Anything else yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, DELIMITER);
        let prefix = parts.next()?;
        let namespace = parts.next()?;
        let token = parts.next()?;

        if prefix != ID_PREFIX || namespace.is_empty() || token.is_empty() {
            return None;
        }
        if !token.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return None;
        }

        Some(Self(raw.to_string()))
    }

    /// Recovers the message id from one of its `...:expires` keys.
    pub fn from_expires_key(key: &str) -> Option<Self> {
        let raw = key.strip_suffix(Suffix::Expires.as_str())?;
        let raw = raw.strip_suffix(DELIMITER)?;
        Self::parse(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace component, when the id follows the standard layout.
    pub fn namespace(&self) -> Option<&str> {
        let mut parts = self.0.splitn(3, DELIMITER);
        match (parts.next(), parts.next()) {
            (Some(ID_PREFIX), Some(namespace)) if !namespace.is_empty() => Some(namespace),
            _ => None,
        }
    }

    /// `<id>:<suffix>`
    pub fn key(&self, suffix: Suffix) -> String {
        format!("{}{DELIMITER}{}", self.0, suffix.as_str())
    }

    /// Every attribute key of this message, in canonical suffix order.
    pub fn keys(&self) -> Vec<String> {
        Suffix::ALL.iter().map(|suffix| self.key(*suffix)).collect()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::glob_match;

    #[test]
    fn test_key_layout_is_stable() {
        let id = MessageId::new("orders", "0f3a-77");

        assert_eq!(id.as_str(), "msgid:orders:0f3a-77");
        assert_eq!(id.key(Suffix::AckCount), "msgid:orders:0f3a-77:ack_count");
        assert_eq!(id.key(Suffix::Expires), "msgid:orders:0f3a-77:expires");
    }

    #[test]
    fn test_keys_cover_every_suffix_in_order() {
        let id = MessageId::new("ns", "abc");
        let keys = id.keys();

        assert_eq!(
            keys,
            vec![
                "msgid:ns:abc:status",
                "msgid:ns:abc:ack_count",
                "msgid:ns:abc:timeout",
                "msgid:ns:abc:delay",
                "msgid:ns:abc:attempts",
                "msgid:ns:abc:exceptions",
                "msgid:ns:abc:mutex",
                "msgid:ns:abc:expires",
            ]
        );
    }

    #[test]
    fn test_suffix_parses_its_own_name() {
        for suffix in Suffix::ALL {
            assert_eq!(suffix.as_str().parse::<Suffix>(), Ok(suffix));
        }
        assert!("mutexes".parse::<Suffix>().is_err());
    }

    #[test]
    fn test_generated_id_is_collectable() {
        let id = MessageId::generate("billing");
        let key = id.key(Suffix::Expires);

        assert_eq!(MessageId::from_expires_key(&key), Some(id.clone()));
        assert_eq!(id.namespace(), Some("billing"));
    }

    #[test]
    fn test_expires_key_parser_rejects_malformed_keys() {
        let cases = [
            "msgid:ns:abc:status",       // wrong suffix
            "msgid:ns:expires",          // missing token
            "msgid::abc:expires",        // empty namespace
            "other:ns:abc:expires",      // wrong prefix
            "msgid:ns:not-hex!:expires", // token outside hex/dash
            "msgid:ns:ab:cd:expires",    // extra component
            "expires",
            "",
        ];

        for key in cases {
            assert_eq!(MessageId::from_expires_key(key), None, "key {key:?}");
        }
    }

    #[test]
    fn test_expires_pattern_matches_only_message_keys() {
        let id = MessageId::new("ns", "abc");

        assert!(glob_match(EXPIRES_PATTERN, &id.key(Suffix::Expires)));
        assert!(!glob_match(EXPIRES_PATTERN, &id.key(Suffix::Status)));
        assert!(!glob_match(EXPIRES_PATTERN, "session:42:expires"));
    }

    #[test]
    fn test_expires_key_parser_accepts_uppercase_hex() {
        let id = MessageId::from_expires_key("msgid:ns:DEADBEEF-01:expires").unwrap();
        assert_eq!(id.as_str(), "msgid:ns:DEADBEEF-01");
    }
}
