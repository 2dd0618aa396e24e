//! Backend Module Tests
//!
//! Validates the backend building blocks without a live Redis.
//!
//! ## Test Scopes
//! - **Endpoint / Role**: Parsing of `host:port` and role names.
//! - **Memory Replica Set**: Primitive semantics, READONLY behaviour of replicas,
//!   fault injection and the all-or-nothing multi-key conditional set.
//! - **Glob Matching**: The pattern subset used for key scans.

#[cfg(test)]
mod tests {
    use crate::backend::memory::{MemoryCluster, glob_match};
    use crate::backend::{Backend, BackendError, Connector, Endpoint, Role};
    use std::sync::Arc;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    async fn master_handle() -> (Arc<MemoryCluster>, Arc<dyn Backend>) {
        let cluster = MemoryCluster::with_replicas(&[(endpoint(6379), Role::Master)]);
        let handle = cluster.connect(&endpoint(6379)).await.unwrap();
        (cluster, handle)
    }

    // ============================================================
    // ENDPOINT & ROLE TESTS
    // ============================================================

    #[test]
    fn test_endpoint_parse_and_display() {
        let parsed: Endpoint = " redis-a.internal:6380 ".parse().unwrap();

        assert_eq!(parsed, Endpoint::new("redis-a.internal", 6380));
        assert_eq!(parsed.to_string(), "redis-a.internal:6380");
    }

    #[test]
    fn test_endpoint_parse_rejects_malformed_input() {
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!(":6379".parse::<Endpoint>().is_err());
        assert!("localhost:redis".parse::<Endpoint>().is_err());
        assert!("localhost:70000".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_deserializes_from_string() {
        let nodes: Vec<Endpoint> = serde_json::from_str(r#"["a:1", "b:2"]"#).unwrap();
        assert_eq!(nodes, vec![Endpoint::new("a", 1), Endpoint::new("b", 2)]);
    }

    #[test]
    fn test_role_from_name() {
        assert_eq!(Role::from_name("master"), Role::Master);
        assert_eq!(Role::from_name("MASTER"), Role::Master);
        assert_eq!(Role::from_name("slave"), Role::Replica);
        assert_eq!(Role::from_name("sentinel"), Role::Replica);
    }

    #[test]
    fn test_only_unavailable_errors_are_transient() {
        let e = endpoint(1);
        assert!(BackendError::unavailable(&e, "refused").is_transient());
        assert!(!BackendError::rejected(&e, "not an integer").is_transient());
    }

    // ============================================================
    // MEMORY REPLICA TESTS
    // ============================================================

    #[tokio::test]
    async fn test_memory_set_get_round_trip() {
        let (_cluster, conn) = master_handle().await;

        conn.set("k", "value with spaces").await.unwrap();

        assert_eq!(conn.get("k").await.unwrap().as_deref(), Some("value with spaces"));
        assert_eq!(conn.get("missing").await.unwrap(), None);
        assert!(conn.exists("k").await.unwrap());
        assert!(!conn.exists("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_set_if_absent_does_not_overwrite() {
        let (_cluster, conn) = master_handle().await;

        assert!(conn.set_if_absent("lock", "a").await.unwrap());
        assert!(!conn.set_if_absent("lock", "b").await.unwrap());
        assert_eq!(conn.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_memory_multi_set_if_absent_is_all_or_nothing() {
        let (_cluster, conn) = master_handle().await;
        conn.set("b", "existing").await.unwrap();

        let entries = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];

        assert!(!conn.multi_set_if_absent(&entries).await.unwrap());
        assert_eq!(conn.get("a").await.unwrap(), None, "no partial application");
        assert_eq!(conn.get("b").await.unwrap().as_deref(), Some("existing"));

        conn.delete(&["b".to_string()]).await.unwrap();
        assert!(conn.multi_set_if_absent(&entries).await.unwrap());
        assert_eq!(conn.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(conn.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_memory_increment_creates_and_counts() {
        let (_cluster, conn) = master_handle().await;

        assert_eq!(conn.increment("n").await.unwrap(), 1);
        assert_eq!(conn.increment("n").await.unwrap(), 2);
        assert_eq!(conn.get("n").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_memory_increment_rejects_non_integer() {
        let (_cluster, conn) = master_handle().await;
        conn.set("n", "seven").await.unwrap();

        let err = conn.increment("n").await.unwrap_err();

        assert!(matches!(err, BackendError::Rejected { .. }));
        assert_eq!(conn.get("n").await.unwrap().as_deref(), Some("seven"));
    }

    #[tokio::test]
    async fn test_memory_delete_counts_existing_keys() {
        let (_cluster, conn) = master_handle().await;
        conn.set("a", "1").await.unwrap();
        conn.set("b", "1").await.unwrap();

        let removed = conn
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(conn.delete(&["a".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_keys_matching_and_flush() {
        let (cluster, conn) = master_handle().await;
        conn.set("msgid:ns:a:expires", "1").await.unwrap();
        conn.set("msgid:ns:a:status", "done").await.unwrap();
        conn.set("msgid:ns:b:expires", "2").await.unwrap();

        let keys = conn.keys_matching("*:expires").await.unwrap();
        assert_eq!(keys, vec!["msgid:ns:a:expires", "msgid:ns:b:expires"]);

        conn.flush_all().await.unwrap();
        assert!(cluster.keyspace().is_empty());
    }

    #[tokio::test]
    async fn test_memory_replica_rejects_writes_but_serves_reads() {
        let cluster = MemoryCluster::with_replicas(&[
            (endpoint(1), Role::Master),
            (endpoint(2), Role::Replica),
        ]);
        let master = cluster.connect(&endpoint(1)).await.unwrap();
        let replica = cluster.connect(&endpoint(2)).await.unwrap();

        master.set("k", "v").await.unwrap();

        assert_eq!(replica.get("k").await.unwrap().as_deref(), Some("v"));
        let err = replica.set("k", "w").await.unwrap_err();
        assert!(err.is_transient(), "READONLY must be retryable: {err}");
    }

    #[tokio::test]
    async fn test_memory_fault_injection() {
        let cluster = MemoryCluster::with_replicas(&[(endpoint(1), Role::Master)]);
        let replica = cluster.replica(&endpoint(1)).unwrap();
        let conn = cluster.connect(&endpoint(1)).await.unwrap();

        replica.fail_next(2);
        assert!(conn.get("k").await.is_err());
        assert!(conn.role().await.is_err());
        assert!(conn.get("k").await.is_ok());

        replica.set_down(true);
        assert!(cluster.connect(&endpoint(1)).await.is_err());
        assert!(conn.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_failover_moves_master_role() {
        let cluster = MemoryCluster::with_replicas(&[
            (endpoint(1), Role::Master),
            (endpoint(2), Role::Replica),
        ]);

        cluster.failover(&endpoint(1), &endpoint(2));

        assert_eq!(cluster.replica(&endpoint(1)).unwrap().current_role(), Role::Replica);
        assert_eq!(cluster.replica(&endpoint(2)).unwrap().current_role(), Role::Master);
    }

    #[tokio::test]
    async fn test_memory_unknown_endpoint_is_unavailable() {
        let cluster = MemoryCluster::new();
        let err = cluster.connect(&endpoint(9)).await.err().unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_memory_concurrent_multi_set_has_single_winner() {
        let cluster = MemoryCluster::with_replicas(&[(endpoint(1), Role::Master)]);
        let mut handles = Vec::new();

        for i in 0..16 {
            let conn = cluster.connect(&endpoint(1)).await.unwrap();
            handles.push(tokio::spawn(async move {
                let entries = vec![
                    ("shared".to_string(), i.to_string()),
                    (format!("own-{i}"), i.to_string()),
                ];
                conn.multi_set_if_absent(&entries).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        // Only the winner's private key exists alongside the shared one.
        assert_eq!(cluster.keyspace().len(), 2);
    }

    // ============================================================
    // GLOB TESTS
    // ============================================================

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*:expires", "msgid:ns:abc:expires"));
        assert!(glob_match("msgid:*", "msgid:"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*", ""));
        assert!(glob_match("*a*b", "xxaxxb"));

        assert!(!glob_match("*:expires", "msgid:ns:abc:status"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("abc", "abcd"));
    }
}
