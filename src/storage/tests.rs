//! Storage Module Tests
//!
//! Validates the embedded grid and the remote map client.
//!
//! ## Test Scopes
//! - **PartitionedMap**: Local operations, null rejection, key locks and waiting writers.
//! - **Grid**: Map creation, stats and per-handle lock owners.
//! - **Protocol**: Command application and wire format.
//! - **RemoteGrid**: Full round trips against an in-process node, and unreachable nodes.

#[cfg(test)]
mod tests {
    use crate::config::DispatcherConfig;
    use crate::dispatch::error::ErrorKind;
    use crate::dispatch::map::MapDispatcher;
    use crate::exchange::types::{Exchange, HeaderValue};
    use crate::operation::types::{OBJECT_ID, OPERATION, Operation};
    use crate::storage::handle::{MapError, MapErrorKind, MapHandle, MapProvider};
    use crate::storage::handlers::{apply_command, handle_map_command};
    use crate::storage::memory::{Grid, GridMap, OwnerId, PartitionedMap};
    use crate::storage::partitioner::PartitionManager;
    use crate::storage::predicate::Predicate;
    use crate::storage::protocol::{ENDPOINT_MAP_INTERNAL, MapCommand, MapRequest, MapResponse};
    use crate::storage::remote::{RemoteConfig, RemoteGrid};

    use axum::{Extension, Router, routing::post};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn local_map() -> (Arc<PartitionedMap>, OwnerId) {
        let map = Arc::new(PartitionedMap::new("books", PartitionManager::new(16)));
        (map, OwnerId::new())
    }

    /// Serves the internal map endpoint on an ephemeral port; returns its base URL.
    async fn spawn_node(grid: Arc<Grid>) -> String {
        let app = Router::new()
            .route(
                &format!("{}/:map", ENDPOINT_MAP_INTERNAL),
                post(handle_map_command),
            )
            .layer(Extension(grid));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    // ============================================================
    // PARTITIONED MAP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_put_get_remove() {
        let (map, owner) = local_map();

        let previous = map.put(&owner, "book_1", json!({"title": "Dune"})).await.unwrap();
        assert_eq!(previous, None);

        let previous = map.put(&owner, "book_1", json!({"title": "Emma"})).await.unwrap();
        assert_eq!(previous, Some(json!({"title": "Dune"})));
        assert_eq!(map.get("book_1"), Some(json!({"title": "Emma"})));

        assert_eq!(map.remove(&owner, "book_1").await, Some(json!({"title": "Emma"})));
        assert_eq!(map.get("book_1"), None);
        assert_eq!(map.local_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_null_values_are_rejected() {
        let (map, owner) = local_map();

        let put = map.put(&owner, "k", Value::Null).await;
        let replace_if = map.replace_if(&owner, "k", Value::Null, json!(1)).await;

        assert!(matches!(put, Err(MapError::NullValue { .. })));
        assert!(matches!(replace_if, Err(MapError::NullValue { .. })));
        assert_eq!(map.local_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_replace_requires_present_key() {
        let (map, owner) = local_map();

        assert_eq!(map.replace(&owner, "k", json!(1)).await.unwrap(), None);
        assert_eq!(map.get("k"), None, "Replace must not insert");

        map.put(&owner, "k", json!(1)).await.unwrap();
        assert_eq!(map.replace(&owner, "k", json!(2)).await.unwrap(), Some(json!(1)));
        assert_eq!(map.get("k"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_replace_if_compares_current_value() {
        let (map, owner) = local_map();
        map.put(&owner, "k", json!("old")).await.unwrap();

        assert!(!map.replace_if(&owner, "k", json!("wrong"), json!("new")).await.unwrap());
        assert_eq!(map.get("k"), Some(json!("old")));

        assert!(map.replace_if(&owner, "k", json!("old"), json!("new")).await.unwrap());
        assert_eq!(map.get("k"), Some(json!("new")));

        assert!(!map.replace_if(&owner, "absent", json!("old"), json!("new")).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_all_and_values() {
        let (map, owner) = local_map();
        for i in 0..20 {
            map.put(&owner, &format!("book_{}", i), json!({"n": i})).await.unwrap();
        }

        let keys: BTreeSet<String> = ["book_3", "book_7", "missing"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let found = map.get_all(&keys);
        assert_eq!(found.len(), 2);
        assert_eq!(found["book_7"], json!({"n": 7}));

        assert_eq!(map.values(None).len(), 20);
        let predicate = Predicate::parse("n >= 15").unwrap();
        assert_eq!(map.values(Some(&predicate)).len(), 5);
        assert!(map.local_partition_count() <= 16);
    }

    #[tokio::test]
    async fn test_lock_is_reentrant_and_owned() {
        let (map, owner) = local_map();
        let stranger = OwnerId::new();

        map.lock(&owner, "k").await;
        map.lock(&owner, "k").await;

        let err = map.unlock(&stranger, "k").unwrap_err();
        assert!(matches!(err, MapError::NotLockOwner { .. }));

        map.unlock(&owner, "k").unwrap();
        assert!(map.is_locked("k"), "One unlock per lock");
        map.unlock(&owner, "k").unwrap();
        assert!(!map.is_locked("k"));

        assert!(matches!(
            map.unlock(&owner, "k"),
            Err(MapError::NotLockOwner { .. })
        ));
    }

    #[tokio::test]
    async fn test_writer_waits_for_foreign_lock() {
        // ARRANGE
        let (map, holder) = local_map();
        map.put(&holder, "k", json!(1)).await.unwrap();
        map.lock(&holder, "k").await;

        // ACT
        let writer = {
            let map = map.clone();
            tokio::spawn(async move { map.put(&OwnerId::new(), "k", json!(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // ASSERT
        assert!(!writer.is_finished(), "Writer must wait for the unlock");
        assert_eq!(map.get("k"), Some(json!(1)), "Reads never wait");

        map.put(&holder, "k", json!(3)).await.unwrap();
        map.unlock(&holder, "k").unwrap();

        let previous = tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(previous, Some(json!(3)));
        assert_eq!(map.get("k"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_lock_waiters_take_turns() {
        let (map, first) = local_map();
        map.lock(&first, "k").await;

        let second = OwnerId::new();
        let waiter = {
            let map = map.clone();
            let second = second.clone();
            tokio::spawn(async move { map.lock(&second, "k").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        map.unlock(&first, "k").unwrap();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();

        assert!(map.is_locked("k"));
        assert!(map.unlock(&first, "k").is_err());
        map.unlock(&second, "k").unwrap();
    }

    #[tokio::test]
    async fn test_clear_keeps_locks() {
        let (map, owner) = local_map();
        map.put(&owner, "a", json!(1)).await.unwrap();
        map.put(&owner, "b", json!(2)).await.unwrap();
        map.lock(&owner, "a").await;

        map.clear();

        assert_eq!(map.local_entry_count(), 0);
        assert_eq!(map.get("a"), None);
        assert!(map.is_locked("a"));
        map.unlock(&owner, "a").unwrap();
        assert!(!map.is_locked("a"));
    }

    // ============================================================
    // GRID TESTS
    // ============================================================

    #[tokio::test]
    async fn test_grid_shares_storage_per_name() {
        let grid = Grid::new(8);
        let a = grid.get_map("books");
        let b = grid.get_map("books");
        grid.get_map("authors");

        a.put("k", json!("v")).await.unwrap();

        assert_eq!(b.get("k").await.unwrap(), Some(json!("v")));
        assert_ne!(a.owner(), b.owner(), "Each handle is its own lock owner");

        let mut names = grid.map_names();
        names.sort();
        assert_eq!(names, vec!["authors", "books"]);

        let stats = grid.stats();
        assert_eq!(stats.maps, 2);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_forked_handle_has_new_owner() {
        let grid = Grid::default();
        let map = grid.get_map("books");
        let fork = map.fork();

        assert_ne!(map.owner(), fork.owner());
        fork.lock("k").await.unwrap();
        assert!(matches!(
            map.unlock("k").await,
            Err(MapError::NotLockOwner { .. })
        ));
        fork.unlock("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_clones_share_owner() {
        let grid = Grid::default();
        let map = grid.get_map("books");
        let clone = map.clone();

        map.lock("k").await.unwrap();
        clone.put("k", json!(1)).await.unwrap();
        clone.unlock("k").await.unwrap();

        assert!(!grid.store("books").is_locked("k"));
    }

    // ============================================================
    // PROTOCOL TESTS
    // ============================================================

    #[tokio::test]
    async fn test_apply_command() {
        let grid = Grid::default();
        let map = GridMap::new(grid.store("books"));

        let put = MapCommand::Put {
            key: "k".into(),
            value: json!({"pages": 300}),
        };
        assert_eq!(
            apply_command(&map, put).await.unwrap(),
            MapResponse::Value { value: None }
        );

        let query = MapCommand::Values {
            predicate: Some("pages > 100".into()),
        };
        assert_eq!(
            apply_command(&map, query).await.unwrap(),
            MapResponse::Values {
                values: vec![json!({"pages": 300})]
            }
        );

        let bad_query = MapCommand::Values {
            predicate: Some("pages >".into()),
        };
        assert!(matches!(
            apply_command(&map, bad_query).await,
            Err(MapError::Predicate(_))
        ));

        assert_eq!(
            apply_command(&map, MapCommand::Clear).await.unwrap(),
            MapResponse::Done
        );
    }

    #[tokio::test]
    async fn test_bounded_lock_gives_up_without_granting() {
        // ARRANGE
        let grid = Grid::default();
        let holder = grid.get_map("books");
        let waiter = holder.fork();
        holder.lock("k").await.unwrap();

        // ACT
        let command = MapCommand::Lock {
            key: "k".into(),
            wait_ms: Some(50),
        };
        let err = apply_command(&waiter, command).await.unwrap_err();
        holder.unlock("k").await.unwrap();

        // ASSERT
        assert!(matches!(err, MapError::LockTimeout { waited_ms: 50, .. }));
        assert_eq!(err.kind(), MapErrorKind::LockTimeout);
        assert!(!err.is_transport());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!grid.store("books").is_locked("k"), "Timed out lock must never be granted");

        let command = MapCommand::Lock {
            key: "k".into(),
            wait_ms: Some(50),
        };
        assert_eq!(
            apply_command(&waiter, command).await.unwrap(),
            MapResponse::Done
        );
        assert!(grid.store("books").is_locked("k"));
    }

    #[test]
    fn test_wire_format() {
        let request = MapRequest {
            owner: OwnerId("owner-1".into()),
            command: MapCommand::ReplaceIf {
                key: "k".into(),
                expected: json!(1),
                value: json!(2),
            },
        };

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            json!({
                "owner": "owner-1",
                "command": {"op": "replace_if", "key": "k", "expected": 1, "value": 2}
            })
        );

        let failed = MapResponse::from(&MapError::NotLockOwner {
            map: "m".into(),
            key: "k".into(),
        });
        let encoded = serde_json::to_value(&failed).unwrap();
        assert_eq!(encoded["status"], "failed");
        assert_eq!(encoded["kind"], "not_lock_owner");

        let lock: MapCommand = serde_json::from_value(json!({"op": "lock", "key": "k"})).unwrap();
        assert_eq!(
            lock,
            MapCommand::Lock {
                key: "k".into(),
                wait_ms: None
            }
        );
        let bounded = serde_json::to_value(MapCommand::Lock {
            key: "k".into(),
            wait_ms: Some(250),
        })
        .unwrap();
        assert_eq!(bounded, json!({"op": "lock", "key": "k", "wait_ms": 250}));
    }

    #[test]
    fn test_node_lock_wait_stays_below_client_budget() {
        let config = RemoteConfig::default();
        assert!(config.lock_wait() < config.lock_timeout);

        let tight = RemoteConfig {
            timeout: Duration::from_millis(500),
            lock_timeout: Duration::from_millis(200),
            attempts: 1,
        };
        assert_eq!(tight.lock_wait(), Duration::from_millis(100));
    }

    #[test]
    fn test_waiting_commands() {
        assert!(MapCommand::Lock {
            key: "k".into(),
            wait_ms: None,
        }
        .may_wait());
        assert!(MapCommand::Put {
            key: "k".into(),
            value: json!(1)
        }
        .may_wait());
        assert!(!MapCommand::Get { key: "k".into() }.may_wait());
        assert!(!MapCommand::Unlock { key: "k".into() }.may_wait());
    }

    // ============================================================
    // REMOTE GRID TESTS
    // ============================================================

    #[tokio::test]
    async fn test_remote_map_round_trip() {
        // ARRANGE
        let grid = Arc::new(Grid::default());
        let base_url = spawn_node(grid.clone()).await;
        let remote = RemoteGrid::new(&format!("{}/", base_url), RemoteConfig::default());
        assert_eq!(remote.base_url(), base_url);
        let map = remote.get_map("books");

        // ACT
        map.put("a", json!({"year": 1965})).await.unwrap();
        map.put("b", json!({"year": 1815})).await.unwrap();
        let replaced = map.replace_if("a", json!({"year": 1965}), json!({"year": 1966})).await.unwrap();

        // ASSERT
        assert!(replaced);
        assert_eq!(map.get("a").await.unwrap(), Some(json!({"year": 1966})));
        assert_eq!(grid.store("books").get("b"), Some(json!({"year": 1815})));

        let keys: BTreeSet<String> = ["a", "zz"].iter().map(|k| k.to_string()).collect();
        assert_eq!(map.get_all(&keys).await.unwrap().len(), 1);

        let old = map
            .values_where(&Predicate::parse("year < 1900").unwrap())
            .await
            .unwrap();
        assert_eq!(old, vec![json!({"year": 1815})]);

        assert_eq!(map.remove("b").await.unwrap(), Some(json!({"year": 1815})));
        map.clear().await.unwrap();
        assert!(map.values().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_locks_belong_to_remote_handle() {
        let grid = Arc::new(Grid::default());
        let base_url = spawn_node(grid.clone()).await;
        let remote = RemoteGrid::new(&base_url, RemoteConfig::default());
        let holder = remote.get_map("books");
        let other = remote.get_map("books");

        holder.lock("k").await.unwrap();
        assert!(grid.store("books").is_locked("k"));

        let err = other.unlock("k").await.unwrap_err();
        assert_eq!(err.kind(), MapErrorKind::NotLockOwner);
        assert!(!err.is_transport());

        holder.unlock("k").await.unwrap();
        assert!(!grid.store("books").is_locked("k"));
    }

    #[tokio::test]
    async fn test_remote_update_lock_wait_never_grants_late() {
        // ARRANGE
        let grid = Arc::new(Grid::default());
        grid.store("books").put(&OwnerId::new(), "k", json!("old")).await.unwrap();
        let holder = grid.get_map("books");
        holder.lock("k").await.unwrap();

        let base_url = spawn_node(grid.clone()).await;
        let config = RemoteConfig {
            lock_timeout: Duration::from_millis(200),
            ..RemoteConfig::default()
        };
        let remote = RemoteGrid::new(&base_url, config);
        let dispatcher = MapDispatcher::new(remote.get_map("books"), &DispatcherConfig::default());

        // ACT
        let mut exchange = Exchange::new(
            [
                (OPERATION, HeaderValue::Int(Operation::Update.code())),
                (OBJECT_ID, HeaderValue::from("k")),
            ]
            .into_iter()
            .collect(),
            json!("new"),
        );
        let err = dispatcher.process(&mut exchange).await.unwrap_err();
        holder.unlock("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // ASSERT
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert!(!grid.store("books").is_locked("k"), "Abandoned lock wait must not be granted");

        let writer = grid.get_map("books");
        tokio::time::timeout(Duration::from_secs(2), writer.put("k", json!("later")))
            .await
            .expect("Writer must not wait on an orphaned lock")
            .unwrap();
        assert_eq!(grid.store("books").get("k"), Some(json!("later")));
    }

    #[tokio::test]
    async fn test_remote_null_value_is_rejected_by_node() {
        let grid = Arc::new(Grid::default());
        let base_url = spawn_node(grid).await;
        let map = RemoteGrid::new(&base_url, RemoteConfig::default()).get_map("books");

        let err = map.put("k", Value::Null).await.unwrap_err();

        assert!(matches!(
            err,
            MapError::Remote {
                kind: MapErrorKind::NullValue,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = RemoteConfig {
            attempts: 1,
            ..RemoteConfig::default()
        };
        let map = RemoteGrid::new(&format!("http://{}", addr), config).get_map("books");

        let err = map.get("k").await.unwrap_err();

        assert!(err.is_transport(), "Expected transport failure, got {err:?}");
    }
}
