//! Role discovery and failover tests

use std::time::Duration;

use multihost_pool::{AcquireOptions, EndpointId, PoolError, PoolSizing, Role};

use crate::{cluster, fast_config, start, start_with, WAIT};

#[tokio::test]
async fn test_endpoints_classified_by_role() {
    let cluster = cluster(&[("db1", true), ("db2", false), ("db3", false)]);
    let manager = start(&cluster, &["db1", "db2", "db3"]);
    manager.ready(None, None, WAIT).await.unwrap();

    assert_eq!(manager.master_pool_count(), 1);
    assert_eq!(manager.replica_pool_count(), 2);
    assert_eq!(manager.available_pool_count(), 3);
    assert!(manager.is_master(EndpointId(0)));
    assert!(manager.is_replica(EndpointId(1)));
    assert!(manager.is_replica(EndpointId(2)));
    assert_eq!(manager.role(EndpointId(2)), Some(Role::Replica));

    let endpoints = manager.endpoints();
    assert_eq!(endpoints[0], EndpointId(0));
    assert_eq!(endpoints.len(), 3);

    assert_eq!(manager.dsn().len(), 3);
    assert_eq!(manager.dsn()[1].host(), "db2");
    assert!(manager.pools().iter().all(Option::is_some));
    assert!(manager.last_response_time(EndpointId(0)).is_some());

    manager.close().await;
}

#[tokio::test]
async fn test_pool_sizing_reserves_system_connection() {
    let cluster = cluster(&[("db1", true)]);
    let config = multihost_pool::PoolManagerConfig {
        min_size: 2,
        max_size: 8,
        ..fast_config()
    };
    let manager = start_with(&cluster, &["db1"], config);
    manager.ready(None, None, WAIT).await.unwrap();

    assert_eq!(
        cluster.sizing("db1"),
        Some(PoolSizing {
            min_size: 3,
            max_size: 9
        })
    );
    manager.close().await;
}

#[tokio::test]
async fn test_failed_replica_leaves_rotation() {
    let cluster = cluster(&[("db1", true), ("db2", false), ("db3", false)]);
    let manager = start(&cluster, &["db1", "db2", "db3"]);
    manager.ready(None, None, WAIT).await.unwrap();

    cluster.set_reachable("db2", false);
    manager.wait_next_pool_check(WAIT).await.unwrap();

    assert!(!manager.is_replica(EndpointId(1)));
    assert!(!manager.is_master(EndpointId(1)));
    assert_eq!(manager.replica_pool_count(), 1);

    for _ in 0..30 {
        let conn = manager.acquire(AcquireOptions::replica()).unwrap().await.unwrap();
        assert_eq!(conn.endpoint(), EndpointId(2));
        manager.release(conn).await.unwrap();
    }

    cluster.set_reachable("db2", true);
    manager.wait_next_pool_check(WAIT).await.unwrap();
    assert!(manager.is_replica(EndpointId(1)));
    assert_eq!(manager.replica_pool_count(), 2);

    manager.close().await;
}

#[tokio::test]
async fn test_switchover_is_detected() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2"]);
    manager.ready(Some(1), Some(1), WAIT).await.unwrap();

    cluster.set_read_write("db1", false);
    cluster.set_read_write("db2", true);
    manager.wait_next_pool_check(WAIT).await.unwrap();

    assert!(manager.is_replica(EndpointId(0)));
    assert!(manager.is_master(EndpointId(1)));

    let conn = manager.acquire_master(None).unwrap().await.unwrap();
    assert_eq!(conn.host(), "db2");
    manager.release(conn).await.unwrap();

    manager.close().await;
}

#[tokio::test]
async fn test_pool_creation_is_retried() {
    let cluster = cluster(&[("db1", true)]);
    cluster.fail_next_creates("db1", 3);
    let manager = start(&cluster, &["db1"]);

    manager.ready(None, None, WAIT).await.unwrap();
    assert!(cluster.create_attempts() >= 4);
    assert!(manager.is_master(EndpointId(0)));

    manager.close().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_does_not_block_others() {
    let cluster = cluster(&[("db1", true), ("db2", false), ("db3", false)]);
    cluster.set_reachable("db3", false);
    let manager = start(&cluster, &["db1", "db2", "db3"]);

    manager.ready(Some(1), Some(1), WAIT).await.unwrap();
    assert!(manager.pools()[2].is_none());

    let result = manager.ready(None, None, Duration::from_millis(100)).await;
    assert!(matches!(result, Err(PoolError::Timeout(_))));

    cluster.set_reachable("db3", true);
    manager.ready(None, None, WAIT).await.unwrap();
    assert_eq!(manager.replica_pool_count(), 2);

    manager.close().await;
}

#[tokio::test]
async fn test_duplicate_hosts_are_monitored_once() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2", "db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    assert_eq!(manager.dsn().len(), 2);
    assert_eq!(manager.pools().len(), 2);
    assert_eq!(manager.available_pool_count(), 2);

    manager.close().await;
}
