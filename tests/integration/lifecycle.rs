//! Readiness and shutdown tests

use std::time::Duration;

use multihost_pool::{AcquireOptions, PoolError, PoolManager};

use crate::mock::MockDriver;
use crate::{cluster, dsn_for, fast_config, start, WAIT};

#[tokio::test]
async fn test_ready_waits_for_thresholds() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2"]);

    manager.ready(Some(1), Some(1), WAIT).await.unwrap();
    assert!(manager.master_pool_count() >= 1);
    assert!(manager.replica_pool_count() >= 1);

    let result = manager
        .ready(Some(1), Some(2), Duration::from_millis(100))
        .await;
    assert!(matches!(result, Err(PoolError::Timeout(_))));

    manager.close().await;
}

#[tokio::test]
async fn test_ready_rejects_mixed_counts() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);

    let result = manager.ready(Some(1), None, WAIT).await;
    assert!(matches!(result, Err(PoolError::Config(_))));
    let result = manager.ready(None, Some(0), WAIT).await;
    assert!(matches!(result, Err(PoolError::Config(_))));

    manager.close().await;
}

#[tokio::test]
async fn test_invalid_arguments_rejected_at_construction() {
    let cluster = cluster(&[("db1", true)]);

    let result = PoolManager::new(MockDriver::new(&cluster), "mysql://db1/app", fast_config());
    assert!(matches!(result, Err(PoolError::Dsn(_))));

    let config = multihost_pool::PoolManagerConfig {
        master_as_replica_weight: 2.0,
        ..fast_config()
    };
    let result = PoolManager::new(MockDriver::new(&cluster), &dsn_for(&["db1"]), config);
    assert!(matches!(result, Err(PoolError::Config(_))));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2"]);
    manager.ready(None, None, WAIT).await.unwrap();

    manager.close().await;
    assert!(manager.closed());
    assert!(!manager.closing());
    manager.close().await;
    assert!(manager.closed());

    assert_eq!(manager.available_pool_count(), 0);
    for pool in manager.pools().into_iter().flatten() {
        assert!(pool.is_closed());
        assert!(!pool.is_terminated());
    }

    let result = manager.acquire(AcquireOptions::master());
    assert!(matches!(result, Err(PoolError::Closed)));
}

#[tokio::test]
async fn test_concurrent_close_calls_complete() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    let other = manager.clone();
    tokio::join!(manager.close(), other.close());
    assert!(manager.closed());
    assert!(other.closed());
}

#[tokio::test]
async fn test_terminate_drops_pools() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    manager.terminate().await;
    assert!(manager.closed());
    let pool = manager.pools()[0].clone().unwrap();
    assert!(pool.is_terminated());
}

#[tokio::test]
async fn test_close_detaches_outstanding_connections() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    let conn = manager.acquire_master(None).unwrap().await.unwrap();
    assert_eq!(manager.outstanding_connections(), 1);

    manager.close().await;
    assert_eq!(manager.outstanding_connections(), 0);

    let result = manager.release(conn).await;
    assert!(matches!(result, Err(PoolError::UnknownConnection(_))));
}

#[tokio::test]
async fn test_close_stops_probing() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2"]);
    manager.ready(None, None, WAIT).await.unwrap();
    manager.close().await;

    let probes = cluster.probes();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cluster.probes(), probes);
}

#[tokio::test]
async fn test_dropping_manager_stops_monitors() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();
    drop(manager);

    // At most one probe may still be in flight
    tokio::time::sleep(Duration::from_millis(50)).await;
    let probes = cluster.probes();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cluster.probes(), probes);
}

#[tokio::test]
async fn test_wait_next_pool_check_observes_probes() {
    let cluster = cluster(&[("db1", true), ("db2", false)]);
    let manager = start(&cluster, &["db1", "db2"]);
    manager.ready(None, None, WAIT).await.unwrap();

    let before = cluster.probes();
    manager.wait_next_pool_check(WAIT).await.unwrap();
    assert!(cluster.probes() >= before + 4);

    manager.close().await;
}

#[tokio::test]
async fn test_close_lets_outstanding_connection_return_to_draining_pool() {
    let cluster = cluster(&[("db1", true)]);
    cluster.set_draining_close(true);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    let conn = manager.acquire_master(None).unwrap().await.unwrap();
    let closer = tokio::spawn({
        let manager = manager.clone();
        async move { manager.close().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.closing());
    assert!(!manager.closed());

    manager.release(conn).await.unwrap();
    tokio::time::timeout(WAIT, closer).await.unwrap().unwrap();

    assert!(manager.closed());
    assert_eq!(manager.outstanding_connections(), 0);
    let pool = manager.pools()[0].clone().unwrap();
    assert_eq!(pool.checked_out(), 0);
    assert!(pool.is_closed());
    assert!(!pool.is_terminated());
}

#[tokio::test]
async fn test_close_bounded_when_connection_never_returns() {
    let cluster = cluster(&[("db1", true)]);
    cluster.set_draining_close(true);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    let conn = manager.acquire_master(None).unwrap().await.unwrap();

    // The draining close gives up after refresh_timeout and terminates
    tokio::time::timeout(WAIT, manager.close()).await.unwrap();
    assert!(manager.closed());
    let pool = manager.pools()[0].clone().unwrap();
    assert!(pool.is_terminated());

    let result = manager.release(conn).await;
    assert!(matches!(result, Err(PoolError::UnknownConnection(_))));
}

#[tokio::test]
async fn test_acquire_in_flight_during_close_is_returned() {
    let cluster = cluster(&[("db1", true)]);
    let manager = start(&cluster, &["db1"]);
    manager.ready(None, None, WAIT).await.unwrap();

    cluster.set_acquire_delay(Duration::from_millis(100));
    let pending = manager.acquire_master(Some(WAIT)).unwrap();
    let acquire = tokio::spawn(async move { pending.await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.close().await;

    let result = tokio::time::timeout(WAIT, acquire).await.unwrap().unwrap();
    assert!(matches!(result, Err(PoolError::Closed)));
    assert_eq!(manager.outstanding_connections(), 0);
    let pool = manager.pools()[0].clone().unwrap();
    assert_eq!(pool.checked_out(), 0);
}
