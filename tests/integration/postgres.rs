//! PostgreSQL integration tests

use std::time::Duration;

use multihost_pool::pool::PgDriver;
use multihost_pool::{AcquireOptions, DriverConnection, PoolManager, PoolManagerConfig};

use crate::{skip_if_not_enabled, test_dsn};

fn config() -> PoolManagerConfig {
    PoolManagerConfig {
        refresh_delay: Duration::from_millis(200),
        refresh_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_primary_is_discovered() {
    skip_if_not_enabled!();

    let manager = PoolManager::new(PgDriver::new(), &test_dsn(), config())
        .expect("manager should start");
    manager
        .ready(None, None, Duration::from_secs(30))
        .await
        .expect("every endpoint should be classified");
    assert!(manager.master_pool_count() >= 1);

    let mut conn = manager
        .acquire_master(None)
        .unwrap()
        .await
        .expect("master acquire should succeed");
    assert!(conn.is_read_write().await.unwrap());

    let (value,): (i32,) = sqlx::query_as("SELECT 1")
        .fetch_one(conn.executor())
        .await
        .expect("SELECT 1 should succeed");
    assert_eq!(value, 1);

    manager.release(conn).await.unwrap();
    manager.close().await;
    assert!(manager.closed());
}

#[tokio::test]
async fn test_read_falls_back_to_primary() {
    skip_if_not_enabled!();

    let manager = PoolManager::new(PgDriver::new(), &test_dsn(), config())
        .expect("manager should start");
    manager.ready(None, None, Duration::from_secs(30)).await.unwrap();

    let guard = manager
        .acquire(AcquireOptions::replica().with_fallback_master(true))
        .unwrap()
        .scoped()
        .await
        .expect("read acquire should succeed");
    let endpoint = guard.endpoint();
    assert!(manager.is_master(endpoint) || manager.is_replica(endpoint));
    guard.release().await.unwrap();

    manager.close().await;
}
