//! PostgreSQL driver backed by sqlx pools

use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::debug;

use crate::dsn::Dsn;

use super::driver::{Driver, DriverConnection, DriverError, EndpointPool, PoolSizing};

/// Statement used to tell a primary from a hot standby
const ROLE_QUERY: &str = "SHOW transaction_read_only";

fn map_err(e: sqlx::Error) -> DriverError {
    match e {
        sqlx::Error::PoolTimedOut => DriverError::Timeout,
        sqlx::Error::PoolClosed => DriverError::PoolClosed,
        sqlx::Error::Io(e) => DriverError::Connect(e.to_string()),
        sqlx::Error::Tls(e) => DriverError::Connect(e.to_string()),
        sqlx::Error::Database(e) => DriverError::Query(e.to_string()),
        other => DriverError::Other(other.to_string()),
    }
}

/// Connections the pool can still hand out: idle ones plus room to open new ones
fn free_capacity(max_connections: u32, size: u32, idle: usize) -> usize {
    let in_use = (size as usize).saturating_sub(idle);
    (max_connections as usize).saturating_sub(in_use)
}

/// Creates one sqlx pool per endpoint
#[derive(Debug, Clone, Default)]
pub struct PgDriver {
    /// Upper bound for a single checkout when the caller gives none
    pub acquire_timeout: Option<Duration>,
}

impl PgDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Pool = PgEndpointPool;

    async fn create_pool(&self, dsn: &Dsn, sizing: PoolSizing) -> Result<PgEndpointPool, DriverError> {
        let options: PgConnectOptions = dsn.as_str().parse().map_err(map_err)?;

        let mut pool_options = PgPoolOptions::new()
            .min_connections(sizing.min_size)
            .max_connections(sizing.max_size);
        if let Some(timeout) = self.acquire_timeout {
            pool_options = pool_options.acquire_timeout(timeout);
        }

        let pool = pool_options.connect_with(options).await.map_err(map_err)?;
        debug!(addr = %dsn.addr(), "sqlx pool connected");
        Ok(PgEndpointPool { pool })
    }
}

/// sqlx pool bound to a single host
#[derive(Debug, Clone)]
pub struct PgEndpointPool {
    pool: PgPool,
}

impl PgEndpointPool {
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EndpointPool for PgEndpointPool {
    type Connection = PgConn;

    async fn acquire(&self, timeout: Option<Duration>) -> Result<PgConn, DriverError> {
        let conn = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.pool.acquire())
                .await
                .map_err(|_| DriverError::Timeout)?,
            None => self.pool.acquire().await,
        };
        Ok(PgConn {
            conn: conn.map_err(map_err)?,
        })
    }

    async fn release(&self, conn: PgConn) -> Result<(), DriverError> {
        // sqlx returns the connection to its pool on drop
        drop(conn);
        Ok(())
    }

    fn free_size(&self) -> usize {
        free_capacity(
            self.pool.options().get_max_connections(),
            self.pool.size(),
            self.pool.num_idle(),
        )
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.pool.close().await;
        Ok(())
    }

    fn terminate(&self) {
        let pool = self.pool.clone();
        tokio::spawn(async move { pool.close().await });
    }
}

/// Connection checked out of a [`PgEndpointPool`]
#[derive(Debug)]
pub struct PgConn {
    conn: PoolConnection<Postgres>,
}

impl PgConn {
    /// The underlying sqlx connection, usable as an executor
    pub fn executor(&mut self) -> &mut sqlx::PgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl DriverConnection for PgConn {
    async fn is_read_write(&mut self) -> Result<bool, DriverError> {
        let read_only: String = sqlx::query_scalar(ROLE_QUERY)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(map_err)?;
        Ok(read_only == "off")
    }
}
