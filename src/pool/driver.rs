//! Interface to the physical per-endpoint connection pool
//!
//! The manager never opens sockets itself. It asks a [`Driver`] to build one
//! [`EndpointPool`] per endpoint and uses that pool for every connection,
//! including the system connection the monitor probes the role with.

use std::time::Duration;

use async_trait::async_trait;

use crate::dsn::Dsn;

/// Sizing passed to the driver when an endpoint pool is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizing {
    pub min_size: u32,
    pub max_size: u32,
}

impl PoolSizing {
    /// Reserve one extra slot for the monitor's system connection
    pub fn with_system_slot(min_size: u32, max_size: u32) -> Self {
        Self {
            min_size: min_size.saturating_add(1),
            max_size: max_size.saturating_add(1),
        }
    }
}

/// Errors reported by a driver
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Acquire timed out")]
    Timeout,

    /// The driver aborted an operation on its own; retried like any failure
    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// A connection checked out from an endpoint pool
#[async_trait]
pub trait DriverConnection: Send + 'static {
    /// Role probe: true if the server currently accepts writes
    async fn is_read_write(&mut self) -> Result<bool, DriverError>;
}

/// Physical connection pool bound to one endpoint
#[async_trait]
pub trait EndpointPool: Send + Sync + 'static {
    type Connection: DriverConnection;

    async fn acquire(&self, timeout: Option<Duration>) -> Result<Self::Connection, DriverError>;

    async fn release(&self, conn: Self::Connection) -> Result<(), DriverError>;

    /// Idle connections ready to be handed out; used as the load metric
    fn free_size(&self) -> usize;

    /// Graceful close: waits for checked-out connections to come back
    async fn close(&self) -> Result<(), DriverError>;

    /// Drop every connection immediately
    fn terminate(&self);
}

/// Factory of endpoint pools
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Pool: EndpointPool;

    async fn create_pool(&self, dsn: &Dsn, sizing: PoolSizing) -> Result<Self::Pool, DriverError>;
}

/// Connection type produced by a driver's pools
pub type DriverConn<D> = <<D as Driver>::Pool as EndpointPool>::Connection;
