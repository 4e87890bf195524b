mod acquire;
mod driver;
mod manager;
#[cfg(feature = "postgres")]
mod postgres;
mod registry;

use std::time::Duration;

pub use acquire::{AcquireContext, AcquireOptions, ConnectionGuard, PooledConnection};
pub use driver::{
    Driver, DriverConn, DriverConnection, DriverError, EndpointPool, PoolSizing,
};
pub use manager::{PoolManager, PoolManagerConfig};
#[cfg(feature = "postgres")]
pub use postgres::{PgConn, PgDriver, PgEndpointPool};
pub use registry::{ConnectionId, ConnectionRegistry};

pub(crate) use manager::Shared;

use crate::dsn::DsnError;
use crate::router::BalanceError;

/// Errors surfaced to callers of the pool manager
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid parameter combination, never retried
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid connection string: {0}")]
    Dsn(#[from] DsnError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// No endpoint currently matches the request; the caller may retry
    #[error(transparent)]
    NoCandidates(#[from] BalanceError),

    #[error("Connection {0} is not checked out from this pool manager")]
    UnknownConnection(ConnectionId),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Pool manager is closed")]
    Closed,
}

impl PoolError {
    /// Configuration errors come from the caller's input, not from the cluster
    pub fn is_config(&self) -> bool {
        matches!(self, PoolError::Config(_) | PoolError::Dsn(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout(_))
    }

    /// Short label for metrics
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PoolError::Config(_) | PoolError::Dsn(_) => "config",
            PoolError::Timeout(_) => "timeout",
            PoolError::NoCandidates(_) => "no_candidates",
            PoolError::UnknownConnection(_) => "unknown_connection",
            PoolError::Driver(_) => "driver",
            PoolError::Closed => "closed",
        }
    }
}
