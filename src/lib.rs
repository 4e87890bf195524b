//! Multi-host database connection routing
//!
//! A [`PoolManager`] takes one connection string listing several hosts,
//! keeps a pool per host and routes each acquire to a master or a replica
//! according to the roles its monitor tasks observe.

pub mod config;
pub mod dsn;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod router;

pub use dsn::{split_dsn, Dsn, DsnError};
pub use pool::{
    AcquireContext, AcquireOptions, ConnectionGuard, Driver, DriverConnection, DriverError,
    EndpointPool, PoolError, PoolManager, PoolManagerConfig, PoolSizing, PooledConnection,
};
pub use router::{EndpointId, Role};
