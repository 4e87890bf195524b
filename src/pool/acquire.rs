//! Deferred connection acquisition
//!
//! [`PoolManager::acquire`] only validates its arguments and returns an
//! [`AcquireContext`]. Awaiting the context yields a [`PooledConnection`]
//! that has to be handed back with [`PoolManager::release`];
//! [`AcquireContext::scoped`] yields a [`ConnectionGuard`] that returns the
//! connection by itself.

use std::future::IntoFuture;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::router::{BalanceRequest, EndpointId};

use super::driver::{Driver, DriverConn};
use super::manager::PoolManager;
use super::registry::ConnectionId;
use super::PoolError;

const EXPECT_MSG: &str = "BUG: connection already released";

/// Parameters of one acquire call
///
/// Unset fields fall back to the manager configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcquireOptions {
    /// Route to a replica instead of a master
    pub read_only: bool,
    /// Only valid with `read_only`
    pub fallback_master: Option<bool>,
    /// Only valid with `read_only`, within [0, 1]
    pub master_as_replica_weight: Option<f64>,
    pub timeout: Option<Duration>,
}

impl AcquireOptions {
    pub fn master() -> Self {
        Self::default()
    }

    pub fn replica() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_fallback_master(mut self, fallback_master: bool) -> Self {
        self.fallback_master = Some(fallback_master);
        self
    }

    pub fn with_master_as_replica_weight(mut self, weight: f64) -> Self {
        self.master_as_replica_weight = Some(weight);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A connection checked out through the manager
#[derive(Debug)]
pub struct PooledConnection<C> {
    id: ConnectionId,
    endpoint: EndpointId,
    conn: C,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnectionId, endpoint: EndpointId, conn: C) -> Self {
        Self { id, endpoint, conn }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Endpoint the connection was drawn from
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub(crate) fn into_parts(self) -> (ConnectionId, EndpointId, C) {
        (self.id, self.endpoint, self.conn)
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Unresolved acquisition
pub struct AcquireContext<D: Driver> {
    manager: PoolManager<D>,
    request: BalanceRequest,
    timeout: Duration,
}

impl<D: Driver> AcquireContext<D> {
    pub(crate) fn new(manager: PoolManager<D>, request: BalanceRequest, timeout: Duration) -> Self {
        Self {
            manager,
            request,
            timeout,
        }
    }

    pub fn request(&self) -> &BalanceRequest {
        &self.request
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire a connection that goes back to its pool when the guard is
    /// released or dropped
    pub async fn scoped(self) -> Result<ConnectionGuard<D>, PoolError> {
        let manager = self.manager.clone();
        let conn = self.await?;
        Ok(ConnectionGuard {
            manager,
            conn: Some(conn),
        })
    }
}

impl<D: Driver> IntoFuture for AcquireContext<D> {
    type Output = Result<PooledConnection<DriverConn<D>>, PoolError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.manager.checkout(self.request, self.timeout).await })
    }
}

/// Scoped connection
///
/// Prefer [`release`](Self::release); dropping the guard spawns the release
/// on the current Tokio runtime.
pub struct ConnectionGuard<D: Driver> {
    manager: PoolManager<D>,
    conn: Option<PooledConnection<DriverConn<D>>>,
}

impl<D: Driver> ConnectionGuard<D> {
    pub fn id(&self) -> ConnectionId {
        self.conn.as_ref().expect(EXPECT_MSG).id()
    }

    pub fn endpoint(&self) -> EndpointId {
        self.conn.as_ref().expect(EXPECT_MSG).endpoint()
    }

    /// Return the connection to its endpoint pool
    pub async fn release(mut self) -> Result<(), PoolError> {
        match self.conn.take() {
            Some(conn) => self.manager.release(conn).await,
            None => Ok(()),
        }
    }
}

impl<D: Driver> Deref for ConnectionGuard<D> {
    type Target = DriverConn<D>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(EXPECT_MSG)
    }
}

impl<D: Driver> DerefMut for ConnectionGuard<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(EXPECT_MSG)
    }
}

impl<D: Driver> Drop for ConnectionGuard<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                handle.spawn(async move {
                    let id = conn.id();
                    if let Err(e) = manager.release(conn).await {
                        debug!(connection = %id, error = %e, "Release on drop failed");
                    }
                });
            }
            Err(_) => {
                let id = conn.id();
                self.manager.forget(id);
                warn!(connection = %id, "Connection dropped outside a runtime, not returned to its pool");
            }
        }
    }
}
