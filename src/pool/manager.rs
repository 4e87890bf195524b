//! Multi-host pool manager
//!
//! One [`PoolManager`] fronts a logical database reachable through several
//! hosts. A monitor task per endpoint creates the endpoint pool and keeps
//! probing its role; acquire requests are routed from the resulting topology.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dsn::{split_dsn, Dsn};
use crate::health::{monitor, Stopwatch};
use crate::metrics::metrics;
use crate::router::{
    BalanceError, BalanceRequest, BalancerPolicy, EndpointId, GreedyBalancer, Role, Topology,
    TopologySnapshot,
};

use super::acquire::{AcquireContext, AcquireOptions, PooledConnection};
use super::driver::{Driver, DriverConn, EndpointPool};
use super::registry::{ConnectionId, ConnectionRegistry};
use super::PoolError;

/// Runtime settings of a pool manager
#[derive(Debug, Clone, PartialEq)]
pub struct PoolManagerConfig {
    /// Minimum application connections per endpoint
    pub min_size: u32,
    /// Maximum application connections per endpoint
    pub max_size: u32,
    /// Default timeout of one acquire
    pub acquire_timeout: Duration,
    /// Pause between two role probes, and between pool creation attempts
    pub refresh_delay: Duration,
    /// Timeout of pool creation, system connection acquire and role probe
    pub refresh_timeout: Duration,
    /// Default for read requests when no replica is classified
    pub fallback_master: bool,
    /// Default probability of adding masters to replica candidates
    pub master_as_replica_weight: f64,
    pub stopwatch_window_size: usize,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(1),
            refresh_delay: Duration::from_secs(1),
            refresh_timeout: Duration::from_secs(30),
            fallback_master: false,
            master_as_replica_weight: 0.0,
            stopwatch_window_size: 128,
        }
    }
}

impl From<&Config> for PoolManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            min_size: config.database.min_size,
            max_size: config.database.max_size,
            acquire_timeout: Duration::from_millis(config.routing.acquire_timeout_ms),
            refresh_delay: Duration::from_millis(config.health.refresh_delay_ms),
            refresh_timeout: Duration::from_millis(config.health.refresh_timeout_ms),
            fallback_master: config.routing.fallback_master,
            master_as_replica_weight: config.routing.master_as_replica_weight,
            stopwatch_window_size: config.health.stopwatch_window_size,
        }
    }
}

impl PoolManagerConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_size > self.max_size {
            return Err(PoolError::Config(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be positive".into()));
        }
        validate_weight(self.master_as_replica_weight)?;
        if self.stopwatch_window_size == 0 {
            return Err(PoolError::Config(
                "stopwatch_window_size must be positive".into(),
            ));
        }
        for (name, value) in [
            ("acquire_timeout", self.acquire_timeout),
            ("refresh_timeout", self.refresh_timeout),
        ] {
            if value.is_zero() {
                return Err(PoolError::Config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

fn validate_weight(weight: f64) -> Result<(), PoolError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(PoolError::Config(format!(
            "master_as_replica_weight must be within [0, 1], got {}",
            weight
        )))
    }
}

/// State shared between manager handles and monitor tasks
pub(crate) struct Shared<D: Driver> {
    pub(crate) driver: D,
    pub(crate) config: PoolManagerConfig,
    pub(crate) dsn: Vec<Dsn>,
    /// Password-free renderings, used in every log line
    pub(crate) redacted: Vec<Dsn>,
    /// Endpoint pools by position, `None` until created
    pub(crate) pools: RwLock<Vec<Option<Arc<D::Pool>>>>,
    topology: watch::Sender<Topology>,
    /// Set once an endpoint got its first role
    ready: Vec<watch::Sender<bool>>,
    /// Completed probe attempts per endpoint
    checked: Vec<watch::Sender<u64>>,
    pub(crate) stopwatch: Stopwatch<EndpointId>,
    pub(crate) registry: ConnectionRegistry,
    balancer: Box<dyn BalancerPolicy>,
    pub(crate) shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
    closed: AtomicBool,
    close_once: OnceCell<()>,
}

impl<D: Driver> Shared<D> {
    pub(crate) fn pool(&self, id: EndpointId) -> Option<Arc<D::Pool>> {
        self.pools.read().get(id.index()).cloned().flatten()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.closed.load(Ordering::Acquire)
    }

    /// Put `id` into the set for `role` and mark it ready
    pub(crate) fn classify(&self, id: EndpointId, role: Role) {
        if self.topology.send_if_modified(|t| t.classify(id, role)) {
            info!(
                endpoint = %self.redacted[id.index()],
                role = role.as_str(),
                "Endpoint classified"
            );
            self.publish_topology();
        } else {
            debug!(endpoint = %self.redacted[id.index()], role = role.as_str(), "Role unchanged");
        }
        self.ready[id.index()].send_if_modified(|ready| !std::mem::replace(ready, true));
    }

    /// Drop `id` from both sets
    pub(crate) fn unclassify(&self, id: EndpointId) {
        if self.topology.send_if_modified(|t| t.unclassify(id)) {
            info!(endpoint = %self.redacted[id.index()], "Endpoint removed from topology");
            self.publish_topology();
        }
    }

    /// Count one finished probe attempt, successful or not
    pub(crate) fn mark_checked(&self, id: EndpointId) {
        self.checked[id.index()].send_modify(|count| *count += 1);
    }

    fn publish_topology(&self) {
        let topology = self.topology.borrow();
        let masters = topology.master_count();
        let replicas = topology.replica_count();
        let unclassified = self.dsn.len().saturating_sub(masters + replicas);
        metrics().set_endpoints(masters as i64, replicas as i64, unclassified as i64);
    }

    fn select(&self, request: &BalanceRequest) -> Result<EndpointId, PoolError> {
        let topology = self.topology.borrow().clone();
        let snapshot = {
            let pools = self.pools.read();
            TopologySnapshot::capture(&topology, |id: EndpointId| {
                pools
                    .get(id.index())
                    .and_then(Option::as_ref)
                    .map(|pool| pool.free_size())
                    .unwrap_or(0)
            })
        };
        let mut rng = rand::thread_rng();
        Ok(self.balancer.select(request, &snapshot, &mut rng)?)
    }

    async fn close_all(&self, terminate: bool) {
        self.closing.store(true, Ordering::Release);
        info!(endpoints = self.dsn.len(), terminate, "Closing pool manager");

        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    warn!(error = %e, "Monitor task failed");
                }
            }
        }

        self.topology.send_if_modified(Topology::clear);
        self.publish_topology();

        let pools: Vec<(usize, Arc<D::Pool>)> = self
            .pools
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, pool)| pool.clone().map(|pool| (i, pool)))
            .collect();

        if terminate {
            for (_, pool) in &pools {
                pool.terminate();
            }
        } else {
            // Releases keep working until here, so draining pools can get
            // their connections back. Each close is bounded by refresh_timeout.
            let timeout = self.config.refresh_timeout;
            let closes = pools
                .iter()
                .map(|(_, pool)| tokio::time::timeout(timeout, pool.close()));
            let results = join_all(closes).await;
            for ((i, pool), result) in pools.iter().zip(results) {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(endpoint = %self.redacted[*i], error = %e, "Failed to close endpoint pool");
                    }
                    Err(_) => {
                        warn!(
                            endpoint = %self.redacted[*i],
                            timeout = ?timeout,
                            "Endpoint pool close timed out, terminating"
                        );
                        pool.terminate();
                    }
                }
            }
        }

        let detached = self.registry.drain();
        if !detached.is_empty() {
            warn!(
                count = detached.len(),
                "Detaching connections still checked out"
            );
        }

        self.closed.store(true, Ordering::Release);
        self.closing.store(false, Ordering::Release);
        info!("Pool manager closed");
    }
}

impl<D: Driver> Drop for Shared<D> {
    fn drop(&mut self) {
        // Monitors only hold weak references; wake them up so they exit.
        self.shutdown.cancel();
    }
}

/// Routes connection requests to the endpoints of a multi-host database
///
/// Cheap to clone; every clone drives the same endpoints. Must be created
/// inside a Tokio runtime since construction spawns the monitor tasks.
pub struct PoolManager<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for PoolManager<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: Driver> PoolManager<D> {
    /// Split `dsn` into endpoints and start monitoring each of them
    pub fn new(driver: D, dsn: &str, config: PoolManagerConfig) -> Result<Self, PoolError> {
        Self::with_balancer(driver, dsn, config, GreedyBalancer)
    }

    pub fn with_balancer<B>(
        driver: D,
        dsn: &str,
        config: PoolManagerConfig,
        balancer: B,
    ) -> Result<Self, PoolError>
    where
        B: BalancerPolicy + 'static,
    {
        config.validate()?;
        let dsn = split_dsn(dsn)?;
        let redacted: Vec<Dsn> = dsn.iter().map(Dsn::redacted).collect();
        let count = dsn.len();

        let shared = Arc::new(Shared {
            driver,
            stopwatch: Stopwatch::new(config.stopwatch_window_size),
            config,
            dsn,
            redacted,
            pools: RwLock::new(vec![None; count]),
            topology: watch::Sender::new(Topology::new()),
            ready: (0..count).map(|_| watch::Sender::new(false)).collect(),
            checked: (0..count).map(|_| watch::Sender::new(0)).collect(),
            registry: ConnectionRegistry::new(),
            balancer: Box::new(balancer),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::with_capacity(count)),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_once: OnceCell::new(),
        });

        let tasks: Vec<JoinHandle<()>> = (0..count)
            .map(|i| monitor::spawn(&shared, EndpointId(i)))
            .collect();
        *shared.tasks.lock() = tasks;

        info!(
            endpoints = count,
            hosts = ?shared.redacted.iter().map(Dsn::addr).collect::<Vec<_>>(),
            "Pool manager started"
        );
        Ok(Self { shared })
    }

    /// Prepare an acquisition; nothing is awaited until the context is
    pub fn acquire(&self, options: AcquireOptions) -> Result<AcquireContext<D>, PoolError> {
        if self.closed() {
            return Err(PoolError::Closed);
        }

        let AcquireOptions {
            read_only,
            fallback_master,
            master_as_replica_weight,
            timeout,
        } = options;

        if !read_only && fallback_master == Some(true) {
            return Err(PoolError::Config(
                "fallback_master is only valid for read-only acquires".into(),
            ));
        }
        if !read_only && master_as_replica_weight.is_some_and(|w| w != 0.0) {
            return Err(PoolError::Config(
                "master_as_replica_weight is only valid for read-only acquires".into(),
            ));
        }
        if let Some(weight) = master_as_replica_weight {
            validate_weight(weight)?;
        }

        let request = if read_only {
            BalanceRequest::replica(
                fallback_master.unwrap_or(self.shared.config.fallback_master),
                Some(
                    master_as_replica_weight
                        .unwrap_or(self.shared.config.master_as_replica_weight),
                ),
            )
        } else {
            BalanceRequest::master()
        };

        Ok(AcquireContext::new(
            self.clone(),
            request,
            timeout.unwrap_or(self.shared.config.acquire_timeout),
        ))
    }

    pub fn acquire_master(&self, timeout: Option<Duration>) -> Result<AcquireContext<D>, PoolError> {
        let mut options = AcquireOptions::master();
        options.timeout = timeout;
        self.acquire(options)
    }

    pub fn acquire_replica(
        &self,
        fallback_master: Option<bool>,
        master_as_replica_weight: Option<f64>,
        timeout: Option<Duration>,
    ) -> Result<AcquireContext<D>, PoolError> {
        self.acquire(AcquireOptions {
            read_only: true,
            fallback_master,
            master_as_replica_weight,
            timeout,
        })
    }

    /// Pick an endpoint, check a connection out of it and register it
    pub(crate) async fn checkout(
        &self,
        request: BalanceRequest,
        timeout: Duration,
    ) -> Result<PooledConnection<DriverConn<D>>, PoolError> {
        let shared = &self.shared;
        if shared.is_shutting_down() {
            return Err(PoolError::Closed);
        }

        let attempt = async {
            let endpoint = shared.select(&request)?;
            let pool = shared.pool(endpoint).ok_or(BalanceError::NoCandidates {
                target: request.target(),
            })?;
            let conn = pool.acquire(Some(timeout)).await?;
            // Close may have drained the registry while this acquire was pending
            if shared.is_shutting_down() {
                if let Err(e) = pool.release(conn).await {
                    debug!(error = %e, "Failed to return connection during close");
                }
                return Err(PoolError::Closed);
            }
            let id = shared.registry.register(endpoint);
            Ok::<_, PoolError>(PooledConnection::new(id, endpoint, conn))
        };

        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(timeout)),
        };

        match &result {
            Ok(conn) => {
                metrics().record_acquire(request.target(), "ok");
                debug!(
                    connection = %conn.id(),
                    endpoint = %shared.redacted[conn.endpoint().index()],
                    target = request.target(),
                    "Connection acquired"
                );
            }
            Err(e) => {
                metrics().record_acquire(request.target(), e.kind());
                debug!(target = request.target(), error = %e, "Acquire failed");
            }
        }
        result
    }

    /// Return a connection obtained from a plain (non-scoped) acquire
    pub async fn release(&self, conn: PooledConnection<DriverConn<D>>) -> Result<(), PoolError> {
        let (id, _, conn) = conn.into_parts();
        let endpoint = self
            .shared
            .registry
            .unregister(id)
            .ok_or(PoolError::UnknownConnection(id))?;
        let pool = self.shared.pool(endpoint).ok_or(PoolError::Closed)?;

        if let Err(e) = pool.release(conn).await {
            warn!(
                connection = %id,
                endpoint = %self.shared.redacted[endpoint.index()],
                error = %e,
                "Failed to release connection"
            );
            return Err(e.into());
        }
        debug!(connection = %id, "Connection released");
        Ok(())
    }

    /// Drop the registry entry of a connection that will never come back
    pub(crate) fn forget(&self, id: ConnectionId) -> Option<EndpointId> {
        self.shared.registry.unregister(id)
    }

    /// Wait until every endpoint has a role, or until the given counts are met
    ///
    /// Either both counts are given or neither is.
    pub async fn ready(
        &self,
        masters_count: Option<usize>,
        replicas_count: Option<usize>,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        let wait = async {
            match (masters_count, replicas_count) {
                (None, None) => {
                    for ready in &self.shared.ready {
                        let mut rx = ready.subscribe();
                        let _ = rx.wait_for(|ready| *ready).await;
                    }
                    Ok(())
                }
                (Some(masters), Some(replicas)) => {
                    let mut rx = self.shared.topology.subscribe();
                    let _ = rx
                        .wait_for(|t| t.master_count() >= masters && t.replica_count() >= replicas)
                        .await;
                    Ok(())
                }
                _ => Err(PoolError::Config(
                    "masters_count and replicas_count must be given together".into(),
                )),
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout(timeout)),
        }
    }

    /// Wait until every endpoint finished two more probe attempts
    pub async fn wait_next_pool_check(&self, timeout: Duration) -> Result<(), PoolError> {
        let waits = self.shared.checked.iter().map(|checked| {
            let mut rx = checked.subscribe();
            let target = *rx.borrow_and_update() + 2;
            async move {
                let _ = rx.wait_for(|count| *count >= target).await;
            }
        });

        tokio::time::timeout(timeout, join_all(waits))
            .await
            .map(|_| ())
            .map_err(|_| PoolError::Timeout(timeout))
    }

    /// Stop monitoring and close every endpoint pool gracefully
    ///
    /// Concurrent and repeated calls all wait for the same shutdown.
    pub async fn close(&self) {
        let shared = &self.shared;
        shared.close_once.get_or_init(|| shared.close_all(false)).await;
    }

    /// Like [`close`](Self::close) but drops pool connections immediately
    pub async fn terminate(&self) {
        let shared = &self.shared;
        shared.close_once.get_or_init(|| shared.close_all(true)).await;
    }

    pub fn master_pool_count(&self) -> usize {
        self.shared.topology.borrow().master_count()
    }

    pub fn replica_pool_count(&self) -> usize {
        self.shared.topology.borrow().replica_count()
    }

    /// Endpoints that currently have a role
    pub fn available_pool_count(&self) -> usize {
        let topology = self.shared.topology.borrow();
        topology.master_count() + topology.replica_count()
    }

    /// Classified endpoints, masters first
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.shared.topology.borrow().members().collect()
    }

    /// Endpoint pools by position, `None` where creation has not succeeded yet
    pub fn pools(&self) -> Vec<Option<Arc<D::Pool>>> {
        self.shared.pools.read().clone()
    }

    pub fn pool(&self, id: EndpointId) -> Option<Arc<D::Pool>> {
        self.shared.pool(id)
    }

    pub fn dsn(&self) -> &[Dsn] {
        &self.shared.dsn
    }

    pub fn endpoint_dsn(&self, id: EndpointId) -> Option<&Dsn> {
        self.shared.dsn.get(id.index())
    }

    pub fn topology(&self) -> Topology {
        self.shared.topology.borrow().clone()
    }

    pub fn role(&self, id: EndpointId) -> Option<Role> {
        self.shared.topology.borrow().role_of(id)
    }

    pub fn is_master(&self, id: EndpointId) -> bool {
        self.shared.topology.borrow().is_master(id)
    }

    pub fn is_replica(&self, id: EndpointId) -> bool {
        self.shared.topology.borrow().is_replica(id)
    }

    /// Median role probe latency of an endpoint
    pub fn last_response_time(&self, id: EndpointId) -> Option<Duration> {
        self.shared.stopwatch.get_time(id)
    }

    /// Connections checked out and not yet released
    pub fn outstanding_connections(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn config(&self) -> &PoolManagerConfig {
        &self.shared.config
    }

    pub fn closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
