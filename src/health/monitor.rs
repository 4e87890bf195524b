//! Per-endpoint monitor task
//!
//! Each endpoint gets one long-running task. It first creates the endpoint
//! pool, retrying until it succeeds, then probes the server role forever:
//! a successful probe classifies the endpoint, any failure removes it from
//! the topology until the next successful probe.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::metrics;
use crate::pool::{Driver, DriverConnection, DriverError, EndpointPool, PoolSizing, Shared};
use crate::router::{EndpointId, Role};

/// Why a probe attempt did not produce a role
#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error("system connection acquire timed out after {0:?}")]
    AcquireTimeout(Duration),
    #[error("role probe timed out after {0:?}")]
    ProbeTimeout(Duration),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl ProbeError {
    fn label(&self) -> &'static str {
        match self {
            ProbeError::AcquireTimeout(_) | ProbeError::ProbeTimeout(_) => "timeout",
            ProbeError::Driver(_) => "error",
        }
    }
}

/// Spawn the monitor of endpoint `id`
///
/// The task only keeps a weak reference to the manager state, so dropping
/// the last manager handle stops it.
pub(crate) fn spawn<D: Driver>(shared: &Arc<Shared<D>>, id: EndpointId) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let token = shared.shutdown.child_token();
    let refresh_delay = shared.config.refresh_delay;

    tokio::spawn(async move {
        let Some(pool) = create_pool(&weak, id, &token, refresh_delay).await else {
            debug!(endpoint = %id, "Monitor stopped before the pool was created");
            return;
        };

        loop {
            {
                let Some(shared) = weak.upgrade() else { break };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = check(&shared, id, &pool) => {}
                }
                shared.mark_checked(id);
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(refresh_delay) => {}
            }
        }

        debug!(endpoint = %id, "Monitor task cancelled");
    })
}

/// Create the endpoint pool, retrying until it succeeds or the task is cancelled
async fn create_pool<D: Driver>(
    weak: &Weak<Shared<D>>,
    id: EndpointId,
    token: &CancellationToken,
    refresh_delay: Duration,
) -> Option<Arc<D::Pool>> {
    loop {
        {
            let shared = weak.upgrade()?;
            let dsn = &shared.dsn[id.index()];
            let endpoint = &shared.redacted[id.index()];
            let timeout = shared.config.refresh_timeout;
            let sizing = PoolSizing::with_system_slot(shared.config.min_size, shared.config.max_size);

            let attempt = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                attempt = tokio::time::timeout(timeout, shared.driver.create_pool(dsn, sizing)) => attempt,
            };

            match attempt {
                Ok(Ok(pool)) => {
                    let pool = Arc::new(pool);
                    shared.pools.write()[id.index()] = Some(pool.clone());
                    metrics().record_pool_create("ok");
                    info!(
                        endpoint = %endpoint,
                        min_size = sizing.min_size,
                        max_size = sizing.max_size,
                        "Endpoint pool created"
                    );
                    return Some(pool);
                }
                Ok(Err(e)) => {
                    metrics().record_pool_create("error");
                    warn!(endpoint = %endpoint, error = %e, "Failed to create endpoint pool");
                }
                Err(_) => {
                    metrics().record_pool_create("timeout");
                    warn!(endpoint = %endpoint, timeout = ?timeout, "Endpoint pool creation timed out");
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(refresh_delay) => {}
        }
    }
}

/// One probe attempt, updating the topology with its outcome
async fn check<D: Driver>(shared: &Shared<D>, id: EndpointId, pool: &D::Pool) {
    let endpoint = &shared.redacted[id.index()];

    match probe(shared, id, pool).await {
        Ok((role, elapsed)) => {
            shared.stopwatch.record(id, elapsed);
            metrics().record_probe(role.as_str(), Some(elapsed.as_secs_f64()));
            debug!(
                endpoint = %endpoint,
                role = role.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                samples = shared.stopwatch.sample_count(id),
                "Role probe passed"
            );
            shared.classify(id, role);
        }
        Err(e) => {
            metrics().record_probe(e.label(), None);
            warn!(endpoint = %endpoint, error = %e, "Endpoint unreachable");
            shared.unclassify(id);
        }
    }
}

/// Ask the server whether it accepts writes, over a system connection
async fn probe<D: Driver>(
    shared: &Shared<D>,
    id: EndpointId,
    pool: &D::Pool,
) -> Result<(Role, Duration), ProbeError> {
    let timeout = shared.config.refresh_timeout;

    let mut conn = tokio::time::timeout(timeout, pool.acquire(Some(timeout)))
        .await
        .map_err(|_| ProbeError::AcquireTimeout(timeout))??;

    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, conn.is_read_write()).await;
    let elapsed = started.elapsed();

    if let Err(e) = pool.release(conn).await {
        debug!(endpoint = %shared.redacted[id.index()], error = %e, "Failed to release system connection");
    }

    let read_write = outcome.map_err(|_| ProbeError::ProbeTimeout(timeout))??;
    Ok((Role::from_read_write(read_write), elapsed))
}
