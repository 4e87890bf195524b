//! Endpoint selection for acquire requests
//!
//! A balancer only looks at a [`TopologySnapshot`]; it never suspends and
//! never touches the network. The default [`GreedyBalancer`] picks the
//! least-loaded candidate, i.e. the one with the most free connections.

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};

use super::topology::{Candidate, EndpointId, TopologySnapshot};

/// Per-call routing parameters, already resolved against manager defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceRequest {
    pub read_only: bool,
    /// Use masters when no replica is classified
    pub fallback_master: bool,
    /// Probability of also treating masters as replica candidates
    pub master_as_replica_weight: Option<f64>,
}

impl BalanceRequest {
    pub fn master() -> Self {
        Self {
            read_only: false,
            fallback_master: false,
            master_as_replica_weight: None,
        }
    }

    pub fn replica(fallback_master: bool, master_as_replica_weight: Option<f64>) -> Self {
        Self {
            read_only: true,
            fallback_master,
            master_as_replica_weight,
        }
    }

    pub fn target(&self) -> &'static str {
        if self.read_only {
            "replica"
        } else {
            "master"
        }
    }
}

/// Error returned when no endpoint matches the request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("No {target} endpoint available")]
    NoCandidates { target: &'static str },
}

/// Strategy for choosing one endpoint pool
pub trait BalancerPolicy: Send + Sync {
    fn select(
        &self,
        request: &BalanceRequest,
        snapshot: &TopologySnapshot,
        rng: &mut dyn RngCore,
    ) -> Result<EndpointId, BalanceError>;
}

/// Least-loaded selection with uniform tie-break
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyBalancer;

impl GreedyBalancer {
    /// Collect the candidate set for `request`
    ///
    /// `choose_master_as_replica` is the outcome of the weighted draw.
    pub fn candidates(
        request: &BalanceRequest,
        snapshot: &TopologySnapshot,
        choose_master_as_replica: bool,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut masters_added = false;

        if request.read_only {
            if !snapshot.replicas.is_empty() {
                candidates.extend_from_slice(&snapshot.replicas);
            } else if request.fallback_master || choose_master_as_replica {
                candidates.extend_from_slice(&snapshot.masters);
                masters_added = true;
            }
        }

        let want_masters =
            !request.read_only || (choose_master_as_replica && !snapshot.masters.is_empty());
        if want_masters && !masters_added {
            candidates.extend_from_slice(&snapshot.masters);
        }

        candidates
    }
}

impl BalancerPolicy for GreedyBalancer {
    fn select(
        &self,
        request: &BalanceRequest,
        snapshot: &TopologySnapshot,
        rng: &mut dyn RngCore,
    ) -> Result<EndpointId, BalanceError> {
        // One draw per call, even when no weight is configured
        let draw: f64 = rng.gen();
        let choose_master_as_replica = match request.master_as_replica_weight {
            Some(weight) => 0.0 < draw && draw <= weight,
            None => false,
        };

        let candidates = Self::candidates(request, snapshot, choose_master_as_replica);
        let no_candidates = || BalanceError::NoCandidates {
            target: request.target(),
        };

        let max_free = candidates
            .iter()
            .map(|c| c.free_size)
            .max()
            .ok_or_else(no_candidates)?;

        let fattest: Vec<EndpointId> = candidates
            .iter()
            .filter(|c| c.free_size == max_free)
            .map(|c| c.id)
            .collect();

        fattest.choose(rng).copied().ok_or_else(no_candidates)
    }
}
