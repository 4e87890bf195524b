//! Master/replica membership of endpoint pools

use std::collections::BTreeSet;
use std::fmt;

/// Position of an endpoint in the manager's endpoint list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub usize);

impl EndpointId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Role detected by the most recent successful probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    pub fn from_read_write(read_write: bool) -> Self {
        if read_write {
            Role::Master
        } else {
            Role::Replica
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "replica",
        }
    }
}

/// Partition of endpoints into master set, replica set and unclassified
///
/// An endpoint is in at most one of the two sets; absence from both means it
/// is unreachable or has not been probed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    masters: BTreeSet<EndpointId>,
    replicas: BTreeSet<EndpointId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `id` into the set for `role`, removing it from the other one
    ///
    /// Returns true if membership changed
    pub fn classify(&mut self, id: EndpointId, role: Role) -> bool {
        let (target, other) = match role {
            Role::Master => (&mut self.masters, &mut self.replicas),
            Role::Replica => (&mut self.replicas, &mut self.masters),
        };
        let removed = other.remove(&id);
        let added = target.insert(id);
        removed || added
    }

    /// Remove `id` from both sets
    ///
    /// Returns true if it was a member of either
    pub fn unclassify(&mut self, id: EndpointId) -> bool {
        let was_master = self.masters.remove(&id);
        let was_replica = self.replicas.remove(&id);
        was_master || was_replica
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.masters.is_empty() || !self.replicas.is_empty();
        self.masters.clear();
        self.replicas.clear();
        changed
    }

    pub fn role_of(&self, id: EndpointId) -> Option<Role> {
        if self.masters.contains(&id) {
            Some(Role::Master)
        } else if self.replicas.contains(&id) {
            Some(Role::Replica)
        } else {
            None
        }
    }

    pub fn is_master(&self, id: EndpointId) -> bool {
        self.masters.contains(&id)
    }

    pub fn is_replica(&self, id: EndpointId) -> bool {
        self.replicas.contains(&id)
    }

    pub fn masters(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.masters.iter().copied()
    }

    pub fn replicas(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.replicas.iter().copied()
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Masters first, then replicas
    pub fn members(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.masters().chain(self.replicas())
    }
}

/// Endpoint with its free capacity at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: EndpointId,
    pub free_size: usize,
}

/// Point-in-time view handed to a balancer
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    pub masters: Vec<Candidate>,
    pub replicas: Vec<Candidate>,
}

impl TopologySnapshot {
    /// Build a snapshot, asking `free_size` for each member's spare capacity
    pub fn capture<F>(topology: &Topology, mut free_size: F) -> Self
    where
        F: FnMut(EndpointId) -> usize,
    {
        let mut candidate = |id: EndpointId| Candidate {
            id,
            free_size: free_size(id),
        };
        let masters = topology.masters().map(&mut candidate).collect();
        let replicas = topology.replicas().map(&mut candidate).collect();
        Self { masters, replicas }
    }
}
