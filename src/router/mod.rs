mod balancer;
mod topology;

pub use balancer::{BalanceError, BalanceRequest, BalancerPolicy, GreedyBalancer};
pub use topology::{Candidate, EndpointId, Role, Topology, TopologySnapshot};
