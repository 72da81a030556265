pub mod balancer;
pub mod strategies;

pub use balancer::{LoadBalancer, LoadBalancerStats, WorkerSelectionStats};
pub use strategies::{
    BalancingStrategy, LeastConnections, ResponseTime, RoundRobin, SelectionAlgorithm, WeightedRoundRobin,
};
