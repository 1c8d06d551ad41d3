//! Placement-policy scheduler plugins for multi-cluster rk8s deployments.
//!
//! [`plugins::leaf_node_distribution::LeafNodeDistribution`] keeps pods on
//! host or leaf nodes according to distribution policies, and
//! [`plugins::leaf_node_workload_policy::LeafNodeWorkloadPolicy`] spreads or
//! packs the replicas of a workload over topology domains.

pub mod cache;
pub mod config;
pub mod cycle_state;
pub mod error;
pub mod helpers;
pub mod models;
pub mod plugins;
pub mod policy;
pub mod with_xline;
