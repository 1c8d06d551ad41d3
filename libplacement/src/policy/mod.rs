//! Placement policy objects and the store the plugins read them from.

pub mod store;
pub mod types;

pub use store::{PolicyCache, PolicyStore, SyncState};
pub use types::{
    AdvancedTerm, AllocationMethod, AllocationPolicy, AllocationType, ClusterDistributionPolicy,
    DistributionPolicy, DistributionSpec, NodeType, ObjectMeta, PolicyTerm, ResourceSelector,
    WorkloadPolicy, WorkloadPolicySpec,
};
