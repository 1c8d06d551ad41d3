use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("workload-policy {namespace}/{name} not found")]
    WorkloadPolicyNotFound { namespace: String, name: String },

    #[error("workload-policy {0} has no label selector")]
    MissingLabelSelector(String),

    #[error("policy store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timed out after {0:?} waiting for policy cache to sync")]
    SyncTimeout(Duration),

    #[error("reading {0:?} from cycle state: not found")]
    StateNotFound(String),

    #[error("node({0}) not found")]
    NodeNotFound(String),

    #[error("node(s) didn't match pod workload-policy constraints (not match value {0})")]
    UndeclaredTopologyValue(String),

    #[error("malformed policy object {key}: {reason}")]
    MalformedPolicy { key: String, reason: String },
}
