use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::PlacementError;
use crate::models::{LabelSelector, PodInfo};
use crate::policy::{AllocationPolicy, WorkloadPolicy};

/// Pod label naming the workload policy (in the pod's namespace) that governs it.
pub const WORKLOAD_POLICY_LABEL_KEY: &str = "workload-policy/kosmos.io";

pub const ERR_REASON_CONSTRAINTS_NOT_MATCH: &str =
    "node(s) didn't match pod workload-policy constraints";
pub const ERR_REASON_NODE_LABEL_NOT_MATCH: &str =
    "node(s) didn't match pod workload-policy constraints (missing required label)";
pub const ERR_REASON_REACH_REPLICAS: &str =
    "node(s) occupied that scheduled pods reach the replicas configured in the workload-policy";

/// A (topology key, topology value) combination, the unit of occupancy accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyPair {
    pub key: String,
    pub value: String,
}

impl TopologyPair {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// The part of a workload policy the plugin needs during one cycle.
#[derive(Debug, Clone, Default)]
pub struct WorkloadPolicyConstraint {
    pub topology_key: String,
    pub allocation_policy: HashMap<String, i32>,
    pub selector: LabelSelector,
}

impl WorkloadPolicyConstraint {
    pub fn from_policy(wp: &WorkloadPolicy) -> Result<Self, PlacementError> {
        let selector = wp
            .spec
            .label_selector
            .clone()
            .ok_or_else(|| PlacementError::MissingLabelSelector(wp.metadata.name.clone()))?;
        Ok(Self {
            topology_key: wp.spec.topology_key.clone(),
            allocation_policy: convert_policy(&wp.spec.allocation_policy),
            selector,
        })
    }
}

/// Builds the allocation table. A value declared twice keeps the last count.
pub fn convert_policy(policies: &[AllocationPolicy]) -> HashMap<String, i32> {
    policies
        .iter()
        .map(|p| (p.name.clone(), p.replicas))
        .collect()
}

pub fn has_workload_policy_label(pod: &PodInfo) -> bool {
    pod.labels.contains_key(WORKLOAD_POLICY_LABEL_KEY)
}

pub fn workload_policy_name(pod: &PodInfo) -> Option<&str> {
    pod.labels.get(WORKLOAD_POLICY_LABEL_KEY).map(String::as_str)
}

/// Counts the pods in `ns` matched by `selector`, ignoring terminating pods.
pub fn count_pods_match_selector(pods: &[PodInfo], selector: &LabelSelector, ns: &str) -> i32 {
    pods.iter()
        .filter(|p| !p.is_terminating() && p.namespace == ns)
        .filter(|p| selector.matches(&p.labels))
        .count() as i32
}

/// Reports whether the pair's counter has reached the desired replica count
/// of `tp_value`. A pair without a counter has not reached anything.
pub fn check_topology_value_reached(
    tp_key: &str,
    tp_value: &str,
    allocation_policy: &HashMap<String, i32>,
    tp_pair_to_match_num: &HashMap<TopologyPair, AtomicI32>,
) -> Result<bool, PlacementError> {
    let desired = allocation_policy
        .get(tp_value)
        .ok_or_else(|| PlacementError::UndeclaredTopologyValue(tp_value.to_string()))?;

    let Some(count) = tp_pair_to_match_num.get(&TopologyPair::new(tp_key, tp_value)) else {
        return Ok(false);
    };
    Ok(count.load(Ordering::SeqCst) >= *desired)
}
