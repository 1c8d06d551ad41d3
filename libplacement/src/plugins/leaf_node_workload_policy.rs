use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use rayon::prelude::*;

use crate::{
    config::PlacementArgs,
    cycle_state::{CycleState, StateData},
    error::PlacementError,
    helpers::{
        is_daemonset_pod,
        workload_policy::{
            ERR_REASON_CONSTRAINTS_NOT_MATCH, ERR_REASON_NODE_LABEL_NOT_MATCH,
            ERR_REASON_REACH_REPLICAS, TopologyPair, WorkloadPolicyConstraint,
            check_topology_value_reached, count_pods_match_selector, has_workload_policy_label,
            workload_policy_name,
        },
    },
    models::{NodeInfo, PodInfo},
    plugins::{
        ActionType, ClusterEvent, ClusterEventWithHint, Code, DefaultNormalizeScore,
        EnqueueExtension, EventResource, FilterPlugin, MAX_NODE_SCORE, MIN_NODE_SCORE, Plugin,
        PreFilterExtensions, PreFilterPlugin, PreFilterResult, ReservePlugin, ScoreExtension,
        ScorePlugin, SnapshotLister, Status,
        node_affinity::pod_matches_node_selector_and_affinity_terms,
    },
    policy::{AllocationMethod, AllocationType, PolicyStore, WorkloadPolicy},
    with_xline::synced_policy_cache,
};

pub const NAME: &str = "LeafNodeWorkloadPolicy";
const PRE_FILTER_STATE_KEY: &str = "PreFilterLeafNodeWorkloadPolicy";

/// Computed at PreFilter and used at Filter, Score and Reserve.
pub struct PreFilterState {
    pub constraint: WorkloadPolicyConstraint,
    /// Number of matching pods per topology pair. The key set is fixed once
    /// PreFilter returns; later phases only add to the counters.
    pub tp_pair_to_match_num: HashMap<TopologyPair, AtomicI32>,
    pub allocation_method: AllocationMethod,
    pub allocation_type: AllocationType,
}

impl PreFilterState {
    /// Current counter of the node's topology pair, if it was registered.
    pub fn count_on(&self, node: &NodeInfo) -> Option<i32> {
        self.counter_of(node).map(|c| c.load(Ordering::SeqCst))
    }

    fn counter_of(&self, node: &NodeInfo) -> Option<&AtomicI32> {
        let key = &self.constraint.topology_key;
        let value = node.labels.get(key)?;
        self.tp_pair_to_match_num.get(&TopologyPair::new(key, value))
    }

    fn add_on(&self, node: &NodeInfo, delta: i32) {
        if let Some(counter) = self.counter_of(node) {
            counter.fetch_add(delta, Ordering::SeqCst);
        }
    }

    fn update_with_pod(
        &self,
        updated_pod: &PodInfo,
        pre_filter_pod: &PodInfo,
        node: &NodeInfo,
        delta: i32,
    ) {
        if updated_pod.namespace != pre_filter_pod.namespace
            || !self.constraint.selector.matches(&updated_pod.labels)
        {
            return;
        }
        self.add_on(node, delta);
    }
}

impl StateData for PreFilterState {
    fn clone_data(&self) -> Box<dyn StateData> {
        Box::new(PreFilterState {
            constraint: self.constraint.clone(),
            tp_pair_to_match_num: self
                .tp_pair_to_match_num
                .iter()
                .map(|(pair, count)| (pair.clone(), AtomicI32::new(count.load(Ordering::SeqCst))))
                .collect(),
            allocation_method: self.allocation_method.clone(),
            allocation_type: self.allocation_type.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Spreads or packs the pods of a workload over topology domains according
/// to the workload policy named by the pod's label.
pub struct LeafNodeWorkloadPolicy {
    store: Arc<dyn PolicyStore>,
    handle: Arc<dyn SnapshotLister>,
}

impl LeafNodeWorkloadPolicy {
    /// Connects to xline and blocks until the policy cache is synced.
    pub async fn new(
        args: &PlacementArgs,
        handle: Arc<dyn SnapshotLister>,
    ) -> Result<Self, anyhow::Error> {
        log::debug!("Creating new {NAME} plugin");
        let cache = synced_policy_cache(args).await?;
        Ok(Self::with_store(cache, handle))
    }

    pub fn with_store(store: Arc<dyn PolicyStore>, handle: Arc<dyn SnapshotLister>) -> Self {
        Self { store, handle }
    }
}

/// DaemonSet pods and pods without a workload policy are left alone.
fn is_exempt(pod: &PodInfo) -> bool {
    is_daemonset_pod(pod) || !has_workload_policy_label(pod)
}

fn get_pre_filter_state(state: &CycleState) -> Result<&PreFilterState, PlacementError> {
    state.read::<PreFilterState>(PRE_FILTER_STATE_KEY)
}

/// Registers a counter for every topology value present on a node the pod
/// may run on, then counts the matching pods of every node in a registered
/// domain in parallel.
pub fn calculate_pre_filter_state(
    pod: &PodInfo,
    wp: &WorkloadPolicy,
    nodes: &[NodeInfo],
) -> Result<PreFilterState, PlacementError> {
    let constraint = WorkloadPolicyConstraint::from_policy(wp)?;
    let key = &constraint.topology_key;

    let tp_pair_to_match_num: HashMap<TopologyPair, AtomicI32> = nodes
        .iter()
        .filter(|n| pod_matches_node_selector_and_affinity_terms(pod, n))
        .filter_map(|n| n.labels.get(key))
        .map(|v| (TopologyPair::new(key, v), AtomicI32::new(0)))
        .collect();

    // Domains are registered from eligible nodes only, but their occupancy
    // includes nodes the pod itself cannot land on.
    nodes.par_iter().for_each(|node| {
        let Some(value) = node.labels.get(key) else {
            return;
        };
        let Some(counter) = tp_pair_to_match_num.get(&TopologyPair::new(key, value)) else {
            return;
        };
        let count = count_pods_match_selector(&node.pods, &constraint.selector, &pod.namespace);
        counter.fetch_add(count, Ordering::SeqCst);
    });

    Ok(PreFilterState {
        constraint,
        tp_pair_to_match_num,
        allocation_method: wp.spec.allocation_method.clone(),
        allocation_type: wp.spec.allocation_type.clone(),
    })
}

/// Balance favours domains furthest below their target, Fill the ones
/// closest to it.
pub fn get_node_score(count: i32, desired: i32, method: &AllocationMethod) -> i64 {
    if desired <= 0 {
        return MIN_NODE_SCORE;
    }
    let ratio = f64::from(count) / f64::from(desired);
    let score = match method {
        AllocationMethod::Balance => (1. - ratio) * MAX_NODE_SCORE as f64,
        AllocationMethod::Fill => ratio * MAX_NODE_SCORE as f64,
        AllocationMethod::Unknown(_) => return MIN_NODE_SCORE,
    };
    (score as i64).clamp(MIN_NODE_SCORE, MAX_NODE_SCORE)
}

impl Plugin for LeafNodeWorkloadPolicy {
    fn name(&self) -> &str {
        NAME
    }
}

impl PreFilterPlugin for LeafNodeWorkloadPolicy {
    fn pre_filter(
        &self,
        state: &mut CycleState,
        pod: &PodInfo,
        nodes: &[NodeInfo],
    ) -> (PreFilterResult, Status) {
        if is_exempt(pod) {
            return (PreFilterResult::default(), Status::new(Code::Skip, vec![]));
        }
        let wp_name = workload_policy_name(pod).unwrap_or_default();

        let s = self
            .store
            .get_workload_policy(&pod.namespace, wp_name)
            .and_then(|wp| calculate_pre_filter_state(pod, &wp, nodes));
        match s {
            Ok(s) => {
                log::trace!(
                    "pod {}/{} pre-filter counters: {:?}",
                    pod.namespace,
                    pod.name,
                    s.tp_pair_to_match_num
                );
                state.write(PRE_FILTER_STATE_KEY, Box::new(s));
                (PreFilterResult::default(), Status::default())
            }
            Err(e) => {
                log::warn!(
                    "failed to obtain workload-policy({wp_name}) of pod {}/{}: {e}",
                    pod.namespace,
                    pod.name
                );
                (PreFilterResult::default(), Status::as_status(e))
            }
        }
    }

    fn pre_filter_extensions(&self) -> Option<&dyn PreFilterExtensions> {
        Some(self)
    }
}

impl PreFilterExtensions for LeafNodeWorkloadPolicy {
    fn add_pod(
        &self,
        state: &CycleState,
        pod_to_schedule: &PodInfo,
        pod_to_add: &PodInfo,
        node_info: &NodeInfo,
    ) -> Status {
        if is_exempt(pod_to_schedule) {
            return Status::default();
        }
        match get_pre_filter_state(state) {
            Ok(s) => {
                s.update_with_pod(pod_to_add, pod_to_schedule, node_info, 1);
                Status::default()
            }
            Err(e) => Status::as_status(e),
        }
    }

    fn remove_pod(
        &self,
        state: &CycleState,
        pod_to_schedule: &PodInfo,
        pod_to_remove: &PodInfo,
        node_info: &NodeInfo,
    ) -> Status {
        if is_exempt(pod_to_schedule) {
            return Status::default();
        }
        match get_pre_filter_state(state) {
            Ok(s) => {
                s.update_with_pod(pod_to_remove, pod_to_schedule, node_info, -1);
                Status::default()
            }
            Err(e) => Status::as_status(e),
        }
    }
}

impl FilterPlugin for LeafNodeWorkloadPolicy {
    fn filter(&self, state: &CycleState, pod: &PodInfo, node_info: &NodeInfo) -> Status {
        if is_exempt(pod) {
            return Status::default();
        }
        let s = match get_pre_filter_state(state) {
            Ok(s) => s,
            Err(e) => return Status::as_status(e),
        };

        if !s.constraint.selector.matches(&pod.labels) {
            return Status::new(
                Code::Unschedulable,
                vec![ERR_REASON_CONSTRAINTS_NOT_MATCH.to_string()],
            );
        }

        let tp_key = &s.constraint.topology_key;
        let Some(tp_value) = node_info.labels.get(tp_key) else {
            log::trace!("node {} has no label {tp_key}", node_info.name);
            return Status::new(
                Code::UnschedulableAndUnresolvable,
                vec![ERR_REASON_NODE_LABEL_NOT_MATCH.to_string()],
            );
        };

        let reached = check_topology_value_reached(
            tp_key,
            tp_value,
            &s.constraint.allocation_policy,
            &s.tp_pair_to_match_num,
        );
        match (reached, &s.allocation_type) {
            (Err(e), _) => Status::new(Code::UnschedulableAndUnresolvable, vec![e.to_string()]),
            (Ok(false), _) | (Ok(true), AllocationType::Preferred) => Status::default(),
            (Ok(true), AllocationType::Required) => {
                log::debug!(
                    "topology {tp_key}={tp_value} reached its replicas, rejecting node {}",
                    node_info.name
                );
                Status::new(
                    Code::UnschedulableAndUnresolvable,
                    vec![ERR_REASON_REACH_REPLICAS.to_string()],
                )
            }
            (Ok(true), AllocationType::Unknown(_)) => Status::new(
                Code::Unschedulable,
                vec![ERR_REASON_CONSTRAINTS_NOT_MATCH.to_string()],
            ),
        }
    }
}

impl ScorePlugin for LeafNodeWorkloadPolicy {
    fn score(&self, state: &CycleState, pod: &PodInfo, node_info: &NodeInfo) -> (i64, Status) {
        if is_exempt(pod) {
            return (0, Status::default());
        }
        let Ok(s) = get_pre_filter_state(state) else {
            return (0, Status::default());
        };
        let Some(tp_value) = node_info.labels.get(&s.constraint.topology_key) else {
            return (0, Status::default());
        };
        let Some(&desired) = s.constraint.allocation_policy.get(tp_value) else {
            return (0, Status::default());
        };
        let Some(count) = s.count_on(node_info) else {
            return (0, Status::default());
        };

        if count >= desired && s.allocation_type == AllocationType::Required {
            return (0, Status::default());
        }
        (
            get_node_score(count, desired, &s.allocation_method),
            Status::default(),
        )
    }

    fn score_extension(&self) -> Option<Box<dyn ScoreExtension>> {
        Some(Box::new(DefaultNormalizeScore {
            max_score: MAX_NODE_SCORE,
            reverse: false,
        }))
    }
}

impl ReservePlugin for LeafNodeWorkloadPolicy {
    fn reserve(&self, state: &CycleState, pod: &PodInfo, node_name: &str) -> Status {
        if is_exempt(pod) {
            return Status::default();
        }
        let Ok(s) = get_pre_filter_state(state) else {
            return Status::default();
        };
        match self.handle.get(node_name) {
            Some(node) => {
                s.update_with_pod(pod, pod, &node, 1);
                Status::default()
            }
            None => Status::as_status(PlacementError::NodeNotFound(node_name.to_string())),
        }
    }

    fn unreserve(&self, state: &CycleState, pod: &PodInfo, node_name: &str) {
        if is_exempt(pod) {
            return;
        }
        let Ok(s) = get_pre_filter_state(state) else {
            return;
        };
        match self.handle.get(node_name) {
            Some(node) => s.update_with_pod(pod, pod, &node, -1),
            None => log::warn!("unreserve pod {}: node({node_name}) not found", pod.name),
        }
    }
}

impl EnqueueExtension for LeafNodeWorkloadPolicy {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint> {
        vec![
            ClusterEventWithHint {
                event: ClusterEvent {
                    resource: EventResource::Pod,
                    action_type: ActionType::Delete | ActionType::UpdatePodLabel,
                },
                queueing_hint_fn: None,
            },
            ClusterEventWithHint {
                event: ClusterEvent {
                    resource: EventResource::Node,
                    action_type: ActionType::Add | ActionType::UpdateNodeLabel,
                },
                queueing_hint_fn: None,
            },
        ]
    }
}
