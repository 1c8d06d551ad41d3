use std::sync::Arc;

use crate::{
    config::PlacementArgs,
    cycle_state::CycleState,
    helpers::{
        distribution::{advanced_term_accepts, resolve_term},
        is_daemonset_pod,
        taint_toleration::is_leaf_node,
    },
    models::{NodeInfo, PodInfo},
    plugins::{
        ActionType, ClusterEvent, ClusterEventWithHint, Code, EnqueueExtension, EventInner,
        EventResource, FilterPlugin, Plugin, QueueingHint, Status,
    },
    policy::{NodeType, PolicyStore},
    with_xline::synced_policy_cache,
};

pub const NAME: &str = "LeafNodeDistribution";

/// Keeps pods on host nodes, leaf nodes, or nodes picked by an advanced term,
/// according to the distribution policy that matches the pod.
pub struct LeafNodeDistribution {
    store: Arc<dyn PolicyStore>,
}

impl LeafNodeDistribution {
    /// Connects to xline and blocks until the policy cache is synced.
    pub async fn new(args: &PlacementArgs) -> Result<Self, anyhow::Error> {
        log::debug!("Creating new {NAME} plugin");
        let cache = synced_policy_cache(args).await?;
        Ok(Self::with_store(cache))
    }

    pub fn with_store(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }
}

impl Plugin for LeafNodeDistribution {
    fn name(&self) -> &str {
        NAME
    }
}

impl FilterPlugin for LeafNodeDistribution {
    fn filter(&self, _: &CycleState, pod: &PodInfo, node_info: &NodeInfo) -> Status {
        if is_daemonset_pod(pod) {
            return Status::default();
        }

        let policies = self
            .store
            .list_distribution_policies(&pod.namespace)
            .and_then(|dps| Ok((dps, self.store.list_cluster_distribution_policies()?)));
        let (dps, cdps) = match policies {
            Ok(p) => p,
            Err(e) => {
                log::warn!("listing distribution policies for {}: {e}", pod.namespace);
                return Status::as_status(e);
            }
        };

        let (node_type, advanced_term, policy) = resolve_term(pod, &dps, &cdps);
        log::trace!(
            "pod {}/{} resolved to {node_type} by policy ({policy})",
            pod.namespace,
            pod.name
        );

        let rejection = match node_type {
            NodeType::Host if is_leaf_node(node_info) => Some(format!(
                "This is a leaf node ({}) that does not match the distribution policy ({policy}) (host node)",
                node_info.name
            )),
            NodeType::Leaf if !is_leaf_node(node_info) => Some(format!(
                "This is a host node ({}) that does not match the distribution policy ({policy}) (leaf node)",
                node_info.name
            )),
            NodeType::Advanced if !advanced_term_accepts(&advanced_term, node_info) => {
                Some(format!(
                    "This is node ({}) that does not match the distribution policy ({policy}) AdvancedTerm",
                    node_info.name
                ))
            }
            _ => None,
        };

        match rejection {
            Some(msg) => {
                log::debug!("{msg}");
                Status::new(Code::UnschedulableAndUnresolvable, vec![msg])
            }
            None => Status::default(),
        }
    }
}

impl EnqueueExtension for LeafNodeDistribution {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint> {
        vec![
            ClusterEventWithHint {
                event: ClusterEvent {
                    resource: EventResource::Pod,
                    action_type: ActionType::All,
                },
                queueing_hint_fn: None,
            },
            ClusterEventWithHint {
                event: ClusterEvent {
                    resource: EventResource::Node,
                    action_type: ActionType::Add | ActionType::Delete | ActionType::UpdateNodeLabel,
                },
                queueing_hint_fn: Some(Box::new(is_schedulable_after_node_change)),
            },
        ]
    }
}

fn is_schedulable_after_node_change(
    pod: &PodInfo,
    event: &EventInner,
) -> Result<QueueingHint, String> {
    match event {
        EventInner::Node(None, _) => Ok(QueueingHint::Queue),
        EventInner::Node(Some(old), new) => {
            if old.labels != new.labels || old.spec.taints != new.spec.taints {
                log::trace!(
                    "node {} changed labels or taints, may make pod {} schedulable",
                    new.name,
                    pod.name
                );
                Ok(QueueingHint::Queue)
            } else {
                Ok(QueueingHint::Skip)
            }
        }
        EventInner::Pod(_, _) => Err(format!(
            "event inner {event:?} not match event resource node"
        )),
    }
}
