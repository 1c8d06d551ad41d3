use std::collections::HashMap;

use crate::models::{NodeInfo, NodeSelector, PodInfo};

/// The hard placement constraints a pod puts on nodes: its `nodeSelector`
/// plus the required part of its node affinity.
pub struct RequiredNodeAffinity {
    label_selector: HashMap<String, String>,
    node_selector: Option<NodeSelector>,
}

impl RequiredNodeAffinity {
    pub fn from_pod(pod: &PodInfo) -> Self {
        let node_selector = pod
            .spec
            .affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| {
                na.required_during_scheduling_ignored_during_execution
                    .clone()
            });
        Self {
            label_selector: pod.spec.node_selector.clone(),
            node_selector,
        }
    }

    pub fn matches(&self, node: &NodeInfo) -> bool {
        let label_match = self
            .label_selector
            .iter()
            .all(|(key, value)| matches!(node.labels.get(key), Some(v) if v == value));
        label_match
            && self
                .node_selector
                .as_ref()
                .is_none_or(|selector| selector.matches(node))
    }
}

/// Checks whether the pod is schedulable onto the node according to the
/// requirements in both `nodeSelector` and `nodeAffinity`.
pub fn pod_matches_node_selector_and_affinity_terms(pod: &PodInfo, node: &NodeInfo) -> bool {
    RequiredNodeAffinity::from_pod(pod).matches(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Affinity, NodeAffinity, NodeSelectorOperator, NodeSelectorRequirement, NodeSelectorTerm,
        PodSpec,
    };

    fn node(labels: &[(&str, &str)]) -> NodeInfo {
        NodeInfo {
            name: "node".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_without_constraints_matches_any_node() {
        let pod = PodInfo::default();
        assert!(pod_matches_node_selector_and_affinity_terms(&pod, &node(&[])));
    }

    #[test]
    fn test_node_selector_must_fully_match() {
        let pod = PodInfo {
            spec: PodSpec {
                node_selector: HashMap::from([
                    ("disk".to_string(), "ssd".to_string()),
                    ("zone".to_string(), "z1".to_string()),
                ]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(pod_matches_node_selector_and_affinity_terms(
            &pod,
            &node(&[("disk", "ssd"), ("zone", "z1"), ("extra", "x")])
        ));
        assert!(!pod_matches_node_selector_and_affinity_terms(
            &pod,
            &node(&[("disk", "ssd")])
        ));
    }

    #[test]
    fn test_required_node_affinity() {
        let pod = PodInfo {
            spec: PodSpec {
                affinity: Some(Affinity {
                    node_affinity: Some(NodeAffinity {
                        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                            node_selector_terms: vec![NodeSelectorTerm {
                                match_expressions: vec![NodeSelectorRequirement {
                                    key: "zone".to_string(),
                                    operator: NodeSelectorOperator::NotIn,
                                    values: vec!["z3".to_string()],
                                }],
                                ..Default::default()
                            }],
                        }),
                    }),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(pod_matches_node_selector_and_affinity_terms(
            &pod,
            &node(&[("zone", "z1")])
        ));
        assert!(!pod_matches_node_selector_and_affinity_terms(
            &pod,
            &node(&[("zone", "z3")])
        ));
    }
}
