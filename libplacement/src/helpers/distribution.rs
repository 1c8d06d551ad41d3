//! Resolution of the distribution policy term that applies to a pod.
//!
//! Every resource selector of every visible policy object is turned into a
//! candidate match with a [`MatchScope`]; the candidate with the highest scope
//! wins. Namespace-scoped objects always rank above cluster-scoped ones, so a
//! cluster-scoped policy only applies when no namespace-scoped one matched.

use crate::models::{NodeInfo, PodInfo};
use crate::policy::{
    AdvancedTerm, ClusterDistributionPolicy, DistributionPolicy, DistributionSpec, NodeType,
    PolicyTerm, ResourceSelector,
};

/// How specifically a resource selector matched a pod, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchScope {
    None,
    LabelSelector,
    NamePrefix,
    Name,
    LabelSelectorInNs,
    NamePrefixInNs,
    NameInNs,
}

impl MatchScope {
    fn namespaced(self) -> Self {
        match self {
            MatchScope::LabelSelector => MatchScope::LabelSelectorInNs,
            MatchScope::NamePrefix => MatchScope::NamePrefixInNs,
            MatchScope::Name => MatchScope::NameInNs,
            other => other,
        }
    }
}

/// The winning selector: which object it came from and the term it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch<'a> {
    pub scope: MatchScope,
    /// `namespace/name` of a namespace-scoped object, `name` otherwise.
    pub policy: String,
    pub policy_name: &'a str,
    pub terms: &'a [PolicyTerm],
}

impl PolicyMatch<'_> {
    /// The term named by the selector. A selector naming a term that does
    /// not exist resolves to the default node type.
    pub fn term(&self) -> Option<&PolicyTerm> {
        self.terms.iter().find(|t| t.name == self.policy_name)
    }
}

/// Scope of the most specific part of `selector` that matches `pod`.
/// Within one selector exact name beats name prefix beats labels.
/// Labels match with full selector semantics: every `matchLabels` entry must
/// be present, not just any one of them.
fn selector_scope(selector: &ResourceSelector, pod: &PodInfo) -> MatchScope {
    if !selector.name.is_empty() && selector.name == pod.name {
        return MatchScope::Name;
    }
    if !selector.name_prefix.is_empty() && pod.name.starts_with(&selector.name_prefix) {
        return MatchScope::NamePrefix;
    }
    match &selector.label_selector {
        Some(ls) if !ls.is_empty() && ls.matches(&pod.labels) => MatchScope::LabelSelector,
        _ => MatchScope::None,
    }
}

/// A cluster-scoped selector may be narrowed to one namespace or to a
/// namespace prefix.
fn selector_covers_namespace(selector: &ResourceSelector, namespace: &str) -> bool {
    (selector.namespace.is_empty() || selector.namespace == namespace)
        && (selector.namespace_prefix.is_empty()
            || namespace.starts_with(&selector.namespace_prefix))
}

fn candidates<'a>(
    policy: String,
    spec: &'a DistributionSpec,
    pod: &'a PodInfo,
    namespaced: bool,
) -> impl Iterator<Item = PolicyMatch<'a>> + 'a {
    spec.resource_selectors.iter().filter_map(move |selector| {
        if !namespaced && !selector_covers_namespace(selector, &pod.namespace) {
            return None;
        }
        let scope = selector_scope(selector, pod);
        if scope == MatchScope::None {
            return None;
        }
        Some(PolicyMatch {
            scope: if namespaced { scope.namespaced() } else { scope },
            policy: policy.clone(),
            policy_name: &selector.policy_name,
            terms: &spec.policy_terms,
        })
    })
}

/// Folds all candidate matches to the highest-scoped one. On equal scope the
/// later candidate wins, objects being visited in (namespace, name) order.
pub fn best_match<'a>(
    pod: &'a PodInfo,
    dps: &'a [DistributionPolicy],
    cdps: &'a [ClusterDistributionPolicy],
) -> Option<PolicyMatch<'a>> {
    let cluster = cdps
        .iter()
        .flat_map(|cdp| candidates(cdp.metadata.name.clone(), &cdp.spec, pod, false));
    let namespaced = dps
        .iter()
        .filter(|dp| dp.metadata.namespace == pod.namespace)
        .flat_map(|dp| {
            let policy = format!("{}/{}", dp.metadata.namespace, dp.metadata.name);
            candidates(policy, &dp.spec, pod, true)
        });

    cluster
        .chain(namespaced)
        .fold(None, |best: Option<PolicyMatch<'a>>, m| match best {
            Some(b) if b.scope > m.scope => Some(b),
            _ => Some(m),
        })
}

/// The node type and advanced term to enforce for `pod`, plus the label of
/// the policy that decided it. No match yields [`NodeType::Mixed`].
pub fn resolve_term(
    pod: &PodInfo,
    dps: &[DistributionPolicy],
    cdps: &[ClusterDistributionPolicy],
) -> (NodeType, AdvancedTerm, String) {
    match best_match(pod, dps, cdps) {
        Some(m) => {
            let (node_type, advanced_term) = m
                .term()
                .map(|t| (t.node_type, t.advanced_term.clone()))
                .unwrap_or_default();
            let label = format!("{}:{}", m.policy, m.policy_name);
            (node_type, advanced_term, label)
        }
        None => (NodeType::Mixed, AdvancedTerm::default(), String::new()),
    }
}

/// A node is accepted by an advanced term if any one of these holds:
/// its name is the term's node name, it carries every label of the term's
/// node selector, or every toleration of the term tolerates one of its taints.
pub fn advanced_term_accepts(term: &AdvancedTerm, node: &NodeInfo) -> bool {
    let by_name = !term.node_name.is_empty() && term.node_name == node.name;
    let by_selector = !term.node_selector.is_empty()
        && term
            .node_selector
            .iter()
            .all(|(k, v)| node.labels.get(k) == Some(v));
    let by_toleration = !term.tolerations.is_empty()
        && term.tolerations.iter().all(|toleration| {
            node.spec
                .taints
                .iter()
                .any(|taint| toleration.tolerate(taint))
        });
    by_name || by_selector || by_toleration
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::{
        LabelSelector, NodeSpec, Taint, TaintEffect, Toleration, TolerationOperator,
    };
    use crate::policy::ObjectMeta;

    fn pod(ns: &str, name: &str, labels: &[(&str, &str)]) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            namespace: ns.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn terms() -> Vec<PolicyTerm> {
        [("host", NodeType::Host), ("leaf", NodeType::Leaf), ("mix", NodeType::Mixed)]
            .into_iter()
            .map(|(name, node_type)| PolicyTerm {
                name: name.to_string(),
                node_type,
                ..Default::default()
            })
            .collect()
    }

    fn by_name(name: &str, policy: &str) -> ResourceSelector {
        ResourceSelector {
            policy_name: policy.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn by_prefix(prefix: &str, policy: &str) -> ResourceSelector {
        ResourceSelector {
            policy_name: policy.to_string(),
            name_prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    fn by_labels(labels: &[(&str, &str)], policy: &str) -> ResourceSelector {
        ResourceSelector {
            policy_name: policy.to_string(),
            label_selector: Some(LabelSelector::from_labels(labels.iter().copied())),
            ..Default::default()
        }
    }

    fn dp(ns: &str, name: &str, selectors: Vec<ResourceSelector>) -> DistributionPolicy {
        DistributionPolicy {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: ns.to_string(),
                ..Default::default()
            },
            spec: DistributionSpec {
                resource_selectors: selectors,
                policy_terms: terms(),
            },
            ..Default::default()
        }
    }

    fn cdp(name: &str, selectors: Vec<ResourceSelector>) -> ClusterDistributionPolicy {
        ClusterDistributionPolicy {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            spec: DistributionSpec {
                resource_selectors: selectors,
                policy_terms: terms(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_no_policy_defaults_to_mixed() {
        let p = pod("default", "nginx", &[]);
        let (node_type, _, label) = resolve_term(&p, &[], &[]);
        assert_eq!(node_type, NodeType::Mixed);
        assert!(label.is_empty());
    }

    #[test]
    fn test_name_beats_prefix_beats_labels() {
        let p = pod("default", "nginx-0", &[("app", "nginx")]);
        let dps = vec![dp(
            "default",
            "dp",
            vec![
                by_labels(&[("app", "nginx")], "mix"),
                by_name("nginx-0", "host"),
                by_prefix("nginx", "leaf"),
            ],
        )];
        let m = best_match(&p, &dps, &[]).unwrap();
        assert_eq!(m.scope, MatchScope::NameInNs);
        assert_eq!(resolve_term(&p, &dps, &[]).0, NodeType::Host);
    }

    #[test]
    fn test_best_match_is_kept_across_objects() {
        let p = pod("default", "nginx-0", &[]);
        // The object visited last does not match; the earlier match must survive.
        let dps = vec![
            dp("default", "a", vec![by_prefix("nginx", "leaf")]),
            dp("default", "b", vec![by_name("other", "host")]),
        ];
        let (node_type, _, label) = resolve_term(&p, &dps, &[]);
        assert_eq!(node_type, NodeType::Leaf);
        assert_eq!(label, "default/a:leaf");
    }

    #[test]
    fn test_namespaced_policy_beats_cluster_policy() {
        let p = pod("default", "nginx-0", &[("app", "nginx")]);
        let dps = vec![dp("default", "dp", vec![by_labels(&[("app", "nginx")], "leaf")])];
        let cdps = vec![cdp("cdp", vec![by_name("nginx-0", "host")])];
        let m = best_match(&p, &dps, &cdps).unwrap();
        assert_eq!(m.scope, MatchScope::LabelSelectorInNs);
        assert_eq!(m.policy, "default/dp");

        // Falls back to the cluster policy when the namespaced one misses.
        let other = pod("default", "nginx-0", &[]);
        assert_eq!(resolve_term(&other, &dps, &cdps).0, NodeType::Host);
    }

    #[test]
    fn test_policies_of_other_namespaces_are_ignored() {
        let p = pod("default", "nginx", &[]);
        let dps = vec![dp("kube-system", "dp", vec![by_name("nginx", "leaf")])];
        assert!(best_match(&p, &dps, &[]).is_none());
    }

    #[test]
    fn test_cluster_selector_namespace_restriction() {
        let mut restricted = by_prefix("web", "leaf");
        restricted.namespace_prefix = "team-".to_string();
        let cdps = vec![cdp("cdp", vec![restricted])];

        assert_eq!(
            resolve_term(&pod("team-a", "web-1", &[]), &[], &cdps).0,
            NodeType::Leaf
        );
        assert_eq!(
            resolve_term(&pod("default", "web-1", &[]), &[], &cdps).0,
            NodeType::Mixed
        );
    }

    #[test]
    fn test_empty_label_selector_matches_nothing() {
        let p = pod("default", "nginx", &[("app", "nginx")]);
        let dps = vec![dp("default", "dp", vec![by_labels(&[], "leaf")])];
        assert!(best_match(&p, &dps, &[]).is_none());
    }

    #[test]
    fn test_missing_term_resolves_to_mixed() {
        let p = pod("default", "nginx", &[]);
        let dps = vec![dp("default", "dp", vec![by_name("nginx", "nope")])];
        assert_eq!(resolve_term(&p, &dps, &[]).0, NodeType::Mixed);
    }

    #[test]
    fn test_advanced_term_accepts() {
        let node = NodeInfo {
            name: "n1".to_string(),
            labels: HashMap::from([("advNode".to_string(), "true".to_string())]),
            spec: NodeSpec {
                unschedulable: false,
                taints: vec![Taint::new("gpu", "a100", TaintEffect::NoSchedule)],
            },
            ..Default::default()
        };

        let by_name = AdvancedTerm {
            node_name: "n1".to_string(),
            ..Default::default()
        };
        assert!(advanced_term_accepts(&by_name, &node));

        let other_name = AdvancedTerm {
            node_name: "n2".to_string(),
            ..Default::default()
        };
        assert!(!advanced_term_accepts(&other_name, &node));
        assert!(!advanced_term_accepts(&AdvancedTerm::default(), &node));

        let by_selector = AdvancedTerm {
            node_selector: HashMap::from([("advNode".to_string(), "true".to_string())]),
            ..Default::default()
        };
        assert!(advanced_term_accepts(&by_selector, &node));

        let by_toleration = AdvancedTerm {
            tolerations: vec![Toleration {
                key: Some("gpu".to_string()),
                operator: TolerationOperator::Exists,
                value: String::new(),
                effect: Some(TaintEffect::NoSchedule),
            }],
            ..Default::default()
        };
        assert!(advanced_term_accepts(&by_toleration, &node));

        let untolerated = AdvancedTerm {
            tolerations: vec![Toleration {
                key: Some("ssd".to_string()),
                operator: TolerationOperator::Exists,
                value: String::new(),
                effect: None,
            }],
            ..Default::default()
        };
        assert!(!advanced_term_accepts(&untolerated, &node));
    }
}
