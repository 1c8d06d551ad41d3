use std::collections::HashMap;
use std::sync::Arc;

use libplacement::cache::Snapshot;
use libplacement::cycle_state::CycleState;
use libplacement::helpers::taint_toleration::{LEAF_NODE_LABEL, leaf_node_taint};
use libplacement::helpers::workload_policy::WORKLOAD_POLICY_LABEL_KEY;
use libplacement::models::{LabelSelector, NodeInfo, NodeSpec, OwnerReference, PodInfo};
use libplacement::plugins::leaf_node_distribution::LeafNodeDistribution;
use libplacement::plugins::leaf_node_workload_policy::LeafNodeWorkloadPolicy;
use libplacement::plugins::{
    Code, FilterPlugin, NodeScore, PreFilterPlugin, ReservePlugin, ScorePlugin, SnapshotLister,
};
use libplacement::policy::{
    AllocationMethod, AllocationPolicy, AllocationType, DistributionPolicy, DistributionSpec,
    NodeType, ObjectMeta, PolicyCache, PolicyTerm, ResourceSelector, WorkloadPolicy,
    WorkloadPolicySpec,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn make_node(name: &str, zone: &str, leaf: bool) -> NodeInfo {
    let mut labels = HashMap::from([("zone".to_string(), zone.to_string())]);
    let mut taints = Vec::new();
    if leaf {
        labels.insert(LEAF_NODE_LABEL.to_string(), "true".to_string());
        taints.push(leaf_node_taint());
    }
    NodeInfo {
        name: name.to_string(),
        labels,
        spec: NodeSpec {
            unschedulable: false,
            taints,
        },
        pods: Vec::new(),
    }
}

fn make_pod(name: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: "default".to_string(),
        labels: HashMap::from([
            ("app".to_string(), "web".to_string()),
            (WORKLOAD_POLICY_LABEL_KEY.to_string(), "web".to_string()),
        ]),
        ..Default::default()
    }
}

fn make_policies(
    method: AllocationMethod,
    allocation_type: AllocationType,
    table: &[(&str, i32)],
) -> Arc<PolicyCache> {
    let dp = DistributionPolicy {
        metadata: ObjectMeta {
            name: "web-on-host".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        },
        spec: DistributionSpec {
            resource_selectors: vec![ResourceSelector {
                policy_name: "host".to_string(),
                label_selector: Some(LabelSelector::from_labels([("app", "web")])),
                ..Default::default()
            }],
            policy_terms: vec![PolicyTerm {
                name: "host".to_string(),
                node_type: NodeType::Host,
                ..Default::default()
            }],
        },
        ..Default::default()
    };
    let wp = WorkloadPolicy {
        metadata: ObjectMeta {
            name: "web".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        },
        spec: WorkloadPolicySpec {
            topology_key: "zone".to_string(),
            label_selector: Some(LabelSelector::from_labels([("app", "web")])),
            allocation_policy: table
                .iter()
                .map(|(name, replicas)| AllocationPolicy {
                    name: name.to_string(),
                    replicas: *replicas,
                })
                .collect(),
            allocation_type,
            allocation_method: method,
        },
        ..Default::default()
    };
    Arc::new(PolicyCache::with_objects(vec![dp], vec![], vec![wp]))
}

struct Host {
    snapshot: Arc<Snapshot>,
    distribution: LeafNodeDistribution,
    workload: LeafNodeWorkloadPolicy,
}

impl Host {
    fn new(policies: Arc<PolicyCache>) -> Self {
        let snapshot = Arc::new(Snapshot::from_parts(
            vec![
                make_node("host-a", "z1", false),
                make_node("host-b", "z2", false),
                make_node("leaf-c", "z1", true),
            ],
            vec![],
        ));
        Self {
            distribution: LeafNodeDistribution::with_store(policies.clone()),
            workload: LeafNodeWorkloadPolicy::with_store(policies, snapshot.clone()),
            snapshot,
        }
    }

    /// One scheduling attempt: returns the node the pod was bound to.
    fn schedule_one(&self, pod: &PodInfo) -> Option<String> {
        let nodes = self.snapshot.list();
        let mut state = CycleState::default();
        let (_, status) = self.workload.pre_filter(&mut state, pod, &nodes);
        assert!(matches!(status.code, Code::Success | Code::Skip), "{status:?}");

        let mut scores: Vec<_> = nodes
            .iter()
            .filter(|n| self.distribution.filter(&state, pod, n).is_success())
            .filter(|n| self.workload.filter(&state, pod, n).is_success())
            .map(|n| NodeScore {
                name: n.name.clone(),
                score: self.workload.score(&state, pod, n).0,
            })
            .collect();
        if scores.is_empty() {
            return None;
        }
        if let Some(ext) = self.workload.score_extension() {
            assert!(ext.normalize_score(&state, pod, &mut scores).is_success());
        }
        let best = scores
            .iter()
            .max_by(|a, b| a.score.cmp(&b.score).then_with(|| b.name.cmp(&a.name)))?
            .name
            .clone();

        assert!(self.workload.reserve(&state, pod, &best).is_success());
        let mut bound = pod.clone();
        bound.scheduled = Some(best.clone());
        self.snapshot.update_pod(bound);
        Some(best)
    }
}

#[test]
fn test_required_balance_spreads_then_rejects() {
    init_logger();
    let host = Host::new(make_policies(
        AllocationMethod::Balance,
        AllocationType::Required,
        &[("z1", 2), ("z2", 2)],
    ));

    let placed: Vec<_> = (0..4)
        .map(|i| host.schedule_one(&make_pod(&format!("web-{i}"))))
        .collect();
    assert_eq!(
        placed,
        vec![
            Some("host-a".to_string()),
            Some("host-b".to_string()),
            Some("host-a".to_string()),
            Some("host-b".to_string()),
        ]
    );
    assert_eq!(host.schedule_one(&make_pod("web-4")), None);
}

#[test]
fn test_preferred_fill_packs_first_domain() {
    init_logger();
    let host = Host::new(make_policies(
        AllocationMethod::Fill,
        AllocationType::Preferred,
        &[("z1", 2), ("z2", 2)],
    ));

    for i in 0..4 {
        assert_eq!(
            host.schedule_one(&make_pod(&format!("web-{i}"))).as_deref(),
            Some("host-a")
        );
    }
}

#[test]
fn test_leaf_node_is_never_chosen_for_host_pods() {
    init_logger();
    let host = Host::new(make_policies(
        AllocationMethod::Balance,
        AllocationType::Preferred,
        &[("z1", 10), ("z2", 10)],
    ));
    for i in 0..6 {
        let node = host.schedule_one(&make_pod(&format!("web-{i}")));
        assert_ne!(node.as_deref(), Some("leaf-c"));
    }
    assert!(host.snapshot.get("leaf-c").unwrap().pods.is_empty());
}

#[test]
fn test_daemonset_pod_bypasses_both_plugins() {
    init_logger();
    let host = Host::new(make_policies(
        AllocationMethod::Balance,
        AllocationType::Required,
        &[("z1", 0), ("z2", 0)],
    ));
    let mut pod = make_pod("agent-leaf-c");
    pod.owner_references.push(OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "DaemonSet".to_string(),
        name: "agent".to_string(),
        controller: Some(true),
    });

    let nodes = host.snapshot.list();
    let mut state = CycleState::default();
    let (_, status) = host.workload.pre_filter(&mut state, &pod, &nodes);
    assert_eq!(status.code, Code::Skip);
    for node in &nodes {
        assert!(host.distribution.filter(&state, &pod, node).is_success());
        assert!(host.workload.filter(&state, &pod, node).is_success());
        assert_eq!(host.workload.score(&state, &pod, node).0, 0);
    }
}
