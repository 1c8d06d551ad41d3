//! Scheduler plugins.
//!
//! The extension points follow their namesakes in the Kubernetes scheduling
//! framework; the host orchestrator drives them once per pod per attempt.
//! Some comments are also quoted from the Kubernetes codebase.

use std::fmt::Display;

use bitflags::bitflags;

use crate::cycle_state::CycleState;
use crate::models::{NodeInfo, PodInfo};

pub mod leaf_node_distribution;
pub mod leaf_node_workload_policy;
pub mod node_affinity;

/// Highest score a Score plugin may return.
pub const MAX_NODE_SCORE: i64 = 100;
/// Lowest score a Score plugin may return.
pub const MIN_NODE_SCORE: i64 = 0;

pub trait Plugin {
    fn name(&self) -> &str;
}

/// Read access to the host's snapshot of nodes and the pods placed on them.
pub trait SnapshotLister: Send + Sync {
    fn get(&self, node_name: &str) -> Option<NodeInfo>;
    fn list(&self) -> Vec<NodeInfo>;
}

pub struct ClusterEventWithHint {
    pub event: ClusterEvent,
    /// QueueingHintFn returns a hint that signals whether the event can make a Pod,
    /// which was rejected by this plugin in the past scheduling cycle, schedulable or not.
    pub queueing_hint_fn:
        Option<Box<dyn Fn(&PodInfo, &EventInner) -> Result<QueueingHint, String> + Send + Sync>>,
}

pub struct ClusterEvent {
    pub resource: EventResource,
    pub action_type: ActionType,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActionType: u32 {
        const Add = 1;
        const Delete = 1 << 1;
        const UpdateNodeLabel = 1 << 2;
        const UpdateNodeTaint = 1 << 3;
        const UpdatePodLabel = 1 << 4;
        const UpdatePodToleration = 1 << 5;
        const UpdateNodeAllocatable = 1 << 6;
        const Update = Self::UpdateNodeLabel.bits()
            | Self::UpdateNodeTaint.bits()
            | Self::UpdatePodLabel.bits()
            | Self::UpdatePodToleration.bits()
            | Self::UpdateNodeAllocatable.bits();
        const All = Self::Add.bits() | Self::Delete.bits() | Self::Update.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResource {
    Pod,
    Node,
}

/// Updated info of pod or node.
#[derive(Debug)]
pub enum EventInner {
    Pod(Option<PodInfo>, Option<PodInfo>),
    Node(Option<NodeInfo>, NodeInfo),
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueueingHint {
    Skip,
    Queue,
}

pub trait EnqueueExtension: Plugin {
    fn events_to_register(&self) -> Vec<ClusterEventWithHint>;
}

pub trait PreFilterPlugin: Plugin {
    /// Executes at scheduling cycle start. All plugins must return success or pod is rejected.
    /// Returns Skip to bypass associated Filter plugin/extensions.
    fn pre_filter(
        &self,
        state: &mut CycleState,
        pod: &PodInfo,
        nodes: &[NodeInfo],
    ) -> (PreFilterResult, Status);

    /// Hooks used while evaluating preemption victims, if the plugin keeps
    /// per-cycle state that depends on pods placed on nodes.
    fn pre_filter_extensions(&self) -> Option<&dyn PreFilterExtensions> {
        None
    }
}

/// Result type for PreFilterPlugin::pre_filter.
/// An empty list means every node is eligible.
#[derive(Debug, Default)]
pub struct PreFilterResult {
    pub node_names: Vec<String>,
}

/// Incrementally updates PreFilter state when the host simulates adding or
/// removing a pod on a node.
pub trait PreFilterExtensions {
    fn add_pod(
        &self,
        state: &CycleState,
        pod_to_schedule: &PodInfo,
        pod_to_add: &PodInfo,
        node_info: &NodeInfo,
    ) -> Status;

    fn remove_pod(
        &self,
        state: &CycleState,
        pod_to_schedule: &PodInfo,
        pod_to_remove: &PodInfo,
        node_info: &NodeInfo,
    ) -> Status;
}

/// Evaluates if a node can run a pod. Returns Success, Unschedulable, or Error.
/// May be called concurrently for different nodes of the same cycle.
pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &CycleState, pod: &PodInfo, node_info: &NodeInfo) -> Status;
}

/// Plugin that ranks nodes passing the filtering phase
pub trait ScorePlugin: Plugin {
    /// Assigns a score to a node (higher = better fit). Must return success.
    fn score(&self, state: &CycleState, pod: &PodInfo, node_info: &NodeInfo) -> (i64, Status);

    fn score_extension(&self) -> Option<Box<dyn ScoreExtension>> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

pub trait ScoreExtension {
    fn normalize_score(&self, state: &CycleState, pod: &PodInfo, scores: &mut [NodeScore])
    -> Status;
}

pub struct DefaultNormalizeScore {
    pub max_score: i64,
    pub reverse: bool,
}

impl ScoreExtension for DefaultNormalizeScore {
    fn normalize_score(&self, _: &CycleState, _: &PodInfo, scores: &mut [NodeScore]) -> Status {
        let max = scores.iter().map(|s| s.score).max().unwrap_or(0);

        if max == 0 {
            if self.reverse {
                for node_score in scores.iter_mut() {
                    node_score.score = self.max_score;
                }
            }
            return Status::default();
        }

        for node_score in scores.iter_mut() {
            let mut score = self.max_score * node_score.score / max;
            if self.reverse {
                score = self.max_score - score;
            }
            node_score.score = score;
        }
        Status::default()
    }
}

/// Plugin that manages state updates when pods are reserved/unreserved
pub trait ReservePlugin: Plugin {
    /// Called when scheduler cache is updated. Failure triggers Unreserve for all plugins.
    fn reserve(&self, state: &CycleState, pod: &PodInfo, node_name: &str) -> Status;

    /// Called when a reserved pod is rejected or fails later. Must be idempotent.
    fn unreserve(&self, state: &CycleState, pod: &PodInfo, node_name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub reasons: Vec<String>,
    pub err: String,
    pub plugin: String,
}

impl Default for Status {
    /// Default success status
    fn default() -> Self {
        Self {
            code: Code::Success,
            reasons: vec![],
            err: String::new(),
            plugin: String::new(),
        }
    }
}

impl Status {
    pub fn new(code: Code, reasons: Vec<String>) -> Self {
        Status {
            code,
            reasons,
            err: String::new(),
            plugin: String::new(),
        }
    }

    pub fn error(error: &str) -> Self {
        Self {
            code: Code::Error,
            err: error.to_string(),
            reasons: vec![error.to_string()],
            ..Default::default()
        }
    }

    /// Wraps an unexpected failure into an Error status.
    pub fn as_status(err: impl Display) -> Self {
        Self::error(&err.to_string())
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = plugin.to_string();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    /// Unschedulable or UnschedulableAndUnresolvable.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self.code,
            Code::Unschedulable | Code::UnschedulableAndUnresolvable
        )
    }

    /// Human-readable reason, joined the way the host reports per-node failures.
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }
}

/// Code is the Status code/type which is returned from plugins.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Code {
    /// Success means that plugin ran correctly and found pod schedulable.
    Success,
    /// Error is one of the failures, used for internal plugin errors, unexpected input, etc.
    /// Plugin shouldn't return this code for expected failures, like Unschedulable.
    Error,
    /// Unschedulable is one of the failures, used when a plugin finds a pod unschedulable.
    /// If it's returned from PreFilter or Filter, the scheduler might attempt to
    /// run other postFilter plugins like preemption to get this pod scheduled.
    Unschedulable,
    /// UnschedulableAndUnresolvable is used when a plugin finds a pod unschedulable and
    /// other postFilter plugins like preemption would not change anything.
    UnschedulableAndUnresolvable,
    /// Wait is used when a Permit plugin finds a pod scheduling should wait.
    Wait,
    /// Skip is used when a PreFilter plugin returns Skip so that coupled
    /// Filter plugin/PreFilterExtensions() will be skipped.
    Skip,
    /// Pending means that the scheduling process is finished successfully,
    /// but the plugin wants to stop the scheduling cycle/binding cycle here.
    Pending,
}
