//! Node classification and taint/toleration matching.

use crate::models::{NodeInfo, Taint, TaintEffect, Toleration};

/// Label carried by every leaf node, i.e. a node backed by a member cluster.
pub const LEAF_NODE_LABEL: &str = "kosmos.io/node";

/// Taint placed on leaf nodes. Every pod is considered to tolerate it; the
/// distribution policy decides whether a pod may land on a leaf node.
pub fn leaf_node_taint() -> Taint {
    Taint::new(LEAF_NODE_LABEL, "true", TaintEffect::NoSchedule)
}

pub fn is_leaf_node(node: &NodeInfo) -> bool {
    node.labels.contains_key(LEAF_NODE_LABEL)
}

fn is_leaf_node_taint(taint: &Taint) -> bool {
    taint.key == LEAF_NODE_LABEL && taint.effect == TaintEffect::NoSchedule
}

pub fn has_leaf_node_taint(node: &NodeInfo) -> bool {
    node.spec.taints.iter().any(is_leaf_node_taint)
}

/// Checks if taint is tolerated by any of the tolerations.
pub fn tolerations_tolerate_taint(tolerations: &[Toleration], taint: &Taint) -> bool {
    is_leaf_node_taint(taint) || tolerations.iter().any(|to| to.tolerate(taint))
}

/// Returns the first taint passing `filter` that none of the tolerations
/// tolerates, or `None` if all filtered taints are tolerated.
pub fn find_matching_untolerated_taint<'a>(
    taints: &'a [Taint],
    tolerations: &[Toleration],
    filter: impl FnMut(&&Taint) -> bool,
) -> Option<&'a Taint> {
    taints
        .iter()
        .filter(filter)
        .find(|&t| !tolerations_tolerate_taint(tolerations, t))
}

/// Restricts matching to the effects that keep a pod off a node.
pub fn do_not_schedule_taints_filter(t: &&Taint) -> bool {
    matches!(t.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute)
}
