//! Helpers shared by the placement plugins.

use crate::models::PodInfo;

pub mod distribution;
pub mod taint_toleration;
pub mod workload_policy;

const DAEMON_SET_KIND: &str = "DaemonSet";

/// DaemonSet pods are placed by the DaemonSet controller and bypass the
/// placement policies.
pub fn is_daemonset_pod(pod: &PodInfo) -> bool {
    pod.owner_references
        .iter()
        .any(|owner| owner.kind == DAEMON_SET_KIND)
}
