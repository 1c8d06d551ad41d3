use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::models::{NodeInfo, PodInfo};
use crate::plugins::SnapshotLister;

#[derive(Default)]
struct Inner {
    /// Keyed by `namespace/name`.
    pods: HashMap<String, PodInfo>,
    /// Nodes without their pods; pods are attached on read.
    nodes: HashMap<String, NodeInfo>,
}

/// A shortcut of the cluster state handed to plugins.
/// Please remember to update the data in the snapshot
/// whenever you receive status updates about pods running on nodes.
#[derive(Default)]
pub struct Snapshot {
    inner: RwLock<Inner>,
}

fn pod_key(pod: &PodInfo) -> String {
    format!("{}/{}", pod.namespace, pod.name)
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(nodes: Vec<NodeInfo>, pods: Vec<PodInfo>) -> Self {
        let snapshot = Self::new();
        for n in nodes {
            snapshot.update_node(n);
        }
        for p in pods {
            snapshot.update_pod(p);
        }
        snapshot
    }

    pub fn update_pod(&self, pod: PodInfo) -> Option<PodInfo> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.pods.insert(pod_key(&pod), pod)
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<PodInfo> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.pods.remove(&format!("{namespace}/{name}"))
    }

    /// Pods embedded in `node.pods` are moved into the pod table.
    pub fn update_node(&self, mut node: NodeInfo) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for mut p in node.pods.drain(..) {
            p.scheduled = Some(node.name.clone());
            inner.pods.insert(pod_key(&p), p);
        }
        inner.nodes.insert(node.name.clone(), node);
    }

    pub fn remove_node(&self, node_name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.nodes.remove(node_name);
    }

    fn assemble(inner: &Inner, node: &NodeInfo) -> NodeInfo {
        let mut info = node.clone();
        info.pods = inner
            .pods
            .values()
            .filter(|p| matches!(&p.scheduled, Some(n) if *n == node.name))
            .cloned()
            .collect();
        info
    }
}

impl SnapshotLister for Snapshot {
    fn get(&self, node_name: &str) -> Option<NodeInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.nodes.get(node_name).map(|n| Self::assemble(&inner, n))
    }

    fn list(&self) -> Vec<NodeInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut nodes: Vec<_> = inner
            .nodes
            .values()
            .map(|n| Self::assemble(&inner, n))
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }
}
