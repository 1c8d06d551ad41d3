use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::PlacementError;
use crate::policy::types::{ClusterDistributionPolicy, DistributionPolicy, WorkloadPolicy};

/// Read-only, eventually consistent view of the placement policy objects.
pub trait PolicyStore: Send + Sync {
    /// Namespace-scoped distribution policies in `namespace`, ordered by name.
    fn list_distribution_policies(
        &self,
        namespace: &str,
    ) -> Result<Vec<DistributionPolicy>, PlacementError>;

    /// All cluster-scoped distribution policies, ordered by name.
    fn list_cluster_distribution_policies(
        &self,
    ) -> Result<Vec<ClusterDistributionPolicy>, PlacementError>;

    fn get_workload_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadPolicy, PlacementError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Synced,
    Failed(String),
}

#[derive(Default)]
struct Objects {
    distribution: BTreeMap<(String, String), DistributionPolicy>,
    cluster_distribution: BTreeMap<String, ClusterDistributionPolicy>,
    workload: BTreeMap<(String, String), WorkloadPolicy>,
}

/// In-memory policy cache, filled by an informer and read by the plugins.
pub struct PolicyCache {
    objects: RwLock<Objects>,
    sync_state: watch::Sender<SyncState>,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyCache {
    pub fn new() -> Self {
        let (sync_state, _) = watch::channel(SyncState::Pending);
        Self {
            objects: RwLock::new(Objects::default()),
            sync_state,
        }
    }

    /// A cache that is already synced with the given objects.
    pub fn with_objects(
        distribution: Vec<DistributionPolicy>,
        cluster_distribution: Vec<ClusterDistributionPolicy>,
        workload: Vec<WorkloadPolicy>,
    ) -> Self {
        let cache = Self::new();
        cache.replace_all(distribution, cluster_distribution, workload);
        cache.mark_synced();
        cache
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Objects>, PlacementError> {
        self.objects
            .read()
            .map_err(|e| PlacementError::StoreUnavailable(e.to_string()))
    }

    fn write(&self, f: impl FnOnce(&mut Objects)) {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut objects)
    }

    pub fn upsert_distribution_policy(&self, dp: DistributionPolicy) {
        let key = (dp.metadata.namespace.clone(), dp.metadata.name.clone());
        self.write(|o| {
            o.distribution.insert(key, dp);
        });
    }

    pub fn delete_distribution_policy(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        self.write(|o| {
            o.distribution.remove(&key);
        });
    }

    pub fn upsert_cluster_distribution_policy(&self, cdp: ClusterDistributionPolicy) {
        let key = cdp.metadata.name.clone();
        self.write(|o| {
            o.cluster_distribution.insert(key, cdp);
        });
    }

    pub fn delete_cluster_distribution_policy(&self, name: &str) {
        self.write(|o| {
            o.cluster_distribution.remove(name);
        });
    }

    pub fn upsert_workload_policy(&self, wp: WorkloadPolicy) {
        let key = (wp.metadata.namespace.clone(), wp.metadata.name.clone());
        self.write(|o| {
            o.workload.insert(key, wp);
        });
    }

    pub fn delete_workload_policy(&self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        self.write(|o| {
            o.workload.remove(&key);
        });
    }

    /// Swaps the whole content, as after a full re-list.
    pub fn replace_all(
        &self,
        distribution: Vec<DistributionPolicy>,
        cluster_distribution: Vec<ClusterDistributionPolicy>,
        workload: Vec<WorkloadPolicy>,
    ) {
        let fresh = Objects {
            distribution: distribution
                .into_iter()
                .map(|dp| ((dp.metadata.namespace.clone(), dp.metadata.name.clone()), dp))
                .collect(),
            cluster_distribution: cluster_distribution
                .into_iter()
                .map(|cdp| (cdp.metadata.name.clone(), cdp))
                .collect(),
            workload: workload
                .into_iter()
                .map(|wp| ((wp.metadata.namespace.clone(), wp.metadata.name.clone()), wp))
                .collect(),
        };
        self.write(|o| *o = fresh);
    }

    pub fn mark_synced(&self) {
        self.sync_state.send_replace(SyncState::Synced);
    }

    /// Records that the initial list can no longer complete.
    /// Ignored once the cache has synced.
    pub fn mark_failed(&self, reason: &str) {
        self.sync_state.send_if_modified(|s| {
            if *s == SyncState::Pending {
                *s = SyncState::Failed(reason.to_string());
                true
            } else {
                false
            }
        });
    }

    pub fn has_synced(&self) -> bool {
        *self.sync_state.borrow() == SyncState::Synced
    }

    /// Blocks until the initial list has been loaded, the informer reports a
    /// failure, or `timeout` elapses.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), PlacementError> {
        let mut rx = self.sync_state.subscribe();
        let state = tokio::time::timeout(timeout, rx.wait_for(|s| *s != SyncState::Pending))
            .await
            .map_err(|_| PlacementError::SyncTimeout(timeout))?
            .map_err(|e| PlacementError::StoreUnavailable(e.to_string()))?
            .clone();
        match state {
            SyncState::Failed(reason) => Err(PlacementError::StoreUnavailable(reason)),
            _ => Ok(()),
        }
    }
}

impl PolicyStore for PolicyCache {
    fn list_distribution_policies(
        &self,
        namespace: &str,
    ) -> Result<Vec<DistributionPolicy>, PlacementError> {
        Ok(self
            .read()?
            .distribution
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, dp)| dp.clone())
            .collect())
    }

    fn list_cluster_distribution_policies(
        &self,
    ) -> Result<Vec<ClusterDistributionPolicy>, PlacementError> {
        Ok(self.read()?.cluster_distribution.values().cloned().collect())
    }

    fn get_workload_policy(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadPolicy, PlacementError> {
        self.read()?
            .workload
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| PlacementError::WorkloadPolicyNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
