use anyhow::Context;
use etcd_client::{Client, ConnectOptions, GetOptions, KeyValue};
use serde::de::DeserializeOwned;

use crate::{
    config::XlineConfig,
    error::PlacementError,
    policy::{
        ClusterDistributionPolicy, DistributionPolicy, ObjectMeta, PolicyCache, WorkloadPolicy,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Distribution,
    ClusterDistribution,
    Workload,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [
        PolicyKind::Distribution,
        PolicyKind::ClusterDistribution,
        PolicyKind::Workload,
    ];

    fn segment(self) -> &'static str {
        match self {
            PolicyKind::Distribution => "distributionpolicies",
            PolicyKind::ClusterDistribution => "clusterdistributionpolicies",
            PolicyKind::Workload => "workloadpolicies",
        }
    }

    fn namespaced(self) -> bool {
        self != PolicyKind::ClusterDistribution
    }

    /// Key prefix of every object of this kind, with a trailing slash.
    pub fn key_prefix(self, prefix: &str) -> String {
        format!("{}/{}/", prefix.trim_end_matches('/'), self.segment())
    }
}

/// Identity of a policy object, recovered from its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyKey {
    pub kind: PolicyKind,
    pub namespace: String,
    pub name: String,
}

/// Parses `{prefix}/{kind}/{namespace}/{name}` or, for cluster-scoped
/// objects, `{prefix}/{kind}/{name}`.
pub fn parse_policy_key(prefix: &str, key: &str) -> Option<PolicyKey> {
    PolicyKind::ALL.into_iter().find_map(|kind| {
        let rest = key.strip_prefix(&kind.key_prefix(prefix))?;
        let parts: Vec<_> = rest.split('/').collect();
        match (kind.namespaced(), parts.as_slice()) {
            (true, [ns, name]) if !ns.is_empty() && !name.is_empty() => Some(PolicyKey {
                kind,
                namespace: ns.to_string(),
                name: name.to_string(),
            }),
            (false, [name]) if !name.is_empty() => Some(PolicyKey {
                kind,
                namespace: String::new(),
                name: name.to_string(),
            }),
            _ => None,
        }
    })
}

fn decode<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T, PlacementError> {
    serde_yaml::from_slice(value).map_err(|e| PlacementError::MalformedPolicy {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// The key is authoritative for identity.
fn fill_meta(meta: &mut ObjectMeta, key: &PolicyKey) {
    meta.name = key.name.clone();
    meta.namespace = key.namespace.clone();
}

/// A decoded policy object of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyObject {
    Distribution(DistributionPolicy),
    ClusterDistribution(ClusterDistributionPolicy),
    Workload(WorkloadPolicy),
}

pub fn get_policy_from_kv(prefix: &str, kv: &KeyValue) -> Result<PolicyObject, PlacementError> {
    let raw_key = String::from_utf8_lossy(kv.key()).to_string();
    decode_policy(prefix, &raw_key, kv.value())
}

pub fn decode_policy(
    prefix: &str,
    raw_key: &str,
    value: &[u8],
) -> Result<PolicyObject, PlacementError> {
    let key = parse_policy_key(prefix, raw_key).ok_or_else(|| PlacementError::MalformedPolicy {
        key: raw_key.to_string(),
        reason: "unexpected key layout".to_string(),
    })?;
    let object = match key.kind {
        PolicyKind::Distribution => {
            let mut dp: DistributionPolicy = decode(raw_key, value)?;
            fill_meta(&mut dp.metadata, &key);
            PolicyObject::Distribution(dp)
        }
        PolicyKind::ClusterDistribution => {
            let mut cdp: ClusterDistributionPolicy = decode(raw_key, value)?;
            fill_meta(&mut cdp.metadata, &key);
            PolicyObject::ClusterDistribution(cdp)
        }
        PolicyKind::Workload => {
            let mut wp: WorkloadPolicy = decode(raw_key, value)?;
            fill_meta(&mut wp.metadata, &key);
            PolicyObject::Workload(wp)
        }
    };
    Ok(object)
}

pub fn apply_put(cache: &PolicyCache, object: PolicyObject) {
    match object {
        PolicyObject::Distribution(dp) => cache.upsert_distribution_policy(dp),
        PolicyObject::ClusterDistribution(cdp) => cache.upsert_cluster_distribution_policy(cdp),
        PolicyObject::Workload(wp) => cache.upsert_workload_policy(wp),
    }
}

pub fn apply_delete(cache: &PolicyCache, key: &PolicyKey) {
    match key.kind {
        PolicyKind::Distribution => cache.delete_distribution_policy(&key.namespace, &key.name),
        PolicyKind::ClusterDistribution => cache.delete_cluster_distribution_policy(&key.name),
        PolicyKind::Workload => cache.delete_workload_policy(&key.namespace, &key.name),
    }
}

pub async fn connect(config: &XlineConfig) -> Result<Client, anyhow::Error> {
    let opts = if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        ConnectOptions::default().with_user(user.clone(), pass.clone())
    } else {
        ConnectOptions::default()
    };
    let client = Client::connect(config.endpoints.clone(), Some(opts))
        .await
        .with_context(|| format!("Failed to connect to xline at {:?}", config.endpoints))?;
    Ok(client)
}

/// Every policy object under `prefix`, read at a single revision.
#[derive(Debug, Default)]
pub struct PolicyList {
    pub distribution: Vec<DistributionPolicy>,
    pub cluster_distribution: Vec<ClusterDistributionPolicy>,
    pub workload: Vec<WorkloadPolicy>,
    pub revision: i64,
}

/// Lists the three policy kinds. Objects that fail to decode are logged and
/// left out.
pub async fn list_policies(client: &mut Client, prefix: &str) -> Result<PolicyList, anyhow::Error> {
    let mut list = PolicyList::default();
    for kind in PolicyKind::ALL {
        let mut opts = GetOptions::new().with_prefix();
        if list.revision > 0 {
            opts = opts.with_revision(list.revision);
        }
        let resp = client
            .get(kind.key_prefix(prefix), Some(opts))
            .await
            .with_context(|| format!("Failed to list {}", kind.segment()))?;
        if list.revision == 0 {
            list.revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        }
        for kv in resp.kvs() {
            match get_policy_from_kv(prefix, kv) {
                Ok(PolicyObject::Distribution(dp)) => list.distribution.push(dp),
                Ok(PolicyObject::ClusterDistribution(cdp)) => list.cluster_distribution.push(cdp),
                Ok(PolicyObject::Workload(wp)) => list.workload.push(wp),
                Err(e) => log::warn!("skipping policy object: {e}"),
            }
        }
    }
    Ok(list)
}
