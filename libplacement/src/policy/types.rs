use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{LabelSelector, Toleration};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Namespace-scoped distribution policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionPolicy {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DistributionSpec,
}

/// Cluster-scoped distribution policy, same shape as [`DistributionPolicy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDistributionPolicy {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DistributionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionSpec {
    /// Selects the pods the policy applies to, each naming one policy term.
    #[serde(default)]
    pub resource_selectors: Vec<ResourceSelector>,
    /// Rules for choosing nodes.
    #[serde(default)]
    pub policy_terms: Vec<PolicyTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelector {
    /// Name of the policy term applied to matching pods.
    pub policy_name: String,
    /// Restricts a cluster-scoped selector to one namespace.
    #[serde(default)]
    pub namespace: String,
    /// Restricts a cluster-scoped selector to namespaces with this prefix.
    #[serde(default)]
    pub namespace_prefix: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Only the host nodes.
    #[serde(rename = "host")]
    Host,
    /// Only the leaf nodes.
    #[serde(rename = "leaf")]
    Leaf,
    /// Nodes selected by an [`AdvancedTerm`].
    #[serde(rename = "adv", alias = "advanced")]
    Advanced,
    /// Host nodes and leaf nodes.
    #[default]
    #[serde(rename = "mix", alias = "mixed")]
    Mixed,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Host => "host node",
            NodeType::Leaf => "leaf node",
            NodeType::Advanced => "advanced term",
            NodeType::Mixed => "mix node",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTerm {
    pub name: String,
    #[serde(default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub advanced_term: AdvancedTerm,
}

/// Scheduling restrictions to a certain set of nodes. A node qualifies if
/// any one of the fields accepts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedTerm {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadPolicy {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: WorkloadPolicySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadPolicySpec {
    /// Node label whose values form the topology domains.
    pub topology_key: String,
    /// Selects the member pods counted against the allocation table.
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,
    #[serde(default)]
    pub allocation_policy: Vec<AllocationPolicy>,
    #[serde(default)]
    pub allocation_type: AllocationType,
    #[serde(default)]
    pub allocation_method: AllocationMethod,
}

/// Desired replicas for one topology value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPolicy {
    pub name: String,
    pub replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AllocationType {
    /// Pods prefer domains below their target but may exceed it.
    #[default]
    Preferred,
    /// Pods never exceed the target of a domain.
    Required,
    Unknown(String),
}

impl From<String> for AllocationType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Preferred" | "" => AllocationType::Preferred,
            "Required" => AllocationType::Required,
            _ => AllocationType::Unknown(s),
        }
    }
}

impl From<AllocationType> for String {
    fn from(t: AllocationType) -> Self {
        match t {
            AllocationType::Preferred => "Preferred".to_string(),
            AllocationType::Required => "Required".to_string(),
            AllocationType::Unknown(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AllocationMethod {
    /// Spread replicas so every domain approaches its target evenly.
    #[default]
    Balance,
    /// Pack a domain up to its target before spilling to the next.
    Fill,
    Unknown(String),
}

impl From<String> for AllocationMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Balance" | "" => AllocationMethod::Balance,
            "Fill" => AllocationMethod::Fill,
            _ => AllocationMethod::Unknown(s),
        }
    }
}

impl From<AllocationMethod> for String {
    fn from(m: AllocationMethod) -> Self {
        match m {
            AllocationMethod::Balance => "Balance".to_string(),
            AllocationMethod::Fill => "Fill".to_string(),
            AllocationMethod::Unknown(s) => s,
        }
    }
}
