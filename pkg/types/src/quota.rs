use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::quantity::Quantity;

/// Resource name → quantity. Ordered so that rendering is deterministic.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Resource quota for a namespace: hard limits keyed by resource name
/// (e.g. `count/secrets`, `requests.cpu`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
    /// The object whose deletion also removes this quota.
    #[serde(default)]
    pub owner_ref: Option<OwnerReference>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
}

impl OwnerReference {
    pub fn namespace(name: &str) -> Self {
        Self {
            kind: "Namespace".to_string(),
            name: name.to_string(),
        }
    }
}

impl ResourceQuota {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            spec: ResourceQuotaSpec::default(),
            owner_ref: None,
            created_at: Utc::now(),
        }
    }
}
