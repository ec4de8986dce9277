use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::quota::ResourceList;

/// A namespaced request to raise the namespace's resource quota.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaIncrease {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub spec: QuotaIncreaseSpec,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaIncreaseSpec {
    #[serde(default)]
    pub hard: ResourceList,
}

impl QuotaIncrease {
    pub fn new(namespace: &str, name: &str, hard: ResourceList) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            spec: QuotaIncreaseSpec { hard },
            created_at: Utc::now(),
        }
    }

    /// `<namespace>/<name>`, used in log lines.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
