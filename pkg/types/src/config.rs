use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::quota::{ResourceQuota, ResourceQuotaSpec};
use crate::selector::LabelSelector;
use crate::validate;

/// Quota controller configuration file (YAML), as written by the operator.
///
/// Example `config.yaml`:
/// ```yaml
/// externalQuotaDefinitionNames: [foo, bar]
/// quotas:
///   - name: project
///     selector:
///       matchLabels:
///         openmcp.cloud/project: demo
///     mode: cumulative
///     deleteIneffectiveQuotas: true
///     template:
///       spec:
///         hard:
///           count/secrets: 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaControllerConfigFile {
    /// Names of quota definitions served by other operator deployments.
    /// Namespaces claimed by them are left alone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_quota_definition_names: Vec<String>,
    #[serde(default)]
    pub quotas: Vec<Option<QuotaDefinitionFile>>,
}

/// One quota definition before validation. Missing fields stay empty so
/// that validation can report them by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDefinitionFile {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ResourceQuotaTemplate>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub delete_ineffective_quotas: bool,
}

/// Blueprint for the ResourceQuota generated in every managed namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: ResourceQuotaSpec,
}

/// How QuotaIncreases in a namespace are combined with the base quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Every increase is added on top of the base quota.
    Cumulative,
    /// Per resource, the single highest increase replaces the base value.
    Maximum,
    /// Only the increase named by the namespace's `use` label is applied.
    Singular,
}

impl OperatingMode {
    pub const ALL: [OperatingMode; 3] = [
        OperatingMode::Cumulative,
        OperatingMode::Maximum,
        OperatingMode::Singular,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Cumulative => "cumulative",
            OperatingMode::Maximum => "maximum",
            OperatingMode::Singular => "singular",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        OperatingMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| anyhow!("unsupported operating mode '{}'", s))
    }
}

/// A validated quota definition.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaDefinition {
    pub name: String,
    pub selector: Option<LabelSelector>,
    pub template: ResourceQuotaTemplate,
    pub mode: OperatingMode,
    pub delete_ineffective_quotas: bool,
}

impl QuotaDefinition {
    /// The unadjusted ResourceQuota described by the template.
    /// The namespace is left empty for the caller to fill in.
    pub fn base_resource_quota(&self) -> ResourceQuota {
        let mut rq = ResourceQuota::new("", &self.name);
        rq.labels = self.template.labels.clone().into_iter().collect();
        rq.annotations = self.template.annotations.clone().into_iter().collect();
        rq.spec = self.template.spec.clone();
        rq
    }
}

/// The validated configuration the operator runs with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaControllerConfig {
    pub external_quota_definition_names: Vec<String>,
    pub quotas: Vec<QuotaDefinition>,
}

impl QuotaControllerConfig {
    /// Every definition name considered in use: these plus the external ones.
    pub fn active_quota_definitions(&self) -> BTreeSet<String> {
        self.external_quota_definition_names
            .iter()
            .cloned()
            .chain(self.quotas.iter().map(|qd| qd.name.clone()))
            .collect()
    }
}

impl TryFrom<QuotaControllerConfigFile> for QuotaControllerConfig {
    type Error = anyhow::Error;

    fn try_from(file: QuotaControllerConfigFile) -> Result<Self> {
        validate::validate(&file).context("invalid config")?;
        let quotas = file
            .quotas
            .into_iter()
            .flatten()
            .map(|qd| -> Result<QuotaDefinition> {
                Ok(QuotaDefinition {
                    mode: qd.mode.parse()?,
                    template: qd
                        .template
                        .ok_or_else(|| anyhow!("quota definition '{}' has no template", qd.name))?,
                    name: qd.name,
                    selector: qd.selector,
                    delete_ineffective_quotas: qd.delete_ineffective_quotas,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            external_quota_definition_names: file.external_quota_definition_names,
            quotas,
        })
    }
}

/// Read and parse a config file. A missing file is an error.
pub fn load_config(path: &str) -> Result<QuotaControllerConfigFile> {
    let content = std::fs::read_to_string(path).context("error reading config file")?;
    let config: QuotaControllerConfigFile =
        serde_yaml::from_str(&content).context("error parsing config file")?;
    Ok(config)
}
