//! Label and annotation keys persisted on managed objects.
//!
//! These names are a contract with operators and other tooling and must
//! stay stable across releases.

/// Namespace label naming the single QuotaIncrease used in `singular` mode.
pub const SINGULAR_QUOTA_INCREASE_LABEL: &str = "quota.openmcp.cloud/use";

/// Namespace label naming the quota definition that owns the namespace.
pub const BASE_QUOTA_LABEL: &str = "quota.openmcp.cloud/base";

/// Annotation on QuotaIncreases describing what they contributed to the quota.
pub const EFFECT_ANNOTATION: &str = "quota.openmcp.cloud/effect";

/// Operating mode label, stamped on namespaces and QuotaIncreases.
pub const QUOTA_INCREASE_OPERATION_MODE_LABEL: &str = "quota.openmcp.cloud/mode";

/// Marks ResourceQuotas created by this operator.
pub const MANAGED_BY_LABEL: &str = "quota.openmcp.cloud/managed-by";

/// Names the quota definition a ResourceQuota was generated from.
pub const QUOTA_DEFINITION_LABEL: &str = "quota.openmcp.cloud/quota-definition";

/// Effect prefix marking the currently selected QuotaIncrease in `singular` mode.
pub const ACTIVE_SINGULAR_QUOTA_INCREASE_EFFECT_PREFIX: &str = "[active]";
