//! State store key layout.
//!
//! Objects live under etcd-style keys:
//! `/registry/namespaces/<name>` and `/registry/<kind>/<namespace>/<name>`.

/// Key prefix for namespaces.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Key prefix for ResourceQuotas.
pub const RESOURCE_QUOTAS_PREFIX: &str = "/registry/resourcequotas/";

/// Key prefix for QuotaIncreases.
pub const QUOTA_INCREASES_PREFIX: &str = "/registry/quotaincreases/";

/// Events a watch subscriber may fall behind by before it must resync.
pub const EVENT_LOG_CAPACITY: usize = 1024;
