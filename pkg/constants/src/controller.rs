//! Quota controller constants.

/// Name of the controller, used as the value of the managed-by label.
pub const CONTROLLER_NAME: &str = "quota-controller";

/// Default interval between full resyncs of all namespaces, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Maximum length of a quota definition name (DNS subdomain).
pub const MAX_DEFINITION_NAME_LEN: usize = 253;
