//! Filesystem path constants.

/// Default config file path for the operator.
pub const DEFAULT_OPERATOR_CONFIG: &str = "/etc/quota-operator/config.yaml";
