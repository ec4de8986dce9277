use anyhow::{Result, bail};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::{OperatingMode, QuotaControllerConfigFile, QuotaDefinitionFile};
use pkg_constants::controller::MAX_DEFINITION_NAME_LEN;

/// Validate a DNS-subdomain-style name as used for quota definitions.
/// Rules: lowercase `[a-z0-9.-]`, max 253 chars, must start and end alphanumeric.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > MAX_DEFINITION_NAME_LEN {
        bail!(
            "name '{}' exceeds {} characters (got {})",
            name,
            MAX_DEFINITION_NAME_LEN,
            name.len()
        );
    }
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    if !name.starts_with(is_alnum) || !name.ends_with(is_alnum) {
        bail!(
            "name '{}' must start and end with a lowercase letter or digit",
            name
        );
    }
    if !name.chars().all(|c| is_alnum(c) || c == '-' || c == '.') {
        bail!(
            "name '{}' must contain only lowercase letters, digits, '-' and '.'",
            name
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Invalid,
    Duplicate,
    NotSupported,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldErrorKind::Required => "Required value",
            FieldErrorKind::Invalid => "Invalid value",
            FieldErrorKind::Duplicate => "Duplicate value",
            FieldErrorKind::NotSupported => "Unsupported value",
        };
        f.write_str(s)
    }
}

/// A single problem found in the configuration, addressed by field path
/// (e.g. `quotas[1].mode`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub field: String,
    pub detail: String,
}

impl FieldError {
    fn new(kind: FieldErrorKind, field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.field, self.kind, self.detail)
    }
}

/// Validate the config and fold all problems into one error.
pub fn validate(cfg: &QuotaControllerConfigFile) -> Result<()> {
    let errs = validate_raw(cfg);
    if errs.is_empty() {
        return Ok(());
    }
    let joined: Vec<String> = errs.iter().map(ToString::to_string).collect();
    bail!("[{}]", joined.join(", "))
}

/// Validate the config and return every problem found.
pub fn validate_raw(cfg: &QuotaControllerConfigFile) -> Vec<FieldError> {
    let mut errs = Vec::new();

    for (i, name) in cfg.external_quota_definition_names.iter().enumerate() {
        if name.is_empty() {
            errs.push(FieldError::new(
                FieldErrorKind::Invalid,
                format!("externalQuotaDefinitionNames[{}]", i),
                "external quota definition name must not be empty",
            ));
        }
    }

    let mut known_names = BTreeSet::new();
    for (i, qd) in cfg.quotas.iter().enumerate() {
        let path = format!("quotas[{}]", i);
        match qd {
            Some(qd) => validate_quota_definition(qd, &path, &mut known_names, &mut errs),
            None => errs.push(FieldError::new(
                FieldErrorKind::Required,
                path,
                "QuotaDefinition must not be empty",
            )),
        }
    }

    errs
}

fn validate_quota_definition(
    qd: &QuotaDefinitionFile,
    path: &str,
    known_names: &mut BTreeSet<String>,
    errs: &mut Vec<FieldError>,
) {
    let name_path = format!("{}.name", path);
    if qd.name.is_empty() {
        errs.push(FieldError::new(
            FieldErrorKind::Required,
            name_path,
            "Name must not be empty",
        ));
    } else if known_names.contains(&qd.name) {
        errs.push(FieldError::new(
            FieldErrorKind::Duplicate,
            name_path,
            format!("{:?}", qd.name),
        ));
    } else if let Err(e) = validate_name(&qd.name) {
        errs.push(FieldError::new(
            FieldErrorKind::Invalid,
            name_path,
            format!("{:?}: {}", qd.name, e),
        ));
    } else {
        known_names.insert(qd.name.clone());
    }

    if let Some(selector) = &qd.selector {
        for (j, req) in selector.match_expressions.iter().enumerate() {
            if let Err(e) = req.validate() {
                errs.push(FieldError::new(
                    FieldErrorKind::Invalid,
                    format!("{}.selector.matchExpressions[{}]", path, j),
                    e,
                ));
            }
        }
    }

    if qd.template.is_none() {
        errs.push(FieldError::new(
            FieldErrorKind::Required,
            format!("{}.template", path),
            "ResourceQuotaTemplate must not be empty",
        ));
    }

    let mode_path = format!("{}.mode", path);
    if qd.mode.is_empty() {
        errs.push(FieldError::new(
            FieldErrorKind::Required,
            mode_path,
            "Mode must not be empty",
        ));
    } else if qd.mode.parse::<OperatingMode>().is_err() {
        let supported: Vec<String> = OperatingMode::ALL
            .iter()
            .map(|m| format!("{:?}", m.as_str()))
            .collect();
        errs.push(FieldError::new(
            FieldErrorKind::NotSupported,
            mode_path,
            format!("{:?}: supported values: {}", qd.mode, supported.join(", ")),
        ));
    }
}
