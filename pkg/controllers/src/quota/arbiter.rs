use pkg_constants::labels::{BASE_QUOTA_LABEL, QUOTA_INCREASE_OPERATION_MODE_LABEL};
use pkg_types::config::OperatingMode;
use pkg_types::namespace::Namespace;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::repository::{ObjectRepository, Overwrite};

/// Whether a quota definition may manage a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    Proceed,
    /// Another active quota definition holds the namespace.
    ClaimedByOther(String),
}

/// Label write needed before a definition may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The namespace already carries our name.
    Held,
    /// No base label yet.
    Unclaimed,
    /// The base label names a definition that is not active anywhere.
    Stale(String),
    Foreign(String),
}

/// Decides namespace ownership between quota definitions, using the
/// namespace's base label and the set of all active definition names.
pub struct OwnershipArbiter {
    definition: String,
    mode: OperatingMode,
    active: Arc<BTreeSet<String>>,
}

impl OwnershipArbiter {
    pub fn new(definition: &str, mode: OperatingMode, active: Arc<BTreeSet<String>>) -> Self {
        Self {
            definition: definition.to_string(),
            mode,
            active,
        }
    }

    pub fn classify(&self, ns: &Namespace) -> Claim {
        match ns.label(BASE_QUOTA_LABEL) {
            None => Claim::Unclaimed,
            Some(owner) if owner == self.definition => Claim::Held,
            Some(owner) if self.active.contains(owner) => Claim::Foreign(owner.to_string()),
            Some(owner) => Claim::Stale(owner.to_string()),
        }
    }

    /// Claim the namespace if possible and stamp the operating mode on it.
    /// Nothing is written when another definition owns the namespace.
    pub async fn arbitrate<R: ObjectRepository + ?Sized>(
        &self,
        repo: &R,
        ns: &mut Namespace,
    ) -> anyhow::Result<Ownership> {
        match self.classify(ns) {
            Claim::Held => {}
            Claim::Unclaimed => {
                debug!(
                    "Adding base quota label {}={} to namespace {}",
                    BASE_QUOTA_LABEL, self.definition, ns.name
                );
                repo.ensure_namespace_label(ns, BASE_QUOTA_LABEL, &self.definition, Overwrite::Never)
                    .await
                    .map_err(|e| e.context("error adding base quota label to namespace"))?;
            }
            Claim::Stale(old) => {
                info!(
                    "Overwriting unknown base quota label {} on namespace {} ({} -> {})",
                    BASE_QUOTA_LABEL, ns.name, old, self.definition
                );
                repo.ensure_namespace_label(ns, BASE_QUOTA_LABEL, &self.definition, Overwrite::Always)
                    .await
                    .map_err(|e| e.context("error overwriting base quota label on namespace"))?;
            }
            Claim::Foreign(owner) => {
                info!(
                    "Another quota definition ({}) is already used to manage namespace {}, skipping it",
                    owner, ns.name
                );
                return Ok(Ownership::ClaimedByOther(owner));
            }
        }

        repo.ensure_namespace_label(
            ns,
            QUOTA_INCREASE_OPERATION_MODE_LABEL,
            self.mode.as_str(),
            Overwrite::Always,
        )
        .await
        .map_err(|e| e.context("error adding operation mode label to namespace"))?;

        Ok(Ownership::Proceed)
    }
}
