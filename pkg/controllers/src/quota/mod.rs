//! Quota controller.
//!
//! One controller runs per quota definition. For every namespace it manages
//! it keeps a ResourceQuota named after the definition in sync with the
//! QuotaIncreases in that namespace:
//!
//! 1. skip namespaces that are gone, unselected, or terminating
//! 2. claim the namespace, unless another active definition owns it
//! 3. merge the template's hard limits with the QuotaIncreases
//! 4. upsert the ResourceQuota
//! 5. annotate each QuotaIncrease with its effect, or delete it if ineffective

pub mod arbiter;
pub mod effect;
pub mod merge;
pub mod repository;
pub mod trigger;

use anyhow::Context;
use pkg_constants::controller::{CONTROLLER_NAME, DEFAULT_RESYNC_INTERVAL_SECS};
use pkg_constants::labels::{
    MANAGED_BY_LABEL, QUOTA_DEFINITION_LABEL, SINGULAR_QUOTA_INCREASE_LABEL,
};
use pkg_state::watch::EventLog;
use pkg_types::config::{OperatingMode, QuotaDefinition};
use pkg_types::namespace::Namespace;
use pkg_types::quota::{OwnerReference, ResourceQuota};
use pkg_types::quota_increase::QuotaIncrease;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use arbiter::{Ownership, OwnershipArbiter};
use effect::evaluate_effectiveness;
use merge::{Effects, merge};
use repository::ObjectRepository;
use trigger::trigger_for;

/// How a single reconcile ended. Only store failures are errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    NamespaceNotFound,
    SelectorMismatch,
    Terminating,
    ClaimedByOther(String),
    Reconciled(ResourceQuota),
}

pub struct QuotaController<R> {
    repo: R,
    config: QuotaDefinition,
    arbiter: OwnershipArbiter,
    resync_interval: Duration,
}

impl<R: ObjectRepository> QuotaController<R> {
    /// `active` is every quota definition name in use across deployments,
    /// shared read-only by all controllers.
    pub fn new(repo: R, config: QuotaDefinition, active: Arc<BTreeSet<String>>) -> Self {
        let arbiter = OwnershipArbiter::new(&config.name, config.mode, active);
        Self {
            repo,
            config,
            arbiter,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
        }
    }

    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    pub fn config(&self) -> &QuotaDefinition {
        &self.config
    }

    /// Run one reconcile cycle for `namespace`.
    pub async fn reconcile(&self, namespace: &str) -> anyhow::Result<ReconcileOutcome> {
        debug!(
            "Reconcile triggered for namespace {} (quotaDefinition={})",
            namespace, self.config.name
        );

        let Some(mut ns) = self
            .repo
            .get_namespace(namespace)
            .await
            .context("unable to fetch Namespace")?
        else {
            debug!("Namespace {} not found", namespace);
            return Ok(ReconcileOutcome::NamespaceNotFound);
        };

        if let Some(selector) = &self.config.selector
            && !selector.matches(&ns.labels)
        {
            debug!(
                "Skipping namespace {}: labels do not match the selector of {}",
                ns.name, self.config.name
            );
            return Ok(ReconcileOutcome::SelectorMismatch);
        }

        if ns.is_terminating() {
            debug!("Namespace {} is being deleted, no action required", ns.name);
            return Ok(ReconcileOutcome::Terminating);
        }

        info!(
            "Reconciling namespace {} with quota definition {} (mode={})",
            ns.name, self.config.name, self.config.mode
        );

        if let Ownership::ClaimedByOther(owner) = self.arbiter.arbitrate(&self.repo, &mut ns).await? {
            return Ok(ReconcileOutcome::ClaimedByOther(owner));
        }

        let increases = self
            .repo
            .list_quota_increases(&ns.name)
            .await
            .context("error listing QuotaIncreases")?;

        let (quota, effects) = self
            .create_or_update_resource_quota(&ns, &increases)
            .await
            .context("error creating/updating ResourceQuota")?;

        let selected = match self.config.mode {
            OperatingMode::Singular => ns.label(SINGULAR_QUOTA_INCREASE_LABEL),
            OperatingMode::Cumulative | OperatingMode::Maximum => None,
        };
        evaluate_effectiveness(
            &self.repo,
            increases,
            &effects,
            self.config.mode,
            self.config.delete_ineffective_quotas,
            selected,
        )
        .await
        .context("error evaluating QuotaIncrease effectiveness")?;

        Ok(ReconcileOutcome::Reconciled(quota))
    }

    /// The desired ResourceQuota for `ns` and what each increase contributed.
    pub fn compute_resource_quota(
        &self,
        ns: &Namespace,
        increases: &[QuotaIncrease],
    ) -> (ResourceQuota, Effects) {
        let mut rq = self.config.base_resource_quota();
        rq.namespace = ns.name.clone();
        rq.labels
            .insert(MANAGED_BY_LABEL.to_string(), CONTROLLER_NAME.to_string());
        rq.labels
            .insert(QUOTA_DEFINITION_LABEL.to_string(), self.config.name.clone());

        let merged = merge(&rq.spec.hard, self.config.mode, increases, ns);
        rq.spec.hard = merged.hard;
        (rq, merged.effects)
    }

    async fn create_or_update_resource_quota(
        &self,
        ns: &Namespace,
        increases: &[QuotaIncrease],
    ) -> anyhow::Result<(ResourceQuota, Effects)> {
        let (computed, effects) = self.compute_resource_quota(ns, increases);
        info!(
            "Creating/Updating ResourceQuota {}/{}",
            computed.namespace, computed.name
        );
        let owner = OwnerReference::namespace(&ns.name);
        let rq = self
            .repo
            .create_or_update_quota(&computed.namespace, &computed.name, &|rq| {
                rq.labels = computed.labels.clone();
                rq.annotations = computed.annotations.clone();
                rq.spec = computed.spec.clone();
                rq.owner_ref = Some(owner.clone());
                Ok(())
            })
            .await?;
        Ok((rq, effects))
    }

    async fn reconcile_logged(&self, namespace: &str) {
        match self.reconcile(namespace).await {
            Ok(outcome) => debug!(
                "QuotaController[{}] namespace {}: {}",
                self.config.name,
                namespace,
                outcome_name(&outcome)
            ),
            Err(e) => warn!(
                "QuotaController[{}] reconcile error for namespace {}: {:#}",
                self.config.name, namespace, e
            ),
        }
    }

    /// Reconcile every namespace. A failing namespace does not stop the others.
    pub async fn reconcile_all(&self) {
        let namespaces = match self.repo.list_namespaces().await {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    "QuotaController[{}] unable to list namespaces: {:#}",
                    self.config.name, e
                );
                return;
            }
        };
        for ns in namespaces {
            self.reconcile_logged(&ns).await;
        }
    }
}

impl<R: ObjectRepository + 'static> QuotaController<R> {
    /// Start the controller loop as a background task.
    ///
    /// Every namespace is reconciled on each resync tick; in between, store
    /// events are mapped to namespaces and reconciled in batches.
    pub fn start(self, event_log: EventLog) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "QuotaController[{}] started (mode={}, resync={}s)",
                self.config.name,
                self.config.mode,
                self.resync_interval.as_secs()
            );
            let mut event_rx = event_log.subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.reconcile_all().await;
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                let mut pending: BTreeSet<String> =
                                    trigger_for(&event, &self.config).into_iter().collect();
                                let mut lagged = false;
                                loop {
                                    match event_rx.try_recv() {
                                        Ok(event) => pending.extend(trigger_for(&event, &self.config)),
                                        Err(TryRecvError::Lagged(_)) => lagged = true,
                                        Err(_) => break,
                                    }
                                }
                                if lagged {
                                    self.reconcile_all().await;
                                    interval.reset();
                                } else {
                                    for ns in pending {
                                        self.reconcile_logged(&ns).await;
                                    }
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(
                                    "QuotaController[{}] missed {} events, resyncing",
                                    self.config.name, skipped
                                );
                                self.reconcile_all().await;
                                interval.reset();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
            info!("QuotaController[{}] stopped", self.config.name);
        })
    }
}

fn outcome_name(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::NamespaceNotFound => "namespace not found",
        ReconcileOutcome::SelectorMismatch => "selector mismatch",
        ReconcileOutcome::Terminating => "terminating",
        ReconcileOutcome::ClaimedByOther(_) => "claimed by another quota definition",
        ReconcileOutcome::Reconciled(_) => "reconciled",
    }
}

#[cfg(test)]
mod tests;
