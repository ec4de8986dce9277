use super::*;
use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::labels::{
    BASE_QUOTA_LABEL, EFFECT_ANNOTATION, QUOTA_INCREASE_OPERATION_MODE_LABEL,
};
use pkg_state::client::StateStore;
use pkg_types::config::ResourceQuotaTemplate;
use pkg_types::quantity::Quantity;
use pkg_types::quota::{ResourceList, ResourceQuotaSpec};
use pkg_types::selector::LabelSelector;
use std::collections::BTreeMap;

use super::repository::{
    Overwrite, QuotaMutation, StoreRepository, namespace_key, quota_increase_key, quota_key,
};

const CM: &str = "count/configmaps";
const SECRETS: &str = "count/secrets";
const SA: &str = "count/serviceaccounts";

fn list(pairs: &[(&str, i64)]) -> ResourceList {
    pairs
        .iter()
        .map(|(r, n)| (r.to_string(), Quantity::from_units(*n)))
        .collect()
}

fn definition(name: &str, mode: OperatingMode, delete_ineffective_quotas: bool) -> QuotaDefinition {
    QuotaDefinition {
        name: name.to_string(),
        selector: None,
        template: ResourceQuotaTemplate {
            annotations: BTreeMap::from([("team".to_string(), "platform".to_string())]),
            labels: BTreeMap::new(),
            spec: ResourceQuotaSpec {
                hard: list(&[(CM, 3), (SECRETS, 3), (SA, 3)]),
            },
        },
        mode,
        delete_ineffective_quotas,
    }
}

fn controller(
    store: &StateStore,
    definition: QuotaDefinition,
    others: &[&str],
) -> QuotaController<StoreRepository> {
    let mut active: BTreeSet<String> = others.iter().map(|s| s.to_string()).collect();
    active.insert(definition.name.clone());
    QuotaController::new(StoreRepository::new(store.clone()), definition, Arc::new(active))
}

async fn put_namespace(store: &StateStore, ns: &Namespace) {
    store
        .put(&namespace_key(&ns.name), &serde_json::to_vec(ns).unwrap())
        .await
        .unwrap();
}

async fn put_increase(store: &StateStore, namespace: &str, name: &str, hard: &[(&str, i64)]) {
    let qi = QuotaIncrease::new(namespace, name, list(hard));
    store
        .put(&quota_increase_key(namespace, name), &serde_json::to_vec(&qi).unwrap())
        .await
        .unwrap();
}

/// The four increases used by most scenarios below.
async fn put_project_increases(store: &StateStore, namespace: &str) {
    put_increase(store, namespace, "qi-project-max", &[(CM, 10), (SECRETS, 10)]).await;
    put_increase(store, namespace, "qi-project-med", &[(CM, 5), (SECRETS, 5)]).await;
    put_increase(store, namespace, "qi-project-sa", &[(SA, 5)]).await;
    put_increase(store, namespace, "qi-project-empty", &[]).await;
}

async fn get_namespace(store: &StateStore, name: &str) -> Namespace {
    let data = store.get(&namespace_key(name)).await.unwrap().unwrap();
    serde_json::from_slice(&data).unwrap()
}

async fn get_quota(store: &StateStore, namespace: &str, name: &str) -> Option<ResourceQuota> {
    store
        .get(&quota_key(namespace, name))
        .await
        .unwrap()
        .map(|data| serde_json::from_slice(&data).unwrap())
}

async fn get_increase(store: &StateStore, namespace: &str, name: &str) -> Option<QuotaIncrease> {
    store
        .get(&quota_increase_key(namespace, name))
        .await
        .unwrap()
        .map(|data| serde_json::from_slice(&data).unwrap())
}

async fn effect_of(store: &StateStore, namespace: &str, name: &str) -> Option<String> {
    get_increase(store, namespace, name)
        .await
        .and_then(|qi| qi.annotations.get(EFFECT_ANNOTATION).cloned())
}

#[tokio::test]
async fn test_cumulative_sums_all_increases() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, false), &[]);

    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 18), (SECRETS, 18), (SA, 8)]));
    assert_eq!(get_quota(&store, "ns-a", "project").await, Some(rq.clone()));

    assert_eq!(
        rq.labels.get(MANAGED_BY_LABEL).map(String::as_str),
        Some(CONTROLLER_NAME)
    );
    assert_eq!(
        rq.labels.get(QUOTA_DEFINITION_LABEL).map(String::as_str),
        Some("project")
    );
    assert_eq!(rq.annotations.get("team").map(String::as_str), Some("platform"));
    assert_eq!(rq.owner_ref, Some(OwnerReference::namespace("ns-a")));

    let ns = get_namespace(&store, "ns-a").await;
    assert_eq!(ns.label(BASE_QUOTA_LABEL), Some("project"));
    assert_eq!(ns.label(QUOTA_INCREASE_OPERATION_MODE_LABEL), Some("cumulative"));

    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-max").await.as_deref(),
        Some("count/configmaps: 10, count/secrets: 10")
    );
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-sa").await.as_deref(),
        Some("count/serviceaccounts: 5")
    );
    assert_eq!(effect_of(&store, "ns-a", "qi-project-empty").await.as_deref(), Some(""));

    let qi = get_increase(&store, "ns-a", "qi-project-med").await.unwrap();
    assert_eq!(
        qi.labels.get(QUOTA_INCREASE_OPERATION_MODE_LABEL).map(String::as_str),
        Some("cumulative")
    );
}

#[tokio::test]
async fn test_cumulative_deletes_empty_increase() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, true), &[]);

    ctrl.reconcile("ns-a").await.unwrap();
    assert!(get_increase(&store, "ns-a", "qi-project-empty").await.is_none());
    for name in ["qi-project-max", "qi-project-med", "qi-project-sa"] {
        assert!(get_increase(&store, "ns-a", name).await.is_some(), "{} deleted", name);
    }
}

#[tokio::test]
async fn test_maximum_keeps_only_winners() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Maximum, true), &[]);

    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 10), (SECRETS, 10), (SA, 5)]));

    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-max").await.as_deref(),
        Some("count/configmaps: 10, count/secrets: 10")
    );
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-sa").await.as_deref(),
        Some("count/serviceaccounts: 5")
    );
    assert!(get_increase(&store, "ns-a", "qi-project-med").await.is_none());
    assert!(get_increase(&store, "ns-a", "qi-project-empty").await.is_none());
}

#[tokio::test]
async fn test_maximum_without_deletion_annotates_losers_empty() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Maximum, false), &[]);

    ctrl.reconcile("ns-a").await.unwrap();
    assert_eq!(effect_of(&store, "ns-a", "qi-project-med").await.as_deref(), Some(""));
    assert_eq!(effect_of(&store, "ns-a", "qi-project-empty").await.as_deref(), Some(""));
}

#[tokio::test]
async fn test_singular_applies_selected_increase() {
    let store = StateStore::in_memory().await.unwrap();
    let mut ns = Namespace::new("ns-a");
    ns.labels
        .insert(SINGULAR_QUOTA_INCREASE_LABEL.to_string(), "qi-project-med".to_string());
    put_namespace(&store, &ns).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("all", OperatingMode::Singular, true), &[]);

    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 5), (SECRETS, 5), (SA, 3)]));
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-med").await.as_deref(),
        Some("[active] count/configmaps: 5, count/secrets: 5")
    );
    for name in ["qi-project-max", "qi-project-sa", "qi-project-empty"] {
        assert!(get_increase(&store, "ns-a", name).await.is_none(), "{} kept", name);
    }
}

#[tokio::test]
async fn test_singular_selected_without_effect_is_kept() {
    let store = StateStore::in_memory().await.unwrap();
    let mut ns = Namespace::new("ns-a");
    ns.labels
        .insert(SINGULAR_QUOTA_INCREASE_LABEL.to_string(), "qi-project-empty".to_string());
    put_namespace(&store, &ns).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("all", OperatingMode::Singular, true), &[]);

    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 3), (SECRETS, 3), (SA, 3)]));
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-empty").await.as_deref(),
        Some("[active]")
    );
    assert!(get_increase(&store, "ns-a", "qi-project-max").await.is_none());
}

#[tokio::test]
async fn test_singular_without_selection_uses_base() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("all", OperatingMode::Singular, false), &[]);

    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 3), (SECRETS, 3), (SA, 3)]));
    for name in ["qi-project-max", "qi-project-med", "qi-project-sa", "qi-project-empty"] {
        assert_eq!(effect_of(&store, "ns-a", name).await.as_deref(), Some(""));
    }
}

#[tokio::test]
async fn test_namespace_claimed_by_other_definition_is_skipped() {
    let store = StateStore::in_memory().await.unwrap();
    let mut ns = Namespace::new("ns-a");
    ns.labels
        .insert(BASE_QUOTA_LABEL.to_string(), "workspace".to_string());
    put_namespace(&store, &ns).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(
        &store,
        definition("project", OperatingMode::Cumulative, true),
        &["workspace"],
    );

    let outcome = ctrl.reconcile("ns-a").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::ClaimedByOther("workspace".to_string()));
    assert!(get_quota(&store, "ns-a", "project").await.is_none());

    let stored = get_namespace(&store, "ns-a").await;
    assert_eq!(stored.label(BASE_QUOTA_LABEL), Some("workspace"));
    assert_eq!(stored.label(QUOTA_INCREASE_OPERATION_MODE_LABEL), None);
    assert!(effect_of(&store, "ns-a", "qi-project-max").await.is_none());
}

#[tokio::test]
async fn test_stale_base_label_is_overwritten() {
    let store = StateStore::in_memory().await.unwrap();
    let mut ns = Namespace::new("ns-a");
    ns.labels
        .insert(BASE_QUOTA_LABEL.to_string(), "retired".to_string());
    put_namespace(&store, &ns).await;
    let ctrl = controller(&store, definition("project", OperatingMode::Maximum, false), &[]);

    let outcome = ctrl.reconcile("ns-a").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Reconciled(_)));

    let stored = get_namespace(&store, "ns-a").await;
    assert_eq!(stored.label(BASE_QUOTA_LABEL), Some("project"));
    assert_eq!(stored.label(QUOTA_INCREASE_OPERATION_MODE_LABEL), Some("maximum"));
}

#[tokio::test]
async fn test_selector_mismatch_writes_nothing() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    let mut def = definition("project", OperatingMode::Cumulative, false);
    def.selector = Some(LabelSelector {
        match_labels: BTreeMap::from([("openmcp.cloud/project".to_string(), "demo".to_string())]),
        match_expressions: vec![],
    });
    let ctrl = controller(&store, def, &[]);

    let seq = store.event_log.current_seq().await;
    assert_eq!(
        ctrl.reconcile("ns-a").await.unwrap(),
        ReconcileOutcome::SelectorMismatch
    );
    assert_eq!(store.event_log.current_seq().await, seq);
}

#[tokio::test]
async fn test_terminating_namespace_is_skipped() {
    let store = StateStore::in_memory().await.unwrap();
    let mut ns = Namespace::new("ns-a");
    ns.deletion_timestamp = Some(Utc::now());
    put_namespace(&store, &ns).await;
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, false), &[]);

    assert_eq!(ctrl.reconcile("ns-a").await.unwrap(), ReconcileOutcome::Terminating);
    assert!(get_quota(&store, "ns-a", "project").await.is_none());
    assert_eq!(get_namespace(&store, "ns-a").await.label(BASE_QUOTA_LABEL), None);
}

#[tokio::test]
async fn test_missing_namespace_is_not_an_error() {
    let store = StateStore::in_memory().await.unwrap();
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, false), &[]);
    assert_eq!(
        ctrl.reconcile("ghost").await.unwrap(),
        ReconcileOutcome::NamespaceNotFound
    );
}

#[tokio::test]
async fn test_second_reconcile_writes_nothing() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Maximum, false), &[]);

    let first = ctrl.reconcile("ns-a").await.unwrap();
    let seq = store.event_log.current_seq().await;
    let second = ctrl.reconcile("ns-a").await.unwrap();

    assert_eq!(store.event_log.current_seq().await, seq);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_quota_follows_removed_increase() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = controller(&store, definition("project", OperatingMode::Maximum, false), &[]);
    ctrl.reconcile("ns-a").await.unwrap();

    store
        .delete(&quota_increase_key("ns-a", "qi-project-max"))
        .await
        .unwrap();
    let ReconcileOutcome::Reconciled(rq) = ctrl.reconcile("ns-a").await.unwrap() else {
        panic!("expected reconcile");
    };
    assert_eq!(rq.spec.hard, list(&[(CM, 5), (SECRETS, 5), (SA, 5)]));
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-med").await.as_deref(),
        Some("count/configmaps: 5, count/secrets: 5")
    );
}

#[tokio::test]
async fn test_compute_resource_quota_is_pure() {
    let store = StateStore::in_memory().await.unwrap();
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, false), &[]);
    let ns = Namespace::new("ns-a");
    let increases = vec![QuotaIncrease::new("ns-a", "qi", list(&[(SECRETS, 2)]))];

    let (rq, effects) = ctrl.compute_resource_quota(&ns, &increases);
    assert_eq!(rq.namespace, "ns-a");
    assert_eq!(rq.name, "project");
    assert_eq!(rq.spec.hard.get(SECRETS), Some(&Quantity::from_units(5)));
    assert_eq!(effects["qi"], list(&[(SECRETS, 2)]));
    assert_eq!(
        ctrl.config().template.spec.hard.get(SECRETS),
        Some(&Quantity::from_units(3))
    );
    assert_eq!(store.event_log.current_seq().await, 0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    NamespaceLabel,
    IncreaseLabel,
    IncreaseAnnotation,
    UpsertQuota,
    DeleteIncrease,
}

/// Delegates to a [`StoreRepository`] but rejects the listed writes.
/// Each entry names the write kind and the object name it fails for.
struct FailingRepository {
    inner: StoreRepository,
    fail: Vec<(Write, &'static str)>,
}

impl FailingRepository {
    fn new(store: &StateStore, fail: Vec<(Write, &'static str)>) -> Self {
        Self {
            inner: StoreRepository::new(store.clone()),
            fail,
        }
    }

    fn check(&self, write: Write, name: &str) -> anyhow::Result<()> {
        if self.fail.iter().any(|(w, n)| *w == write && *n == name) {
            anyhow::bail!("{:?} of {} rejected", write, name);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectRepository for FailingRepository {
    async fn get_namespace(&self, name: &str) -> anyhow::Result<Option<Namespace>> {
        self.inner.get_namespace(name).await
    }

    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>> {
        self.inner.list_namespaces().await
    }

    async fn list_quota_increases(&self, namespace: &str) -> anyhow::Result<Vec<QuotaIncrease>> {
        self.inner.list_quota_increases(namespace).await
    }

    async fn ensure_namespace_label(
        &self,
        ns: &mut Namespace,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        self.check(Write::NamespaceLabel, &ns.name)?;
        self.inner.ensure_namespace_label(ns, key, value, overwrite).await
    }

    async fn ensure_increase_label(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        self.check(Write::IncreaseLabel, &qi.name)?;
        self.inner.ensure_increase_label(qi, key, value, overwrite).await
    }

    async fn ensure_increase_annotation(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        self.check(Write::IncreaseAnnotation, &qi.name)?;
        self.inner
            .ensure_increase_annotation(qi, key, value, overwrite)
            .await
    }

    async fn create_or_update_quota(
        &self,
        namespace: &str,
        name: &str,
        mutate: &QuotaMutation<'_>,
    ) -> anyhow::Result<ResourceQuota> {
        self.check(Write::UpsertQuota, name)?;
        self.inner.create_or_update_quota(namespace, name, mutate).await
    }

    async fn delete_quota_increase(&self, qi: &QuotaIncrease) -> anyhow::Result<()> {
        self.check(Write::DeleteIncrease, &qi.name)?;
        self.inner.delete_quota_increase(qi).await
    }
}

fn failing_controller(
    store: &StateStore,
    definition: QuotaDefinition,
    fail: Vec<(Write, &'static str)>,
) -> QuotaController<FailingRepository> {
    let active = Arc::new(BTreeSet::from([definition.name.clone()]));
    QuotaController::new(FailingRepository::new(store, fail), definition, active)
}

async fn assert_increases_untouched(store: &StateStore, namespace: &str) {
    for name in ["qi-project-max", "qi-project-med", "qi-project-sa", "qi-project-empty"] {
        let qi = get_increase(store, namespace, name)
            .await
            .unwrap_or_else(|| panic!("{} was deleted", name));
        assert!(qi.annotations.is_empty(), "{} was annotated", name);
        assert!(qi.labels.is_empty(), "{} was labeled", name);
    }
}

#[tokio::test]
async fn test_failed_quota_upsert_aborts_before_effects() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = failing_controller(
        &store,
        definition("project", OperatingMode::Maximum, true),
        vec![(Write::UpsertQuota, "project")],
    );

    let msg = format!("{:#}", ctrl.reconcile("ns-a").await.unwrap_err());
    assert!(msg.contains("error creating/updating ResourceQuota"), "{}", msg);
    assert!(get_quota(&store, "ns-a", "project").await.is_none());
    assert_increases_untouched(&store, "ns-a").await;
}

#[tokio::test]
async fn test_failed_claim_aborts_reconcile() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = failing_controller(
        &store,
        definition("project", OperatingMode::Maximum, true),
        vec![(Write::NamespaceLabel, "ns-a")],
    );

    let msg = format!("{:#}", ctrl.reconcile("ns-a").await.unwrap_err());
    assert!(msg.contains("error adding base quota label to namespace"), "{}", msg);
    assert!(get_quota(&store, "ns-a", "project").await.is_none());
    assert_eq!(get_namespace(&store, "ns-a").await.label(BASE_QUOTA_LABEL), None);
    assert_increases_untouched(&store, "ns-a").await;
}

#[tokio::test]
async fn test_annotate_failures_are_collected() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = failing_controller(
        &store,
        definition("project", OperatingMode::Cumulative, false),
        vec![
            (Write::IncreaseAnnotation, "qi-project-max"),
            (Write::IncreaseLabel, "qi-project-sa"),
        ],
    );

    let msg = format!("{:#}", ctrl.reconcile("ns-a").await.unwrap_err());
    assert!(msg.contains("2 errors occurred"), "{}", msg);
    assert!(msg.contains("error annotating QuotaIncrease ns-a/qi-project-max"), "{}", msg);
    assert!(msg.contains("error labeling QuotaIncrease ns-a/qi-project-sa"), "{}", msg);

    // A failed write on one key does not skip the other key or other increases.
    let max = get_increase(&store, "ns-a", "qi-project-max").await.unwrap();
    assert!(!max.annotations.contains_key(EFFECT_ANNOTATION));
    assert_eq!(
        max.labels.get(QUOTA_INCREASE_OPERATION_MODE_LABEL).map(String::as_str),
        Some("cumulative")
    );
    let sa = get_increase(&store, "ns-a", "qi-project-sa").await.unwrap();
    assert_eq!(
        sa.annotations.get(EFFECT_ANNOTATION).map(String::as_str),
        Some("count/serviceaccounts: 5")
    );
    assert!(!sa.labels.contains_key(QUOTA_INCREASE_OPERATION_MODE_LABEL));
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-med").await.as_deref(),
        Some("count/configmaps: 5, count/secrets: 5")
    );
}

#[tokio::test]
async fn test_effect_failures_do_not_stop_other_increases() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    put_project_increases(&store, "ns-a").await;
    let ctrl = failing_controller(
        &store,
        definition("project", OperatingMode::Maximum, true),
        vec![(Write::DeleteIncrease, "qi-project-empty")],
    );

    let err = ctrl.reconcile("ns-a").await.unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("error evaluating QuotaIncrease effectiveness"), "{}", msg);
    assert!(msg.contains("qi-project-empty"), "{}", msg);

    // The quota was written and the rest of the increases were still handled.
    let rq = get_quota(&store, "ns-a", "project").await.unwrap();
    assert_eq!(rq.spec.hard, list(&[(CM, 10), (SECRETS, 10), (SA, 5)]));
    assert!(get_increase(&store, "ns-a", "qi-project-med").await.is_none());
    assert!(get_increase(&store, "ns-a", "qi-project-empty").await.is_some());
    assert_eq!(
        effect_of(&store, "ns-a", "qi-project-sa").await.as_deref(),
        Some("count/serviceaccounts: 5")
    );
}

#[tokio::test]
async fn test_reconcile_all_covers_every_namespace() {
    let store = StateStore::in_memory().await.unwrap();
    for name in ["ns-a", "ns-b"] {
        put_namespace(&store, &Namespace::new(name)).await;
    }
    let mut claimed = Namespace::new("ns-c");
    claimed
        .labels
        .insert(BASE_QUOTA_LABEL.to_string(), "foo".to_string());
    put_namespace(&store, &claimed).await;
    let ctrl = controller(
        &store,
        definition("project", OperatingMode::Cumulative, false),
        &["foo"],
    );

    ctrl.reconcile_all().await;
    assert!(get_quota(&store, "ns-a", "project").await.is_some());
    assert!(get_quota(&store, "ns-b", "project").await.is_some());
    assert!(get_quota(&store, "ns-c", "project").await.is_none());
}

#[tokio::test]
async fn test_start_reacts_to_increase_events() {
    let store = StateStore::in_memory().await.unwrap();
    put_namespace(&store, &Namespace::new("ns-a")).await;
    let ctrl = controller(&store, definition("project", OperatingMode::Cumulative, false), &[])
        .with_resync_interval(Duration::from_secs(3600));
    let handle = ctrl.start(store.event_log.clone());

    put_increase(&store, "ns-a", "qi-1", &[(SECRETS, 4)]).await;

    let expected = list(&[(CM, 3), (SECRETS, 7), (SA, 3)]);
    let mut converged = false;
    for _ in 0..100 {
        if let Some(rq) = get_quota(&store, "ns-a", "project").await
            && rq.spec.hard == expected
        {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();
    assert!(converged, "quota never reflected the new QuotaIncrease");
}
