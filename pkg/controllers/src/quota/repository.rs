use anyhow::{Context, bail};
use async_trait::async_trait;
use pkg_constants::state::{NAMESPACES_PREFIX, QUOTA_INCREASES_PREFIX, RESOURCE_QUOTAS_PREFIX};
use pkg_state::client::StateStore;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;
use pkg_types::quota_increase::QuotaIncrease;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;

/// What to do when a label or annotation already holds a different value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    Always,
    Never,
}

/// Mutation applied to a ResourceQuota by [`ObjectRepository::create_or_update_quota`].
pub type QuotaMutation<'a> = dyn Fn(&mut ResourceQuota) -> anyhow::Result<()> + Send + Sync + 'a;

/// The object operations the quota controller needs.
///
/// All writers are "ensure" operations: writing a value that is already
/// present does not touch the store.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    async fn get_namespace(&self, name: &str) -> anyhow::Result<Option<Namespace>>;

    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>>;

    async fn list_quota_increases(&self, namespace: &str) -> anyhow::Result<Vec<QuotaIncrease>>;

    /// Set a namespace label, creating it when missing. On success `ns` is
    /// replaced by the stored object.
    async fn ensure_namespace_label(
        &self,
        ns: &mut Namespace,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()>;

    async fn ensure_increase_label(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()>;

    async fn ensure_increase_annotation(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()>;

    /// Upsert the quota keyed by `(namespace, name)`. `mutate` receives the
    /// stored object, or a fresh one when none exists yet.
    async fn create_or_update_quota(
        &self,
        namespace: &str,
        name: &str,
        mutate: &QuotaMutation<'_>,
    ) -> anyhow::Result<ResourceQuota>;

    async fn delete_quota_increase(&self, qi: &QuotaIncrease) -> anyhow::Result<()>;
}

/// Set `key` to `value` in `map`. Returns whether the map changed.
pub fn ensure_entry(
    map: &mut HashMap<String, String>,
    key: &str,
    value: &str,
    overwrite: Overwrite,
) -> anyhow::Result<bool> {
    match map.get(key) {
        Some(existing) if existing == value => Ok(false),
        Some(existing) if overwrite == Overwrite::Never => {
            bail!(
                "key '{}' already set to '{}', refusing to overwrite with '{}'",
                key,
                existing,
                value
            )
        }
        _ => {
            map.insert(key.to_string(), value.to_string());
            Ok(true)
        }
    }
}

pub fn namespace_key(name: &str) -> String {
    format!("{}{}", NAMESPACES_PREFIX, name)
}

pub fn quota_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", RESOURCE_QUOTAS_PREFIX, namespace, name)
}

pub fn quota_increase_key(namespace: &str, name: &str) -> String {
    format!("{}{}/{}", QUOTA_INCREASES_PREFIX, namespace, name)
}

/// [`ObjectRepository`] over the SlateDB-backed [`StateStore`], storing
/// objects as JSON under `/registry/...` keys.
///
/// The ensure writers re-read the stored object and patch a single key on
/// it, so concurrent edits to other fields survive. A vanished object is
/// left alone instead of being written back.
#[derive(Clone)]
pub struct StoreRepository {
    store: StateStore,
}

impl StoreRepository {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.store.get(key).await? {
            Some(data) => Ok(Some(
                serde_json::from_slice(&data).with_context(|| format!("error decoding {}", key))?,
            )),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, obj: &T) -> anyhow::Result<()> {
        let data = serde_json::to_vec(obj)?;
        self.store.put(key, &data).await
    }

    async fn patch_increase(
        &self,
        qi: &mut QuotaIncrease,
        field: fn(&mut QuotaIncrease) -> &mut HashMap<String, String>,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        let store_key = quota_increase_key(&qi.namespace, &qi.name);
        let Some(mut fresh) = self.get_json::<QuotaIncrease>(&store_key).await? else {
            debug!("QuotaIncrease {} no longer exists, skipping update", qi.key());
            return Ok(());
        };
        if ensure_entry(field(&mut fresh), key, value, overwrite)? {
            self.put_json(&store_key, &fresh).await?;
        }
        *qi = fresh;
        Ok(())
    }
}

fn increase_labels(qi: &mut QuotaIncrease) -> &mut HashMap<String, String> {
    &mut qi.labels
}

fn increase_annotations(qi: &mut QuotaIncrease) -> &mut HashMap<String, String> {
    &mut qi.annotations
}

#[async_trait]
impl ObjectRepository for StoreRepository {
    async fn get_namespace(&self, name: &str) -> anyhow::Result<Option<Namespace>> {
        self.get_json(&namespace_key(name)).await
    }

    async fn list_namespaces(&self) -> anyhow::Result<Vec<String>> {
        let entries = self.store.list_prefix(NAMESPACES_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| {
                key.strip_prefix(NAMESPACES_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .collect())
    }

    async fn list_quota_increases(&self, namespace: &str) -> anyhow::Result<Vec<QuotaIncrease>> {
        let prefix = format!("{}{}/", QUOTA_INCREASES_PREFIX, namespace);
        let entries = self.store.list_prefix(&prefix).await?;
        entries
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_slice(&value)
                    .with_context(|| format!("error decoding QuotaIncrease at {}", key))
            })
            .collect()
    }

    async fn ensure_namespace_label(
        &self,
        ns: &mut Namespace,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        let store_key = namespace_key(&ns.name);
        let Some(mut fresh) = self.get_json::<Namespace>(&store_key).await? else {
            debug!("Namespace {} no longer exists, skipping label update", ns.name);
            return Ok(());
        };
        if ensure_entry(&mut fresh.labels, key, value, overwrite)? {
            self.put_json(&store_key, &fresh).await?;
        }
        *ns = fresh;
        Ok(())
    }

    async fn ensure_increase_label(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        self.patch_increase(qi, increase_labels, key, value, overwrite)
            .await
    }

    async fn ensure_increase_annotation(
        &self,
        qi: &mut QuotaIncrease,
        key: &str,
        value: &str,
        overwrite: Overwrite,
    ) -> anyhow::Result<()> {
        self.patch_increase(qi, increase_annotations, key, value, overwrite)
            .await
    }

    async fn create_or_update_quota(
        &self,
        namespace: &str,
        name: &str,
        mutate: &QuotaMutation<'_>,
    ) -> anyhow::Result<ResourceQuota> {
        let key = quota_key(namespace, name);
        let existing: Option<ResourceQuota> = self.get_json(&key).await?;

        let mut rq = existing
            .clone()
            .unwrap_or_else(|| ResourceQuota::new(namespace, name));
        mutate(&mut rq)?;
        rq.name = name.to_string();
        rq.namespace = namespace.to_string();

        if existing.as_ref() != Some(&rq) {
            self.put_json(&key, &rq).await?;
        }
        Ok(rq)
    }

    async fn delete_quota_increase(&self, qi: &QuotaIncrease) -> anyhow::Result<()> {
        self.store
            .delete(&quota_increase_key(&qi.namespace, &qi.name))
            .await
    }
}
