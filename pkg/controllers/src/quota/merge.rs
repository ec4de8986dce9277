//! Combining a base quota with QuotaIncreases.
//!
//! Everything here is pure: inputs are borrowed, results are new values.

use pkg_constants::labels::SINGULAR_QUOTA_INCREASE_LABEL;
use pkg_types::config::OperatingMode;
use pkg_types::namespace::Namespace;
use pkg_types::quantity::Quantity;
use pkg_types::quota::ResourceList;
use pkg_types::quota_increase::QuotaIncrease;
use std::collections::BTreeMap;
use tracing::info;

/// QuotaIncrease name → the resources it actually contributed.
pub type Effects = BTreeMap<String, ResourceList>;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub hard: ResourceList,
    pub effects: Effects,
}

/// Apply `increases` to `base` according to `mode`.
///
/// In singular mode the increase to apply is read from the namespace's
/// selection label.
pub fn merge(
    base: &ResourceList,
    mode: OperatingMode,
    increases: &[QuotaIncrease],
    namespace: &Namespace,
) -> MergeResult {
    match mode {
        OperatingMode::Cumulative => merge_cumulative(base, increases),
        OperatingMode::Maximum => merge_maximum(base, increases),
        OperatingMode::Singular => {
            let selected = namespace.label(SINGULAR_QUOTA_INCREASE_LABEL);
            if selected.is_none() {
                info!(
                    "No singular QuotaIncrease label {} found on namespace {}, ignoring QuotaIncreases",
                    SINGULAR_QUOTA_INCREASE_LABEL, namespace.name
                );
            }
            merge_singular(base, increases, selected)
        }
    }
}

/// Every requested quantity is added to the running total.
pub fn merge_cumulative(base: &ResourceList, increases: &[QuotaIncrease]) -> MergeResult {
    let mut hard = base.clone();
    let mut effects = Effects::new();
    for qi in increases {
        let effect = effects.entry(qi.name.clone()).or_default();
        for (resource, quantity) in &qi.spec.hard {
            effect.insert(resource.clone(), *quantity);
            hard.entry(resource.clone())
                .and_modify(|total| *total = *total + *quantity)
                .or_insert(*quantity);
        }
    }
    MergeResult { hard, effects }
}

/// Per resource, the single highest increase wins if it beats the base value.
///
/// Increases are scanned in name order and a later one only takes over when
/// strictly greater, so ties always go to the lexicographically first name.
pub fn merge_maximum(base: &ResourceList, increases: &[QuotaIncrease]) -> MergeResult {
    let mut ordered: Vec<&QuotaIncrease> = increases.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut winners: BTreeMap<&str, (&str, Quantity)> = BTreeMap::new();
    for qi in ordered {
        for (resource, quantity) in &qi.spec.hard {
            let floor = base.get(resource).copied().unwrap_or_default();
            if *quantity <= floor {
                continue;
            }
            let beats_current = winners
                .get(resource.as_str())
                .is_none_or(|(_, best)| quantity > best);
            if beats_current {
                winners.insert(resource.as_str(), (qi.name.as_str(), *quantity));
            }
        }
    }

    let mut hard = base.clone();
    let mut effects = Effects::new();
    for (resource, (name, quantity)) in winners {
        hard.insert(resource.to_string(), quantity);
        effects
            .entry(name.to_string())
            .or_default()
            .insert(resource.to_string(), quantity);
    }
    MergeResult { hard, effects }
}

/// Only the selected increase is applied, and only where it raises a limit.
pub fn merge_singular(
    base: &ResourceList,
    increases: &[QuotaIncrease],
    selected: Option<&str>,
) -> MergeResult {
    let mut hard = base.clone();
    let mut effects = Effects::new();

    let Some(selected) = selected else {
        return MergeResult { hard, effects };
    };
    let Some(qi) = increases.iter().find(|qi| qi.name == selected) else {
        info!(
            "Referenced QuotaIncrease {} not found in namespace, ignoring QuotaIncreases",
            selected
        );
        return MergeResult { hard, effects };
    };

    let effect = effects.entry(qi.name.clone()).or_default();
    for (resource, quantity) in &qi.spec.hard {
        let current = hard.get(resource).copied().unwrap_or_default();
        if *quantity > current {
            hard.insert(resource.clone(), *quantity);
            effect.insert(resource.clone(), *quantity);
        }
    }
    MergeResult { hard, effects }
}
