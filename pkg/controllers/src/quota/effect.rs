use pkg_constants::labels::{
    ACTIVE_SINGULAR_QUOTA_INCREASE_EFFECT_PREFIX, EFFECT_ANNOTATION,
    QUOTA_INCREASE_OPERATION_MODE_LABEL,
};
use pkg_types::config::OperatingMode;
use pkg_types::quota::ResourceList;
use pkg_types::quota_increase::QuotaIncrease;
use tracing::info;

use super::merge::Effects;
use super::repository::{ObjectRepository, Overwrite};

/// Render an effect as `"<resource>: <quantity>, ..."` in resource order.
pub fn effect_as_string(effect: &ResourceList) -> String {
    effect
        .iter()
        .map(|(resource, quantity)| format!("{}: {}", resource, quantity))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Annotation value for one QuotaIncrease. The selected singular increase
/// is marked even when it contributed nothing.
pub fn effect_annotation(effect: &ResourceList, active: bool) -> String {
    let rendered = effect_as_string(effect);
    match (active, rendered.is_empty()) {
        (false, _) => rendered,
        (true, true) => ACTIVE_SINGULAR_QUOTA_INCREASE_EFFECT_PREFIX.to_string(),
        (true, false) => format!("{} {}", ACTIVE_SINGULAR_QUOTA_INCREASE_EFFECT_PREFIX, rendered),
    }
}

/// Record each QuotaIncrease's effect on it, or delete it if it had none
/// and deletion is enabled. The selected singular increase is never deleted.
///
/// Every increase is processed; failures are collected and returned together.
pub async fn evaluate_effectiveness<R: ObjectRepository + ?Sized>(
    repo: &R,
    increases: Vec<QuotaIncrease>,
    effects: &Effects,
    mode: OperatingMode,
    delete_ineffective: bool,
    selected: Option<&str>,
) -> anyhow::Result<()> {
    let empty = ResourceList::new();
    let mut errors: Vec<anyhow::Error> = Vec::new();

    for mut qi in increases {
        let effect = effects.get(&qi.name).unwrap_or(&empty);
        let active = mode == OperatingMode::Singular && selected == Some(qi.name.as_str());

        if !delete_ineffective || !effect.is_empty() || active {
            let annotation = effect_annotation(effect, active);
            if let Err(e) = repo
                .ensure_increase_annotation(&mut qi, EFFECT_ANNOTATION, &annotation, Overwrite::Always)
                .await
            {
                errors.push(e.context(format!("error annotating QuotaIncrease {}", qi.key())));
            }
            if let Err(e) = repo
                .ensure_increase_label(
                    &mut qi,
                    QUOTA_INCREASE_OPERATION_MODE_LABEL,
                    mode.as_str(),
                    Overwrite::Always,
                )
                .await
            {
                errors.push(e.context(format!("error labeling QuotaIncrease {}", qi.key())));
            }
        } else {
            info!("Deleting ineffective QuotaIncrease {}", qi.key());
            if let Err(e) = repo.delete_quota_increase(&qi).await {
                errors.push(e.context(format!("error deleting QuotaIncrease {}", qi.key())));
            }
        }
    }

    join_errors(errors)
}

/// Fold collected errors into one, listing each cause.
pub fn join_errors(errors: Vec<anyhow::Error>) -> anyhow::Result<()> {
    if errors.len() <= 1 {
        return errors.into_iter().next().map_or(Ok(()), Err);
    }
    let joined = errors
        .iter()
        .map(|e| format!("{:#}", e))
        .collect::<Vec<_>>()
        .join("\n");
    Err(anyhow::anyhow!("{} errors occurred:\n{}", errors.len(), joined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::quantity::Quantity;

    fn list(pairs: &[(&str, i64)]) -> ResourceList {
        pairs
            .iter()
            .map(|(r, n)| (r.to_string(), Quantity::from_units(*n)))
            .collect()
    }

    #[test]
    fn test_effect_as_string_is_sorted() {
        let effect = list(&[("count/secrets", 10), ("count/configmaps", 4)]);
        assert_eq!(
            effect_as_string(&effect),
            "count/configmaps: 4, count/secrets: 10"
        );
        assert_eq!(effect_as_string(&ResourceList::new()), "");
    }

    #[test]
    fn test_active_prefix() {
        let effect = list(&[("count/secrets", 5)]);
        assert_eq!(effect_annotation(&effect, false), "count/secrets: 5");
        assert_eq!(effect_annotation(&effect, true), "[active] count/secrets: 5");
        assert_eq!(effect_annotation(&ResourceList::new(), true), "[active]");
        assert_eq!(effect_annotation(&ResourceList::new(), false), "");
    }

    #[test]
    fn test_join_errors() {
        assert!(join_errors(vec![]).is_ok());
        let one = join_errors(vec![anyhow::anyhow!("boom")]).unwrap_err();
        assert_eq!(one.to_string(), "boom");
        let many = join_errors(vec![anyhow::anyhow!("a"), anyhow::anyhow!("b")]).unwrap_err();
        let msg = many.to_string();
        assert!(msg.starts_with("2 errors occurred"));
        assert!(msg.contains("a") && msg.contains("b"));
    }
}
