//! Maps store change events to the namespace that must be reconciled.

use pkg_constants::controller::CONTROLLER_NAME;
use pkg_constants::labels::{MANAGED_BY_LABEL, QUOTA_DEFINITION_LABEL};
use pkg_constants::state::{NAMESPACES_PREFIX, QUOTA_INCREASES_PREFIX, RESOURCE_QUOTAS_PREFIX};
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::config::QuotaDefinition;
use pkg_types::namespace::Namespace;
use pkg_types::quota::ResourceQuota;

/// Namespace to reconcile for `event`, if the event concerns `definition`.
///
/// - a namespace put, when the namespace matches the definition's selector
/// - any QuotaIncrease put or delete, mapped to its namespace
/// - a put or delete of the ResourceQuota this definition owns
pub fn trigger_for(event: &WatchEvent, definition: &QuotaDefinition) -> Option<String> {
    if let Some(segments) = event.segments_under(NAMESPACES_PREFIX) {
        let [name] = segments.as_slice() else {
            return None;
        };
        return namespace_trigger(event, name, definition);
    }

    if let Some(segments) = event.segments_under(QUOTA_INCREASES_PREFIX) {
        let [namespace, _name] = segments.as_slice() else {
            return None;
        };
        return Some(namespace.to_string());
    }

    if let Some(segments) = event.segments_under(RESOURCE_QUOTAS_PREFIX) {
        let [namespace, name] = segments.as_slice() else {
            return None;
        };
        if *name != definition.name {
            return None;
        }
        return match (&event.event_type, &event.value) {
            (EventType::Put, Some(value)) => {
                let rq: ResourceQuota = serde_json::from_slice(value).ok()?;
                owned_by(&rq, definition).then(|| namespace.to_string())
            }
            _ => Some(namespace.to_string()),
        };
    }

    None
}

fn namespace_trigger(event: &WatchEvent, name: &str, definition: &QuotaDefinition) -> Option<String> {
    if event.event_type == EventType::Delete {
        return None;
    }
    let Some(selector) = &definition.selector else {
        return Some(name.to_string());
    };
    // Undecodable objects are still handed to reconcile so the error surfaces there.
    match event
        .value
        .as_deref()
        .and_then(|v| serde_json::from_slice::<Namespace>(v).ok())
    {
        Some(ns) => selector.matches(&ns.labels).then(|| name.to_string()),
        None => Some(name.to_string()),
    }
}

fn owned_by(rq: &ResourceQuota, definition: &QuotaDefinition) -> bool {
    rq.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(CONTROLLER_NAME)
        && rq.labels.get(QUOTA_DEFINITION_LABEL) == Some(&definition.name)
}
