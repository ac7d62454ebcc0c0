//! Deterministic names for generated objects.
//!
//! Shared objects hash only what makes them identical across routes; per-route
//! objects are prefixed with the root name.

use konvert_core::gateway::BackendReference;
use konvert_core::kong::ControlPlaneRef;
use konvert_core::{hash_parts, hash_value, Error, Result};
use serde_json::json;

/// Backend refs with defaults filled in, sorted, for hashing.
pub fn normalize_backend_refs(route_namespace: &str, refs: &[BackendReference]) -> Vec<BackendReference> {
    let mut out: Vec<BackendReference> = refs
        .iter()
        .map(|r| BackendReference {
            group: Some(r.group.clone().unwrap_or_default()),
            kind: Some(r.kind.clone().unwrap_or_else(|| "Service".to_string())),
            namespace: Some(r.namespace.clone().unwrap_or_else(|| route_namespace.to_string())),
            weight: Some(r.weight.unwrap_or(1)),
            ..r.clone()
        })
        .collect();
    out.sort();
    out
}

/// Upstream and service name for a rule: `{cp}.{hash}`.
pub fn rule_object_name(cp: &ControlPlaneRef, route_namespace: &str, refs: &[BackendReference]) -> String {
    let normalized = normalize_backend_refs(route_namespace, refs);
    let v = json!({ "controlPlane": cp, "namespace": route_namespace, "backendRefs": normalized });
    format!("{}.{}", cp.name(), hash_value(&v))
}

pub fn route_name(root_name: &str, cp: &ControlPlaneRef, rule: usize, matched: usize) -> String {
    format!("{}.{}", root_name, hash_parts([cp.to_string().as_str(), "route", &rule.to_string(), &matched.to_string()]))
}

pub fn plugin_name(root_name: &str, cp: &ControlPlaneRef, rule: usize, filter: usize, filter_type: &str) -> String {
    format!("{}.{}", root_name, hash_parts([cp.to_string().as_str(), "plugin", &rule.to_string(), &filter.to_string(), filter_type]))
}

pub fn binding_name(kong_route: &str, plugin: &str) -> String {
    format!("{}.{}", kong_route, hash_parts([plugin]))
}

pub fn target_name(upstream: &str, backend: &BackendReference, address: &str) -> Result<String> {
    let v = serde_json::to_value(backend).map_err(|source| Error::Encode { kind: "KongTarget", name: upstream.to_string(), source })?;
    let mut h = konvert_core::hash::ContentHasher::new();
    h.part(upstream).value(&v).part(address);
    Ok(format!("{}.{}", upstream, h.hex()))
}

pub fn certificate_name(gateway: &str, cp: &ControlPlaneRef, secret_namespace: &str, secret_name: &str) -> String {
    format!("{}.{}", gateway, hash_parts([cp.to_string().as_str(), secret_namespace, secret_name]))
}

pub fn sni_name(certificate: &str, hostname: &str) -> String {
    format!("{}.{}", certificate, hash_parts([hostname]))
}

pub fn service_upstream_name(cp: &ControlPlaneRef, service_namespace: &str, service: &str, port: i32) -> String {
    format!("{}.{}", cp.name(), hash_parts([cp.to_string().as_str(), service_namespace, service, &port.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn br(name: &str, weight: Option<i32>) -> BackendReference {
        BackendReference { name: name.into(), port: Some(80), weight, ..Default::default() }
    }

    #[test]
    fn rule_name_ignores_ref_order_and_explicit_defaults() {
        let cp = ControlPlaneRef::namespaced("cp", "ns");
        let a = rule_object_name(&cp, "ns", &[br("a", None), br("b", Some(2))]);
        let mut explicit = br("a", Some(1));
        explicit.namespace = Some("ns".into());
        explicit.kind = Some("Service".into());
        let b = rule_object_name(&cp, "ns", &[br("b", Some(2)), explicit]);
        assert_eq!(a, b);
        assert!(a.starts_with("cp."));
    }

    #[test]
    fn rule_name_depends_on_weights_and_control_plane() {
        let cp = ControlPlaneRef::namespaced("cp", "ns");
        let other = ControlPlaneRef::namespaced("cp2", "ns");
        let base = rule_object_name(&cp, "ns", &[br("a", None)]);
        assert_ne!(base, rule_object_name(&cp, "ns", &[br("a", Some(5))]));
        assert_ne!(base, rule_object_name(&other, "ns", &[br("a", None)]));
    }

    #[test]
    fn sni_names_are_valid_for_wildcards() {
        let n = sni_name("gw.abc", "*");
        assert!(!n.contains('*'));
        assert_ne!(n, sni_name("gw.abc", "example.com"));
    }
}
