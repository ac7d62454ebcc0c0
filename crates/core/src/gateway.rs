//! Gateway API resources read by the engine (`gateway.networking.k8s.io`).
//!
//! The models come from the `gateway-api` crate. Enum-typed fields are read
//! through their wire form so the translator only deals in the strings the
//! API documents.

use serde::Serialize;
use serde_json::Value as Json;

pub use gateway_api::apis::standard::gatewayclasses::GatewayClass;
pub use gateway_api::apis::standard::gateways::{Gateway, GatewayListeners, GatewayListenersTlsCertificateRefs};
pub use gateway_api::apis::standard::httproutes::{
    HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, HTTPRouteRulesBackendRefs, HTTPRouteRulesFilters, HTTPRouteRulesMatches,
};
pub use gateway_api::apis::standard::referencegrants::ReferenceGrant;

use crate::store::impl_kind;

pub const GATEWAY_GROUP: &str = "gateway.networking.k8s.io";
pub const KIND_GATEWAY: &str = "Gateway";
pub const KIND_HTTPROUTE: &str = "HTTPRoute";
pub const KIND_SECRET: &str = "Secret";
pub const KIND_SERVICE: &str = "Service";

impl_kind!(Gateway, GATEWAY_GROUP, "v1", KIND_GATEWAY, "gateways", true);
impl_kind!(GatewayClass, GATEWAY_GROUP, "v1", "GatewayClass", "gatewayclasses", false);
impl_kind!(HTTPRoute, GATEWAY_GROUP, "v1", KIND_HTTPROUTE, "httproutes", true);
impl_kind!(ReferenceGrant, GATEWAY_GROUP, "v1beta1", "ReferenceGrant", "referencegrants", true);

/// Wire form of a field, `Null` when it cannot be encoded.
pub fn wire<T: Serialize + ?Sized>(v: &T) -> Json {
    serde_json::to_value(v).unwrap_or(Json::Null)
}

/// String at `key` in the wire form of `v`.
pub fn wire_str<T: Serialize + ?Sized>(v: &T, key: &str) -> Option<String> {
    wire(v).get(key).and_then(|s| s.as_str()).map(str::to_string)
}

// =============================================================================
// Gateway
// =============================================================================

pub fn certificate_refs(l: &GatewayListeners) -> &[GatewayListenersTlsCertificateRefs] {
    l.tls.as_ref().and_then(|t| t.certificate_refs.as_deref()).unwrap_or_default()
}

/// Terminating TLS listener with certificates to program.
pub fn terminates_tls(l: &GatewayListeners) -> bool {
    let proto = l.protocol.eq_ignore_ascii_case("HTTPS") || l.protocol.eq_ignore_ascii_case("TLS");
    let passthrough = l.tls.as_ref().and_then(|t| wire_str(t, "mode")).as_deref() == Some("Passthrough");
    proto && l.tls.is_some() && !passthrough
}

// =============================================================================
// HTTPRoute
// =============================================================================

pub fn parent_refs(r: &HTTPRoute) -> &[HTTPRouteParentRefs] {
    r.spec.parent_refs.as_deref().unwrap_or_default()
}

pub fn hostnames(r: &HTTPRoute) -> &[String] {
    r.spec.hostnames.as_deref().unwrap_or_default()
}

pub fn rules(r: &HTTPRoute) -> &[HTTPRouteRules] {
    r.spec.rules.as_deref().unwrap_or_default()
}

pub fn rule_matches(rule: &HTTPRouteRules) -> &[HTTPRouteRulesMatches] {
    rule.matches.as_deref().unwrap_or_default()
}

pub fn rule_filters(rule: &HTTPRouteRules) -> &[HTTPRouteRulesFilters] {
    rule.filters.as_deref().unwrap_or_default()
}

/// Identity of a parent reference: group, kind, namespace, name, section, port.
pub type ParentKey = (Option<String>, Option<String>, Option<String>, String, Option<String>, Option<i32>);

pub fn parent_key(p: &HTTPRouteParentRefs) -> ParentKey {
    (p.group.clone(), p.kind.clone(), p.namespace.clone(), p.name.clone(), p.section_name.clone(), p.port)
}

/// A backend reference as the translator sees it: from a route rule, or
/// synthesized for an annotated Service. Ordered so rule identities hash the
/// same regardless of declaration order.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct BackendReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

impl BackendReference {
    /// Core-group Service (the only supported backend kind).
    pub fn is_service(&self) -> bool {
        self.group.as_deref().unwrap_or("").is_empty() && self.kind.as_deref().unwrap_or(KIND_SERVICE) == KIND_SERVICE
    }
}

impl From<&HTTPRouteRulesBackendRefs> for BackendReference {
    fn from(b: &HTTPRouteRulesBackendRefs) -> Self {
        Self {
            group: b.group.clone(),
            kind: b.kind.clone(),
            name: b.name.clone(),
            namespace: b.namespace.clone(),
            port: b.port,
            weight: b.weight,
        }
    }
}

pub fn rule_backends(rule: &HTTPRouteRules) -> Vec<BackendReference> {
    rule.backend_refs.as_deref().unwrap_or_default().iter().map(BackendReference::from).collect()
}
