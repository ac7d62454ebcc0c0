//! Control-plane configuration kinds and the downstream proxy-configuration
//! kinds the translator emits (`configuration.konghq.com`).

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::store::{impl_kind, impl_model};

pub const CONFIGURATION_GROUP: &str = "configuration.konghq.com";
pub const GATEWAY_OPERATOR_GROUP: &str = "gateway-operator.konghq.com";
pub const KONNECT_GROUP: &str = "konnect.konghq.com";

pub const KIND_GATEWAY_CONFIGURATION: &str = "GatewayConfiguration";
pub const KIND_KONNECT_EXTENSION: &str = "KonnectExtension";
pub const CONTROL_PLANE_REF_NAMESPACED: &str = "konnectNamespacedRef";

// =============================================================================
// Control plane references
// =============================================================================

/// Identifies the remote control plane a downstream object is configured against.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneRef {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub konnect_namespaced_ref: Option<NamespacedRef>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ControlPlaneRef {
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            type_: CONTROL_PLANE_REF_NAMESPACED.to_string(),
            konnect_namespaced_ref: Some(NamespacedRef { name: name.into(), namespace: Some(namespace.into()) }),
        }
    }

    pub fn name(&self) -> &str {
        self.konnect_namespaced_ref.as_ref().map(|r| r.name.as_str()).unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.konnect_namespaced_ref.as_ref().and_then(|r| r.namespace.as_deref())
    }
}

impl std::fmt::Display for ControlPlaneRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}/{}", ns, self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

// =============================================================================
// GatewayConfiguration / KonnectExtension
// =============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfiguration {
    #[serde(default = "GatewayConfiguration::default_api_version")]
    pub api_version: String,
    #[serde(default = "GatewayConfiguration::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GatewayConfigurationSpec,
}

impl_model!(
    GatewayConfiguration,
    GatewayConfigurationSpec,
    GATEWAY_OPERATOR_GROUP,
    "v2beta1",
    KIND_GATEWAY_CONFIGURATION,
    "gatewayconfigurations",
    true
);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigurationSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionRef>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtension {
    #[serde(default = "KonnectExtension::default_api_version")]
    pub api_version: String,
    #[serde(default = "KonnectExtension::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KonnectExtensionSpec,
}

impl_model!(KonnectExtension, KonnectExtensionSpec, KONNECT_GROUP, "v1alpha2", KIND_KONNECT_EXTENSION, "konnectextensions", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionSpec {
    pub konnect: KonnectExtensionKonnect,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionKonnect {
    pub control_plane: KonnectExtensionControlPlane,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KonnectExtensionControlPlane {
    #[serde(rename = "ref")]
    pub ref_: ControlPlaneRef,
}

// =============================================================================
// Downstream kinds
// =============================================================================

/// `{name}` reference to a sibling object in the same namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongService {
    #[serde(default = "KongService::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongService::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongServiceSpec,
}

impl_model!(KongService, KongServiceSpec, CONFIGURATION_GROUP, "v1alpha1", "KongService", "kongservices", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongServiceSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub name: String,
    /// Upstream name the service balances over.
    pub host: String,
    pub port: i32,
    pub protocol: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongRoute {
    #[serde(default = "KongRoute::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongRoute::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongRouteSpec,
}

impl_model!(KongRoute, KongRouteSpec, CONFIGURATION_GROUP, "v1alpha1", "KongRoute", "kongroutes", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongRouteSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub service_ref: ServiceRef,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
    pub protocols: Vec<String>,
    pub strip_path: bool,
    pub preserve_host: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    #[serde(rename = "type")]
    pub type_: String,
    pub namespaced_ref: NameRef,
}

impl ServiceRef {
    pub fn namespaced(name: impl Into<String>) -> Self {
        Self { type_: "namespacedRef".to_string(), namespaced_ref: NameRef { name: name.into() } }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongUpstream {
    #[serde(default = "KongUpstream::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongUpstream::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongUpstreamSpec,
}

impl_model!(KongUpstream, KongUpstreamSpec, CONFIGURATION_GROUP, "v1alpha1", "KongUpstream", "kongupstreams", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongUpstreamSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongTarget {
    #[serde(default = "KongTarget::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongTarget::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongTargetSpec,
}

impl_model!(KongTarget, KongTargetSpec, CONFIGURATION_GROUP, "v1alpha1", "KongTarget", "kongtargets", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongTargetSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub upstream_ref: NameRef,
    /// `host:port`
    pub target: String,
    pub weight: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongCertificate {
    #[serde(default = "KongCertificate::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongCertificate::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongCertificateSpec,
}

impl_model!(KongCertificate, KongCertificateSpec, CONFIGURATION_GROUP, "v1alpha1", "KongCertificate", "kongcertificates", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongCertificateSpec {
    pub control_plane_ref: ControlPlaneRef,
    #[serde(rename = "type")]
    pub type_: String,
    pub cert: String,
    pub key: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongSni {
    #[serde(default = "KongSni::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongSni::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongSniSpec,
}

impl_model!(KongSni, KongSniSpec, CONFIGURATION_GROUP, "v1alpha1", "KongSNI", "kongsnis", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongSniSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub certificate_ref: NameRef,
    /// Server name; `*` when the listener has no hostname.
    pub name: String,
}

/// Plugin configuration. Unlike the other downstream kinds it has no `spec`
/// and no control plane of its own; bindings carry the control plane.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongPlugin {
    #[serde(default = "KongPlugin::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongPlugin::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub plugin: String,
    #[serde(default)]
    pub config: Json,
}

impl_kind!(KongPlugin, CONFIGURATION_GROUP, "v1", "KongPlugin", "kongplugins", true);

impl KongPlugin {
    fn default_api_version() -> String {
        <Self as crate::StoreKind>::KIND.api_version()
    }

    fn default_kind() -> String {
        "KongPlugin".to_string()
    }

    pub fn new(metadata: ObjectMeta, plugin: impl Into<String>, config: Json) -> Self {
        Self { api_version: Self::default_api_version(), kind: Self::default_kind(), metadata, plugin: plugin.into(), config }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongPluginBinding {
    #[serde(default = "KongPluginBinding::default_api_version")]
    pub api_version: String,
    #[serde(default = "KongPluginBinding::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: KongPluginBindingSpec,
}

impl_model!(KongPluginBinding, KongPluginBindingSpec, CONFIGURATION_GROUP, "v1alpha1", "KongPluginBinding", "kongpluginbindings", true);

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KongPluginBindingSpec {
    pub control_plane_ref: ControlPlaneRef,
    pub plugin_ref: PluginRef,
    pub targets: PluginBindingTargets,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub name: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginBindingTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_reference: Option<TargetRef>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}

/// Every kind the translator can emit, in apply order.
pub static DOWNSTREAM_KINDS: [crate::KindRef; 8] = [
    <KongUpstream as crate::StoreKind>::KIND,
    <KongTarget as crate::StoreKind>::KIND,
    <KongService as crate::StoreKind>::KIND,
    <KongRoute as crate::StoreKind>::KIND,
    <KongPlugin as crate::StoreKind>::KIND,
    <KongPluginBinding as crate::StoreKind>::KIND,
    <KongCertificate as crate::StoreKind>::KIND,
    <KongSni as crate::StoreKind>::KIND,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_plane_ref_wire_shape() {
        let cp = ControlPlaneRef::namespaced("cp", "team-a");
        let v = serde_json::to_value(&cp).unwrap();
        assert_eq!(v, serde_json::json!({"type": "konnectNamespacedRef", "konnectNamespacedRef": {"name": "cp", "namespace": "team-a"}}));
        assert_eq!(cp.to_string(), "team-a/cp");
    }

    #[test]
    fn konnect_extension_decodes_ref() {
        let v = serde_json::json!({
            "apiVersion": "konnect.konghq.com/v1alpha2",
            "kind": "KonnectExtension",
            "metadata": {"name": "ext", "namespace": "ns"},
            "spec": {"konnect": {"controlPlane": {"ref": {"type": "konnectNamespacedRef", "konnectNamespacedRef": {"name": "cp"}}}}}
        });
        let ext: KonnectExtension = serde_json::from_value(v).unwrap();
        assert_eq!(ext.spec.konnect.control_plane.ref_.name(), "cp");
        assert_eq!(ext.spec.konnect.control_plane.ref_.namespace(), None);
    }

    #[test]
    fn sni_kind_is_upper_case() {
        let sni = KongSni::new(ObjectMeta::default(), KongSniSpec::default());
        assert_eq!(sni.kind, "KongSNI");
        assert_eq!(sni.api_version, "configuration.konghq.com/v1alpha1");
    }
}
