//! Object store contract consumed by the engine.
//!
//! The store is untyped (JSON values addressed by [`KindRef`]) so a single
//! trait object can serve every kind; [`get`] and [`list`] decode into typed
//! models implementing [`StoreKind`].

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;

use crate::error::StoreError;

/// Static description of a served kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindRef {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl KindRef {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.to_string() } else { format!("{}/{}", self.group, self.version) }
    }

    pub fn gvk_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }

    /// Whether a raw object is of this kind (apiVersion + kind).
    pub fn matches(&self, obj: &Json) -> bool {
        obj.get("kind").and_then(|v| v.as_str()) == Some(self.kind)
            && obj.get("apiVersion").and_then(|v| v.as_str()) == Some(self.api_version().as_str())
    }
}

/// A typed model that can be read from and written to the store.
pub trait StoreKind: Serialize + DeserializeOwned + Send + Sync {
    const KIND: KindRef;
}

/// Bind a model type to its served kind.
macro_rules! impl_kind {
    ($ty:ty, $group:expr, $version:expr, $kind:expr, $plural:expr, $namespaced:expr) => {
        impl $crate::store::StoreKind for $ty {
            const KIND: $crate::store::KindRef =
                $crate::store::KindRef { group: $group, version: $version, kind: $kind, plural: $plural, namespaced: $namespaced };
        }
    };
}

/// [`impl_kind!`] plus serde defaults and a constructor for `{apiVersion, kind, metadata, spec}` models.
macro_rules! impl_model {
    ($ty:ident, $spec:ty, $group:expr, $version:expr, $kind:expr, $plural:expr, $namespaced:expr) => {
        $crate::store::impl_kind!($ty, $group, $version, $kind, $plural, $namespaced);

        impl $ty {
            fn default_api_version() -> String {
                <Self as $crate::store::StoreKind>::KIND.api_version()
            }

            fn default_kind() -> String {
                <Self as $crate::store::StoreKind>::KIND.kind.to_string()
            }

            pub fn new(metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, spec: $spec) -> Self {
                Self { api_version: Self::default_api_version(), kind: Self::default_kind(), metadata, spec, ..Default::default() }
            }
        }
    };
}

pub(crate) use impl_kind;
pub(crate) use impl_model;

impl_kind!(k8s_openapi::api::core::v1::Service, "", "v1", "Service", "services", true);
impl_kind!(k8s_openapi::api::core::v1::Secret, "", "v1", "Secret", "secrets", true);
impl_kind!(k8s_openapi::api::discovery::v1::EndpointSlice, "discovery.k8s.io", "v1", "EndpointSlice", "endpointslices", true);

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn matches(&self, labels: Option<&serde_json::Map<String, Json>>) -> bool {
        self.0.iter().all(|(k, v)| labels.and_then(|l| l.get(k)).and_then(|x| x.as_str()) == Some(v.as_str()))
    }

    /// Render in the `k=v,k2=v2` wire form.
    pub fn to_query(&self) -> String {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
    }
}

/// Read/write access to cluster objects. "Not found" is `Ok(None)` on reads.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<Option<Json>, StoreError>;

    async fn list(&self, kind: &KindRef, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<Json>, StoreError>;

    /// Create or update (server-side apply semantics). Returns the stored object.
    async fn apply(&self, kind: &KindRef, obj: &Json) -> Result<Json, StoreError>;

    async fn merge_patch(&self, kind: &KindRef, namespace: Option<&str>, name: &str, patch: &Json) -> Result<(), StoreError>;

    /// Replace the status sub-resource.
    async fn patch_status(&self, kind: &KindRef, namespace: Option<&str>, name: &str, status: &Json) -> Result<(), StoreError>;

    /// Deleting an absent object succeeds.
    async fn delete(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<(), StoreError>;
}

fn decode<T: StoreKind>(v: Json) -> Result<T, StoreError> {
    serde_json::from_value(v).map_err(|e| StoreError::Decode { kind: T::KIND.gvk_key(), message: e.to_string() })
}

pub async fn get<T: StoreKind>(store: &dyn ObjectStore, namespace: Option<&str>, name: &str) -> Result<Option<T>, StoreError> {
    match store.get(&T::KIND, namespace, name).await? {
        Some(v) => Ok(Some(decode(v)?)),
        None => Ok(None),
    }
}

pub async fn list<T: StoreKind>(store: &dyn ObjectStore, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<T>, StoreError> {
    store.list(&T::KIND, namespace, selector).await?.into_iter().map(decode).collect()
}

/// `namespace/name` (or bare name for cluster-scoped objects).
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
        _ => name.to_string(),
    }
}

/// Accessors for raw object metadata.
pub mod raw {
    use serde_json::Value as Json;

    pub fn name(obj: &Json) -> &str {
        obj.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn namespace(obj: &Json) -> Option<&str> {
        obj.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
    }

    pub fn kind(obj: &Json) -> &str {
        obj.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn label<'a>(obj: &'a Json, key: &str) -> Option<&'a str> {
        obj.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.get(key)).and_then(|v| v.as_str())
    }

    pub fn annotation<'a>(obj: &'a Json, key: &str) -> Option<&'a str> {
        obj.get("metadata").and_then(|m| m.get("annotations")).and_then(|l| l.get(key)).and_then(|v| v.as_str())
    }

    /// Creation time as unix seconds; missing or malformed stamps sort first.
    pub fn creation_ts(obj: &Json) -> i64 {
        obj.get("metadata")
            .and_then(|m| m.get("creationTimestamp"))
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0)
    }

    /// Whether `status.conditions` carries `type` with status `True`.
    pub fn condition_true(obj: &Json, type_: &str) -> bool {
        obj.get("status")
            .and_then(|s| s.get("conditions"))
            .and_then(|c| c.as_array())
            .map(|conds| {
                conds.iter().any(|c| {
                    c.get("type").and_then(|v| v.as_str()) == Some(type_) && c.get("status").and_then(|v| v.as_str()) == Some("True")
                })
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGET: KindRef = KindRef { group: "example.io", version: "v1", kind: "Widget", plural: "widgets", namespaced: true };
    const POD: KindRef = KindRef { group: "", version: "v1", kind: "Pod", plural: "pods", namespaced: true };

    #[test]
    fn api_version_handles_core_group() {
        assert_eq!(POD.api_version(), "v1");
        assert_eq!(WIDGET.api_version(), "example.io/v1");
        assert_eq!(WIDGET.gvk_key(), "example.io/v1/Widget");
    }

    #[test]
    fn selector_matches_all_pairs() {
        let sel = LabelSelector::new().with("a", "1").with("b", "2");
        let labels = serde_json::json!({"a": "1", "b": "2", "c": "3"});
        assert!(sel.matches(labels.as_object()));
        let partial = serde_json::json!({"a": "1"});
        assert!(!sel.matches(partial.as_object()));
        assert!(LabelSelector::new().matches(None));
        assert_eq!(sel.to_query(), "a=1,b=2");
    }

    #[test]
    fn raw_condition_lookup() {
        let obj = serde_json::json!({
            "status": {"conditions": [{"type": "Programmed", "status": "True"}, {"type": "Ready", "status": "False"}]}
        });
        assert!(raw::condition_true(&obj, "Programmed"));
        assert!(!raw::condition_true(&obj, "Ready"));
        assert!(!raw::condition_true(&serde_json::json!({}), "Programmed"));
    }

    #[test]
    fn object_key_omits_empty_namespace() {
        assert_eq!(object_key(Some("ns"), "a"), "ns/a");
        assert_eq!(object_key(None, "a"), "a");
        assert_eq!(object_key(Some(""), "a"), "a");
    }
}
