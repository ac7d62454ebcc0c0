//! konvert kubehub: cluster client bootstrap and the kube-backed object store.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use konvert_core::{KindRef, LabelSelector, ObjectStore, StoreError};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const DEFAULT_FIELD_MANAGER: &str = "konvert";

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared client built from the ambient kubeconfig or in-cluster config.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async {
            let c = Client::try_default().await.context("building kube client")?;
            info!("kube client ready");
            Ok::<_, anyhow::Error>(c)
        })
        .await?;
    Ok(client.clone())
}

fn api_resource(kind: &KindRef) -> ApiResource {
    let gvk = GroupVersionKind::gvk(kind.group, kind.version, kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, kind.plural)
}

fn map_err(e: kube::Error) -> StoreError {
    counter!("kube_store_errors", 1u64);
    match e {
        kube::Error::Api(ae) => StoreError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        other => StoreError::Transport(other.to_string()),
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

fn to_json(obj: &DynamicObject, kind: &KindRef) -> Result<Json, StoreError> {
    let mut v = serde_json::to_value(obj).map_err(|e| StoreError::Decode { kind: kind.gvk_key(), message: e.to_string() })?;
    strip_managed_fields(&mut v);
    Ok(v)
}

/// [`ObjectStore`] over the Kubernetes API using dynamic objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, field_manager: DEFAULT_FIELD_MANAGER.to_string() }
    }

    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    /// Shared client; field manager from `KONVERT_FIELD_MANAGER`.
    pub async fn from_env() -> Result<Self> {
        let client = get_kube_client().await?;
        let mut store = Self::new(client);
        if let Ok(m) = std::env::var("KONVERT_FIELD_MANAGER") {
            if !m.is_empty() {
                store.field_manager = m;
            }
        }
        Ok(store)
    }

    fn api(&self, kind: &KindRef, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn obj_namespace(obj: &Json) -> Option<&str> {
    obj.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
}

fn obj_name<'a>(obj: &'a Json, kind: &KindRef) -> Result<&'a str, StoreError> {
    obj.get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| StoreError::Decode { kind: kind.gvk_key(), message: "missing metadata.name".into() })
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<Option<Json>, StoreError> {
        debug!(kind = kind.kind, ns = ?namespace, name, "kube: get");
        match self.api(kind, namespace).get_opt(name).await.map_err(map_err)? {
            Some(obj) => Ok(Some(to_json(&obj, kind)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, kind: &KindRef, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<Json>, StoreError> {
        debug!(kind = kind.kind, ns = ?namespace, selector = %selector.to_query(), "kube: list");
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_query());
        }
        let list = self.api(kind, namespace).list(&lp).await.map_err(map_err)?;
        list.items.iter().map(|o| to_json(o, kind)).collect()
    }

    async fn apply(&self, kind: &KindRef, obj: &Json) -> Result<Json, StoreError> {
        let name = obj_name(obj, kind)?;
        let pp = PatchParams::apply(&self.field_manager).force();
        let out = self.api(kind, obj_namespace(obj)).patch(name, &pp, &Patch::Apply(obj)).await.map_err(map_err)?;
        counter!("kube_store_applied", 1u64);
        to_json(&out, kind)
    }

    async fn merge_patch(&self, kind: &KindRef, namespace: Option<&str>, name: &str, patch: &Json) -> Result<(), StoreError> {
        self.api(kind, namespace).patch(name, &PatchParams::default(), &Patch::Merge(patch)).await.map_err(map_err)?;
        Ok(())
    }

    async fn patch_status(&self, kind: &KindRef, namespace: Option<&str>, name: &str, status: &Json) -> Result<(), StoreError> {
        let body = serde_json::json!({ "status": status });
        self.api(kind, namespace).patch_status(name, &PatchParams::default(), &Patch::Merge(&body)).await.map_err(map_err)?;
        Ok(())
    }

    async fn delete(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        match self.api(kind, namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE: KindRef =
        KindRef { group: "configuration.konghq.com", version: "v1alpha1", kind: "KongRoute", plural: "kongroutes", namespaced: true };

    #[test]
    fn api_resource_uses_declared_plural() {
        let ar = api_resource(&ROUTE);
        assert_eq!(ar.api_version, "configuration.konghq.com/v1alpha1");
        assert_eq!(ar.plural, "kongroutes");
        assert_eq!(ar.kind, "KongRoute");
    }

    #[test]
    fn managed_fields_are_dropped() {
        let mut v = serde_json::json!({"metadata": {"name": "a", "managedFields": [{}]}});
        strip_managed_fields(&mut v);
        assert!(v["metadata"].get("managedFields").is_none());
        assert_eq!(obj_name(&v, &ROUTE).unwrap(), "a");
    }

    #[test]
    fn name_is_required_for_apply() {
        let v = serde_json::json!({"metadata": {}});
        assert!(matches!(obj_name(&v, &ROUTE), Err(StoreError::Decode { .. })));
    }
}
