//! Service converter: an annotated Service becomes one upstream per port
//! with its targets, without any route in front of it.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Service;
use konvert_core::gateway::{BackendReference, KIND_SERVICE};
use konvert_core::kong::{ControlPlaneRef, KongUpstream, KongUpstreamSpec};
use konvert_core::{Error, ObjectStore, OwnerKey, Result, TranslateOptions, ANNOTATION_CONTROL_PLANE};
use serde_json::Value as Json;
use tracing::debug;

use crate::output::{object_meta, spec_hash, Downstream, OutputStore};
use crate::targets::{targets_for_backend_refs, TargetContext};
use crate::{list_owned, namegen, record_translate, reduce_for, Converter, ReduceFn, RootObject};

pub struct ServiceConverter {
    service: Service,
    owner: OwnerKey,
    store: Arc<dyn ObjectStore>,
    options: TranslateOptions,
    output: OutputStore,
}

/// Control plane named by the annotation value `name` or `namespace/name`.
/// A namespace other than the Service's is rejected.
pub fn control_plane_from_annotation(service_namespace: &str, service_name: &str, value: &str) -> Result<ControlPlaneRef> {
    let (ns, name) = match value.split_once('/') {
        Some((ns, name)) => (ns.trim(), name.trim()),
        None => (service_namespace, value.trim()),
    };
    if ns != service_namespace {
        return Err(Error::CrossNamespaceControlPlane {
            extension: format!("Service {}/{}", service_namespace, service_name),
            namespace: ns.to_string(),
            name: name.to_string(),
        });
    }
    if name.is_empty() {
        return Err(Error::InvalidReference {
            key: format!("Service {}/{}", service_namespace, service_name),
            reason: format!("empty control plane in {} annotation", ANNOTATION_CONTROL_PLANE),
        });
    }
    Ok(ControlPlaneRef::namespaced(name, ns))
}

impl ServiceConverter {
    pub fn new(service: Service, store: Arc<dyn ObjectStore>, options: TranslateOptions) -> Self {
        let owner = RootObject::Service(service.clone()).owner();
        Self { service, owner, store, options, output: OutputStore::default() }
    }

    fn annotation(&self) -> Option<&str> {
        self.service.metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_CONTROL_PLANE)).map(String::as_str)
    }

    async fn translate_inner(&mut self) -> Result<usize> {
        self.output.clear();
        let Some(value) = self.annotation() else {
            debug!(service = %self.owner.route_id(), "service: no control plane annotation; nothing to translate");
            return Ok(0);
        };
        let cp = control_plane_from_annotation(&self.owner.namespace, &self.owner.name, value)?;
        let ports: Vec<i32> = self.service.spec.iter().flat_map(|s| s.ports.iter().flatten()).map(|p| p.port).collect();

        for port in ports {
            let name = namegen::service_upstream_name(&cp, &self.owner.namespace, &self.owner.name, port);
            let spec = KongUpstreamSpec { control_plane_ref: cp.clone(), name: name.clone() };
            let hash = spec_hash("KongUpstream", &name, &spec)?;
            self.output.push(Downstream::Upstream(KongUpstream::new(object_meta(name.clone(), &self.owner, hash, None), spec)));

            let backend = BackendReference { name: self.owner.name.clone(), port: Some(port), ..Default::default() };
            let ctx = TargetContext { store: self.store.as_ref(), options: &self.options, owner: &self.owner, control_plane: &cp, routes: None };
            let targets = targets_for_backend_refs(&ctx, &self.owner.namespace, std::slice::from_ref(&backend), &name).await?;
            for t in targets {
                self.output.push(Downstream::Target(t));
            }
        }
        Ok(self.output.len())
    }
}

#[async_trait::async_trait]
impl Converter for ServiceConverter {
    fn root_object(&self) -> RootObject { RootObject::Service(self.service.clone()) }

    fn owner(&self) -> &OwnerKey { &self.owner }

    async fn translate(&mut self) -> Result<usize> {
        let t0 = Instant::now();
        let res = self.translate_inner().await;
        record_translate(KIND_SERVICE, &self.owner, t0, &res);
        res
    }

    fn output_store(&self) -> (Vec<Json>, Result<()>) { self.output.to_json() }

    async fn list_existing_objects(&self) -> Result<Vec<Json>> { list_owned(self.store.as_ref(), &self.owner, false).await }

    fn reduce(&self, obj: &Json) -> Vec<ReduceFn> { reduce_for(obj) }

    /// Services carry no status of ours. Never stops: a Service whose
    /// annotation was removed translates to nothing and its objects go away.
    async fn update_root_object_status(&mut self) -> Result<(bool, bool)> { Ok((false, false)) }

    async fn handle_orphaned_resource(&self, _obj: &Json) -> Result<bool> { Ok(false) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_defaults_to_service_namespace() {
        let cp = control_plane_from_annotation("apps", "echo", "cp").unwrap();
        assert_eq!(cp, ControlPlaneRef::namespaced("cp", "apps"));
        let cp = control_plane_from_annotation("apps", "echo", "apps/cp").unwrap();
        assert_eq!(cp, ControlPlaneRef::namespaced("cp", "apps"));
    }

    #[test]
    fn annotation_rejects_other_namespaces() {
        let err = control_plane_from_annotation("apps", "echo", "infra/cp").unwrap_err();
        assert!(matches!(err, Error::CrossNamespaceControlPlane { .. }));
        assert!(err.is_fatal());
        assert!(matches!(control_plane_from_annotation("apps", "echo", "apps/").unwrap_err(), Error::InvalidReference { .. }));
    }
}
