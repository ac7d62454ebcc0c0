//! konvert resolve: route → Gateway → GatewayClass → GatewayConfiguration →
//! KonnectExtension → control plane, one hop at a time.
//!
//! Each hop returns a [`Lookup`]; only I/O failures and the cross-namespace
//! control-plane invariant are errors.

#![forbid(unsafe_code)]

mod grant;

pub use grant::{check_reference_grant, GrantQuery};

use konvert_core::gateway::{Gateway, GatewayClass, HTTPRouteParentRefs, GATEWAY_GROUP, KIND_GATEWAY};
use konvert_core::kong::{
    ControlPlaneRef, GatewayConfiguration, KonnectExtension, CONTROL_PLANE_REF_NAMESPACED, GATEWAY_OPERATOR_GROUP,
    KIND_GATEWAY_CONFIGURATION, KIND_KONNECT_EXTENSION, KONNECT_GROUP,
};
use konvert_core::store::{self as ks, object_key};
use konvert_core::{Error, ObjectStore, Result, StoreKind};
use tracing::debug;

/// Outcome of one hop. `Unsupported` means the reference is not ours to
/// handle; `NotFound` means it may resolve later.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound(String),
    Unsupported(String),
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool { matches!(self, Lookup::Found(_)) }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound(r) => Lookup::NotFound(r),
            Lookup::Unsupported(r) => Lookup::Unsupported(r),
        }
    }

    /// Human-readable reason for a miss.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Lookup::Found(_) => None,
            Lookup::NotFound(r) | Lookup::Unsupported(r) => Some(r),
        }
    }
}

/// Propagate a miss from an inner hop.
macro_rules! hop {
    ($e:expr) => {
        match $e {
            Lookup::Found(v) => v,
            Lookup::NotFound(r) => return Ok(Lookup::NotFound(r)),
            Lookup::Unsupported(r) => return Ok(Lookup::Unsupported(r)),
        }
    };
}

async fn fetch<T: StoreKind>(store: &dyn ObjectStore, namespace: Option<&str>, name: &str) -> Result<Lookup<T>> {
    match ks::get::<T>(store, namespace, name).await {
        Ok(Some(v)) => Ok(Lookup::Found(v)),
        Ok(None) => Ok(Lookup::NotFound(format!("{} {} not found", T::KIND.kind, object_key(namespace, name)))),
        Err(e) => Err(Error::store("get", format!("{} {}", T::KIND.kind, object_key(namespace, name)), e)),
    }
}

pub struct Resolver<'a> {
    store: &'a dyn ObjectStore,
    controller_name: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn ObjectStore, controller_name: &'a str) -> Self { Self { store, controller_name } }

    /// Gateway named by a route's parent reference.
    pub async fn gateway_for_parent_ref(&self, route_namespace: &str, parent: &HTTPRouteParentRefs) -> Result<Lookup<Gateway>> {
        let group = parent.group.as_deref().unwrap_or(GATEWAY_GROUP);
        let kind = parent.kind.as_deref().unwrap_or(KIND_GATEWAY);
        if group != GATEWAY_GROUP || kind != KIND_GATEWAY {
            return Ok(Lookup::Unsupported(format!("parent {}/{} {} is not a Gateway", group, kind, parent.name)));
        }
        let ns = parent.namespace.as_deref().unwrap_or(route_namespace);
        fetch::<Gateway>(self.store, Some(ns), &parent.name).await
    }

    pub async fn gateway_class(&self, gateway: &Gateway) -> Result<Lookup<GatewayClass>> {
        let class = hop!(fetch::<GatewayClass>(self.store, None, &gateway.spec.gateway_class_name).await?);
        if class.spec.controller_name != self.controller_name {
            return Ok(Lookup::Unsupported(format!(
                "GatewayClass {} is handled by {}",
                gateway.spec.gateway_class_name, class.spec.controller_name
            )));
        }
        Ok(Lookup::Found(class))
    }

    pub async fn gateway_configuration(&self, gateway: &Gateway, class: &GatewayClass) -> Result<Lookup<GatewayConfiguration>> {
        let class_name = class.metadata.name.as_deref().unwrap_or("");
        let Some(params) = class.spec.parameters_ref.as_ref() else {
            return Ok(Lookup::NotFound(format!("GatewayClass {} has no parametersRef", class_name)));
        };
        if params.group != GATEWAY_OPERATOR_GROUP || params.kind != KIND_GATEWAY_CONFIGURATION {
            return Ok(Lookup::Unsupported(format!("parametersRef {}/{} of GatewayClass {}", params.group, params.kind, class_name)));
        }
        let ns = params.namespace.as_deref().or(gateway.metadata.namespace.as_deref());
        fetch::<GatewayConfiguration>(self.store, ns, &params.name).await
    }

    pub async fn konnect_extension(&self, config: &GatewayConfiguration) -> Result<Lookup<KonnectExtension>> {
        let config_ns = config.metadata.namespace.as_deref();
        let Some(ext) = config.spec.extensions.iter().find(|e| e.group == KONNECT_GROUP && e.kind == KIND_KONNECT_EXTENSION) else {
            return Ok(Lookup::NotFound(format!(
                "GatewayConfiguration {} has no {} extension",
                object_key(config_ns, config.metadata.name.as_deref().unwrap_or("")),
                KIND_KONNECT_EXTENSION
            )));
        };
        let ns = ext.namespace.as_deref().or(config_ns);
        fetch::<KonnectExtension>(self.store, ns, &ext.name).await
    }

    /// Control plane named by an extension, namespace defaulted to the extension's.
    pub fn control_plane_of(&self, ext: &KonnectExtension) -> Result<Lookup<ControlPlaneRef>> {
        let ext_ns = ext.metadata.namespace.clone().unwrap_or_default();
        let ext_name = ext.metadata.name.as_deref().unwrap_or("");
        let r = &ext.spec.konnect.control_plane.ref_;
        if r.type_ != CONTROL_PLANE_REF_NAMESPACED {
            return Ok(Lookup::Unsupported(format!("control plane ref type {:?} on {}/{}", r.type_, ext_ns, ext_name)));
        }
        let Some(nref) = r.konnect_namespaced_ref.as_ref() else {
            return Ok(Lookup::NotFound(format!("KonnectExtension {}/{} has no control plane ref", ext_ns, ext_name)));
        };
        let cp_ns = nref.namespace.clone().unwrap_or_else(|| ext_ns.clone());
        if cp_ns != ext_ns {
            return Err(Error::CrossNamespaceControlPlane {
                extension: format!("{}/{}", ext_ns, ext_name),
                namespace: cp_ns,
                name: nref.name.clone(),
            });
        }
        Ok(Lookup::Found(ControlPlaneRef::namespaced(nref.name.clone(), cp_ns)))
    }

    /// Gateway → control plane.
    pub async fn control_plane_for_gateway(&self, gateway: &Gateway) -> Result<Lookup<ControlPlaneRef>> {
        let class = hop!(self.gateway_class(gateway).await?);
        let config = hop!(self.gateway_configuration(gateway, &class).await?);
        let ext = hop!(self.konnect_extension(&config).await?);
        let cp = self.control_plane_of(&ext)?;
        if let Lookup::Found(cp) = &cp {
            debug!(gateway = ?gateway.metadata.name, cp = %cp, "resolve: control plane found");
        }
        Ok(cp)
    }

    /// Parent reference → Gateway and its control plane.
    pub async fn control_plane_for_parent_ref(
        &self,
        route_namespace: &str,
        parent: &HTTPRouteParentRefs,
    ) -> Result<Lookup<(Gateway, ControlPlaneRef)>> {
        let gateway = hop!(self.gateway_for_parent_ref(route_namespace, parent).await?);
        let cp = hop!(self.control_plane_for_gateway(&gateway).await?);
        Ok(Lookup::Found((gateway, cp)))
    }
}
