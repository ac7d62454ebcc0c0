//! konvert translate: converters from routing intent to proxy configuration.
//!
//! A [`Converter`] is built per root object by [`new_converter`]. Each call to
//! [`Converter::translate`] rebuilds the output from current cluster state;
//! nothing carries over between calls.

#![forbid(unsafe_code)]

pub mod gateway;
pub mod httproute;
mod matches;
pub mod namegen;
pub mod orphan;
pub mod output;
mod plugins;
pub mod reduce;
pub mod service;
pub mod status;
pub mod targets;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Service;
use konvert_core::gateway::{Gateway, HTTPRoute};
use konvert_core::kong::DOWNSTREAM_KINDS;
use konvert_core::meta::{managed_selector, parse_routes};
use konvert_core::store::raw;
use konvert_core::{Error, KindRef, ObjectStore, OwnerKey, Result, StoreError, StoreKind, TranslateOptions, ANNOTATION_ROUTES};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{info, warn};

pub use gateway::GatewayConverter;
pub use httproute::HttpRouteConverter;
pub use output::{Downstream, OutputStore};
pub use reduce::ReduceFn;
pub use service::ServiceConverter;

/// The user-authored object being translated.
#[derive(Debug, Clone)]
pub enum RootObject {
    Gateway(Gateway),
    HttpRoute(HTTPRoute),
    Service(Service),
}

impl RootObject {
    /// Decode a raw object; kinds that are not roots yield `None`.
    pub fn from_json(v: Json) -> Result<Option<Self>, StoreError> {
        fn decode<T: StoreKind>(v: Json) -> Result<T, StoreError> {
            serde_json::from_value(v).map_err(|e| StoreError::Decode { kind: T::KIND.gvk_key(), message: e.to_string() })
        }
        Ok(if Gateway::KIND.matches(&v) {
            Some(RootObject::Gateway(decode(v)?))
        } else if HTTPRoute::KIND.matches(&v) {
            Some(RootObject::HttpRoute(decode(v)?))
        } else if Service::KIND.matches(&v) {
            Some(RootObject::Service(decode(v)?))
        } else {
            None
        })
    }

    pub fn kind_ref(&self) -> KindRef {
        match self {
            RootObject::Gateway(_) => Gateway::KIND,
            RootObject::HttpRoute(_) => HTTPRoute::KIND,
            RootObject::Service(_) => Service::KIND,
        }
    }

    pub fn owner(&self) -> OwnerKey {
        let kind = self.kind_ref();
        let meta = match self {
            RootObject::Gateway(o) => &o.metadata,
            RootObject::HttpRoute(o) => &o.metadata,
            RootObject::Service(o) => &o.metadata,
        };
        OwnerKey::from_meta(&kind.api_version(), kind.kind, meta)
    }
}

/// Per-root translation contract consumed by the reconcile driver.
#[async_trait::async_trait]
pub trait Converter: Send + Sync {
    /// Snapshot of the root object this converter was built for.
    fn root_object(&self) -> RootObject;

    fn owner(&self) -> &OwnerKey;

    /// Rebuild the output from current state. Returns the number of objects
    /// produced. Per-unit failures come back joined while the output keeps
    /// everything that succeeded; fatal errors (see [`Error::is_fatal`]) leave
    /// the output unusable.
    async fn translate(&mut self) -> Result<usize>;

    /// Output as raw objects plus any per-object encoding failures.
    fn output_store(&self) -> (Vec<Json>, Result<()>);

    /// Objects previously produced for this root.
    async fn list_existing_objects(&self) -> Result<Vec<Json>>;

    /// Chain selecting deletable duplicates of objects like `obj`.
    fn reduce(&self, obj: &Json) -> Vec<ReduceFn>;

    /// Recompute and write root status. Returns `(updated, stop)`; `stop`
    /// means no further processing this pass.
    async fn update_root_object_status(&mut self) -> Result<(bool, bool)>;

    /// `Ok(true)` keeps an orphaned object. An error also means keep.
    async fn handle_orphaned_resource(&self, obj: &Json) -> Result<bool>;
}

/// Converter for `root`.
pub fn new_converter(root: RootObject, store: Arc<dyn ObjectStore>, options: TranslateOptions) -> Box<dyn Converter> {
    match root {
        RootObject::Gateway(gw) => Box::new(GatewayConverter::new(gw, store, options)),
        RootObject::HttpRoute(r) => Box::new(HttpRouteConverter::new(r, store, options)),
        RootObject::Service(s) => Box::new(ServiceConverter::new(s, store, options)),
    }
}

/// Reduce chain by kind.
pub(crate) fn reduce_for(obj: &Json) -> Vec<ReduceFn> {
    if raw::kind(obj) == "KongPlugin" { reduce::plugin_chain() } else { reduce::default_chain() }
}

/// Existing objects labelled for `owner`; with `shared`, also objects whose
/// routes annotation lists it.
pub(crate) async fn list_owned(store: &dyn ObjectStore, owner: &OwnerKey, shared: bool) -> Result<Vec<Json>> {
    let ns = Some(owner.namespace.as_str()).filter(|n| !n.is_empty());
    let own_selector = owner.selector();
    let managed = managed_selector();
    let route_id = owner.route_id();
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for kind in DOWNSTREAM_KINDS.iter() {
        let selector = if shared { &managed } else { &own_selector };
        let items = store
            .list(kind, ns, selector)
            .await
            .map_err(|e| Error::store("list", format!("{} {}", kind.kind, owner.namespace), e))?;
        for obj in items {
            let mine = own_selector.matches(obj.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.as_object()));
            let listed = raw::annotation(&obj, ANNOTATION_ROUTES).map(|a| parse_routes(a).contains(&route_id)).unwrap_or(false);
            if (mine || listed) && seen.insert((kind.kind, raw::name(&obj).to_string())) {
                out.push(obj);
            }
        }
    }
    Ok(out)
}

/// Record metrics and a summary line for one translation.
pub(crate) fn record_translate(kind: &str, owner: &OwnerKey, started: Instant, res: &Result<usize>) {
    counter!("translate_attempts", 1u64);
    histogram!("translate_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    match res {
        Ok(n) => info!(kind, ns = %owner.namespace, name = %owner.name, count = n, took_ms = %started.elapsed().as_millis(), "translate: ok"),
        Err(e) => {
            counter!("translate_errors", 1u64);
            warn!(kind, ns = %owner.namespace, name = %owner.name, failures = e.count(), error = %e, "translate: failed");
        }
    }
}
