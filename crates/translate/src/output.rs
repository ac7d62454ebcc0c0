use konvert_core::kong::{
    KongCertificate, KongPlugin, KongPluginBinding, KongRoute, KongService, KongSni, KongTarget, KongUpstream,
};
use konvert_core::{hash_hex, set_metadata, Error, KindRef, MetadataPolicy, OwnerKey, Result, StoreKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value as Json;
use std::collections::BTreeSet;

/// A generated object, kept typed until it is handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Downstream {
    Upstream(KongUpstream),
    Target(KongTarget),
    Service(KongService),
    Route(KongRoute),
    Plugin(KongPlugin),
    PluginBinding(KongPluginBinding),
    Certificate(KongCertificate),
    Sni(KongSni),
}

macro_rules! each {
    ($self:expr, $o:ident => $body:expr) => {
        match $self {
            Downstream::Upstream($o) => $body,
            Downstream::Target($o) => $body,
            Downstream::Service($o) => $body,
            Downstream::Route($o) => $body,
            Downstream::Plugin($o) => $body,
            Downstream::PluginBinding($o) => $body,
            Downstream::Certificate($o) => $body,
            Downstream::Sni($o) => $body,
        }
    };
}

fn kind_of<T: StoreKind>(_: &T) -> KindRef { T::KIND }

impl Downstream {
    pub fn kind(&self) -> KindRef { each!(self, o => kind_of(o)) }

    pub fn name(&self) -> &str { each!(self, o => o.metadata.name.as_deref().unwrap_or("")) }

    pub fn metadata(&self) -> &ObjectMeta { each!(self, o => &o.metadata) }

    pub fn to_json(&self) -> Result<Json> {
        each!(self, o => serde_json::to_value(o).map_err(|source| Error::Encode { kind: kind_of(o).kind, name: self.name().to_string(), source }))
    }
}

/// Hash of the part of a generated object that identifies its content.
pub(crate) fn spec_hash<T: serde::Serialize>(kind: &'static str, name: &str, spec: &T) -> Result<String> {
    hash_hex(spec).map_err(|source| Error::Encode { kind, name: name.to_string(), source })
}

/// Metadata for a generated object: name, labels, owner, and optionally the routes annotation.
pub(crate) fn object_meta(
    name: String,
    owner: &OwnerKey,
    spec_hash: String,
    routes: Option<&BTreeSet<String>>,
) -> ObjectMeta {
    let mut meta = ObjectMeta { name: Some(name), namespace: Some(owner.namespace.clone()), ..Default::default() };
    set_metadata(&mut meta, &MetadataPolicy { owner, spec_hash, routes: routes.cloned() });
    meta
}

/// Objects produced by one translation call, in emission order. Each kind
/// and name appears once.
#[derive(Debug, Default, Clone)]
pub struct OutputStore {
    items: Vec<Downstream>,
    seen: BTreeSet<(&'static str, String)>,
}

impl OutputStore {
    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }

    /// Add `d` unless an object of the same kind and name is already present.
    /// Rules with the same backends name the same upstream, service, and targets.
    pub fn push(&mut self, d: Downstream) -> bool {
        if !self.seen.insert((d.kind().kind, d.name().to_string())) {
            return false;
        }
        self.items.push(d);
        true
    }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn items(&self) -> &[Downstream] { &self.items }

    pub fn contains(&self, kind: &str, name: &str) -> bool {
        self.seen.iter().any(|(k, n)| *k == kind && n == name)
    }

    /// Encode every object. Failures do not stop the others; they come back joined.
    pub fn to_json(&self) -> (Vec<Json>, Result<()>) {
        let mut out = Vec::with_capacity(self.items.len());
        let mut errs = Vec::new();
        for d in &self.items {
            match d.to_json() {
                Ok(v) => out.push(v),
                Err(e) => errs.push(e),
            }
        }
        (out, Error::join(errs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use konvert_core::kong::{ControlPlaneRef, KongUpstream, KongUpstreamSpec};

    fn upstream(name: &str) -> Downstream {
        let spec = KongUpstreamSpec { control_plane_ref: ControlPlaneRef::namespaced("cp", "ns"), name: name.to_string() };
        Downstream::Upstream(KongUpstream::new(ObjectMeta { name: Some(name.to_string()), ..Default::default() }, spec))
    }

    #[test]
    fn repeated_kind_and_name_is_kept_once() {
        let mut out = OutputStore::default();
        assert!(out.push(upstream("cp.a")));
        assert!(!out.push(upstream("cp.a")));
        assert!(out.push(upstream("cp.b")));
        assert_eq!(out.len(), 2);
        assert!(out.contains("KongUpstream", "cp.a"));
        out.clear();
        assert!(out.push(upstream("cp.a")));
    }
}
