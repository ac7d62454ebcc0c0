//! Ownership metadata stamped on every generated object.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use smallvec::SmallVec;

use crate::store::LabelSelector;
use crate::{
    ANNOTATION_ROUTES, LABEL_HASH_SPEC, LABEL_MANAGED_BY, LABEL_ROOT_KIND, LABEL_ROOT_NAME, LABEL_ROOT_NAMESPACE, MANAGED_BY_VALUE,
};

/// Identity of the root object a translation runs for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl OwnerKey {
    pub fn from_meta(api_version: &str, kind: &str, meta: &ObjectMeta) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
        }
    }

    /// `namespace/name`, the form recorded in the routes annotation.
    pub fn route_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Selector for objects produced by this root.
    pub fn selector(&self) -> LabelSelector {
        managed_selector()
            .with(LABEL_ROOT_KIND, self.kind.clone())
            .with(LABEL_ROOT_NAMESPACE, self.namespace.clone())
            .with(LABEL_ROOT_NAME, self.name.clone())
    }

    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            block_owner_deletion: Some(true),
            controller: Some(true),
        }
    }
}

/// Every object carrying the managed-by label.
pub fn managed_selector() -> LabelSelector {
    LabelSelector::new().with(LABEL_MANAGED_BY, MANAGED_BY_VALUE)
}

/// What [`set_metadata`] writes onto a generated object.
#[derive(Debug, Clone)]
pub struct MetadataPolicy<'a> {
    pub owner: &'a OwnerKey,
    pub spec_hash: String,
    /// Shared objects record every referencing route; `None` leaves the annotation alone.
    pub routes: Option<BTreeSet<String>>,
}

/// Stamp labels, annotations, and the controller owner reference.
///
/// Existing foreign labels and annotations are preserved. The owner reference
/// always points at the current root.
pub fn set_metadata(meta: &mut ObjectMeta, policy: &MetadataPolicy<'_>) {
    let owner = policy.owner;
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_ROOT_KIND.to_string(), owner.kind.clone());
    labels.insert(LABEL_ROOT_NAMESPACE.to_string(), owner.namespace.clone());
    labels.insert(LABEL_ROOT_NAME.to_string(), owner.name.clone());
    labels.insert(LABEL_HASH_SPEC.to_string(), policy.spec_hash.clone());

    if let Some(routes) = &policy.routes {
        meta.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION_ROUTES.to_string(), join_routes(routes.iter().map(String::as_str)));
    }

    if meta.namespace.is_none() && !owner.namespace.is_empty() {
        meta.namespace = Some(owner.namespace.clone());
    }
    meta.owner_references = Some(vec![owner.owner_reference()]);
}

/// Split a routes annotation value; blanks are dropped.
pub fn parse_routes(s: &str) -> SmallVec<[String; 4]> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

pub fn join_routes<'a>(routes: impl IntoIterator<Item = &'a str>) -> String {
    routes.into_iter().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerKey {
        OwnerKey {
            api_version: "gateway.networking.k8s.io/v1".into(),
            kind: "HTTPRoute".into(),
            namespace: "ns".into(),
            name: "r".into(),
            uid: "u-1".into(),
        }
    }

    #[test]
    fn stamps_labels_and_owner() {
        let o = owner();
        let mut meta = ObjectMeta {
            name: Some("x".into()),
            labels: Some(BTreeMap::from([("team".to_string(), "a".to_string())])),
            ..Default::default()
        };
        let routes = BTreeSet::from(["ns/r".to_string(), "ns/other".to_string()]);
        set_metadata(&mut meta, &MetadataPolicy { owner: &o, spec_hash: "abc".into(), routes: Some(routes) });

        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get("team").map(String::as_str), Some("a"));
        assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY_VALUE));
        assert_eq!(labels.get(LABEL_HASH_SPEC).map(String::as_str), Some("abc"));
        assert_eq!(meta.annotations.as_ref().unwrap().get(ANNOTATION_ROUTES).map(String::as_str), Some("ns/other,ns/r"));
        assert_eq!(meta.namespace.as_deref(), Some("ns"));

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].block_owner_deletion, Some(true));
        assert_eq!(refs[0].uid, "u-1");
    }

    #[test]
    fn selector_carries_root_identity() {
        let sel = owner().selector();
        assert_eq!(sel.0.len(), 4);
        assert_eq!(sel.0.get(LABEL_ROOT_NAME).map(String::as_str), Some("r"));
    }

    #[test]
    fn parse_routes_skips_blanks() {
        let v = parse_routes("ns/a, ,ns/b,");
        assert_eq!(v.as_slice(), ["ns/a".to_string(), "ns/b".to_string()]);
        assert!(parse_routes("").is_empty());
    }
}
