use konvert_core::gateway::HTTPRoute;
use konvert_core::meta::{join_routes, parse_routes};
use konvert_core::store::{self as ks, object_key, raw};
use konvert_core::{
    Error, KindRef, ObjectStore, OwnerKey, Result, StoreKind, ANNOTATION_ROUTES, LABEL_ROOT_KIND, LABEL_ROOT_NAME, LABEL_ROOT_NAMESPACE,
};
use serde_json::{json, Value as Json};
use tracing::{debug, warn};

/// First remaining route that still exists, as the object's next owner.
async fn successor(store: &dyn ObjectStore, remaining: &[&str]) -> Result<Option<OwnerKey>> {
    for id in remaining {
        let Some((ns, name)) = id.split_once('/') else {
            continue;
        };
        match ks::get::<HTTPRoute>(store, Some(ns), name).await {
            Ok(Some(r)) => return Ok(Some(OwnerKey::from_meta(&HTTPRoute::KIND.api_version(), HTTPRoute::KIND.kind, &r.metadata))),
            Ok(None) => continue,
            Err(e) => return Err(Error::store("get", format!("HTTPRoute {}", id), e)),
        }
    }
    Ok(None)
}

/// Decide whether an object no longer produced for `owner` may be deleted.
///
/// `Ok(true)` keeps the object: other routes still reference it, so `owner`
/// is removed from its routes annotation and owner references. When `owner`
/// held the only owner reference, ownership moves to a remaining route; if
/// none of them can be read the references are left for that route's next
/// translation to restamp. An error also means the object must be kept.
pub async fn release_route(store: &dyn ObjectStore, kind: &KindRef, obj: &Json, owner: &OwnerKey) -> Result<bool> {
    let route_id = owner.route_id();
    let routes = raw::annotation(obj, ANNOTATION_ROUTES).map(parse_routes).unwrap_or_default();
    let remaining: Vec<&str> = routes.iter().map(String::as_str).filter(|r| *r != route_id).collect();
    if remaining.is_empty() {
        return Ok(false);
    }
    let name = raw::name(obj);
    let ns = raw::namespace(obj);
    if remaining.len() == routes.len() {
        debug!(kind = kind.kind, name, "orphan: not referenced by this route; keeping");
        return Ok(true);
    }

    let refs: Vec<Json> = obj.get("metadata").and_then(|m| m.get("ownerReferences")).and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let others: Vec<Json> = refs.iter().filter(|r| r.get("uid").and_then(|u| u.as_str()) != Some(owner.uid.as_str())).cloned().collect();

    let mut meta = json!({ "annotations": { ANNOTATION_ROUTES: join_routes(remaining.iter().copied()) } });
    if !others.is_empty() {
        meta["ownerReferences"] = Json::Array(others);
    } else if let Some(next) = successor(store, &remaining).await? {
        let owner_ref = serde_json::to_value(next.owner_reference()).map_err(|source| Error::Encode { kind: kind.kind, name: name.to_string(), source })?;
        meta["ownerReferences"] = json!([owner_ref]);
        meta["labels"] = json!({
            LABEL_ROOT_KIND: next.kind,
            LABEL_ROOT_NAMESPACE: next.namespace,
            LABEL_ROOT_NAME: next.name,
        });
        debug!(kind = kind.kind, name, owner = %next.route_id(), "orphan: ownership moved");
    } else if !refs.is_empty() {
        debug!(kind = kind.kind, name, "orphan: no remaining route readable; owner reference left as is");
    }

    let patch = json!({ "metadata": meta });
    if let Err(e) = store.merge_patch(kind, ns, name, &patch).await {
        warn!(kind = kind.kind, name, error = %e, "orphan: releasing route failed; keeping");
        return Err(Error::store("patch", format!("{} {}", kind.kind, object_key(ns, name)), e));
    }
    debug!(kind = kind.kind, name, remaining = remaining.len(), "orphan: released route");
    Ok(true)
}
