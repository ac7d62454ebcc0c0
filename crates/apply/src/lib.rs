//! konvert apply: drive one converter pass against a store.
//!
//! Order is fixed: root status, translation, upsert of changed objects,
//! removal of redundant duplicates, then orphan resolution.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use konvert_core::kong::DOWNSTREAM_KINDS;
use konvert_core::store::{object_key, raw};
use konvert_core::{Error, KindRef, ObjectStore, Result, ANNOTATION_ROUTES, LABEL_HASH_SPEC};
use konvert_translate::reduce::run_chain;
use konvert_translate::Converter;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

/// One object written during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applied {
    pub kind: String,
    pub name: String,
    /// `None` for creations.
    pub diff: Option<DiffSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub status_updated: bool,
    /// The converter asked to stop after status; nothing else ran.
    pub stopped: bool,
    pub translated: usize,
    pub applied: Vec<Applied>,
    pub unchanged: usize,
    /// `kind/name` of every deleted object.
    pub deleted: Vec<String>,
    pub kept_orphans: usize,
}

type Identity = (&'static str, String);

fn kind_of(obj: &Json) -> Option<&'static KindRef> { DOWNSTREAM_KINDS.iter().find(|k| k.matches(obj)) }

fn identity(kind: &KindRef, obj: &Json) -> Identity { (kind.kind, raw::name(obj).to_string()) }

fn label_of(kind: &KindRef, obj: &Json) -> String { format!("{} {}", kind.kind, object_key(raw::namespace(obj), raw::name(obj))) }

/// Whether `desired` differs from `live` in anything this engine owns.
fn needs_apply(desired: &Json, live: &Json) -> bool {
    raw::label(desired, LABEL_HASH_SPEC) != raw::label(live, LABEL_HASH_SPEC)
        || raw::annotation(desired, ANNOTATION_ROUTES) != raw::annotation(live, ANNOTATION_ROUTES)
}

/// Run one pass for `converter`.
///
/// Fatal failures stop the pass where they happen. Everything else is
/// collected and returned joined next to the report of what was done.
pub async fn reconcile(converter: &mut dyn Converter, store: &dyn ObjectStore) -> (ReconcileReport, Result<()>) {
    let t0 = Instant::now();
    let owner = converter.owner().clone();
    let mut report = ReconcileReport::default();
    let mut errors = Vec::new();

    match converter.update_root_object_status().await {
        Ok((updated, stop)) => {
            report.status_updated = updated;
            if stop {
                debug!(kind = %owner.kind, ns = %owner.namespace, name = %owner.name, "reconcile: stop after status");
                report.stopped = true;
                return (report, Ok(()));
            }
        }
        Err(e) => return (report, Err(e)),
    }

    match converter.translate().await {
        Ok(_) => {}
        Err(e) if e.is_fatal() => return (report, Err(e)),
        Err(e) => errors.push(e),
    }
    let (desired, encoded) = converter.output_store();
    if let Err(e) = encoded {
        errors.push(e);
    }
    report.translated = desired.len();

    let existing = match converter.list_existing_objects().await {
        Ok(v) => v,
        Err(e) => {
            errors.push(e);
            return (report, Error::join(errors));
        }
    };
    let live: BTreeMap<Identity, &Json> = existing.iter().filter_map(|o| kind_of(o).map(|k| (identity(k, o), o))).collect();

    let mut wanted: BTreeSet<Identity> = BTreeSet::new();
    for obj in &desired {
        let Some(kind) = kind_of(obj) else {
            warn!(kind = raw::kind(obj), name = raw::name(obj), "reconcile: not a downstream kind; skipping");
            continue;
        };
        let id = identity(kind, obj);
        wanted.insert(id.clone());
        let prev = live.get(&id).copied();
        if prev.map_or(false, |p| !needs_apply(obj, p)) {
            report.unchanged += 1;
            continue;
        }
        let diff = prev.map(|p| diff_summary(&strip_noisy(obj.clone()), &strip_noisy(p.clone())));
        match store.apply(kind, obj).await {
            Ok(_) => {
                counter!("reconcile_applied", 1u64);
                debug!(object = %label_of(kind, obj), diff = ?diff, "reconcile: apply ok");
                report.applied.push(Applied { kind: kind.kind.to_string(), name: id.1, diff });
            }
            Err(e) => {
                warn!(object = %label_of(kind, obj), error = %e, "reconcile: apply failed");
                errors.push(Error::store("apply", label_of(kind, obj), e));
            }
        }
    }

    // duplicates: same kind and same content hash
    let mut groups: BTreeMap<(&'static str, String), Vec<Json>> = BTreeMap::new();
    for obj in &existing {
        let (Some(kind), Some(hash)) = (kind_of(obj), raw::label(obj, LABEL_HASH_SPEC)) else { continue };
        groups.entry((kind.kind, hash.to_string())).or_default().push(obj.clone());
    }
    let mut gone: BTreeSet<Identity> = BTreeSet::new();
    for (_, group) in groups.into_iter().filter(|(_, g)| g.len() > 1) {
        let chain = converter.reduce(&group[0]);
        for obj in run_chain(&chain, group) {
            let Some(kind) = kind_of(&obj) else { continue };
            let id = identity(kind, &obj);
            if wanted.contains(&id) {
                continue;
            }
            match delete(store, kind, &obj).await {
                Ok(()) => {
                    report.deleted.push(format!("{}/{}", id.0, id.1));
                    gone.insert(id);
                }
                Err(e) => errors.push(e),
            }
        }
    }

    for obj in &existing {
        let Some(kind) = kind_of(obj) else { continue };
        let id = identity(kind, obj);
        if wanted.contains(&id) || gone.contains(&id) {
            continue;
        }
        match converter.handle_orphaned_resource(obj).await {
            Ok(true) => {
                counter!("reconcile_kept_orphans", 1u64);
                report.kept_orphans += 1;
            }
            Ok(false) => match delete(store, kind, obj).await {
                Ok(()) => report.deleted.push(format!("{}/{}", id.0, id.1)),
                Err(e) => errors.push(e),
            },
            Err(e) => {
                warn!(object = %label_of(kind, obj), error = %e, "reconcile: orphan kept after error");
                report.kept_orphans += 1;
                errors.push(e);
            }
        }
    }

    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    info!(
        kind = %owner.kind,
        ns = %owner.namespace,
        name = %owner.name,
        applied = report.applied.len(),
        unchanged = report.unchanged,
        deleted = report.deleted.len(),
        kept = report.kept_orphans,
        took_ms = %t0.elapsed().as_millis(),
        "reconcile: done"
    );
    (report, Error::join(errors))
}

async fn delete(store: &dyn ObjectStore, kind: &KindRef, obj: &Json) -> Result<()> {
    store
        .delete(kind, raw::namespace(obj), raw::name(obj))
        .await
        .map_err(|e| Error::store("delete", label_of(kind, obj), e))?;
    counter!("reconcile_deleted", 1u64);
    debug!(object = %label_of(kind, obj), "reconcile: delete ok");
    Ok(())
}

/// Drop server-populated fields before comparing.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(obj) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in ["managedFields", "resourceVersion", "generation", "creationTimestamp", "uid"] {
            obj.remove(field);
        }
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

/// Count leaf-level additions, updates, and removals from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, s),
                        None => s.adds += 1,
                    }
                }
                s.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                s.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                s.adds += aa.len().saturating_sub(bb.len());
                s.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut s);
    s
}
