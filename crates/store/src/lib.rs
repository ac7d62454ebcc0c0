//! konvert store: in-RAM [`ObjectStore`] with copy-on-write snapshots.
//!
//! Readers see an immutable snapshot; writers swap in a new map. Faults can be
//! injected per operation and kind to exercise I/O error paths.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use arc_swap::ArcSwap;
use konvert_core::store::raw;
use konvert_core::{KindRef, LabelSelector, ObjectStore, StoreError, StoreKind};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

/// Identity of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjKey {
    /// `apiVersion/kind`
    pub gvk: String,
    pub namespace: String,
    pub name: String,
}

impl ObjKey {
    fn new(gvk: String, namespace: Option<&str>, name: &str) -> Self {
        Self { gvk, namespace: namespace.unwrap_or("").to_string(), name: name.to_string() }
    }

    fn for_kind(kind: &KindRef, namespace: Option<&str>, name: &str) -> Self {
        Self::new(kind.gvk_key(), if kind.namespaced { namespace } else { None }, name)
    }

    fn of(obj: &Json) -> Option<Self> {
        let api_version = obj.get("apiVersion").and_then(|v| v.as_str())?;
        let kind = obj.get("kind").and_then(|v| v.as_str())?;
        let name = raw::name(obj);
        if name.is_empty() {
            return None;
        }
        Some(Self::new(format!("{}/{}", api_version, kind), raw::namespace(obj), name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Get,
    List,
    Apply,
    MergePatch,
    PatchStatus,
    Delete,
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    kind: &'static str,
    err: StoreError,
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: Op,
    pub kind: &'static str,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct World {
    pub objects: FxHashMap<ObjKey, Json>,
}

pub struct MemoryStore {
    world: ArcSwap<World>,
    faults: ArcSwap<Vec<Fault>>,
    writes: ArcSwap<Vec<WriteRecord>>,
    rv: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

fn not_found(kind: &KindRef, namespace: Option<&str>, name: &str) -> StoreError {
    StoreError::Api {
        code: 404,
        reason: "NotFound".into(),
        message: format!("{} {} not found", kind.kind, konvert_core::store::object_key(namespace, name)),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            world: ArcSwap::from_pointee(World::default()),
            faults: ArcSwap::from_pointee(Vec::new()),
            writes: ArcSwap::from_pointee(Vec::new()),
            rv: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<World> { self.world.load_full() }

    pub fn len(&self) -> usize { self.world.load().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Every stored object of `kind`, sorted by namespace and name.
    pub fn objects(&self, kind: &KindRef) -> Vec<Json> {
        let gvk = kind.gvk_key();
        let snap = self.world.load();
        let mut items: Vec<(&ObjKey, &Json)> = snap.objects.iter().filter(|(k, _)| k.gvk == gvk).collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        items.into_iter().map(|(_, v)| v.clone()).collect()
    }

    /// Writes performed through the [`ObjectStore`] interface, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> { self.writes.load().as_ref().clone() }

    pub fn clear_writes(&self) { self.writes.store(Arc::new(Vec::new())); }

    /// Fail every `op` on `kind` with `err` until [`clear_faults`](Self::clear_faults).
    pub fn fail(&self, op: Op, kind: &KindRef, err: StoreError) {
        let f = Fault { op, kind: kind.kind, err };
        self.faults.rcu(|cur| {
            let mut next = cur.as_ref().clone();
            next.push(f.clone());
            next
        });
    }

    pub fn clear_faults(&self) { self.faults.store(Arc::new(Vec::new())); }

    fn check_fault(&self, op: Op, kind: &KindRef) -> Result<(), StoreError> {
        match self.faults.load().iter().find(|f| f.op == op && f.kind == kind.kind) {
            Some(f) => Err(f.err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, op: Op, kind: &KindRef, namespace: Option<&str>, name: &str) {
        let w = WriteRecord { op, kind: kind.kind, namespace: namespace.unwrap_or("").to_string(), name: name.to_string() };
        self.writes.rcu(|cur| {
            let mut next = cur.as_ref().clone();
            next.push(w.clone());
            next
        });
    }

    fn next_rv(&self) -> String { self.rv.fetch_add(1, Ordering::Relaxed).to_string() }

    /// Store a raw object as is, filling in a uid and creation timestamp when absent.
    pub fn insert_raw(&self, mut obj: Json) -> Result<()> {
        let key = ObjKey::of(&obj).ok_or_else(|| anyhow!("object needs apiVersion, kind and metadata.name"))?;
        let rv = self.next_rv();
        if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
            meta.entry("uid").or_insert_with(|| Json::String(uuid::Uuid::new_v4().to_string()));
            meta.entry("creationTimestamp").or_insert_with(|| Json::String(now_rfc3339()));
            meta.insert("resourceVersion".into(), Json::String(rv));
        }
        self.world.rcu(|cur| {
            let mut objects = cur.objects.clone();
            objects.insert(key.clone(), obj.clone());
            World { objects }
        });
        Ok(())
    }

    /// Store a typed object.
    pub fn insert<T: StoreKind>(&self, obj: &T) -> Result<()> {
        let v = serde_json::to_value(obj).with_context(|| format!("encoding {}", T::KIND.kind))?;
        self.insert_raw(v)
    }

    /// Seed from a multi-document YAML stream. Returns the number of objects stored.
    pub fn seed_yaml(&self, yaml: &str) -> Result<usize> {
        let mut n = 0usize;
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let val = serde_yaml::Value::deserialize(doc).context("parsing YAML document")?;
            if val.is_null() {
                continue;
            }
            let json = serde_json::to_value(val).context("converting YAML to JSON")?;
            if let Json::Object(ref m) = json {
                if m.get("kind").and_then(|k| k.as_str()) == Some("List") {
                    for item in m.get("items").and_then(|i| i.as_array()).cloned().unwrap_or_default() {
                        self.insert_raw(item)?;
                        n += 1;
                    }
                    continue;
                }
            }
            self.insert_raw(json)?;
            n += 1;
        }
        debug!(count = n, "store: seeded from yaml");
        Ok(n)
    }

    fn update<F>(&self, key: &ObjKey, f: F) -> bool
    where
        F: Fn(&mut Json),
    {
        let mut found = false;
        let rv = self.next_rv();
        self.world.rcu(|cur| {
            let mut objects = cur.objects.clone();
            found = false;
            if let Some(obj) = objects.get_mut(key) {
                found = true;
                f(obj);
                if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                    meta.insert("resourceVersion".into(), Json::String(rv.clone()));
                }
            }
            World { objects }
        });
        found
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<Option<Json>, StoreError> {
        self.check_fault(Op::Get, kind)?;
        Ok(self.world.load().objects.get(&ObjKey::for_kind(kind, namespace, name)).cloned())
    }

    async fn list(&self, kind: &KindRef, namespace: Option<&str>, selector: &LabelSelector) -> Result<Vec<Json>, StoreError> {
        self.check_fault(Op::List, kind)?;
        let gvk = kind.gvk_key();
        let snap = self.world.load();
        let mut items: Vec<(&ObjKey, &Json)> = snap
            .objects
            .iter()
            .filter(|(k, _)| k.gvk == gvk)
            .filter(|(k, _)| namespace.map_or(true, |ns| !kind.namespaced || k.namespace == ns))
            .filter(|(_, v)| selector.matches(v.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.as_object())))
            .collect();
        items.sort_by(|a, b| a.0.cmp(b.0));
        Ok(items.into_iter().map(|(_, v)| v.clone()).collect())
    }

    async fn apply(&self, kind: &KindRef, obj: &Json) -> Result<Json, StoreError> {
        self.check_fault(Op::Apply, kind)?;
        let key = ObjKey::of(obj).ok_or_else(|| StoreError::Decode { kind: kind.gvk_key(), message: "missing identity".into() })?;
        let prev = self.world.load().objects.get(&key).cloned();
        let mut next = obj.clone();
        if let Some(prev) = &prev {
            // keep server-owned fields
            let prev_meta = prev.get("metadata");
            if let Some(meta) = next.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                for field in ["uid", "creationTimestamp"] {
                    if let Some(v) = prev_meta.and_then(|m| m.get(field)) {
                        meta.insert(field.into(), v.clone());
                    }
                }
            }
            if let (Some(status), Some(o)) = (prev.get("status"), next.as_object_mut()) {
                o.entry("status").or_insert_with(|| status.clone());
            }
        }
        self.insert_raw(next).map_err(|e| StoreError::Decode { kind: kind.gvk_key(), message: e.to_string() })?;
        self.record(Op::Apply, kind, raw::namespace(obj), raw::name(obj));
        self.world
            .load()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(kind, raw::namespace(obj), raw::name(obj)))
    }

    async fn merge_patch(&self, kind: &KindRef, namespace: Option<&str>, name: &str, patch: &Json) -> Result<(), StoreError> {
        self.check_fault(Op::MergePatch, kind)?;
        if !self.update(&ObjKey::for_kind(kind, namespace, name), |obj| json_patch::merge(obj, patch)) {
            return Err(not_found(kind, namespace, name));
        }
        self.record(Op::MergePatch, kind, namespace, name);
        Ok(())
    }

    async fn patch_status(&self, kind: &KindRef, namespace: Option<&str>, name: &str, status: &Json) -> Result<(), StoreError> {
        self.check_fault(Op::PatchStatus, kind)?;
        let found = self.update(&ObjKey::for_kind(kind, namespace, name), |obj| {
            if let Some(o) = obj.as_object_mut() {
                o.insert("status".into(), status.clone());
            }
        });
        if !found {
            return Err(not_found(kind, namespace, name));
        }
        self.record(Op::PatchStatus, kind, namespace, name);
        Ok(())
    }

    async fn delete(&self, kind: &KindRef, namespace: Option<&str>, name: &str) -> Result<(), StoreError> {
        self.check_fault(Op::Delete, kind)?;
        let key = ObjKey::for_kind(kind, namespace, name);
        self.world.rcu(|cur| {
            let mut objects = cur.objects.clone();
            objects.remove(&key);
            World { objects }
        });
        self.record(Op::Delete, kind, namespace, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn merge_patch_removes_nulls_and_merges_objects() {
        let s = MemoryStore::new();
        s.insert_raw(json!({
            "apiVersion": "v1", "kind": "Service",
            "metadata": {"name": "a", "namespace": "ns", "annotations": {"x": "1", "y": "2"}},
            "spec": {"ports": [{"port": 80}]}
        }))
        .unwrap();
        let kind = KindRef { group: "", version: "v1", kind: "Service", plural: "services", namespaced: true };
        s.merge_patch(&kind, Some("ns"), "a", &json!({"metadata": {"annotations": {"x": null, "z": "3"}}, "spec": {"ports": [{"port": 81}]}}))
            .await
            .unwrap();
        let obj = s.get(&kind, Some("ns"), "a").await.unwrap().unwrap();
        assert_eq!(obj["metadata"]["annotations"], json!({"y": "2", "z": "3"}));
        assert_eq!(obj["spec"]["ports"], json!([{"port": 81}]));
    }

    #[test]
    fn insert_requires_identity() {
        let s = MemoryStore::new();
        assert!(s.insert_raw(json!({"kind": "Service", "metadata": {"name": "a"}})).is_err());
        assert!(s.insert_raw(json!({"apiVersion": "v1", "kind": "Service", "metadata": {}})).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn insert_fills_server_fields() {
        let s = MemoryStore::new();
        s.insert_raw(json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "a", "namespace": "ns"}})).unwrap();
        let snap = s.snapshot();
        let obj = snap.objects.values().next().unwrap();
        assert!(obj["metadata"]["uid"].as_str().is_some());
        assert!(obj["metadata"]["creationTimestamp"].as_str().is_some());
        assert!(obj["metadata"]["resourceVersion"].as_str().is_some());
    }
}
