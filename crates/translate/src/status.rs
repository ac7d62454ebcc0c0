//! Condition bookkeeping for root object status.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use konvert_core::gateway::{parent_key, wire, HTTPRouteParentRefs};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub const ACCEPTED: &str = "Accepted";
pub const RESOLVED_REFS: &str = "ResolvedRefs";
pub const PROGRAMMED: &str = "Programmed";

pub mod reason {
    pub const ACCEPTED: &str = "Accepted";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const PROGRAMMED: &str = "Programmed";
    pub const PENDING: &str = "Pending";
    pub const INVALID_KIND: &str = "InvalidKind";
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
    pub const REF_NOT_PERMITTED: &str = "RefNotPermitted";
    pub const INVALID_CERTIFICATE_REF: &str = "InvalidCertificateRef";
    pub const NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
    pub const NO_CONTROL_PLANE: &str = "NoControlPlane";
}

pub fn condition(type_: &str, ok: bool, reason: &str, message: impl Into<String>, generation: Option<i64>) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: generation,
        last_transition_time: Time(chrono::Utc::now()),
    }
}

/// Insert or replace a condition by type. The transition time only moves when
/// the status flips.
pub fn set_condition(conds: &mut Vec<Condition>, mut new: Condition) {
    match conds.iter_mut().find(|c| c.type_ == new.type_) {
        Some(cur) => {
            if cur.status == new.status {
                new.last_transition_time = cur.last_transition_time.clone();
            }
            *cur = new;
        }
        None => conds.push(new),
    }
}

/// Condition lists equal ignoring transition times.
pub fn same_conditions(a: &[Condition], b: &[Condition]) -> bool {
    let key = |c: &Condition| (c.type_.clone(), c.status.clone(), c.reason.clone(), c.message.clone(), c.observed_generation);
    let mut ka: Vec<_> = a.iter().map(key).collect();
    let mut kb: Vec<_> = b.iter().map(key).collect();
    ka.sort();
    kb.sort();
    ka == kb
}

pub fn is_true(conds: &[Condition], type_: &str) -> bool {
    conds.iter().any(|c| c.type_ == type_ && c.status == "True")
}

/// One entry of `status.parents` on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentStatus {
    pub parent_ref: HTTPRouteParentRefs,
    pub controller_name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Parent statuses from the wire form of a route status.
pub fn parent_statuses<T: Serialize>(route_status: &T) -> Result<Vec<ParentStatus>, serde_json::Error> {
    match wire(route_status).get("parents") {
        Some(p) if !p.is_null() => serde_json::from_value(p.clone()),
        _ => Ok(Vec::new()),
    }
}

/// Route status body carrying `parents`.
pub fn route_status_body(parents: &[ParentStatus]) -> Result<Json, serde_json::Error> {
    Ok(serde_json::json!({ "parents": serde_json::to_value(parents)? }))
}

/// Merge freshly computed parent statuses into the existing list.
///
/// Entries written by other controllers are kept untouched. Our entries are
/// replaced by `fresh`; ours that are not in `fresh` are dropped.
pub fn merge_parent_statuses(existing: &[ParentStatus], fresh: Vec<ParentStatus>, controller: &str) -> Vec<ParentStatus> {
    let mut out: Vec<ParentStatus> = existing.iter().filter(|p| p.controller_name != controller).cloned().collect();
    for mut p in fresh {
        if let Some(prev) = existing.iter().find(|e| e.controller_name == controller && same_parent(&e.parent_ref, &p.parent_ref)) {
            let mut conds = prev.conditions.clone();
            conds.retain(|c| p.conditions.iter().any(|n| n.type_ == c.type_));
            for c in p.conditions.drain(..) {
                set_condition(&mut conds, c);
            }
            p.conditions = conds;
        }
        out.push(p);
    }
    out
}

fn same_parent(a: &HTTPRouteParentRefs, b: &HTTPRouteParentRefs) -> bool {
    a.name == b.name && a.namespace == b.namespace && a.section_name == b.section_name && a.port == b.port
}

/// Whether two parent status lists differ in anything but transition times.
pub fn parents_changed(a: &[ParentStatus], b: &[ParentStatus]) -> bool {
    a.len() != b.len()
        || a.iter().zip(b).any(|(x, y)| {
            x.controller_name != y.controller_name || parent_key(&x.parent_ref) != parent_key(&y.parent_ref) || !same_conditions(&x.conditions, &y.conditions)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(c: &Condition) -> chrono::DateTime<chrono::Utc> { c.last_transition_time.0 }

    #[test]
    fn transition_time_kept_while_status_holds() {
        let mut old = condition(ACCEPTED, true, reason::ACCEPTED, "", None);
        old.last_transition_time = Time(chrono::DateTime::<chrono::Utc>::from_timestamp(1_000, 0).unwrap());
        let mut conds = vec![old.clone()];

        set_condition(&mut conds, condition(ACCEPTED, true, reason::ACCEPTED, "still fine", Some(2)));
        assert_eq!(conds.len(), 1);
        assert_eq!(at(&conds[0]), at(&old));
        assert_eq!(conds[0].message, "still fine");

        set_condition(&mut conds, condition(ACCEPTED, false, reason::NO_CONTROL_PLANE, "gone", Some(3)));
        assert_ne!(at(&conds[0]), at(&old));
    }

    #[test]
    fn foreign_parents_survive_and_stale_ours_drop() {
        let pr = |n: &str| -> HTTPRouteParentRefs { serde_json::from_value(serde_json::json!({ "name": n })).unwrap() };
        let mk = |n: &str, ctrl: &str| ParentStatus {
            parent_ref: pr(n),
            controller_name: ctrl.into(),
            conditions: vec![condition(ACCEPTED, true, reason::ACCEPTED, "", None)],
        };
        let existing = vec![mk("a", "ours"), mk("stale", "ours"), mk("x", "theirs")];
        let merged = merge_parent_statuses(&existing, vec![mk("a", "ours")], "ours");
        let names: Vec<&str> = merged.iter().map(|p| p.parent_ref.name.as_str()).collect();
        assert_eq!(names, vec!["x", "a"]);
        assert!(parents_changed(&existing, &merged));
        assert!(!parents_changed(&merged, &merged.clone()));
    }

    #[test]
    fn parent_statuses_read_the_wire_shape() {
        let status = serde_json::json!({
            "parents": [{
                "parentRef": {"name": "gw", "namespace": "infra"},
                "controllerName": "ours",
                "conditions": [{"type": "Accepted", "status": "True", "reason": "Accepted", "message": "", "lastTransitionTime": "2024-01-01T00:00:00Z"}]
            }]
        });
        let parents = parent_statuses(&status).unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].parent_ref.namespace.as_deref(), Some("infra"));
        assert!(is_true(&parents[0].conditions, ACCEPTED));
        assert_eq!(route_status_body(&parents).unwrap()["parents"][0]["controllerName"], "ours");
        assert!(parent_statuses(&Option::<Json>::None).unwrap().is_empty());
    }
}
