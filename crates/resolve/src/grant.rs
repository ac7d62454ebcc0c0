use konvert_core::gateway::ReferenceGrant;
use konvert_core::store as ks;
use konvert_core::{Error, LabelSelector, ObjectStore, Result};
use tracing::debug;

/// A cross-namespace reference to authorize.
#[derive(Debug, Clone, Copy)]
pub struct GrantQuery<'a> {
    pub from_group: &'a str,
    pub from_kind: &'a str,
    pub from_namespace: &'a str,
    pub to_group: &'a str,
    pub to_kind: &'a str,
    /// Namespace of the target; grants are read from here.
    pub to_namespace: &'a str,
    pub to_name: &'a str,
}

fn permits(grant: &ReferenceGrant, q: &GrantQuery<'_>) -> bool {
    let from_ok = grant.spec.from.iter().any(|f| f.group == q.from_group && f.kind == q.from_kind && f.namespace == q.from_namespace);
    let to_ok = grant
        .spec
        .to
        .iter()
        .any(|t| t.group == q.to_group && t.kind == q.to_kind && t.name.as_deref().map_or(true, |n| n.is_empty() || n == q.to_name));
    from_ok && to_ok
}

/// Whether a ReferenceGrant in the target namespace allows the reference.
/// Same-namespace references are always allowed.
pub async fn check_reference_grant(store: &dyn ObjectStore, q: &GrantQuery<'_>) -> Result<(String, bool)> {
    if q.from_namespace == q.to_namespace {
        return Ok(("same namespace".to_string(), true));
    }
    let grants: Vec<ReferenceGrant> = ks::list(store, Some(q.to_namespace), &LabelSelector::new())
        .await
        .map_err(|e| Error::store("list", format!("ReferenceGrant {}", q.to_namespace), e))?;
    for g in &grants {
        if permits(g, q) {
            let name = g.metadata.name.as_deref().unwrap_or("");
            debug!(grant = name, ns = q.to_namespace, "grant: permitted");
            return Ok((format!("permitted by ReferenceGrant {}/{}", q.to_namespace, name), true));
        }
    }
    Ok((
        format!(
            "no ReferenceGrant in {} allows {} from {} to {} {}",
            q.to_namespace, q.from_kind, q.from_namespace, q.to_kind, q.to_name
        ),
        false,
    ))
}
