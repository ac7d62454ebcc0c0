//! Backend validation, endpoint resolution, and target materialization.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use konvert_core::gateway::{BackendReference, GATEWAY_GROUP, KIND_SERVICE};
use konvert_core::kong::{ControlPlaneRef, KongTarget, KongTargetSpec, NameRef};
use konvert_core::store::{self as ks, object_key};
use konvert_core::{Error, LabelSelector, ObjectStore, OwnerKey, Result, TranslateOptions};
use konvert_resolve::{check_reference_grant, GrantQuery};
use konvert_weights::{calculate_endpoint_weights, BackendRef};
use metrics::counter;
use tracing::debug;

use crate::namegen;
use crate::output::{object_meta, spec_hash};
use crate::status::reason;

pub const LABEL_SERVICE_NAME: &str = "kubernetes.io/service-name";

/// A backend that passed kind, existence, port, and permission checks.
#[derive(Debug, Clone)]
pub struct ValidBackendRef {
    pub backend_ref: BackendReference,
    pub namespace: String,
    pub service: Service,
    pub service_port: ServicePort,
}

#[derive(Debug, Clone)]
pub enum BackendValidity {
    Valid(Box<ValidBackendRef>),
    /// Skipped; `reason` is a ResolvedRefs condition reason.
    Invalid { reason: &'static str, message: String },
}

/// Ready addresses for a backend and the port to send traffic to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub addresses: Vec<String>,
    pub port: i32,
}

fn invalid(reason: &'static str, message: String) -> Result<BackendValidity> {
    Ok(BackendValidity::Invalid { reason, message })
}

/// Check a backend reference made from a `from_kind` object in `route_namespace`.
pub async fn validate_backend_ref(
    store: &dyn ObjectStore,
    options: &TranslateOptions,
    from_kind: &str,
    route_namespace: &str,
    backend: &BackendReference,
) -> Result<BackendValidity> {
    if !backend.is_service() {
        return invalid(
            reason::INVALID_KIND,
            format!("{}/{} is not a supported backend kind", backend.group.as_deref().unwrap_or(""), backend.kind.as_deref().unwrap_or("")),
        );
    }
    let ns = backend.namespace.as_deref().unwrap_or(route_namespace);
    let key = object_key(Some(ns), &backend.name);

    if ns != route_namespace && options.reference_grant_enabled {
        let q = GrantQuery {
            from_group: GATEWAY_GROUP,
            from_kind,
            from_namespace: route_namespace,
            to_group: "",
            to_kind: KIND_SERVICE,
            to_namespace: ns,
            to_name: &backend.name,
        };
        let (why, permitted) = check_reference_grant(store, &q).await?;
        if !permitted {
            return invalid(reason::REF_NOT_PERMITTED, why);
        }
    }

    let service: Option<Service> = ks::get(store, Some(ns), &backend.name).await.map_err(|e| Error::store("get", format!("Service {}", key), e))?;
    let Some(service) = service else {
        return invalid(reason::BACKEND_NOT_FOUND, format!("Service {} not found", key));
    };
    let Some(port) = backend.port else {
        return invalid(reason::BACKEND_NOT_FOUND, format!("backend {} has no port", key));
    };
    let service_port = service.spec.as_ref().and_then(|s| s.ports.as_ref()).and_then(|ps| ps.iter().find(|p| p.port == port)).cloned();
    let Some(service_port) = service_port else {
        return invalid(reason::BACKEND_NOT_FOUND, format!("Service {} has no port {}", key, port));
    };
    Ok(BackendValidity::Valid(Box::new(ValidBackendRef { backend_ref: backend.clone(), namespace: ns.to_string(), service, service_port })))
}

fn protocol(p: Option<&str>) -> &str { p.unwrap_or("TCP") }

/// Addresses traffic for `vbr` should go to. `None` means skip.
pub async fn resolve_endpoints(store: &dyn ObjectStore, options: &TranslateOptions, vbr: &ValidBackendRef) -> Result<Option<ResolvedEndpoints>> {
    let spec = vbr.service.spec.clone().unwrap_or_default();
    let name = vbr.service.metadata.name.clone().unwrap_or_default();
    let port = vbr.service_port.port;
    let is_external = spec.type_.as_deref() == Some("ExternalName");
    let is_headless = spec.cluster_ip.as_deref() == Some("None");

    if options.fqdn_mode && !is_headless && !is_external {
        let mut host = format!("{}.{}.svc", name, vbr.namespace);
        if let Some(domain) = options.cluster_domain.as_deref().filter(|d| !d.is_empty()) {
            host = format!("{}.{}", host, domain);
        }
        return Ok(Some(ResolvedEndpoints { addresses: vec![host], port }));
    }

    if is_external {
        return Ok(match spec.external_name.filter(|n| !n.is_empty()) {
            Some(ext) => Some(ResolvedEndpoints { addresses: vec![ext], port }),
            None => {
                debug!(ns = %vbr.namespace, name = %name, "targets: ExternalName service without externalName; skipping");
                None
            }
        });
    }

    let selector = LabelSelector::new().with(LABEL_SERVICE_NAME, name.clone());
    let slices: Vec<EndpointSlice> = match ks::list(store, Some(&vbr.namespace), &selector).await {
        Ok(s) => s,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(Error::store("list", format!("EndpointSlice {}", object_key(Some(&vbr.namespace), &name)), e)),
    };

    let want_name = vbr.service_port.name.as_deref().unwrap_or("");
    let want_proto = protocol(vbr.service_port.protocol.as_deref());
    let mut addresses = BTreeSet::new();
    for slice in &slices {
        let port_matches = slice
            .ports
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|p| p.name.as_deref().unwrap_or("") == want_name && protocol(p.protocol.as_deref()) == want_proto);
        if !port_matches {
            continue;
        }
        for ep in &slice.endpoints {
            if ep.conditions.as_ref().and_then(|c| c.ready) == Some(true) {
                addresses.extend(ep.addresses.iter().cloned());
            }
        }
    }
    if addresses.is_empty() {
        debug!(ns = %vbr.namespace, name = %name, "targets: no ready endpoints; skipping");
        return Ok(None);
    }
    let target_port = match &vbr.service_port.target_port {
        Some(IntOrString::Int(p)) if *p > 0 => *p,
        _ => port,
    };
    Ok(Some(ResolvedEndpoints { addresses: addresses.into_iter().collect(), port: target_port }))
}

fn host_port(address: &str, port: i32) -> String {
    if address.contains(':') { format!("[{}]:{}", address, port) } else { format!("{}:{}", address, port) }
}

/// Inputs shared by every target of one upstream.
pub struct TargetContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub options: &'a TranslateOptions,
    pub owner: &'a OwnerKey,
    pub control_plane: &'a ControlPlaneRef,
    /// Routes annotation for shared upstreams.
    pub routes: Option<&'a BTreeSet<String>>,
}

/// Validate, weigh, and materialize targets for one rule's backends.
///
/// Invalid backends and backends without ready endpoints are skipped; store
/// failures abort.
pub async fn targets_for_backend_refs(
    ctx: &TargetContext<'_>,
    route_namespace: &str,
    backends: &[BackendReference],
    upstream: &str,
) -> Result<Vec<KongTarget>> {
    let mut resolved: Vec<(ValidBackendRef, ResolvedEndpoints)> = Vec::new();
    for b in backends {
        match validate_backend_ref(ctx.store, ctx.options, &ctx.owner.kind, route_namespace, b).await? {
            BackendValidity::Invalid { reason, message } => {
                counter!("targets_skipped", 1u64);
                debug!(upstream, reason, %message, "targets: backend skipped");
            }
            BackendValidity::Valid(vbr) => match resolve_endpoints(ctx.store, ctx.options, &vbr).await? {
                Some(eps) => resolved.push((*vbr, eps)),
                None => {
                    counter!("targets_skipped", 1u64);
                }
            },
        }
    }

    let weight_input: Vec<BackendRef> = resolved
        .iter()
        .enumerate()
        .map(|(i, (vbr, eps))| {
            let declared = vbr.backend_ref.weight.unwrap_or(1).max(0) as u32;
            BackendRef::new(i.to_string(), declared, eps.addresses.len() as u32)
        })
        .collect();
    let weights = calculate_endpoint_weights(&weight_input);

    let mut out = Vec::new();
    for (i, (vbr, eps)) in resolved.iter().enumerate() {
        let weight = weights.get(&i.to_string()).copied().unwrap_or(0);
        for addr in &eps.addresses {
            let name = namegen::target_name(upstream, &vbr.backend_ref, addr)?;
            let spec = KongTargetSpec {
                control_plane_ref: ctx.control_plane.clone(),
                upstream_ref: NameRef { name: upstream.to_string() },
                target: host_port(addr, eps.port),
                weight: i32::try_from(weight).unwrap_or(i32::MAX),
            };
            let hash = spec_hash("KongTarget", &name, &spec)?;
            out.push(KongTarget::new(object_meta(name, ctx.owner, hash, ctx.routes), spec));
        }
    }
    debug!(upstream, backends = backends.len(), targets = out.len(), "targets: built");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_targets_are_bracketed() {
        assert_eq!(host_port("10.0.0.1", 8080), "10.0.0.1:8080");
        assert_eq!(host_port("fd00::1", 80), "[fd00::1]:80");
        assert_eq!(host_port("echo.default.svc", 80), "echo.default.svc:80");
    }
}
