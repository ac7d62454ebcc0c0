//! HTTPRoute converter.
//!
//! Per resolved control plane and rule: one upstream and one service shared
//! with every route that has the same backends, the targets behind them, one
//! route per match, and a plugin plus per-route bindings for each filter.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use konvert_core::gateway::{
    self as gw, parent_key, rule_backends, wire_str, Gateway, GatewayListeners, HTTPRoute, HTTPRouteParentRefs, HTTPRouteRules, KIND_HTTPROUTE,
};
use konvert_core::kong::{
    ControlPlaneRef, KongPlugin, KongPluginBinding, KongPluginBindingSpec, KongRoute, KongRouteSpec, KongService, KongServiceSpec,
    KongUpstream, KongUpstreamSpec, PluginBindingTargets, PluginRef, ServiceRef, TargetRef, CONFIGURATION_GROUP,
};
use konvert_core::meta::parse_routes;
use konvert_core::store::{object_key, raw};
use konvert_core::{
    effective_hostnames, Error, ObjectStore, OwnerKey, Result, StoreKind, TranslateOptions, ANNOTATION_ROUTES, ANNOTATION_STRIP_PATH,
};
use konvert_resolve::{Lookup, Resolver};
use serde_json::{json, Value as Json};
use tracing::{debug, warn};

use crate::matches::rule_matches;
use crate::output::{object_meta, spec_hash, Downstream, OutputStore};
use crate::status::{self, reason, ACCEPTED, PROGRAMMED, RESOLVED_REFS};
use crate::targets::{targets_for_backend_refs, validate_backend_ref, BackendValidity, TargetContext};
use crate::{list_owned, namegen, plugins, record_translate, reduce_for, Converter, ReduceFn, RootObject};

/// Hosts a route serves through one parent; `None` matches any host.
type Hosts = Option<BTreeSet<String>>;

/// How a parent reference relates to this route.
enum ParentOutcome {
    /// Not a Gateway of this controller; no status is written for it.
    NotOurs(String),
    /// Our Gateway, but its control plane does not resolve.
    Unresolved(String),
    /// Resolved, but no listener hostname intersects the route's.
    NoHostnames,
    Bound { cp: ControlPlaneRef, hosts: Hosts },
}

pub struct HttpRouteConverter {
    route: HTTPRoute,
    owner: OwnerKey,
    store: Arc<dyn ObjectStore>,
    options: TranslateOptions,
    output: OutputStore,
}

fn listener_selected(parent: &HTTPRouteParentRefs, l: &GatewayListeners) -> bool {
    parent.section_name.as_deref().map_or(true, |s| s == l.name) && parent.port.map_or(true, |p| p == l.port)
}

fn is_http(l: &GatewayListeners) -> bool { l.protocol.eq_ignore_ascii_case("HTTP") || l.protocol.eq_ignore_ascii_case("HTTPS") }

/// Hosts a route serves through the listeners a parent ref selects. `Err`
/// when the route names hosts and none intersect.
fn parent_hosts(gateway: &Gateway, parent: &HTTPRouteParentRefs, route_hosts: &[String]) -> std::result::Result<Hosts, ()> {
    let mut hosts = BTreeSet::new();
    let mut any = false;
    for l in gateway.spec.listeners.iter().filter(|l| is_http(l) && listener_selected(parent, l)) {
        let listener_host = l.hostname.as_deref().filter(|h| !h.is_empty());
        if route_hosts.is_empty() && listener_host.is_none() {
            any = true;
            continue;
        }
        hosts.extend(effective_hostnames(listener_host, route_hosts));
    }
    if any {
        return Ok(None);
    }
    if hosts.is_empty() {
        return Err(());
    }
    Ok(Some(hosts))
}

fn merge_hosts(a: Hosts, b: Hosts) -> Hosts {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Some(a)
        }
        _ => None,
    }
}

impl HttpRouteConverter {
    pub fn new(route: HTTPRoute, store: Arc<dyn ObjectStore>, options: TranslateOptions) -> Self {
        let owner = RootObject::HttpRoute(route.clone()).owner();
        Self { route, owner, store, options, output: OutputStore::default() }
    }

    fn ns(&self) -> &str { &self.owner.namespace }

    fn resolver(&self) -> Resolver<'_> { Resolver::new(self.store.as_ref(), &self.options.controller_name) }

    /// Parent refs without duplicates, in declaration order.
    fn parent_refs(&self) -> Vec<HTTPRouteParentRefs> {
        let mut seen = BTreeSet::new();
        gw::parent_refs(&self.route).iter().filter(|p| seen.insert(parent_key(p))).cloned().collect()
    }

    async fn bind_parent(&self, parent: &HTTPRouteParentRefs) -> Result<ParentOutcome> {
        let resolver = self.resolver();
        let gateway = match resolver.gateway_for_parent_ref(self.ns(), parent).await? {
            Lookup::Found(found) => found,
            miss => return Ok(ParentOutcome::NotOurs(miss.reason().unwrap_or_default().to_string())),
        };
        if let Some(why) = resolver.gateway_class(&gateway).await?.reason() {
            return Ok(ParentOutcome::NotOurs(why.to_string()));
        }
        let cp = match resolver.control_plane_for_gateway(&gateway).await? {
            Lookup::Found(cp) => cp,
            miss => return Ok(ParentOutcome::Unresolved(miss.reason().unwrap_or_default().to_string())),
        };
        match parent_hosts(&gateway, parent, gw::hostnames(&self.route)) {
            Ok(hosts) => Ok(ParentOutcome::Bound { cp, hosts }),
            Err(()) => Ok(ParentOutcome::NoHostnames),
        }
    }

    /// Control planes this route attaches to, with the union of hosts per plane.
    async fn control_planes(&self) -> Result<BTreeMap<ControlPlaneRef, Hosts>> {
        let mut out: BTreeMap<ControlPlaneRef, Hosts> = BTreeMap::new();
        for parent in self.parent_refs() {
            match self.bind_parent(&parent).await? {
                ParentOutcome::Bound { cp, hosts } => {
                    let merged = match out.remove(&cp) {
                        Some(prev) => merge_hosts(prev, hosts),
                        None => hosts,
                    };
                    out.insert(cp, merged);
                }
                ParentOutcome::NoHostnames => debug!(route = %self.owner.route_id(), parent = %parent.name, "route: no matching listener hostname"),
                ParentOutcome::NotOurs(why) | ParentOutcome::Unresolved(why) => {
                    debug!(route = %self.owner.route_id(), parent = %parent.name, %why, "route: parent skipped")
                }
            }
        }
        Ok(out)
    }

    /// Every route currently listed on the shared objects named `name`, plus this one.
    async fn shared_routes(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut routes = BTreeSet::from([self.owner.route_id()]);
        for kind in [KongUpstream::KIND, KongService::KIND] {
            let existing = self
                .store
                .get(&kind, Some(self.ns()), name)
                .await
                .map_err(|e| Error::store("get", format!("{} {}", kind.kind, object_key(Some(self.ns()), name)), e))?;
            if let Some(a) = existing.as_ref().and_then(|o| raw::annotation(o, ANNOTATION_ROUTES)) {
                routes.extend(parse_routes(a));
            }
        }
        Ok(routes)
    }

    fn strip_path_annotation(&self) -> Option<bool> {
        self.route.metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_STRIP_PATH)).map(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Emit everything for one rule. Per-unit failures go to `errors`;
    /// store failures return.
    async fn translate_rule(&mut self, cp: &ControlPlaneRef, hosts: &Hosts, ri: usize, rule: &HTTPRouteRules, errors: &mut Vec<Error>) -> Result<()> {
        let ns = self.ns().to_string();
        let backends = rule_backends(rule);
        let shared = namegen::rule_object_name(cp, &ns, &backends);
        let routes = self.shared_routes(&shared).await?;

        let upstream_spec = KongUpstreamSpec { control_plane_ref: cp.clone(), name: shared.clone() };
        let hash = spec_hash("KongUpstream", &shared, &upstream_spec)?;
        self.output.push(Downstream::Upstream(KongUpstream::new(object_meta(shared.clone(), &self.owner, hash, Some(&routes)), upstream_spec)));

        let ctx = TargetContext { store: self.store.as_ref(), options: &self.options, owner: &self.owner, control_plane: cp, routes: Some(&routes) };
        let targets = targets_for_backend_refs(&ctx, &ns, &backends, &shared).await?;
        for t in targets {
            self.output.push(Downstream::Target(t));
        }

        let service_spec =
            KongServiceSpec { control_plane_ref: cp.clone(), name: shared.clone(), host: shared.clone(), port: 80, protocol: "http".into() };
        let hash = spec_hash("KongService", &shared, &service_spec)?;
        self.output.push(Downstream::Service(KongService::new(object_meta(shared.clone(), &self.owner, hash, Some(&routes)), service_spec)));

        let mut plugin_names = Vec::new();
        let filters = gw::rule_filters(rule);
        for (fi, f) in filters.iter().enumerate() {
            match plugins::plugin_for_filter(f) {
                Ok(Some((plugin, config))) => {
                    let name = namegen::plugin_name(&self.owner.name, cp, ri, fi, &wire_str(f, "type").unwrap_or_default());
                    let hash = spec_hash("KongPlugin", &name, &json!({ "plugin": plugin, "config": config }))?;
                    self.output.push(Downstream::Plugin(KongPlugin::new(object_meta(name.clone(), &self.owner, hash, None), plugin, config)));
                    plugin_names.push(name);
                }
                Ok(None) => {}
                Err(reason) => {
                    let key = format!("HTTPRoute {} rule {} filter {}", self.owner.route_id(), ri, fi);
                    warn!(%key, %reason, "route: filter skipped");
                    errors.push(Error::InvalidFilter { key, reason });
                }
            }
        }

        let strip_path = self.strip_path_annotation().unwrap_or(false) || plugins::strip_path(filters);
        let hosts: Vec<String> = hosts.iter().flatten().cloned().collect();
        for (mi, m) in rule_matches(gw::rule_matches(rule)).into_iter().enumerate() {
            let name = namegen::route_name(&self.owner.name, cp, ri, mi);
            let spec = KongRouteSpec {
                control_plane_ref: cp.clone(),
                service_ref: ServiceRef::namespaced(shared.clone()),
                name: name.clone(),
                hosts: hosts.clone(),
                paths: m.paths,
                methods: m.methods,
                headers: m.headers,
                protocols: vec!["http".into(), "https".into()],
                strip_path,
                preserve_host: true,
            };
            let hash = spec_hash("KongRoute", &name, &spec)?;
            self.output.push(Downstream::Route(KongRoute::new(object_meta(name.clone(), &self.owner, hash, None), spec)));

            for plugin in &plugin_names {
                let binding = namegen::binding_name(&name, plugin);
                let spec = KongPluginBindingSpec {
                    control_plane_ref: cp.clone(),
                    plugin_ref: PluginRef { name: plugin.clone(), kind: "KongPlugin".into() },
                    targets: PluginBindingTargets {
                        route_reference: Some(TargetRef { group: CONFIGURATION_GROUP.into(), kind: "KongRoute".into(), name: name.clone() }),
                    },
                };
                let hash = spec_hash("KongPluginBinding", &binding, &spec)?;
                self.output.push(Downstream::PluginBinding(KongPluginBinding::new(object_meta(binding, &self.owner, hash, None), spec)));
            }
        }
        Ok(())
    }

    async fn translate_inner(&mut self) -> Result<usize> {
        self.output.clear();
        let planes = self.control_planes().await?;
        if planes.is_empty() {
            debug!(route = %self.owner.route_id(), "route: no resolved parents; nothing to translate");
            return Ok(0);
        }
        let rules = gw::rules(&self.route).to_vec();
        let mut errors = Vec::new();
        for (cp, hosts) in &planes {
            for (ri, rule) in rules.iter().enumerate() {
                if let Err(e) = self.translate_rule(cp, hosts, ri, rule, &mut errors).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    errors.push(e);
                }
            }
        }
        Error::join(errors)?;
        Ok(self.output.len())
    }

    /// First backend that fails validation across all rules.
    async fn unresolved_backend(&self) -> Result<Option<(&'static str, String)>> {
        for rule in gw::rules(&self.route) {
            for b in rule_backends(rule) {
                if let BackendValidity::Invalid { reason, message } =
                    validate_backend_ref(self.store.as_ref(), &self.options, KIND_HTTPROUTE, self.ns(), &b).await?
                {
                    return Ok(Some((reason, message)));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl Converter for HttpRouteConverter {
    fn root_object(&self) -> RootObject { RootObject::HttpRoute(self.route.clone()) }

    fn owner(&self) -> &OwnerKey { &self.owner }

    async fn translate(&mut self) -> Result<usize> {
        let t0 = Instant::now();
        let res = self.translate_inner().await;
        record_translate(KIND_HTTPROUTE, &self.owner, t0, &res);
        res
    }

    fn output_store(&self) -> (Vec<Json>, Result<()>) { self.output.to_json() }

    async fn list_existing_objects(&self) -> Result<Vec<Json>> { list_owned(self.store.as_ref(), &self.owner, true).await }

    fn reduce(&self, obj: &Json) -> Vec<ReduceFn> { reduce_for(obj) }

    async fn update_root_object_status(&mut self) -> Result<(bool, bool)> {
        let generation = self.route.metadata.generation;
        let controller = self.options.controller_name.clone();
        let refs = self.unresolved_backend().await?;
        let resolved_refs = match &refs {
            None => status::condition(RESOLVED_REFS, true, reason::RESOLVED_REFS, "", generation),
            Some((why, msg)) => status::condition(RESOLVED_REFS, false, why, msg.clone(), generation),
        };

        let existing = self.list_existing_objects().await?;
        let with_status: Vec<&Json> = existing.iter().filter(|o| raw::kind(o) != "KongPlugin").collect();
        let programmed = !with_status.is_empty() && with_status.iter().all(|o| raw::condition_true(o, PROGRAMMED));
        let programmed = if programmed {
            status::condition(PROGRAMMED, true, reason::PROGRAMMED, "", generation)
        } else {
            status::condition(PROGRAMMED, false, reason::PENDING, "waiting for generated objects", generation)
        };

        let mut fresh = Vec::new();
        let mut any_accepted = false;
        for parent in self.parent_refs() {
            let accepted = match self.bind_parent(&parent).await? {
                ParentOutcome::NotOurs(_) => continue,
                ParentOutcome::Unresolved(why) => status::condition(ACCEPTED, false, reason::NO_CONTROL_PLANE, why, generation),
                ParentOutcome::NoHostnames => status::condition(
                    ACCEPTED,
                    false,
                    reason::NO_MATCHING_LISTENER_HOSTNAME,
                    "no listener hostname matches the route hostnames",
                    generation,
                ),
                ParentOutcome::Bound { cp, .. } => {
                    any_accepted = true;
                    status::condition(ACCEPTED, true, reason::ACCEPTED, format!("control plane {}", cp), generation)
                }
            };
            fresh.push(status::ParentStatus {
                parent_ref: parent,
                controller_name: controller.clone(),
                conditions: vec![accepted, resolved_refs.clone(), programmed.clone()],
            });
        }

        let encode = |source| Error::Encode { kind: "HTTPRoute", name: self.owner.name.clone(), source };
        let prev = status::parent_statuses(&self.route.status).map_err(encode)?;
        let merged = status::merge_parent_statuses(&prev, fresh, &controller);
        if !status::parents_changed(&prev, &merged) {
            return Ok((false, !any_accepted));
        }
        let body = status::route_status_body(&merged).map_err(encode)?;
        self.store
            .patch_status(&HTTPRoute::KIND, Some(self.ns()), &self.owner.name, &body)
            .await
            .map_err(|e| Error::store("patch status", format!("HTTPRoute {}", self.owner.route_id()), e))?;
        self.route.status = serde_json::from_value(body).map_err(encode)?;
        Ok((true, !any_accepted))
    }

    async fn handle_orphaned_resource(&self, obj: &Json) -> Result<bool> {
        let Some(kind) = konvert_core::kong::DOWNSTREAM_KINDS.iter().find(|k| k.matches(obj)) else {
            return Ok(false);
        };
        crate::orphan::release_route(self.store.as_ref(), kind, obj, &self.owner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(listeners: &[(&str, Option<&str>)]) -> Gateway {
        let listeners: Vec<Json> = listeners
            .iter()
            .map(|(n, h)| {
                let mut l = json!({"name": n, "port": 80, "protocol": "HTTP"});
                if let Some(h) = h {
                    l["hostname"] = json!(h);
                }
                l
            })
            .collect();
        serde_json::from_value(json!({
            "apiVersion": "gateway.networking.k8s.io/v1",
            "kind": "Gateway",
            "metadata": {"name": "gw", "namespace": "infra"},
            "spec": {"gatewayClassName": "kong", "listeners": listeners}
        }))
        .unwrap()
    }

    fn parent(section: Option<&str>) -> HTTPRouteParentRefs {
        let mut p = json!({"name": "gw"});
        if let Some(s) = section {
            p["sectionName"] = json!(s);
        }
        serde_json::from_value(p).unwrap()
    }

    #[test]
    fn hostless_listener_and_route_match_anything() {
        let gw = gateway(&[("http", None)]);
        assert_eq!(parent_hosts(&gw, &parent(None), &[]), Ok(None));
    }

    #[test]
    fn route_hosts_intersect_listener_wildcards() {
        let gw = gateway(&[("a", Some("*.example.com")), ("b", Some("other.org"))]);
        let hosts = vec!["api.example.com".to_string(), "x.test".to_string()];
        let got = parent_hosts(&gw, &parent(None), &hosts).unwrap().unwrap();
        assert_eq!(got.into_iter().collect::<Vec<_>>(), vec!["api.example.com".to_string()]);
        assert_eq!(parent_hosts(&gw, &parent(Some("b")), &hosts), Err(()));
    }

    #[test]
    fn listener_hosts_apply_when_route_has_none() {
        let gw = gateway(&[("a", Some("*.example.com"))]);
        let got = parent_hosts(&gw, &parent(Some("a")), &[]).unwrap().unwrap();
        assert!(got.contains("*.example.com"));
    }
}
