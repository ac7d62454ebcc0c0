#![allow(dead_code)]

use std::sync::Arc;

use konvert_core::store::raw;
use konvert_core::{ObjectStore, TranslateOptions};
use konvert_store::MemoryStore;
use serde_json::Value as Json;

/// GatewayClass → GatewayConfiguration → KonnectExtension chain in `infra`,
/// plus one Gateway `gw` with a plain HTTP listener and a TLS listener.
/// [`seeded`] adds the `infra/api-tls` Secret the TLS listener names.
pub const CHAIN: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: kong
spec:
  controllerName: konvert.io/gateway-controller
  parametersRef:
    group: gateway-operator.konghq.com
    kind: GatewayConfiguration
    name: konnect
    namespace: infra
---
apiVersion: gateway.networking.k8s.io/v1
kind: GatewayClass
metadata:
  name: foreign
spec:
  controllerName: example.com/other
---
apiVersion: gateway-operator.konghq.com/v2beta1
kind: GatewayConfiguration
metadata:
  name: konnect
  namespace: infra
spec:
  extensions:
    - group: konnect.konghq.com
      kind: KonnectExtension
      name: ext
---
apiVersion: konnect.konghq.com/v1alpha2
kind: KonnectExtension
metadata:
  name: ext
  namespace: infra
spec:
  konnect:
    controlPlane:
      ref:
        type: konnectNamespacedRef
        konnectNamespacedRef:
          name: cp
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw
  namespace: infra
spec:
  gatewayClassName: kong
  listeners:
    - name: http
      port: 80
      protocol: HTTP
    - name: https
      hostname: api.example.com
      port: 443
      protocol: HTTPS
      tls:
        mode: Terminate
        certificateRefs:
          - name: api-tls
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw-foreign
  namespace: infra
spec:
  gatewayClassName: foreign
  listeners:
    - name: http
      port: 80
      protocol: HTTP
"#;

pub const TLS_CRT: &str = include_str!("../data/tls.crt");
pub const TLS_KEY: &str = include_str!("../data/tls.key");

fn indent(pem: &str) -> String { pem.lines().map(|l| format!("    {}\n", l)).collect() }

/// `kubernetes.io/tls` Secret holding a self-signed certificate for api.example.com.
pub fn tls_secret(ns: &str, name: &str) -> String {
    format!(
        r#"
apiVersion: v1
kind: Secret
metadata:
  name: {name}
  namespace: {ns}
type: kubernetes.io/tls
stringData:
  tls.crt: |
{crt}  tls.key: |
{key}"#,
        crt = indent(TLS_CRT),
        key = indent(TLS_KEY)
    )
}

/// Variations on the Service and EndpointSlice [`backend_with`] writes.
#[derive(Debug, Clone, Copy)]
pub struct Shape<'a> {
    pub ready: bool,
    pub headless: bool,
    pub slice_port_name: &'a str,
    pub slice_protocol: &'a str,
}

impl Default for Shape<'_> {
    fn default() -> Self { Self { ready: true, headless: false, slice_port_name: "http", slice_protocol: "TCP" } }
}

/// Service `name` in `ns` on port 80 → 8080 with ready endpoints `addrs`.
pub fn backend(ns: &str, name: &str, addrs: &[&str]) -> String { backend_with(ns, name, addrs, Shape::default()) }

pub fn backend_with(ns: &str, name: &str, addrs: &[&str], shape: Shape<'_>) -> String {
    let endpoints: String = addrs
        .iter()
        .map(|a| format!("  - addresses: [\"{}\"]\n    conditions:\n      ready: {}\n", a, shape.ready))
        .collect();
    let cluster_ip = if shape.headless { "None" } else { "10.96.0.10" };
    format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: {name}
  namespace: {ns}
spec:
  clusterIP: {cluster_ip}
  ports:
    - name: http
      port: 80
      protocol: TCP
      targetPort: 8080
---
apiVersion: discovery.k8s.io/v1
kind: EndpointSlice
metadata:
  name: {name}-abc12
  namespace: {ns}
  labels:
    kubernetes.io/service-name: {name}
addressType: IPv4
ports:
  - name: "{port_name}"
    port: 8080
    protocol: {protocol}
endpoints:
{endpoints}"#,
        port_name = shape.slice_port_name,
        protocol = shape.slice_protocol,
    )
}

/// ExternalName Service `name` in `ns` on port 80.
pub fn external_backend(ns: &str, name: &str, external_name: &str) -> String {
    format!(
        r#"
apiVersion: v1
kind: Service
metadata:
  name: {name}
  namespace: {ns}
spec:
  type: ExternalName
  externalName: "{external_name}"
  ports:
    - name: http
      port: 80
      protocol: TCP
"#
    )
}

pub fn seeded(extra: &[&str]) -> Arc<MemoryStore> {
    let s = MemoryStore::new();
    s.seed_yaml(CHAIN).unwrap();
    s.seed_yaml(&tls_secret("infra", "api-tls")).unwrap();
    for doc in extra {
        s.seed_yaml(doc).unwrap();
    }
    Arc::new(s)
}

pub fn as_dyn(s: &Arc<MemoryStore>) -> Arc<dyn ObjectStore> { s.clone() }

pub fn options() -> TranslateOptions { TranslateOptions::default() }

pub fn of_kind<'a>(objs: &'a [Json], kind: &str) -> Vec<&'a Json> { objs.iter().filter(|o| raw::kind(o) == kind).collect() }

pub fn kinds(objs: &[Json]) -> Vec<&str> {
    let mut k: Vec<&str> = objs.iter().map(raw::kind).collect();
    k.sort();
    k
}
