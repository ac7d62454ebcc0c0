mod common;

use common::*;
use konvert_core::gateway::Gateway;
use konvert_core::store::{self as ks, raw};
use konvert_core::{Error, StoreError, StoreKind};
use konvert_store::Op;
use konvert_translate::{new_converter, RootObject};

async fn gateway(store: &std::sync::Arc<konvert_store::MemoryStore>, name: &str) -> Gateway {
    ks::get::<Gateway>(store.as_ref(), Some("infra"), name).await.unwrap().unwrap()
}

#[tokio::test]
async fn tls_listener_yields_one_certificate_and_one_sni() {
    let s = seeded(&[]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "gw").await), as_dyn(&s), options());
    assert_eq!(c.translate().await.unwrap(), 2);

    let (objs, enc) = c.output_store();
    enc.unwrap();
    assert_eq!(kinds(&objs), vec!["KongCertificate", "KongSNI"]);
    let cert = of_kind(&objs, "KongCertificate")[0];
    let sni = of_kind(&objs, "KongSNI")[0];
    assert_eq!(sni["spec"]["name"], "api.example.com");
    assert_eq!(sni["spec"]["certificateRef"]["name"], raw::name(cert));
    assert_eq!(cert["spec"]["controlPlaneRef"]["konnectNamespacedRef"]["name"], "cp");
    assert_eq!(cert["spec"]["controlPlaneRef"]["konnectNamespacedRef"]["namespace"], "infra");
    assert_eq!(raw::namespace(cert), Some("infra"));
    let owners = cert["metadata"]["ownerReferences"].as_array().unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0]["kind"], "Gateway");
    assert_eq!(owners[0]["name"], "gw");
}

#[tokio::test]
async fn shared_secret_is_one_certificate() {
    let s = seeded(&[r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: multi
  namespace: infra
spec:
  gatewayClassName: kong
  listeners:
    - name: a
      hostname: a.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: api-tls}]
    - name: b
      hostname: b.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: api-tls}]
    - name: b-again
      hostname: b.example.com
      port: 8443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: api-tls}]
"#]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "multi").await), as_dyn(&s), options());
    assert_eq!(c.translate().await.unwrap(), 3);
    let (objs, _) = c.output_store();
    assert_eq!(of_kind(&objs, "KongCertificate").len(), 1);
    let mut hosts: Vec<&str> = of_kind(&objs, "KongSNI").iter().filter_map(|o| o["spec"]["name"].as_str()).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["a.example.com", "b.example.com"]);
}

#[tokio::test]
async fn malformed_secret_fails_alone() {
    let s = seeded(&[r#"
apiVersion: v1
kind: Secret
metadata:
  name: broken
  namespace: infra
type: kubernetes.io/tls
stringData:
  tls.crt: "-----BEGIN not a cert at all"
  tls.key: "junk -----BEGIN"
---
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: mixed
  namespace: infra
spec:
  gatewayClassName: kong
  listeners:
    - name: good
      hostname: good.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: api-tls}]
    - name: bad
      hostname: bad.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: broken}]
"#]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "mixed").await), as_dyn(&s), options());
    let err = c.translate().await.unwrap_err();
    assert!(matches!(err, Error::InvalidSecret { .. }), "{err}");
    assert!(!err.is_fatal());
    let (objs, enc) = c.output_store();
    enc.unwrap();
    assert_eq!(kinds(&objs), vec!["KongCertificate", "KongSNI"]);
}

#[tokio::test]
async fn cross_namespace_secret_needs_a_grant() {
    let secret = tls_secret("certs", "shared-tls");
    let s = seeded(&[&secret, r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: remote
  namespace: infra
spec:
  gatewayClassName: kong
  listeners:
    - name: https
      hostname: remote.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: shared-tls, namespace: certs}]
"#]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "remote").await), as_dyn(&s), options());
    assert_eq!(c.translate().await.unwrap(), 0);

    s.seed_yaml(
        r#"
apiVersion: gateway.networking.k8s.io/v1beta1
kind: ReferenceGrant
metadata:
  name: allow-gateways
  namespace: certs
spec:
  from:
    - group: gateway.networking.k8s.io
      kind: Gateway
      namespace: infra
  to:
    - group: ""
      kind: Secret
"#,
    )
    .unwrap();
    assert_eq!(c.translate().await.unwrap(), 2);
}

#[tokio::test]
async fn status_is_written_once() {
    let s = seeded(&[]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "gw").await), as_dyn(&s), options());
    assert_eq!(c.update_root_object_status().await.unwrap(), (true, false));
    assert_eq!(c.update_root_object_status().await.unwrap(), (false, false));

    let stored = gateway(&s, "gw").await;
    let status = serde_json::to_value(stored.status).unwrap();
    let conds = status["conditions"].as_array().unwrap();
    let accepted = conds.iter().find(|c| c["type"] == "Accepted").unwrap();
    assert_eq!(accepted["status"], "True");
    let programmed = conds.iter().find(|c| c["type"] == "Programmed").unwrap();
    assert_eq!(programmed["status"], "False");
    assert_eq!(programmed["reason"], "Pending");
    assert_eq!(s.writes().iter().filter(|w| w.op == Op::PatchStatus).count(), 1);
}

#[tokio::test]
async fn foreign_gateway_is_left_alone() {
    let s = seeded(&[]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "gw-foreign").await), as_dyn(&s), options());
    assert_eq!(c.update_root_object_status().await.unwrap(), (false, true));
    assert_eq!(c.translate().await.unwrap(), 0);
    assert!(s.writes().is_empty());
}

#[tokio::test]
async fn store_failure_is_fatal() {
    let s = seeded(&[]);
    s.fail(Op::Get, &k8s_openapi::api::core::v1::Secret::KIND, StoreError::Transport("reset".into()));
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "gw").await), as_dyn(&s), options());
    let err = c.translate().await.unwrap_err();
    assert!(err.is_fatal(), "{err}");
}

#[tokio::test]
async fn non_secret_certificate_ref_is_skipped_quietly() {
    let s = seeded(&[r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: vaulted
  namespace: infra
spec:
  gatewayClassName: kong
  listeners:
    - name: good
      hostname: good.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{name: api-tls}]
    - name: vault
      hostname: vault.example.com
      port: 443
      protocol: HTTPS
      tls:
        certificateRefs: [{group: example.com, kind: VaultCert, name: api-tls}]
"#]);
    let mut c = new_converter(RootObject::Gateway(gateway(&s, "vaulted").await), as_dyn(&s), options());
    // the foreign ref is not an error, the Secret listener still translates
    assert_eq!(c.translate().await.unwrap(), 2);
    let (objs, enc) = c.output_store();
    enc.unwrap();
    let hosts: Vec<&str> = of_kind(&objs, "KongSNI").iter().filter_map(|o| o["spec"]["name"].as_str()).collect();
    assert_eq!(hosts, vec!["good.example.com"]);
}
