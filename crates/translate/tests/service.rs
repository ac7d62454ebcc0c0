mod common;

use common::*;
use k8s_openapi::api::core::v1::Service;
use konvert_core::store::{self as ks, raw};
use konvert_core::{Error, ANNOTATION_CONTROL_PLANE};
use konvert_translate::{new_converter, RootObject};

async fn service(store: &std::sync::Arc<konvert_store::MemoryStore>, name: &str) -> Service {
    ks::get::<Service>(store.as_ref(), Some("apps"), name).await.unwrap().unwrap()
}

fn annotate(yaml: &str, value: &str) -> String {
    yaml.replacen("  namespace: apps\n", &format!("  namespace: apps\n  annotations:\n    {}: \"{}\"\n", ANNOTATION_CONTROL_PLANE, value), 1)
}

#[tokio::test]
async fn annotated_service_gets_an_upstream_per_port() {
    let s = seeded(&[annotate(&backend("apps", "echo", &["10.0.0.1", "10.0.0.2"]), "cp").as_str()]);
    let mut c = new_converter(RootObject::Service(service(&s, "echo").await), as_dyn(&s), options());
    assert_eq!(c.translate().await.unwrap(), 3);
    let (objs, enc) = c.output_store();
    enc.unwrap();
    assert_eq!(kinds(&objs), vec!["KongTarget", "KongTarget", "KongUpstream"]);
    let upstream = of_kind(&objs, "KongUpstream")[0];
    assert_eq!(upstream["spec"]["controlPlaneRef"]["konnectNamespacedRef"]["namespace"], "apps");
    for t in of_kind(&objs, "KongTarget") {
        assert_eq!(t["spec"]["upstreamRef"]["name"], raw::name(upstream));
        assert_eq!(t["spec"]["weight"], 1);
    }
    assert_eq!(c.update_root_object_status().await.unwrap(), (false, false));
}

#[tokio::test]
async fn plain_service_translates_to_nothing() {
    let echo = backend("apps", "echo", &["10.0.0.1"]);
    let s = seeded(&[echo.as_str()]);
    let mut c = new_converter(RootObject::Service(service(&s, "echo").await), as_dyn(&s), options());
    assert_eq!(c.translate().await.unwrap(), 0);
}

#[tokio::test]
async fn control_plane_in_another_namespace_is_rejected() {
    let s = seeded(&[annotate(&backend("apps", "echo", &["10.0.0.1"]), "infra/cp").as_str()]);
    let mut c = new_converter(RootObject::Service(service(&s, "echo").await), as_dyn(&s), options());
    let err = c.translate().await.unwrap_err();
    assert!(matches!(err, Error::CrossNamespaceControlPlane { .. }), "{err}");
}
