//! Gateway converter: TLS listener certificates become certificates and SNIs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use konvert_core::gateway::{
    certificate_refs, terminates_tls, wire, Gateway, GatewayListenersTlsCertificateRefs, GATEWAY_GROUP, KIND_GATEWAY, KIND_SECRET,
};
use konvert_core::kong::{ControlPlaneRef, KongCertificate, KongCertificateSpec, KongSni, KongSniSpec, NameRef};
use konvert_core::store::{self as ks, object_key, raw};
use konvert_core::{Error, ObjectStore, OwnerKey, Result, StoreKind, TranslateOptions};
use konvert_resolve::{check_reference_grant, GrantQuery, Lookup, Resolver};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::output::{object_meta, spec_hash, Downstream, OutputStore};
use crate::status::{self, reason, ACCEPTED, PROGRAMMED, RESOLVED_REFS};
use crate::{list_owned, record_translate, reduce_for, Converter, ReduceFn, RootObject};

pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

pub struct GatewayConverter {
    gateway: Gateway,
    owner: OwnerKey,
    store: Arc<dyn ObjectStore>,
    options: TranslateOptions,
    output: OutputStore,
}

/// Why a certificate ref produced nothing.
enum CertRef {
    Usable { namespace: String, name: String, cert: String, key: String },
    Skip { reason: &'static str, message: String },
}

/// PEM certificate and key from a TLS secret. The certificate must hold at
/// least one parseable certificate and the key a parseable private key.
pub fn tls_material(secret: &Secret) -> std::result::Result<(String, String), String> {
    if secret.type_.as_deref() != Some(TLS_SECRET_TYPE) {
        return Err(format!("type is {:?}, want {}", secret.type_.as_deref().unwrap_or(""), TLS_SECRET_TYPE));
    }
    let field = |k: &str| -> Option<String> {
        if let Some(v) = secret.data.as_ref().and_then(|d| d.get(k)) {
            return String::from_utf8(v.0.clone()).ok();
        }
        secret.string_data.as_ref().and_then(|d| d.get(k)).cloned()
    };
    let cert = field("tls.crt").ok_or("missing tls.crt")?;
    let key = field("tls.key").ok_or("missing tls.key")?;
    let certs = rustls_pemfile::certs(&mut cert.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("tls.crt: {}", e))?;
    if certs.is_empty() {
        return Err("tls.crt holds no PEM certificate".into());
    }
    match rustls_pemfile::private_key(&mut key.as_bytes()) {
        Ok(Some(_)) => Ok((cert, key)),
        Ok(None) => Err("tls.key holds no PEM private key".into()),
        Err(e) => Err(format!("tls.key: {}", e)),
    }
}

impl GatewayConverter {
    pub fn new(gateway: Gateway, store: Arc<dyn ObjectStore>, options: TranslateOptions) -> Self {
        let owner = RootObject::Gateway(gateway.clone()).owner();
        Self { gateway, owner, store, options, output: OutputStore::default() }
    }

    fn ns(&self) -> &str { &self.owner.namespace }

    async fn control_plane(&self) -> Result<Lookup<ControlPlaneRef>> {
        Resolver::new(self.store.as_ref(), &self.options.controller_name).control_plane_for_gateway(&self.gateway).await
    }

    /// Validate one certificate ref. Store failures are fatal; a malformed
    /// secret is a per-unit error.
    async fn certificate_ref(&self, r: &GatewayListenersTlsCertificateRefs) -> Result<CertRef> {
        let group = r.group.as_deref().unwrap_or("");
        let kind = r.kind.as_deref().unwrap_or(KIND_SECRET);
        if !group.is_empty() || kind != KIND_SECRET {
            debug!(gateway = %self.owner.name, group, kind, name = %r.name, "gateway: unsupported certificate ref; skipping");
            return Ok(CertRef::Skip { reason: reason::INVALID_CERTIFICATE_REF, message: format!("{}/{} is not a Secret", group, kind) });
        }
        let ns = r.namespace.clone().unwrap_or_else(|| self.ns().to_string());
        let key = object_key(Some(&ns), &r.name);
        if ns != self.ns() && self.options.reference_grant_enabled {
            let q = GrantQuery {
                from_group: GATEWAY_GROUP,
                from_kind: KIND_GATEWAY,
                from_namespace: self.ns(),
                to_group: "",
                to_kind: KIND_SECRET,
                to_namespace: &ns,
                to_name: &r.name,
            };
            let (why, permitted) = check_reference_grant(self.store.as_ref(), &q).await?;
            if !permitted {
                debug!(secret = %key, %why, "gateway: certificate ref not permitted; skipping");
                return Ok(CertRef::Skip { reason: reason::REF_NOT_PERMITTED, message: why });
            }
        }
        let secret: Option<Secret> =
            ks::get(self.store.as_ref(), Some(&ns), &r.name).await.map_err(|e| Error::store("get", format!("Secret {}", key), e))?;
        let Some(secret) = secret else {
            debug!(secret = %key, "gateway: secret not found; skipping");
            return Ok(CertRef::Skip { reason: reason::INVALID_CERTIFICATE_REF, message: format!("Secret {} not found", key) });
        };
        let (cert, tls_key) = tls_material(&secret).map_err(|reason| Error::InvalidSecret { key: key.clone(), reason })?;
        Ok(CertRef::Usable { namespace: ns, name: r.name.clone(), cert, key: tls_key })
    }

    fn certificate(&self, cp: &ControlPlaneRef, ns: &str, name: &str, cert: String, key: String) -> Result<KongCertificate> {
        let obj_name = crate::namegen::certificate_name(&self.owner.name, cp, ns, name);
        let spec = KongCertificateSpec { control_plane_ref: cp.clone(), type_: "inline".into(), cert, key };
        let hash = spec_hash("KongCertificate", &obj_name, &spec)?;
        Ok(KongCertificate::new(object_meta(obj_name, &self.owner, hash, None), spec))
    }

    fn sni(&self, cp: &ControlPlaneRef, certificate: &str, host: &str) -> Result<KongSni> {
        let obj_name = crate::namegen::sni_name(certificate, host);
        let spec = KongSniSpec { control_plane_ref: cp.clone(), certificate_ref: NameRef { name: certificate.to_string() }, name: host.to_string() };
        let hash = spec_hash("KongSNI", &obj_name, &spec)?;
        Ok(KongSni::new(object_meta(obj_name, &self.owner, hash, None), spec))
    }

    async fn translate_inner(&mut self) -> Result<usize> {
        self.output.clear();
        let cp = match self.control_plane().await? {
            Lookup::Found(cp) => cp,
            other => {
                debug!(gateway = %self.owner.name, reason = ?other.reason(), "gateway: no control plane; nothing to translate");
                return Ok(0);
            }
        };

        let mut errors = Vec::new();
        // secret ns/name -> certificate object name
        let mut certs: BTreeMap<(String, String), String> = BTreeMap::new();
        let mut snis: BTreeSet<(String, String)> = BTreeSet::new();
        let listeners = self.gateway.spec.listeners.clone();
        for listener in listeners.iter().filter(|l| terminates_tls(l)) {
            let host = listener.hostname.clone().filter(|h| !h.is_empty()).unwrap_or_else(|| "*".to_string());
            for r in certificate_refs(listener) {
                let usable = match self.certificate_ref(r).await {
                    Ok(CertRef::Usable { namespace, name, cert, key }) => (namespace, name, cert, key),
                    Ok(CertRef::Skip { .. }) => continue,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(gateway = %self.owner.name, listener = %listener.name, error = %e, "gateway: certificate failed");
                        errors.push(e);
                        continue;
                    }
                };
                let (ns, name, cert, key) = usable;
                let cert_name = match certs.get(&(ns.clone(), name.clone())) {
                    Some(n) => n.clone(),
                    None => match self.certificate(&cp, &ns, &name, cert, key) {
                        Ok(c) => {
                            let n = c.metadata.name.clone().unwrap_or_default();
                            self.output.push(Downstream::Certificate(c));
                            certs.insert((ns, name), n.clone());
                            n
                        }
                        Err(e) => {
                            errors.push(e);
                            continue;
                        }
                    },
                };
                if snis.insert((cert_name.clone(), host.clone())) {
                    match self.sni(&cp, &cert_name, &host) {
                        Ok(s) => {
                            self.output.push(Downstream::Sni(s));
                        }
                        Err(e) => errors.push(e),
                    }
                }
            }
        }
        Error::join(errors)?;
        Ok(self.output.len())
    }
}

#[async_trait::async_trait]
impl Converter for GatewayConverter {
    fn root_object(&self) -> RootObject { RootObject::Gateway(self.gateway.clone()) }

    fn owner(&self) -> &OwnerKey { &self.owner }

    async fn translate(&mut self) -> Result<usize> {
        let t0 = Instant::now();
        let res = self.translate_inner().await;
        record_translate(KIND_GATEWAY, &self.owner, t0, &res);
        res
    }

    fn output_store(&self) -> (Vec<Json>, Result<()>) { self.output.to_json() }

    async fn list_existing_objects(&self) -> Result<Vec<Json>> { list_owned(self.store.as_ref(), &self.owner, false).await }

    fn reduce(&self, obj: &Json) -> Vec<ReduceFn> { reduce_for(obj) }

    async fn update_root_object_status(&mut self) -> Result<(bool, bool)> {
        let generation = self.gateway.metadata.generation;
        let cp = self.control_plane().await?;
        if let Lookup::Unsupported(why) = &cp {
            debug!(gateway = %self.owner.name, %why, "gateway: not ours; leaving status alone");
            return Ok((false, true));
        }
        let accepted = cp.is_found();
        let mut fresh = vec![match &cp {
            Lookup::Found(cp) => status::condition(ACCEPTED, true, reason::ACCEPTED, format!("control plane {}", cp), generation),
            Lookup::Unsupported(why) | Lookup::NotFound(why) => status::condition(ACCEPTED, false, reason::NO_CONTROL_PLANE, why.clone(), generation),
        }];

        let mut unresolved: Option<(&'static str, String)> = None;
        for listener in self.gateway.spec.listeners.iter().filter(|l| terminates_tls(l)) {
            for r in certificate_refs(listener) {
                let skip = match self.certificate_ref(r).await {
                    Ok(CertRef::Usable { .. }) => None,
                    Ok(CertRef::Skip { reason, message }) => Some((reason, message)),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => Some((reason::INVALID_CERTIFICATE_REF, e.to_string())),
                };
                if unresolved.is_none() {
                    unresolved = skip;
                }
            }
        }
        fresh.push(match unresolved {
            None => status::condition(RESOLVED_REFS, true, reason::RESOLVED_REFS, "", generation),
            Some((why, msg)) => status::condition(RESOLVED_REFS, false, why, msg, generation),
        });

        let existing = if accepted { self.list_existing_objects().await? } else { Vec::new() };
        let programmed = !existing.is_empty() && existing.iter().all(|o| raw::condition_true(o, PROGRAMMED));
        fresh.push(if programmed {
            status::condition(PROGRAMMED, true, reason::PROGRAMMED, "", generation)
        } else {
            status::condition(PROGRAMMED, false, reason::PENDING, "waiting for generated objects", generation)
        });

        let encode = |source| Error::Encode { kind: "Gateway", name: self.owner.name.clone(), source };
        let mut body = match wire(&self.gateway.status) {
            Json::Object(m) => Json::Object(m),
            _ => Json::Object(Default::default()),
        };
        let prev: Vec<Condition> = match body.get("conditions") {
            Some(c) if !c.is_null() => serde_json::from_value(c.clone()).map_err(encode)?,
            _ => Vec::new(),
        };
        let mut conds = prev.clone();
        for c in fresh {
            status::set_condition(&mut conds, c);
        }
        if status::same_conditions(&prev, &conds) {
            return Ok((false, !accepted));
        }
        body["conditions"] = serde_json::to_value(&conds).map_err(encode)?;
        self.store
            .patch_status(&Gateway::KIND, Some(self.ns()), &self.owner.name, &body)
            .await
            .map_err(|e| Error::store("patch status", format!("Gateway {}", self.owner.route_id()), e))?;
        self.gateway.status = serde_json::from_value(body).map_err(encode)?;
        Ok((true, !accepted))
    }

    async fn handle_orphaned_resource(&self, _obj: &Json) -> Result<bool> { Ok(false) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn secret(type_: &str, crt: &str, key: &str) -> Secret {
        Secret {
            type_: Some(type_.into()),
            string_data: Some(BTreeMap::from([("tls.crt".to_string(), crt.to_string()), ("tls.key".to_string(), key.to_string())])),
            ..Default::default()
        }
    }

    const PEM_CRT: &str = include_str!("../tests/data/tls.crt");
    const PEM_KEY: &str = include_str!("../tests/data/tls.key");

    #[test]
    fn tls_material_requires_type_and_pem() {
        assert!(tls_material(&secret(TLS_SECRET_TYPE, PEM_CRT, PEM_KEY)).is_ok());
        assert!(tls_material(&secret("Opaque", PEM_CRT, PEM_KEY)).unwrap_err().contains("type"));
        assert!(tls_material(&secret(TLS_SECRET_TYPE, "garbage", PEM_KEY)).unwrap_err().contains("tls.crt"));
        let mut missing = secret(TLS_SECRET_TYPE, PEM_CRT, PEM_KEY);
        missing.string_data.as_mut().unwrap().remove("tls.key");
        assert!(tls_material(&missing).unwrap_err().contains("missing tls.key"));
    }

    #[test]
    fn begin_markers_alone_are_not_pem() {
        let err = tls_material(&secret(TLS_SECRET_TYPE, "-----BEGIN not a cert at all", PEM_KEY)).unwrap_err();
        assert!(err.contains("tls.crt"), "{err}");
        let err = tls_material(&secret(TLS_SECRET_TYPE, PEM_CRT, "junk -----BEGIN")).unwrap_err();
        assert!(err.contains("tls.key"), "{err}");
        // a key where a certificate belongs
        assert!(tls_material(&secret(TLS_SECRET_TYPE, PEM_KEY, PEM_KEY)).is_err());
    }
}
