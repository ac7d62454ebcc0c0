//! konvert core: resource model, object store contract, and shared helpers.

#![forbid(unsafe_code)]

pub mod error;
pub mod gateway;
pub mod hash;
pub mod hostname;
pub mod kong;
pub mod meta;
pub mod store;

pub use error::{Error, Result, StoreError};
pub use hash::{hash_hex, hash_parts, hash_value};
pub use hostname::{effective_hostnames, hostname_intersection};
pub use meta::{set_metadata, MetadataPolicy, OwnerKey};
pub use store::{KindRef, LabelSelector, ObjectStore, StoreKind};

pub mod prelude {
    pub use super::{
        hash_hex, hash_value, hostname_intersection, set_metadata, Error, KindRef, LabelSelector, MetadataPolicy, ObjectStore,
        OwnerKey, Result, StoreError, StoreKind, TranslateOptions,
    };
}

/// Label marking every object produced by this engine.
pub const LABEL_MANAGED_BY: &str = "konvert.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "konvert";
/// Labels identifying the root object that produced a downstream object.
pub const LABEL_ROOT_KIND: &str = "konvert.io/root-kind";
pub const LABEL_ROOT_NAMESPACE: &str = "konvert.io/root-namespace";
pub const LABEL_ROOT_NAME: &str = "konvert.io/root-name";
/// Content hash of the generated spec.
pub const LABEL_HASH_SPEC: &str = "konvert.io/hash-spec";
/// Comma-separated `namespace/name` identifiers of every route sharing an object.
pub const ANNOTATION_ROUTES: &str = "konvert.io/routes";
/// Opt-in control plane for bare Services: `<name>` or `<namespace>/<name>`.
pub const ANNOTATION_CONTROL_PLANE: &str = "konvert.io/control-plane";
/// Route-level strip-path switch.
pub const ANNOTATION_STRIP_PATH: &str = "konghq.com/strip-path";

pub const DEFAULT_CONTROLLER_NAME: &str = "konvert.io/gateway-controller";

/// Runtime knobs for a translation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Require a ReferenceGrant for cross-namespace backends.
    pub reference_grant_enabled: bool,
    /// Address non-headless Services by their cluster DNS name instead of endpoint IPs.
    pub fqdn_mode: bool,
    pub cluster_domain: Option<String>,
    /// GatewayClasses with a different controllerName are not ours.
    pub controller_name: String,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self { reference_grant_enabled: true, fqdn_mode: false, cluster_domain: None, controller_name: DEFAULT_CONTROLLER_NAME.to_string() }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl TranslateOptions {
    /// Defaults overridden by `KONVERT_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            reference_grant_enabled: env_flag("KONVERT_REFERENCE_GRANT").unwrap_or(d.reference_grant_enabled),
            fqdn_mode: env_flag("KONVERT_FQDN_MODE").unwrap_or(d.fqdn_mode),
            cluster_domain: std::env::var("KONVERT_CLUSTER_DOMAIN").ok().filter(|s| !s.is_empty()),
            controller_name: std::env::var("KONVERT_CONTROLLER_NAME").ok().filter(|s| !s.is_empty()).unwrap_or(d.controller_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_reference_grants() {
        let o = TranslateOptions::default();
        assert!(o.reference_grant_enabled);
        assert!(!o.fqdn_mode);
        assert_eq!(o.cluster_domain, None);
        assert_eq!(o.controller_name, DEFAULT_CONTROLLER_NAME);
    }
}
