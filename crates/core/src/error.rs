use thiserror::Error as ThisError;

/// Failures surfaced by an [`ObjectStore`](crate::ObjectStore) backend.
#[derive(Debug, Clone, ThisError)]
pub enum StoreError {
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decoding {kind}: {message}")]
    Decode { kind: String, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Api { code: 404, .. })
    }
}

/// Engine error taxonomy. Skips are not errors and never reach this type.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{op} {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("unsupported reference {group}/{kind} {name}")]
    UnsupportedReference { group: String, kind: String, name: String },
    #[error("cross-namespace reference between {extension} and control plane {namespace}/{name} is unsupported")]
    CrossNamespaceControlPlane { extension: String, namespace: String, name: String },
    #[error("invalid reference {key}: {reason}")]
    InvalidReference { key: String, reason: String },
    #[error("filter {key}: {reason}")]
    InvalidFilter { key: String, reason: String },
    #[error("secret {key} is not a valid TLS secret: {reason}")]
    InvalidSecret { key: String, reason: String },
    #[error("encoding {kind} {name}: {source}")]
    Encode {
        kind: &'static str,
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}", join_messages(.0))]
    Joined(Vec<Error>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn join_messages(errs: &[Error]) -> String {
    errs.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

impl Error {
    pub fn store(op: &'static str, key: impl Into<String>, source: StoreError) -> Self {
        Error::Store { op, key: key.into(), source }
    }

    /// Collapse collected per-unit failures: none is `Ok`, one is returned as is.
    pub fn join(mut errs: Vec<Error>) -> Result<()> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(Error::Joined(errs)),
        }
    }

    /// Store failures and broken invariants abort a translation; everything
    /// else is a per-unit failure that leaves sibling output intact.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Store { .. } | Error::CrossNamespaceControlPlane { .. } => true,
            Error::Joined(v) => v.iter().any(Error::is_fatal),
            _ => false,
        }
    }

    /// Number of underlying failures (nested joins are flattened).
    pub fn count(&self) -> usize {
        match self {
            Error::Joined(v) => v.iter().map(Error::count).sum(),
            _ => 1,
        }
    }
}
