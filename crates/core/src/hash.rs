//! Stable content hashing for generated names and the spec-hash label.
//!
//! SHA-256 over a canonical JSON rendering with object keys sorted, so the
//! result does not depend on field order or map iteration order. Digests are
//! truncated to [`HASH_LEN`] hex characters.

use serde::Serialize;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

/// Hex characters kept from a digest.
pub const HASH_LEN: usize = 16;

/// Incremental hasher over string parts and JSON values.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn new() -> Self { Self::default() }

    pub fn write(&mut self, bytes: &[u8]) { self.0.update(bytes); }

    /// Write a part followed by a separator so `("ab","c")` and `("a","bc")` differ.
    pub fn part(&mut self, s: &str) -> &mut Self {
        self.write(s.as_bytes());
        self.write(&[0]);
        self
    }

    pub fn value(&mut self, v: &Json) -> &mut Self {
        write_canonical(self, v);
        self.write(&[0]);
        self
    }

    pub fn hex(&self) -> String {
        let mut s = hex::encode(self.0.clone().finalize());
        s.truncate(HASH_LEN);
        s
    }
}

fn write_canonical(h: &mut ContentHasher, v: &Json) {
    match v {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            h.write(b"{");
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    h.write(b",");
                }
                h.write(Json::String(k.clone()).to_string().as_bytes());
                h.write(b":");
                write_canonical(h, &map[k]);
            }
            h.write(b"}");
        }
        Json::Array(items) => {
            h.write(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    h.write(b",");
                }
                write_canonical(h, item);
            }
            h.write(b"]");
        }
        scalar => h.write(scalar.to_string().as_bytes()),
    }
}

/// Hash of an already-encoded value.
pub fn hash_value(v: &Json) -> String {
    ContentHasher::new().value(v).hex()
}

/// Hash of any serializable value.
pub fn hash_hex<T: Serialize + ?Sized>(v: &T) -> Result<String, serde_json::Error> {
    Ok(hash_value(&serde_json::to_value(v)?))
}

/// Hash of a sequence of string parts.
pub fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut h = ContentHasher::new();
    for p in parts {
        h.part(p);
    }
    h.hex()
}
