//! Content hashing for change detection.
//!
//! An entity's raw attributes are canonicalized (object keys sorted
//! recursively, array order kept) and fed into SHA-256 as a tagged,
//! length-prefixed byte stream. Two blobs that differ only in object key
//! order hash identically; any differing scalar produces a different digest.
//!
//! ```text
//! SHA-256(tag(value) ++ len ++ bytes ...) → ContentHash([u8; 32])
//! ```
//!
//! The byte stream is written directly rather than going through a JSON
//! serializer, so the digest does not depend on how `serde_json` happens to
//! order map keys (the `preserve_order` feature changes that).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a canonicalized attribute blob
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex chars, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

/// Return a copy of `value` with every object's keys in sorted order.
///
/// Arrays keep their element order. Non-container values come back unchanged.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::with_capacity(map.len());
            for (key, child) in entries {
                sorted.insert(key.clone(), canonicalize(child));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_OBJECT: u8 = 6;

/// Hash an attribute blob. Pure; accepts any JSON value including `null`.
pub fn content_hash(value: &Value) -> ContentHash {
    let mut hasher = Sha256::new();
    feed(&mut hasher, value);
    ContentHash(hasher.finalize().into())
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update([TAG_NULL]),
        Value::Bool(false) => hasher.update([TAG_FALSE]),
        Value::Bool(true) => hasher.update([TAG_TRUE]),
        Value::Number(n) => {
            hasher.update([TAG_NUMBER]);
            feed_str(hasher, &n.to_string());
        }
        Value::String(s) => {
            hasher.update([TAG_STRING]);
            feed_str(hasher, s);
        }
        Value::Array(items) => {
            hasher.update([TAG_ARRAY]);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                feed(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update([TAG_OBJECT]);
            hasher.update((map.len() as u64).to_be_bytes());
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, child) in entries {
                feed_str(hasher, key);
                feed(hasher, child);
            }
        }
    }
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
