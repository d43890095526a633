//! Topology entities and snapshot parsing
//!
//! A snapshot arrives as a JSON object carrying a `nodes` array (older
//! backends call it `connections`). Each element is kept whole as the
//! entity's raw attributes; only the identifier, parent identifier and the
//! two classification markers are interpreted.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::hasher::{content_hash, ContentHash};

/// Default identifier of the distinguished root group
pub const DEFAULT_ROOT_ID: &str = "ROOT";

/// Attribute marking an entity as a group
pub const ATTR_TYPE: &str = "type";
/// Attribute carrying the number of live sessions on a connection
pub const ATTR_ACTIVE_CONNECTIONS: &str = "activeConnections";
/// Attribute used for display
pub const ATTR_NAME: &str = "name";

const ID_KEYS: [&str; 2] = ["id", "identifier"];
const PARENT_KEYS: [&str; 2] = ["parentId", "parentIdentifier"];
const COLLECTION_KEYS: [&str; 2] = ["nodes", "connections"];

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Derived category of an entity.
///
/// Precedence when several rules match: Root > Group > ActiveLeaf >
/// InactiveLeaf > Unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Root,
    Group,
    ActiveLeaf,
    InactiveLeaf,
    Unclassified,
}

impl Classification {
    /// Classify from the identifier and raw attributes. Pure.
    pub fn classify(id: &str, attributes: &Value, root_id: &str) -> Self {
        if id == root_id {
            return Classification::Root;
        }
        if attributes.get(ATTR_TYPE).is_some_and(|t| !t.is_null()) {
            return Classification::Group;
        }
        match active_connections(attributes) {
            Some(n) if n > 0 => Classification::ActiveLeaf,
            Some(_) => Classification::InactiveLeaf,
            None => Classification::Unclassified,
        }
    }

    /// Root and Group entities can have children
    pub fn is_container(&self) -> bool {
        matches!(self, Classification::Root | Classification::Group)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Classification::ActiveLeaf | Classification::InactiveLeaf
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Root => "root",
            Classification::Group => "group",
            Classification::ActiveLeaf => "active_leaf",
            Classification::InactiveLeaf => "inactive_leaf",
            Classification::Unclassified => "unclassified",
        }
    }
}

/// Read the active-connection marker. Accepts non-negative integers and
/// numeric strings; anything else counts as absent.
pub fn active_connections(attributes: &Value) -> Option<u64> {
    match attributes.get(ATTR_ACTIVE_CONNECTIONS)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Structural problems in a fetched payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no 'nodes' array")]
    MissingCollection,

    #[error("element {index} is not an object")]
    ElementNotObject { index: usize },

    #[error("element {index} has no identifier")]
    MissingId { index: usize },

    #[error("duplicate identifier '{id}' in snapshot")]
    DuplicateId { id: String },
}

/// One element of a snapshot, before it becomes a stored [`Entity`]
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub id: String,
    pub parent_id: Option<String>,
    pub attributes: Value,
}

impl RawEntity {
    /// Build from parts. When `attributes` is an object, `id` and `parentId`
    /// are written into it if missing so the content hash covers parentage.
    pub fn new(id: impl Into<String>, parent_id: Option<String>, attributes: Value) -> Self {
        let id = id.into();
        let mut attributes = attributes;
        if let Value::Object(map) = &mut attributes {
            if !ID_KEYS.iter().any(|k| map.contains_key(*k)) {
                map.insert("id".into(), Value::String(id.clone()));
            }
            if let Some(parent) = &parent_id {
                if !PARENT_KEYS.iter().any(|k| map.contains_key(*k)) {
                    map.insert("parentId".into(), Value::String(parent.clone()));
                }
            }
        }
        Self {
            id,
            parent_id,
            attributes,
        }
    }

    /// Build from a JSON object element. The whole object is kept as the
    /// raw attributes.
    pub fn from_value(index: usize, value: Value) -> Result<Self, SnapshotError> {
        if !value.is_object() {
            return Err(SnapshotError::ElementNotObject { index });
        }
        let id = ID_KEYS
            .iter()
            .find_map(|k| value.get(*k).and_then(identifier_text))
            .ok_or(SnapshotError::MissingId { index })?;
        let parent_id = PARENT_KEYS
            .iter()
            .find_map(|k| value.get(*k).and_then(identifier_text));

        Ok(Self {
            id,
            parent_id,
            attributes: value,
        })
    }

    pub fn classify(&self, root_id: &str) -> Classification {
        Classification::classify(&self.id, &self.attributes, root_id)
    }
}

fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The full entity list returned by one fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub entities: Vec<RawEntity>,
}

impl Snapshot {
    pub fn new(entities: Vec<RawEntity>) -> Self {
        Self { entities }
    }

    /// Parse a fetched payload. Rejects a missing collection, non-object
    /// elements, elements without an identifier and duplicate identifiers.
    pub fn from_payload(payload: Value) -> Result<Self, SnapshotError> {
        let Value::Object(mut root) = payload else {
            return Err(SnapshotError::NotAnObject);
        };
        let items = COLLECTION_KEYS
            .iter()
            .find_map(|k| match root.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or(SnapshotError::MissingCollection)?;

        let mut seen = HashSet::with_capacity(items.len());
        let mut entities = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let raw = RawEntity::from_value(index, item)?;
            if !seen.insert(raw.id.clone()) {
                return Err(SnapshotError::DuplicateId { id: raw.id });
            }
            entities.push(raw);
        }
        Ok(Self { entities })
    }

    /// Drop inactive leaves. Applied upstream of reconciliation, so the
    /// store sees filtered entities as deleted.
    pub fn without_inactive(mut self, root_id: &str) -> Self {
        self.entities
            .retain(|raw| raw.classify(root_id) != Classification::InactiveLeaf);
        self
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// =============================================================================
// ENTITY
// =============================================================================

/// One node in the topology
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    id: String,
    parent_id: Option<String>,
    raw_attributes: Value,
    classification: Classification,
    #[serde(serialize_with = "serialize_hash")]
    content_hash: ContentHash,
    display_name: String,
}

fn serialize_hash<S: serde::Serializer>(hash: &ContentHash, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hash.to_hex())
}

impl Entity {
    pub fn from_raw(raw: RawEntity, root_id: &str) -> Self {
        let classification = raw.classify(root_id);
        let content_hash = content_hash(&raw.attributes);
        let display_name = name_of(&raw.id, &raw.attributes).to_string();
        Self {
            id: raw.id,
            parent_id: raw.parent_id,
            raw_attributes: raw.attributes,
            classification,
            content_hash,
            display_name,
        }
    }

    /// Replace content in place. Classification, hash and display name are
    /// recomputed from the new attributes; the id is kept.
    pub(crate) fn replace_content(&mut self, raw: RawEntity, root_id: &str) {
        debug_assert_eq!(self.id, raw.id);
        self.classification = raw.classify(root_id);
        self.content_hash = content_hash(&raw.attributes);
        self.display_name = name_of(&raw.id, &raw.attributes).to_string();
        self.parent_id = raw.parent_id;
        self.raw_attributes = raw.attributes;
    }

    pub(crate) fn set_display_name(&mut self, name: String) {
        self.display_name = name;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn raw_attributes(&self) -> &Value {
        &self.raw_attributes
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    /// Name as delivered by the backend (falls back to the id)
    pub fn name(&self) -> &str {
        name_of(&self.id, &self.raw_attributes)
    }

    /// Name with the parent's name tokens stripped (see `display_name`)
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn active_connections(&self) -> Option<u64> {
        active_connections(&self.raw_attributes)
    }
}

fn name_of<'a>(id: &'a str, attributes: &'a Value) -> &'a str {
    attributes
        .get(ATTR_NAME)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(id)
}
