//! Shared entity capability: identity, versioning, audit, soft delete.
//!
//! # Responsibility
//! - Define the persistence metadata embedded by value in every entity kind.
//! - Provide the structured textual dump used for logging/debugging.
//!
//! # Invariants
//! - `id` is assigned by storage and never changes afterwards.
//! - `version` increases by exactly one per committed mutation.
//! - Only the repository layer mutates `EntityMeta`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Server-assigned storage identifier (SQLite rowid).
pub type EntityId = i64;

/// Persistence bookkeeping shared by every entity kind.
///
/// Embedded by value instead of inherited; repositories operate on it
/// through the [`Entity`] trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// `None` while the entity is transient.
    pub id: Option<EntityId>,
    /// Optimistic concurrency counter; 1 after insert.
    pub version: i64,
    /// Soft-delete tombstone; the row is never physically removed.
    pub deleted: bool,
    /// Epoch milliseconds, set once at insert.
    pub created_at: i64,
    /// Epoch milliseconds, refreshed on every committed mutation.
    pub modified_at: i64,
}

impl EntityMeta {
    pub fn new() -> Self {
        Self {
            id: None,
            version: 0,
            deleted: false,
            created_at: 0,
            modified_at: 0,
        }
    }

    /// Returns whether the entity has been through a successful insert.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub(crate) fn mark_inserted(&mut self, id: EntityId, now_ms: i64) {
        self.id = Some(id);
        self.version = 1;
        self.deleted = false;
        self.created_at = now_ms;
        self.modified_at = now_ms;
    }

    pub(crate) fn mark_updated(&mut self, now_ms: i64) {
        self.version += 1;
        self.modified_at = now_ms;
    }

    pub(crate) fn mark_deleted(&mut self, now_ms: i64) {
        self.deleted = true;
        self.version += 1;
        self.modified_at = now_ms;
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Required-attribute violation detected before any write is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    InvalidField {
        entity: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField { entity, field } => {
                write!(f, "{entity}.{field} is required and must not be empty")
            }
            Self::InvalidField {
                entity,
                field,
                reason,
            } => write!(f, "{entity}.{field} is invalid: {reason}"),
        }
    }
}

impl Error for ValidationError {}

/// One dumped attribute value.
///
/// Entity-valued attributes must be passed as [`DumpValue::Ref`] or
/// [`DumpValue::RefList`]; the dump renders them as identifiers only and
/// never traverses the related entity.
#[derive(Debug, Clone, PartialEq)]
pub enum DumpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ref(Option<EntityId>),
    RefList(Vec<EntityId>),
}

impl DumpValue {
    fn into_json(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(value),
            Self::Int(value) => Value::Number(value.into()),
            Self::Float(value) => Number::from_f64(value).map_or(Value::Null, Value::Number),
            Self::Text(value) => Value::String(value),
            Self::Ref(None) => Value::Null,
            Self::Ref(Some(id)) => Value::Number(id.into()),
            Self::RefList(ids) => Value::Array(ids.into_iter().map(Into::into).collect()),
        }
    }
}

/// Contract implemented by every entity kind.
pub trait Entity {
    /// Storage table backing this kind.
    const TABLE: &'static str;

    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Checks required attributes; must pass before insert and update.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Domain attributes for the textual dump, in declaration order.
    ///
    /// Implementations must not include plaintext secrets.
    fn dump_fields(&self) -> Vec<(&'static str, DumpValue)>;
}

/// Renders a human-readable JSON-shaped dump of the entity.
///
/// Identity and lifecycle state (`id`, `version`, `deleted`) lead, followed
/// by domain attributes. Audit timestamps and bookkeeping fields (names
/// starting with `_`, `when_` or `log_`) are omitted. Related entities are
/// rendered as their id only, so the dump is bounded even for cyclic graphs.
pub fn dump<E: Entity>(entity: &E) -> String {
    let meta = entity.meta();
    let mut map = Map::new();
    map.insert(
        "id".to_string(),
        meta.id.map_or(Value::Null, |id| Value::Number(id.into())),
    );
    map.insert("version".to_string(), Value::Number(meta.version.into()));
    map.insert("deleted".to_string(), Value::Bool(meta.deleted));

    for (name, value) in entity.dump_fields() {
        if is_internal_field(name) {
            continue;
        }
        map.insert(name.to_string(), value.into_json());
    }

    serde_json::to_string_pretty(&Value::Object(map)).unwrap_or_else(|_| String::from("{}"))
}

fn is_internal_field(name: &str) -> bool {
    name.starts_with('_') || name.starts_with("when_") || name.starts_with("log_")
}

#[cfg(test)]
mod tests {
    use super::{dump, is_internal_field, DumpValue, Entity, EntityMeta, ValidationError};

    struct Probe {
        meta: EntityMeta,
        label: String,
        owner: Option<i64>,
    }

    impl Entity for Probe {
        const TABLE: &'static str = "probe";

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn validate(&self) -> Result<(), ValidationError> {
            Ok(())
        }

        fn dump_fields(&self) -> Vec<(&'static str, DumpValue)> {
            vec![
                ("label", DumpValue::Text(self.label.clone())),
                ("owner", DumpValue::Ref(self.owner)),
                ("_scratch", DumpValue::Int(42)),
                ("when_synced", DumpValue::Int(7)),
            ]
        }
    }

    #[test]
    fn meta_lifecycle_tracks_version_and_timestamps() {
        let mut meta = EntityMeta::new();
        assert!(!meta.is_persisted());

        meta.mark_inserted(10, 1_000);
        assert_eq!(meta.id, Some(10));
        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_at, 1_000);

        meta.mark_updated(2_000);
        assert_eq!(meta.version, 2);
        assert_eq!(meta.modified_at, 2_000);
        assert_eq!(meta.created_at, 1_000);

        meta.mark_deleted(3_000);
        assert!(meta.deleted);
        assert_eq!(meta.version, 3);
    }

    #[test]
    fn dump_renders_refs_as_ids_and_skips_internal_fields() {
        let mut probe = Probe {
            meta: EntityMeta::new(),
            label: "boxer".to_string(),
            owner: Some(99),
        };
        probe.meta.mark_inserted(5, 1_000);

        let text = dump(&probe);
        assert!(text.contains("\"id\": 5"));
        assert!(text.contains("\"version\": 1"));
        assert!(text.contains("\"owner\": 99"));
        assert!(!text.contains("_scratch"));
        assert!(!text.contains("when_synced"));
        assert!(!text.contains("created_at"));
    }

    #[test]
    fn dump_renders_absent_ref_as_null() {
        let probe = Probe {
            meta: EntityMeta::new(),
            label: "stray".to_string(),
            owner: None,
        };

        let text = dump(&probe);
        assert!(text.contains("\"owner\": null"));
        assert!(text.contains("\"id\": null"));
    }

    #[test]
    fn internal_field_prefixes_are_recognized() {
        assert!(is_internal_field("_cache"));
        assert!(is_internal_field("when_created"));
        assert!(is_internal_field("log_level"));
        assert!(!is_internal_field("name"));
    }
}
