//! Point-in-time history of entity mutations.
//!
//! # Responsibility
//! - Append one snapshot per committed mutation (insert/update/soft delete).
//! - Serve history-aware reads, including snapshots of soft-deleted rows.
//!
//! # Invariants
//! - `revision` equals the entity version after the mutation, so revisions
//!   are strictly monotonic per entity.
//! - Snapshots carry scalar row state only; associations and plaintext
//!   secrets are never serialized.

use crate::model::entity::{Entity, EntityId};
use crate::repo::{RepoError, RepoResult};
use rusqlite::{params, Connection};
use serde::Serialize;

/// One stored snapshot of an entity at a past revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub entity_table: String,
    pub entity_id: EntityId,
    pub revision: i64,
    /// JSON dump of the row state at the time of the mutation.
    pub snapshot: String,
    /// Epoch milliseconds at which the mutation was recorded.
    pub recorded_at: i64,
}

/// Appends a snapshot of the entity's current state.
///
/// Must run inside the same transaction as the mutation it records.
pub(crate) fn record_snapshot<E: Entity + Serialize>(
    conn: &Connection,
    entity: &E,
) -> RepoResult<()> {
    let id = entity.meta().id.ok_or(RepoError::MissingId { table: E::TABLE })?;
    let snapshot = serde_json::to_string(entity)
        .map_err(|err| RepoError::InvalidData(format!("snapshot serialization failed: {err}")))?;

    conn.execute(
        "INSERT INTO entity_history (entity_table, entity_id, revision, snapshot, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            E::TABLE,
            id,
            entity.meta().version,
            snapshot,
            entity.meta().modified_at,
        ],
    )?;
    Ok(())
}

/// Returns all snapshots for one entity, oldest revision first.
///
/// History-aware access path: soft-deleted entities remain fully visible
/// here even though standard queries exclude them.
pub fn history_for(
    conn: &Connection,
    entity_table: &str,
    entity_id: EntityId,
) -> RepoResult<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT entity_table, entity_id, revision, snapshot, recorded_at
         FROM entity_history
         WHERE entity_table = ?1 AND entity_id = ?2
         ORDER BY revision ASC;",
    )?;

    let mut rows = stmt.query(params![entity_table, entity_id])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(HistoryEntry {
            entity_table: row.get(0)?,
            entity_id: row.get(1)?,
            revision: row.get(2)?,
            snapshot: row.get(3)?,
            recorded_at: row.get(4)?,
        });
    }

    Ok(entries)
}
