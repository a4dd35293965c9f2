//! Visit record repository: SQLite persistence for check-ups.
//!
//! # Invariants
//! - The attending veterinarian must resolve to a live person row at
//!   write time.
//! - Visit dates are stored as epoch milliseconds so date ordering is a
//!   plain numeric ORDER BY.

use crate::model::entity::{now_ms, Entity, EntityId};
use crate::model::person::Person;
use crate::model::visit::VisitRecord;
use crate::repo::{
    bool_from_int, diagnose_stale_write, history, soft_delete_entity, RepoError, RepoResult,
};
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use rusqlite::{params, Connection, Row};

const VISIT_SELECT_SQL: &str = "SELECT
    id,
    version,
    deleted,
    created_at,
    modified_at,
    visit_date,
    next_visit_date,
    temperature,
    weight,
    height,
    diagnosis,
    note,
    veterinarian_id,
    patient_id
FROM visit_record";

/// SQLite-backed visit record repository.
pub struct SqliteVisitRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteVisitRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Persists a transient visit record.
    ///
    /// Fails with `NotFound` when the attending veterinarian does not
    /// resolve to a live person row.
    pub fn insert(&self, visit: &mut VisitRecord) -> RepoResult<EntityId> {
        visit.validate()?;
        if let Some(id) = visit.meta.id {
            return Err(RepoError::AlreadyPersisted {
                table: VisitRecord::TABLE,
                id,
            });
        }

        let tx = self.conn.unchecked_transaction()?;
        ensure_person_exists(&tx, visit.veterinarian_id)?;

        let now = now_ms();
        tx.execute(
            "INSERT INTO visit_record (
                version, deleted, created_at, modified_at,
                visit_date, next_visit_date, temperature, weight, height,
                diagnosis, note, veterinarian_id, patient_id
            ) VALUES (1, 0, ?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                now,
                visit.visit_date.timestamp_millis(),
                visit.next_visit_date.timestamp_millis(),
                visit.temperature,
                visit.weight,
                visit.height,
                visit.diagnosis.as_str(),
                visit.note.as_deref(),
                visit.veterinarian_id,
                visit.patient_id,
            ],
        )?;

        let id = tx.last_insert_rowid();
        let mut committed = visit.clone();
        committed.meta.mark_inserted(id, now);
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        *visit = committed;

        debug!(
            "event=visit_insert module=repo status=ok id={id} veterinarian_id={}",
            visit.veterinarian_id
        );
        Ok(id)
    }

    /// Persists changes under the optimistic version guard.
    pub fn update(&self, visit: &mut VisitRecord) -> RepoResult<()> {
        visit.validate()?;
        let id = visit.meta.id.ok_or(RepoError::MissingId {
            table: VisitRecord::TABLE,
        })?;
        let read_version = visit.meta.version;

        let now = now_ms();
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE visit_record
             SET
                visit_date = ?1,
                next_visit_date = ?2,
                temperature = ?3,
                weight = ?4,
                height = ?5,
                diagnosis = ?6,
                note = ?7,
                version = version + 1,
                modified_at = ?8
             WHERE id = ?9 AND version = ?10 AND deleted = 0;",
            params![
                visit.visit_date.timestamp_millis(),
                visit.next_visit_date.timestamp_millis(),
                visit.temperature,
                visit.weight,
                visit.height,
                visit.diagnosis.as_str(),
                visit.note.as_deref(),
                now,
                id,
                read_version,
            ],
        )?;

        if changed == 0 {
            return Err(diagnose_stale_write(
                &tx,
                VisitRecord::TABLE,
                id,
                read_version,
            ));
        }

        let mut committed = visit.clone();
        committed.meta.mark_updated(now);
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        *visit = committed;

        debug!(
            "event=visit_update module=repo status=ok id={id} version={}",
            visit.meta.version
        );
        Ok(())
    }

    /// Marks the visit as deleted; row and history remain in storage.
    pub fn soft_delete(&self, visit: &mut VisitRecord) -> RepoResult<()> {
        soft_delete_entity(self.conn, visit)
    }

    /// All visits attended by the veterinarian with the given national
    /// identifier, ordered by visit date ascending.
    pub fn list_by_veterinarian(&self, national_id: &str) -> RepoResult<Vec<VisitRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                v.id, v.version, v.deleted, v.created_at, v.modified_at,
                v.visit_date, v.next_visit_date, v.temperature, v.weight,
                v.height, v.diagnosis, v.note, v.veterinarian_id, v.patient_id
             FROM visit_record v
             INNER JOIN person ON person.id = v.veterinarian_id
             WHERE person.national_id = ?1 AND v.deleted = 0
             ORDER BY v.visit_date ASC, v.id ASC;",
        )?;

        let mut rows = stmt.query([national_id])?;
        let mut visits = Vec::new();
        while let Some(row) = rows.next()? {
            visits.push(parse_visit_row(row)?);
        }
        Ok(visits)
    }

    /// All non-deleted visits of one patient, ordered by visit date.
    pub fn list_by_patient(&self, patient_id: EntityId) -> RepoResult<Vec<VisitRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VISIT_SELECT_SQL}
             WHERE patient_id = ?1 AND deleted = 0
             ORDER BY visit_date ASC, id ASC;"
        ))?;

        let mut rows = stmt.query([patient_id])?;
        let mut visits = Vec::new();
        while let Some(row) = rows.next()? {
            visits.push(parse_visit_row(row)?);
        }
        Ok(visits)
    }
}

fn ensure_person_exists(conn: &Connection, person_id: EntityId) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM person WHERE id = ?1 AND deleted = 0);",
        [person_id],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Err(RepoError::NotFound {
            table: Person::TABLE,
            key: format!("id={person_id}"),
        });
    }
    Ok(())
}

fn parse_visit_row(row: &Row<'_>) -> RepoResult<VisitRecord> {
    let mut visit = VisitRecord::new(
        datetime_from_ms(row.get("visit_date")?, "visit_date")?,
        datetime_from_ms(row.get("next_visit_date")?, "next_visit_date")?,
        row.get::<_, String>("diagnosis")?,
        row.get("veterinarian_id")?,
    );
    visit.temperature = row.get("temperature")?;
    visit.weight = row.get("weight")?;
    visit.height = row.get("height")?;
    visit.note = row.get("note")?;
    visit.patient_id = row.get("patient_id")?;
    visit.meta.id = Some(row.get("id")?);
    visit.meta.version = row.get("version")?;
    visit.meta.deleted = bool_from_int(VisitRecord::TABLE, row.get("deleted")?)?;
    visit.meta.created_at = row.get("created_at")?;
    visit.meta.modified_at = row.get("modified_at")?;
    Ok(visit)
}

fn datetime_from_ms(ms: i64, column: &str) -> RepoResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid epoch millisecond value `{ms}` in visit_record.{column}"
        ))
    })
}
