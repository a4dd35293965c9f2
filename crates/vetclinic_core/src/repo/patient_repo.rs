//! Patient repository: SQLite persistence keyed by clinic record number.
//!
//! # Invariants
//! - `record_number` is written once at insert and never updated.
//! - Default reads exclude soft-deleted rows; history remains available
//!   through the history log.

use crate::model::entity::{now_ms, Entity, EntityId};
use crate::model::patient::{Patient, Sex};
use crate::repo::{
    bool_from_int, diagnose_stale_write, history, map_unique_violation, soft_delete_entity,
    RepoError, RepoResult,
};
use log::debug;
use rusqlite::{params, Connection, Row};

const PATIENT_SELECT_SQL: &str = "SELECT
    id,
    version,
    deleted,
    created_at,
    modified_at,
    record_number,
    name,
    birth_date,
    breed,
    sex,
    color
FROM patient";

/// SQLite-backed patient repository.
pub struct SqlitePatientRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePatientRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Persists a transient patient: assigns id, version 1 and timestamps.
    pub fn insert(&self, patient: &mut Patient) -> RepoResult<EntityId> {
        patient.validate()?;
        if let Some(id) = patient.meta.id {
            return Err(RepoError::AlreadyPersisted {
                table: Patient::TABLE,
                id,
            });
        }

        let now = now_ms();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO patient (
                version, deleted, created_at, modified_at,
                record_number, name, birth_date, breed, sex, color
            ) VALUES (1, 0, ?1, ?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                now,
                patient.record_number,
                patient.name.as_str(),
                patient.birth_date,
                patient.breed.as_deref(),
                patient.sex.as_label(),
                patient.color.as_deref(),
            ],
        )
        .map_err(|err| map_unique_violation(err, Patient::TABLE, "record_number"))?;

        let id = tx.last_insert_rowid();
        let mut committed = patient.clone();
        committed.meta.mark_inserted(id, now);
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        *patient = committed;

        debug!(
            "event=patient_insert module=repo status=ok id={id} record_number={}",
            patient.record_number
        );
        Ok(id)
    }

    /// Persists changes under the optimistic version guard.
    ///
    /// The record number is immutable and deliberately absent from the
    /// UPDATE column list.
    pub fn update(&self, patient: &mut Patient) -> RepoResult<()> {
        patient.validate()?;
        let id = patient.meta.id.ok_or(RepoError::MissingId {
            table: Patient::TABLE,
        })?;
        let read_version = patient.meta.version;

        let now = now_ms();
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE patient
             SET
                name = ?1,
                birth_date = ?2,
                breed = ?3,
                sex = ?4,
                color = ?5,
                version = version + 1,
                modified_at = ?6
             WHERE id = ?7 AND version = ?8 AND deleted = 0;",
            params![
                patient.name.as_str(),
                patient.birth_date,
                patient.breed.as_deref(),
                patient.sex.as_label(),
                patient.color.as_deref(),
                now,
                id,
                read_version,
            ],
        )?;

        if changed == 0 {
            return Err(diagnose_stale_write(&tx, Patient::TABLE, id, read_version));
        }

        let mut committed = patient.clone();
        committed.meta.mark_updated(now);
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        *patient = committed;

        debug!(
            "event=patient_update module=repo status=ok id={id} version={}",
            patient.meta.version
        );
        Ok(())
    }

    /// Marks the patient as deleted; row and history remain in storage.
    pub fn soft_delete(&self, patient: &mut Patient) -> RepoResult<()> {
        soft_delete_entity(self.conn, patient)
    }

    /// Unique lookup by record number; absent is a normal result.
    pub fn get_by_record_number(&self, record_number: i64) -> RepoResult<Option<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PATIENT_SELECT_SQL} WHERE record_number = ?1 AND deleted = 0;"
        ))?;

        let mut rows = stmt.query([record_number])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_patient_row(row)?));
        }
        Ok(None)
    }

    /// All non-deleted patients, ordered by record number.
    pub fn list(&self) -> RepoResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PATIENT_SELECT_SQL} WHERE deleted = 0 ORDER BY record_number ASC;"
        ))?;

        let mut rows = stmt.query([])?;
        let mut patients = Vec::new();
        while let Some(row) = rows.next()? {
            patients.push(parse_patient_row(row)?);
        }
        Ok(patients)
    }

    /// Substring match on the patient name: "pep" matches "pepe" and
    /// "pepa". Case-insensitive for ASCII, per SQLite LIKE semantics.
    /// The fragment is matched literally; LIKE metacharacters in it carry
    /// no wildcard meaning.
    pub fn search_by_name(&self, fragment: &str) -> RepoResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PATIENT_SELECT_SQL}
             WHERE deleted = 0 AND name LIKE '%' || ?1 || '%' ESCAPE '\\'
             ORDER BY record_number ASC;"
        ))?;

        let mut rows = stmt.query([escape_like(fragment)])?;
        let mut patients = Vec::new();
        while let Some(row) = rows.next()? {
            patients.push(parse_patient_row(row)?);
        }
        Ok(patients)
    }
}

/// Escapes LIKE metacharacters so the fragment matches literally.
fn escape_like(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len());
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub(crate) fn parse_patient_row(row: &Row<'_>) -> RepoResult<Patient> {
    let sex_label: String = row.get("sex")?;
    let sex = Sex::from_label(&sex_label).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid sex label `{sex_label}` in patient.sex"))
    })?;

    let mut patient = Patient::new(
        row.get("record_number")?,
        row.get::<_, String>("name")?,
        sex,
    );
    patient.birth_date = row.get("birth_date")?;
    patient.breed = row.get("breed")?;
    patient.color = row.get("color")?;
    patient.meta.id = Some(row.get("id")?);
    patient.meta.version = row.get("version")?;
    patient.meta.deleted = bool_from_int(Patient::TABLE, row.get("deleted")?)?;
    patient.meta.created_at = row.get("created_at")?;
    patient.meta.modified_at = row.get("modified_at")?;
    Ok(patient)
}
