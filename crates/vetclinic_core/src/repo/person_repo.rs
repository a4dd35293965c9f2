//! Person repository: SQLite persistence with an encrypted password column.
//!
//! # Responsibility
//! - Insert/update/soft-delete person rows and their patient associations.
//! - Keep the password encrypted at rest; plaintext never leaves this
//!   module after persistence.
//!
//! # Invariants
//! - `national_id` is written once at insert and never updated.
//! - The patient association set is replaced atomically with the row write.

use crate::crypto::{open_string, seal, EncryptKeyProvider};
use crate::model::entity::{now_ms, Entity, EntityId};
use crate::model::patient::Patient;
use crate::model::person::{Person, Role};
use crate::repo::patient_repo::parse_patient_row;
use crate::repo::{
    diagnose_stale_write, history, map_unique_violation, soft_delete_entity, RepoError, RepoResult,
};
use log::debug;
use rusqlite::{params, Connection, Row, Transaction};

const PASSWORD_COLUMN: &str = "password_encrypted";

const PERSON_SELECT_SQL: &str = "SELECT
    id,
    version,
    deleted,
    created_at,
    modified_at,
    national_id,
    name,
    role
FROM person";

/// SQLite-backed person repository.
pub struct SqlitePersonRepository<'a, K: EncryptKeyProvider + ?Sized> {
    conn: &'a Connection,
    keys: &'a K,
}

impl<'a, K: EncryptKeyProvider + ?Sized> SqlitePersonRepository<'a, K> {
    pub fn new(conn: &'a Connection, keys: &'a K) -> Self {
        Self { conn, keys }
    }

    /// Persists a transient person: assigns id, version 1 and timestamps.
    ///
    /// The plaintext password is sealed into the encrypted column and
    /// cleared from the in-memory entity on success.
    pub fn insert(&self, person: &mut Person) -> RepoResult<EntityId> {
        person.validate()?;
        if let Some(id) = person.meta.id {
            return Err(RepoError::AlreadyPersisted {
                table: Person::TABLE,
                id,
            });
        }

        let key = self.keys.column_key(Person::TABLE, PASSWORD_COLUMN)?;
        let password = person.password.as_deref().unwrap_or_default();
        let sealed = seal(&key, password.as_bytes())?;

        let now = now_ms();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO person (
                version, deleted, created_at, modified_at,
                national_id, name, password_encrypted, role
            ) VALUES (1, 0, ?1, ?1, ?2, ?3, ?4, ?5);",
            params![
                now,
                person.national_id.as_str(),
                person.name.as_str(),
                sealed,
                person.role.as_label(),
            ],
        )
        .map_err(|err| map_unique_violation(err, Person::TABLE, "national_id"))?;

        let id = tx.last_insert_rowid();
        let mut committed = person.clone();
        committed.meta.mark_inserted(id, now);
        committed.password = None;

        replace_patient_links(&tx, id, &committed.patient_ids())?;
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        // The entity only reflects the insert once it actually committed.
        *person = committed;

        debug!("event=person_insert module=repo status=ok id={id}");
        Ok(id)
    }

    /// Persists changes to a loaded person under the optimistic version
    /// guard; the version increments on success.
    ///
    /// A plaintext password, when present, is re-sealed; otherwise the
    /// stored ciphertext is kept as is.
    pub fn update(&self, person: &mut Person) -> RepoResult<()> {
        person.validate()?;
        let id = person.meta.id.ok_or(RepoError::MissingId {
            table: Person::TABLE,
        })?;
        let read_version = person.meta.version;

        let sealed = match person.password.as_deref() {
            Some(password) => {
                let key = self.keys.column_key(Person::TABLE, PASSWORD_COLUMN)?;
                Some(seal(&key, password.as_bytes())?)
            }
            None => None,
        };

        let now = now_ms();
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE person
             SET
                name = ?1,
                role = ?2,
                password_encrypted = COALESCE(?3, password_encrypted),
                version = version + 1,
                modified_at = ?4
             WHERE id = ?5 AND version = ?6 AND deleted = 0;",
            params![
                person.name.as_str(),
                person.role.as_label(),
                sealed,
                now,
                id,
                read_version,
            ],
        )?;

        if changed == 0 {
            return Err(diagnose_stale_write(&tx, Person::TABLE, id, read_version));
        }

        let mut committed = person.clone();
        committed.meta.mark_updated(now);
        committed.password = None;

        replace_patient_links(&tx, id, &committed.patient_ids())?;
        history::record_snapshot(&tx, &committed)?;
        tx.commit()?;
        *person = committed;

        debug!(
            "event=person_update module=repo status=ok id={id} version={}",
            person.meta.version
        );
        Ok(())
    }

    /// Marks the person as deleted; row and history remain in storage.
    pub fn soft_delete(&self, person: &mut Person) -> RepoResult<()> {
        soft_delete_entity(self.conn, person)
    }

    /// Unique lookup by national identifier; absent is a normal result.
    ///
    /// Associated patients are loaded ordered by record number. Plaintext
    /// password is never populated on loaded rows.
    pub fn get_by_national_id(&self, national_id: &str) -> RepoResult<Option<Person>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PERSON_SELECT_SQL} WHERE national_id = ?1 AND deleted = 0;"))?;

        let mut rows = stmt.query([national_id])?;
        if let Some(row) = rows.next()? {
            let mut person = parse_person_row(row)?;
            if let Some(id) = person.meta.id {
                person.patients = self.load_patients(id)?;
            }
            return Ok(Some(person));
        }

        Ok(None)
    }

    /// Checks a candidate password against the stored ciphertext.
    ///
    /// The decrypted value never leaves this function; callers only learn
    /// whether the candidate matches.
    pub fn verify_password(&self, national_id: &str, candidate: &str) -> RepoResult<bool> {
        let sealed: Vec<u8> = self
            .conn
            .query_row(
                "SELECT password_encrypted FROM person WHERE national_id = ?1 AND deleted = 0;",
                [national_id],
                |row| row.get(0),
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => RepoError::NotFound {
                    table: Person::TABLE,
                    key: format!("national_id={national_id}"),
                },
                other => other.into(),
            })?;

        let key = self.keys.column_key(Person::TABLE, PASSWORD_COLUMN)?;
        let stored = open_string(&key, &sealed)?;
        Ok(stored == candidate)
    }

    fn load_patients(&self, person_id: EntityId) -> RepoResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                p.id, p.version, p.deleted, p.created_at, p.modified_at,
                p.record_number, p.name, p.birth_date, p.breed, p.sex, p.color
             FROM patient p
             INNER JOIN person_patient pp ON pp.patient_id = p.id
             WHERE pp.person_id = ?1 AND p.deleted = 0
             ORDER BY p.record_number ASC;",
        )?;

        let mut rows = stmt.query([person_id])?;
        let mut patients = Vec::new();
        while let Some(row) = rows.next()? {
            patients.push(parse_patient_row(row)?);
        }
        Ok(patients)
    }
}

/// Replaces the whole patient association set for one person.
fn replace_patient_links(
    tx: &Transaction<'_>,
    person_id: EntityId,
    patient_ids: &[EntityId],
) -> RepoResult<()> {
    tx.execute(
        "DELETE FROM person_patient WHERE person_id = ?1;",
        [person_id],
    )?;
    for patient_id in patient_ids {
        tx.execute(
            "INSERT INTO person_patient (person_id, patient_id) VALUES (?1, ?2);",
            params![person_id, patient_id],
        )?;
    }
    Ok(())
}

fn parse_person_row(row: &Row<'_>) -> RepoResult<Person> {
    let role_label: String = row.get("role")?;
    let role = Role::from_label(&role_label).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid role label `{role_label}` in person.role"))
    })?;

    let mut person = Person::new(
        row.get::<_, String>("national_id")?,
        row.get::<_, String>("name")?,
        String::new(),
        role,
    );
    person.password = None;
    person.meta.id = Some(row.get("id")?);
    person.meta.version = row.get("version")?;
    person.meta.deleted = crate::repo::bool_from_int(Person::TABLE, row.get("deleted")?)?;
    person.meta.created_at = row.get("created_at")?;
    person.meta.modified_at = row.get("modified_at")?;
    Ok(person)
}
