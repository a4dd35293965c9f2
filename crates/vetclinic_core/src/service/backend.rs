//! Backend service facade over the clinic repositories.
//!
//! # Responsibility
//! - Own one storage session and the injected encryption key provider.
//! - Translate domain operations into repository calls and enforce
//!   entity-level preconditions before delegating.
//!
//! # Invariants
//! - One facade instance owns one stateful connection; it is not safe to
//!   share across threads without external synchronization (`Connection`
//!   is `!Sync`, so the compiler enforces this).
//! - Operations fail with `NotInitialized` outside the
//!   `initialize()`/`shutdown()` bracket.

use crate::crypto::DerivedKeyProvider;
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::entity::{Entity, EntityId};
use crate::model::patient::Patient;
use crate::model::person::Person;
use crate::model::visit::VisitRecord;
use crate::repo::history::{history_for, HistoryEntry};
use crate::repo::patient_repo::SqlitePatientRepository;
use crate::repo::person_repo::SqlitePersonRepository;
use crate::repo::visit_repo::SqliteVisitRepository;
use crate::repo::RepoError;
use log::{debug, error, info};
use rusqlite::Connection;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub enum ServiceError {
    /// Operation invoked outside the initialize/shutdown bracket.
    NotInitialized,
    Repo(RepoError),
    Db(DbError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "backend service is not initialized"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotInitialized => None,
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for ServiceError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Backend configuration injected at construction.
#[derive(Clone, Deserialize)]
pub struct BackendConfig {
    /// Database file location; `None` selects an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Dataset secret feeding per-column key derivation.
    pub encryption_secret: String,
}

impl BackendConfig {
    pub fn in_memory(encryption_secret: impl Into<String>) -> Self {
        Self {
            db_path: None,
            encryption_secret: encryption_secret.into(),
        }
    }

    pub fn at_path(db_path: impl Into<PathBuf>, encryption_secret: impl Into<String>) -> Self {
        Self {
            db_path: Some(db_path.into()),
            encryption_secret: encryption_secret.into(),
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("db_path", &self.db_path)
            .field("encryption_secret", &"<redacted>")
            .finish()
    }
}

/// The only caller-visible surface of the persistence layer.
pub struct BackendService {
    db_path: Option<PathBuf>,
    keys: DerivedKeyProvider,
    conn: Option<Connection>,
}

impl BackendService {
    /// Builds the facade; no connection is opened until `initialize()`.
    pub fn new(config: BackendConfig) -> Self {
        Self {
            db_path: config.db_path,
            keys: DerivedKeyProvider::new(config.encryption_secret),
            conn: None,
        }
    }

    /// Opens the storage session and applies pending migrations.
    ///
    /// Idempotent: initializing an already initialized facade is a no-op.
    pub fn initialize(&mut self) -> ServiceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = match &self.db_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        self.conn = Some(conn);
        info!("event=backend_init module=service status=ok");
        Ok(())
    }

    /// Closes the storage session. Idempotent.
    pub fn shutdown(&mut self) -> ServiceResult<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                error!("event=backend_shutdown module=service status=error error={err}");
                return Err(ServiceError::Db(err.into()));
            }
            info!("event=backend_shutdown module=service status=ok");
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    fn conn(&self) -> ServiceResult<&Connection> {
        self.conn.as_ref().ok_or(ServiceError::NotInitialized)
    }

    /// Unique lookup by national identifier; absent is `Ok(None)`.
    ///
    /// Lookup is by national identifier only; a contact-address fallback
    /// is deliberately not offered.
    pub fn get_person(&self, national_id: &str) -> ServiceResult<Option<Person>> {
        let conn = self.conn()?;
        let person = SqlitePersonRepository::new(conn, &self.keys).get_by_national_id(national_id)?;
        debug!(
            "event=get_person module=service status=ok found={}",
            person.is_some()
        );
        Ok(person)
    }

    /// All non-deleted patients, ordered by record number.
    pub fn get_patients(&self) -> ServiceResult<Vec<Patient>> {
        let patients = SqlitePatientRepository::new(self.conn()?).list()?;
        debug!(
            "event=get_patients module=service status=ok count={}",
            patients.len()
        );
        Ok(patients)
    }

    /// Unique lookup by record number; absent is `Ok(None)`.
    pub fn get_patient(&self, record_number: i64) -> ServiceResult<Option<Patient>> {
        let patient = SqlitePatientRepository::new(self.conn()?).get_by_record_number(record_number)?;
        Ok(patient)
    }

    /// Visits attended by the given veterinarian, ordered by visit date.
    pub fn get_visits_by_veterinarian(
        &self,
        national_id: &str,
    ) -> ServiceResult<Vec<VisitRecord>> {
        let visits = SqliteVisitRepository::new(self.conn()?).list_by_veterinarian(national_id)?;
        debug!(
            "event=get_visits_by_veterinarian module=service status=ok count={}",
            visits.len()
        );
        Ok(visits)
    }

    /// Substring search on patient names ("pep" matches "pepe", "pepa").
    pub fn search_patients_by_name(&self, fragment: &str) -> ServiceResult<Vec<Patient>> {
        let patients = SqlitePatientRepository::new(self.conn()?).search_by_name(fragment)?;
        debug!(
            "event=search_patients module=service status=ok count={}",
            patients.len()
        );
        Ok(patients)
    }

    /// Attaches a visit to the patient with the given record number.
    ///
    /// Fails with `NotFound` before creating anything when the patient is
    /// absent. On success the visit is persisted bound to the patient and
    /// the patient row itself is persisted again (version bump plus
    /// history snapshot). The read and the writes are separate steps; a
    /// concurrent soft delete of the patient in between surfaces as
    /// `NotFound` or `OptimisticLock`.
    pub fn add_visit(
        &mut self,
        visit: &mut VisitRecord,
        record_number: i64,
    ) -> ServiceResult<EntityId> {
        let conn = self.conn()?;
        let patient_repo = SqlitePatientRepository::new(conn);

        let mut patient = patient_repo
            .get_by_record_number(record_number)?
            .ok_or_else(|| RepoError::NotFound {
                table: Patient::TABLE,
                key: format!("record_number={record_number}"),
            })?;

        visit.patient_id = patient.meta.id;
        let visit_id = SqliteVisitRepository::new(conn).insert(visit)?;
        patient_repo.update(&mut patient)?;

        debug!(
            "event=add_visit module=service status=ok visit_id={visit_id} record_number={record_number}"
        );
        Ok(visit_id)
    }

    /// Persists a transient person.
    pub fn insert_person(&mut self, person: &mut Person) -> ServiceResult<EntityId> {
        let conn = self.conn()?;
        let id = SqlitePersonRepository::new(conn, &self.keys).insert(person)?;
        Ok(id)
    }

    /// Persists changes to a loaded person (optimistic version guard).
    pub fn update_person(&mut self, person: &mut Person) -> ServiceResult<()> {
        let conn = self.conn()?;
        SqlitePersonRepository::new(conn, &self.keys).update(person)?;
        Ok(())
    }

    /// Soft-deletes a person; the row and its history are retained.
    pub fn soft_delete_person(&mut self, person: &mut Person) -> ServiceResult<()> {
        let conn = self.conn()?;
        SqlitePersonRepository::new(conn, &self.keys).soft_delete(person)?;
        Ok(())
    }

    /// Checks a candidate password without exposing the stored plaintext.
    pub fn verify_person_password(
        &self,
        national_id: &str,
        candidate: &str,
    ) -> ServiceResult<bool> {
        let conn = self.conn()?;
        let matches =
            SqlitePersonRepository::new(conn, &self.keys).verify_password(national_id, candidate)?;
        Ok(matches)
    }

    /// Persists a transient patient.
    pub fn insert_patient(&mut self, patient: &mut Patient) -> ServiceResult<EntityId> {
        let id = SqlitePatientRepository::new(self.conn()?).insert(patient)?;
        Ok(id)
    }

    /// Persists changes to a loaded patient (optimistic version guard).
    pub fn update_patient(&mut self, patient: &mut Patient) -> ServiceResult<()> {
        SqlitePatientRepository::new(self.conn()?).update(patient)?;
        Ok(())
    }

    /// Soft-deletes a patient; the row and its history are retained.
    pub fn soft_delete_patient(&mut self, patient: &mut Patient) -> ServiceResult<()> {
        SqlitePatientRepository::new(self.conn()?).soft_delete(patient)?;
        Ok(())
    }

    /// Persists changes to a loaded visit (optimistic version guard).
    pub fn update_visit(&mut self, visit: &mut VisitRecord) -> ServiceResult<()> {
        SqliteVisitRepository::new(self.conn()?).update(visit)?;
        Ok(())
    }

    /// Soft-deletes a visit; the row and its history are retained.
    pub fn soft_delete_visit(&mut self, visit: &mut VisitRecord) -> ServiceResult<()> {
        SqliteVisitRepository::new(self.conn()?).soft_delete(visit)?;
        Ok(())
    }

    /// All non-deleted visits of one patient, ordered by visit date.
    pub fn get_patient_visits(&self, patient_id: EntityId) -> ServiceResult<Vec<VisitRecord>> {
        let visits = SqliteVisitRepository::new(self.conn()?).list_by_patient(patient_id)?;
        Ok(visits)
    }

    /// History-aware read: every snapshot recorded for one entity,
    /// including snapshots of soft-deleted rows.
    pub fn history(&self, entity_table: &str, entity_id: EntityId) -> ServiceResult<Vec<HistoryEntry>> {
        let entries = history_for(self.conn()?, entity_table, entity_id)?;
        Ok(entries)
    }
}

impl Drop for BackendService {
    fn drop(&mut self) {
        // Best-effort close; rusqlite closes on drop anyway, this only
        // surfaces the log line for sessions never shut down explicitly.
        if self.conn.is_some() {
            let _ = self.shutdown();
        }
    }
}
