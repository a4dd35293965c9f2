//! Repository layer: SQLite persistence for the three entity kinds.
//!
//! # Responsibility
//! - Define the shared persistence error taxonomy.
//! - Provide the generic version-guarded write operations shared by all
//!   entity kinds (soft delete, stale-write diagnosis, history snapshots).
//! - Isolate SQL details from the service facade.
//!
//! # Invariants
//! - Write paths validate the entity before any SQL mutation.
//! - Every committed mutation appends one history snapshot.
//! - Callers must choose `insert` or `update` explicitly; the generic
//!   [`save`] always fails.

use crate::crypto::CryptoError;
use crate::db::DbError;
use crate::model::entity::{now_ms, Entity, EntityId, ValidationError};
use log::debug;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod history;
pub mod patient_repo;
pub mod person_repo;
pub mod visit_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence and query error taxonomy shared by all repositories.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    /// Duplicate business key (national id, record number).
    UniqueConstraint {
        table: &'static str,
        column: &'static str,
    },
    /// The writer's read version no longer matches the stored version.
    OptimisticLock {
        table: &'static str,
        id: EntityId,
        read_version: i64,
        stored_version: i64,
    },
    /// An entity required as a write precondition is absent.
    NotFound {
        table: &'static str,
        key: String,
    },
    /// Update or delete attempted on a transient entity.
    MissingId {
        table: &'static str,
    },
    /// Insert attempted on an already persisted entity.
    AlreadyPersisted {
        table: &'static str,
        id: EntityId,
    },
    /// The ambiguous generic save path; always a caller bug.
    AmbiguousSave {
        table: &'static str,
    },
    Crypto(CryptoError),
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::UniqueConstraint { table, column } => {
                write!(f, "duplicate value for unique column {table}.{column}")
            }
            Self::OptimisticLock {
                table,
                id,
                read_version,
                stored_version,
            } => write!(
                f,
                "stale write on {table} id={id}: read version {read_version}, stored version {stored_version}"
            ),
            Self::NotFound { table, key } => write!(f, "{table} not found: {key}"),
            Self::MissingId { table } => {
                write!(f, "{table} entity has no id; insert it first")
            }
            Self::AlreadyPersisted { table, id } => {
                write!(f, "{table} entity already persisted with id={id}; use update()")
            }
            Self::AmbiguousSave { table } => {
                write!(f, "ambiguous save on {table}: use insert() or update()")
            }
            Self::Crypto(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Crypto(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<CryptoError> for RepoError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Generic persistence entry point that exists only to be rejected.
///
/// Insert and update have different invariants; a caller reaching for a
/// bare "save" has not decided which one it means.
pub fn save<E: Entity>(_entity: &E) -> RepoResult<()> {
    Err(RepoError::AmbiguousSave { table: E::TABLE })
}

/// Soft-deletes one entity row with the optimistic version guard.
///
/// Shared by all entity kinds: the guarded UPDATE shape is identical, only
/// the table name differs. Bumps the version, stamps the modification time
/// and appends a history snapshot in the same transaction. The in-memory
/// entity is only touched once the transaction has committed; on any
/// failure it keeps its pre-call state.
pub fn soft_delete_entity<E: Entity + Serialize + Clone>(
    conn: &Connection,
    entity: &mut E,
) -> RepoResult<()> {
    let id = entity.meta().id.ok_or(RepoError::MissingId { table: E::TABLE })?;
    let read_version = entity.meta().version;
    let now = now_ms();

    let tx = conn.unchecked_transaction()?;
    let changed = tx.execute(
        &format!(
            "UPDATE {}
             SET deleted = 1, version = version + 1, modified_at = ?1
             WHERE id = ?2 AND version = ?3 AND deleted = 0;",
            E::TABLE
        ),
        params![now, id, read_version],
    )?;

    if changed == 0 {
        return Err(diagnose_stale_write(&tx, E::TABLE, id, read_version));
    }

    let mut committed = entity.clone();
    committed.meta_mut().mark_deleted(now);
    history::record_snapshot(&tx, &committed)?;
    tx.commit()?;
    *entity = committed;

    debug!(
        "event=soft_delete module=repo status=ok table={} id={id} version={}",
        E::TABLE,
        entity.meta().version
    );
    Ok(())
}

/// Explains a guarded write that changed zero rows.
///
/// Distinguishes a stale version (row exists, live, version differs) from a
/// missing or soft-deleted row. A concurrent soft delete between a caller's
/// read and write therefore surfaces as `NotFound`, never silently resolved.
pub(crate) fn diagnose_stale_write(
    conn: &Connection,
    table: &'static str,
    id: EntityId,
    read_version: i64,
) -> RepoError {
    let row = conn.query_row(
        &format!("SELECT version, deleted FROM {table} WHERE id = ?1;"),
        [id],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    );

    match row {
        Ok((_, 1)) => RepoError::NotFound {
            table,
            key: format!("id={id} (soft-deleted)"),
        },
        Ok((stored_version, _)) => RepoError::OptimisticLock {
            table,
            id,
            read_version,
            stored_version,
        },
        Err(rusqlite::Error::QueryReturnedNoRows) => RepoError::NotFound {
            table,
            key: format!("id={id}"),
        },
        Err(err) => err.into(),
    }
}

/// Maps a SQLite unique-index violation onto the domain taxonomy.
pub(crate) fn map_unique_violation(
    err: rusqlite::Error,
    table: &'static str,
    column: &'static str,
) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RepoError::UniqueConstraint { table, column }
        }
        _ => err.into(),
    }
}

pub(crate) fn bool_from_int(table: &'static str, value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid deleted flag `{other}` in {table}.deleted"
        ))),
    }
}
