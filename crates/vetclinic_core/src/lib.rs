//! Core domain and persistence layer for veterinary clinic records.
//! This crate is the single source of truth for business invariants:
//! unique business keys, optimistic concurrency, soft deletion and
//! encrypted-at-rest attributes.

pub mod crypto;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use crypto::{CryptoError, DerivedKeyProvider, EncryptKeyProvider};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::entity::{dump, Entity, EntityId, EntityMeta, ValidationError};
pub use model::patient::{Patient, Sex};
pub use model::person::{Person, Role};
pub use model::visit::VisitRecord;
pub use repo::history::HistoryEntry;
pub use repo::patient_repo::SqlitePatientRepository;
pub use repo::person_repo::SqlitePersonRepository;
pub use repo::visit_repo::SqliteVisitRepository;
pub use repo::{RepoError, RepoResult};
pub use service::backend::{BackendConfig, BackendService, ServiceError, ServiceResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
