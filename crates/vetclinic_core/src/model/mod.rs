//! Domain model: the shared entity capability and the three entity kinds.
//!
//! # Responsibility
//! - Define the closed schema: person, patient, visit record.
//! - Keep persistence bookkeeping in one embedded structure.
//!
//! # Invariants
//! - Deletion is represented by soft-delete tombstones, not hard delete.
//! - Enum values map to explicit external labels, stable across releases.

pub mod entity;
pub mod patient;
pub mod person;
pub mod visit;
