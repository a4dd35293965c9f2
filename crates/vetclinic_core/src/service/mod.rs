//! Core use-case services.
//!
//! # Responsibility
//! - Expose the backend facade, the only surface external callers invoke.
//! - Keep callers decoupled from SQL and repository details.

pub mod backend;
