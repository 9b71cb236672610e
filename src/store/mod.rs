//! Persistence layer — libSQL storage for onboarding snapshots and history.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, TransitionRecord};
