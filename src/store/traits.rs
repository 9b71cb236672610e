//! `Database` trait — async interface for onboarding persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::registry::StepNumber;

/// One row of a session's step history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub session_id: Uuid,
    pub from_step: StepNumber,
    pub to_step: StepNumber,
    /// What triggered the move: "next", "previous", "jump", "settle".
    pub cause: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    /// Read a JSON setting for a user (or session).
    async fn get_setting(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DatabaseError>;

    /// Upsert a JSON setting.
    async fn set_setting(
        &self,
        user_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Delete a setting. Returns whether a row was removed.
    async fn delete_setting(&self, user_id: &str, key: &str) -> Result<bool, DatabaseError>;

    // ── Onboarding history ──────────────────────────────────────────

    /// Append a step transition to the session's history.
    async fn record_transition(
        &self,
        session_id: Uuid,
        from_step: StepNumber,
        to_step: StepNumber,
        cause: &str,
    ) -> Result<(), DatabaseError>;

    /// Step history for a session, oldest first.
    async fn list_transitions(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, DatabaseError>;
}
