//! Error types for the onboarding service.

use uuid::Uuid;

use crate::onboarding::gates::ValidationFailure;
use crate::onboarding::registry::StepNumber;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Onboarding error: {0}")]
    Onboarding(#[from] OnboardingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure reported by an external onboarding service (SSO, calendar, ...).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} request failed: {reason}")]
    Failed {
        service: &'static str,
        reason: String,
    },

    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    pub fn service(&self) -> &'static str {
        match self {
            Self::Failed { service, .. } | Self::Rejected { service, .. } => service,
        }
    }
}

/// Errors surfaced by onboarding transitions and step actions.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Step {step} is not reachable from the current progress")]
    StepNotReachable { step: StepNumber },

    #[error("Action is only available on step {expected}, current step is {current}")]
    WrongStep {
        expected: StepNumber,
        current: StepNumber,
    },

    #[error("Onboarding session {0} is closed")]
    SessionClosed(Uuid),

    #[error("Onboarding session {0} was reset while the request was in flight")]
    Superseded(Uuid),

    #[error("Onboarding session {0} not found")]
    SessionNotFound(Uuid),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
