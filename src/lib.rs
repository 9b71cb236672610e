//! Scribe onboarding — session-scoped sign-up flow for the meeting
//! transcription service.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod store;
pub mod validation;
