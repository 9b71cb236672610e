//! External services the onboarding steps depend on.
//!
//! Every call is async and fallible. The flow never advances until it has
//! seen a success result.

pub mod mock;

pub use mock::MockServices;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::onboarding::model::CalendarProvider;

/// Identity provider offered on the register step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SsoProvider {
    Google,
    Microsoft,
}

impl std::fmt::Display for SsoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Microsoft => write!(f, "microsoft"),
        }
    }
}

/// Identity returned by a successful SSO login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsoIdentity {
    pub provider: SsoProvider,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarConnection {
    pub provider: CalendarProvider,
    pub connected_at: DateTime<Utc>,
}

/// Payload for the registration service. The password only lives here.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: SecretString,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    pub account_id: Uuid,
    /// Whether a confirmation code was mailed.
    pub confirmation_sent: bool,
}

/// Enterprise "request access" form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub email: String,
    pub company: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub team_size: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTicket {
    pub ticket_id: Uuid,
}

/// The services the onboarding flow calls out to.
#[async_trait]
pub trait OnboardingServices: Send + Sync {
    async fn sso_login(&self, provider: SsoProvider) -> Result<SsoIdentity, CollaboratorError>;

    async fn connect_calendar(
        &self,
        provider: CalendarProvider,
    ) -> Result<CalendarConnection, CollaboratorError>;

    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Registration, CollaboratorError>;

    async fn confirm_email(&self, email: &str, code: &str) -> Result<(), CollaboratorError>;

    async fn request_access(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessTicket, CollaboratorError>;
}
