//! In-process mock services with injected latency and random failures.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secrecy::ExposeSecret;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    AccessRequest, AccessTicket, CalendarConnection, OnboardingServices, Registration,
    RegistrationRequest, SsoIdentity, SsoProvider,
};
use crate::config::CollaboratorConfig;
use crate::error::CollaboratorError;
use crate::onboarding::model::CalendarProvider;

/// Mock of the SSO, calendar, registration and access-request backends.
pub struct MockServices {
    config: CollaboratorConfig,
    rng: Mutex<StdRng>,
}

impl MockServices {
    pub fn new(config: CollaboratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Sleep for the configured latency, then roll for failure.
    async fn simulate(&self, service: &'static str, failure_rate: f64) -> Result<(), CollaboratorError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        let failed = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_bool(failure_rate.clamp(0.0, 1.0))
        };
        if failed {
            warn!(service, "Mock service call failed");
            return Err(CollaboratorError::Failed {
                service,
                reason: "service temporarily unavailable, please retry".to_string(),
            });
        }
        debug!(service, "Mock service call succeeded");
        Ok(())
    }
}

#[async_trait]
impl OnboardingServices for MockServices {
    async fn sso_login(&self, provider: SsoProvider) -> Result<SsoIdentity, CollaboratorError> {
        self.simulate("sso", self.config.sso_failure_rate).await?;
        let domain = match provider {
            SsoProvider::Google => "gmail.com",
            SsoProvider::Microsoft => "outlook.com",
        };
        Ok(SsoIdentity {
            provider,
            email: format!("demo.user@{domain}"),
            first_name: "Demo".to_string(),
            last_name: "User".to_string(),
        })
    }

    async fn connect_calendar(
        &self,
        provider: CalendarProvider,
    ) -> Result<CalendarConnection, CollaboratorError> {
        self.simulate("calendar", self.config.calendar_failure_rate)
            .await?;
        Ok(CalendarConnection {
            provider,
            connected_at: Utc::now(),
        })
    }

    async fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<Registration, CollaboratorError> {
        if request.password.expose_secret().is_empty() {
            return Err(CollaboratorError::Rejected {
                service: "registration",
                reason: "password must not be empty".to_string(),
            });
        }
        self.simulate("registration", self.config.registration_failure_rate)
            .await?;
        Ok(Registration {
            account_id: Uuid::new_v4(),
            confirmation_sent: true,
        })
    }

    async fn confirm_email(&self, email: &str, code: &str) -> Result<(), CollaboratorError> {
        self.simulate("email_confirmation", 0.0).await?;
        let code = code.trim();
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            debug!(email, "Rejected malformed confirmation code");
            return Err(CollaboratorError::Rejected {
                service: "email_confirmation",
                reason: "confirmation code must be 6 digits".to_string(),
            });
        }
        Ok(())
    }

    async fn request_access(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessTicket, CollaboratorError> {
        self.simulate("access_request", self.config.access_request_failure_rate)
            .await?;
        debug!(company = %request.company, "Access request accepted");
        Ok(AccessTicket {
            ticket_id: Uuid::new_v4(),
        })
    }
}
