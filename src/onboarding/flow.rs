//! Step handlers — the actions each onboarding screen can take.
//!
//! A flow binds one store to the external services. Handlers check that the
//! session is on the right step, validate input, await the collaborator and
//! only then write to the store. A collaborator result that arrives after a
//! reset, a close, or a move off its step is dropped.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::gates::ValidationFailure;
use super::model::{
    CalendarPatch, CalendarProvider, ConsentPatch, PlanPatch, TeamInvitePatch, TeamRole,
    UserDataPatch,
};
use super::registry::{AccountType, StepKind, StepNumber};
use super::state::{OnboardingState, Transition};
use super::store::{Change, OnboardingStore, apply_account_type};
use crate::collaborators::{
    AccessRequest, AccessTicket, OnboardingServices, Registration, RegistrationRequest,
    SsoProvider,
};
use crate::error::OnboardingError;
use crate::validation::{validate_email, validate_password};

/// Email/password sign-up form from the register step.
#[derive(Clone, Deserialize)]
pub struct RegistrationForm {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
}

impl std::fmt::Debug for RegistrationForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationForm")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish_non_exhaustive()
    }
}

/// One session's onboarding: the store plus the services its steps call.
pub struct OnboardingFlow {
    store: Arc<OnboardingStore>,
    services: Arc<dyn OnboardingServices>,
    min_password_score: u8,
}

impl OnboardingFlow {
    pub fn new(
        store: Arc<OnboardingStore>,
        services: Arc<dyn OnboardingServices>,
        min_password_score: u8,
    ) -> Self {
        Self {
            store,
            services,
            min_password_score,
        }
    }

    pub fn store(&self) -> &Arc<OnboardingStore> {
        &self.store
    }

    pub fn session_id(&self) -> Uuid {
        self.store.session_id()
    }

    /// Checkpoint of the session, provided it is open and on a step of
    /// `kind`. Results are committed against this epoch and step.
    async fn expect_step(&self, kind: StepKind) -> Result<(u64, OnboardingState), OnboardingError> {
        if self.store.is_closed() {
            return Err(OnboardingError::SessionClosed(self.session_id()));
        }
        let (epoch, state) = self.store.checkpoint().await;
        if state.current_kind() != Some(kind) {
            return Err(OnboardingError::WrongStep {
                expected: kind.slot(),
                current: state.current_step,
            });
        }
        Ok((epoch, state))
    }

    // ── Step 1 ──────────────────────────────────────────────────────

    pub async fn choose_account_type(
        &self,
        account_type: AccountType,
    ) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::AccountType).await?;
        self.store
            .advance_if_current(epoch, state.current_step, Change::AccountType, |s| {
                apply_account_type(s, account_type)
            })
            .await
    }

    // ── Step 2: register ────────────────────────────────────────────

    /// Create the account. Stays on the step until the email is confirmed.
    pub async fn register(&self, form: RegistrationForm) -> Result<Registration, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Register).await?;

        let email = form.email.trim().to_string();
        if !validate_email(&email) {
            return Err(ValidationFailure::InvalidEmail { email }.into());
        }
        require_field("first_name", &form.first_name)?;
        require_field("last_name", &form.last_name)?;
        let strength = validate_password(&form.password);
        if strength.score < self.min_password_score {
            return Err(ValidationFailure::WeakPassword {
                score: strength.score,
                required: self.min_password_score,
            }
            .into());
        }

        let request = RegistrationRequest {
            email: email.clone(),
            password: SecretString::from(form.password),
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
        };
        let registration = self.services.register(&request).await?;

        let patch = UserDataPatch {
            first_name: Some(request.first_name),
            last_name: Some(request.last_name),
            email: Some(email),
            company: form.company,
            job_title: form.job_title,
            registered: Some(true),
            email_confirmed: Some(false),
            ..Default::default()
        };
        self.store
            .apply_if_current(epoch, state.current_step, Change::UserData, |s| {
                s.user_data.apply(patch)
            })
            .await?;
        info!(
            session_id = %self.session_id(),
            account_id = %registration.account_id,
            "Account registered, awaiting email confirmation"
        );
        Ok(registration)
    }

    pub async fn confirm_email(&self, code: &str) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Register).await?;
        let email = match &state.user_data.email {
            Some(email) if state.user_data.registered => email.clone(),
            _ => return Err(ValidationFailure::NotRegistered.into()),
        };

        self.services.confirm_email(&email, code).await?;

        let patch = UserDataPatch {
            email_confirmed: Some(true),
            ..Default::default()
        };
        self.store
            .advance_if_current(epoch, state.current_step, Change::UserData, |s| {
                s.user_data.apply(patch)
            })
            .await
    }

    /// Single sign-on; the identity counts as registered and confirmed.
    pub async fn sso_login(
        &self,
        provider: SsoProvider,
    ) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Register).await?;

        let identity = self.services.sso_login(provider).await?;

        let patch = UserDataPatch {
            first_name: Some(identity.first_name),
            last_name: Some(identity.last_name),
            email: Some(identity.email),
            registered: Some(true),
            email_confirmed: Some(true),
            ..Default::default()
        };
        let transition = self
            .store
            .advance_if_current(epoch, state.current_step, Change::UserData, |s| {
                s.user_data.apply(patch)
            })
            .await?;
        info!(session_id = %self.session_id(), %provider, "SSO login succeeded");
        Ok(transition)
    }

    // ── Step 2: enterprise request ──────────────────────────────────

    /// Submit the enterprise access request; lands on Complete.
    pub async fn request_access(
        &self,
        mut request: AccessRequest,
    ) -> Result<(AccessTicket, Option<Transition>), OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::RequestAccess).await?;

        request.email = request.email.trim().to_string();
        if !validate_email(&request.email) {
            return Err(ValidationFailure::InvalidEmail {
                email: request.email,
            }
            .into());
        }
        require_field("company", &request.company)?;
        require_field("first_name", &request.first_name)?;
        require_field("last_name", &request.last_name)?;

        let ticket = self.services.request_access(&request).await?;

        let patch = UserDataPatch {
            first_name: Some(request.first_name),
            last_name: Some(request.last_name),
            email: Some(request.email),
            company: Some(request.company),
            team_size: request.team_size,
            access_requested: Some(true),
            ..Default::default()
        };
        let transition = self
            .store
            .advance_if_current(epoch, state.current_step, Change::UserData, |s| {
                s.user_data.apply(patch)
            })
            .await?;
        info!(session_id = %self.session_id(), ticket_id = %ticket.ticket_id, "Enterprise access requested");
        Ok((ticket, transition))
    }

    // ── Step 3: consent ─────────────────────────────────────────────

    pub async fn set_recording_consent(&self, consent: bool) -> Result<(), OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Consent).await?;
        let now = Utc::now();
        self.store
            .apply_if_current(epoch, state.current_step, Change::ConsentData, |s| {
                s.consent_data.apply(
                    ConsentPatch {
                        recording_consent: Some(consent),
                    },
                    now,
                )
            })
            .await
    }

    pub async fn accept_consent(&self) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Consent).await?;
        let now = Utc::now();
        self.store
            .advance_if_current(epoch, state.current_step, Change::ConsentData, |s| {
                s.consent_data.apply(
                    ConsentPatch {
                        recording_consent: Some(true),
                    },
                    now,
                )
            })
            .await
    }

    // ── Step 4: plan ────────────────────────────────────────────────

    pub async fn choose_plan(&self, patch: PlanPatch) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Plan).await?;
        if patch.plan.is_none() && state.plan_data.plan.is_none() {
            return Err(ValidationFailure::PlanMissing.into());
        }
        self.store
            .advance_if_current(epoch, state.current_step, Change::PlanData, |s| {
                s.plan_data.apply(patch)
            })
            .await
    }

    // ── Step 5: calendar ────────────────────────────────────────────

    pub async fn connect_calendar(
        &self,
        provider: CalendarProvider,
    ) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Calendar).await?;

        let connection = self.services.connect_calendar(provider).await?;

        let patch = CalendarPatch {
            provider: Some(connection.provider),
            connected: Some(true),
            skipped: Some(false),
            connected_at: Some(connection.connected_at),
        };
        let transition = self
            .store
            .advance_if_current(epoch, state.current_step, Change::CalendarData, |s| {
                s.calendar_data.apply(patch)
            })
            .await?;
        info!(session_id = %self.session_id(), %provider, "Calendar connected");
        Ok(transition)
    }

    pub async fn skip_calendar(&self) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::Calendar).await?;
        let patch = CalendarPatch {
            connected: Some(false),
            skipped: Some(true),
            ..Default::default()
        };
        self.store
            .advance_if_current(epoch, state.current_step, Change::CalendarData, |s| {
                s.calendar_data.apply(patch)
            })
            .await
    }

    // ── Step 6: invite team ─────────────────────────────────────────

    pub async fn send_invites(
        &self,
        emails: Vec<String>,
        role: Option<TeamRole>,
    ) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::InviteTeam).await?;

        let invites: Vec<String> = emails
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if invites.is_empty() {
            return Err(ValidationFailure::MissingField { field: "invites" }.into());
        }
        if let Some(bad) = invites.iter().find(|e| !validate_email(e)) {
            return Err(ValidationFailure::InvalidEmail { email: bad.clone() }.into());
        }

        let count = invites.len();
        let patch = TeamInvitePatch {
            invites: Some(invites),
            role,
            sent: Some(true),
            skipped: Some(false),
        };
        debug!(session_id = %self.session_id(), count, "Team invites queued");
        self.store
            .advance_if_current(epoch, state.current_step, Change::TeamInviteData, |s| {
                s.team_invite_data.apply(patch)
            })
            .await
    }

    pub async fn skip_invites(&self) -> Result<Option<Transition>, OnboardingError> {
        let (epoch, state) = self.expect_step(StepKind::InviteTeam).await?;
        let patch = TeamInvitePatch {
            skipped: Some(true),
            ..Default::default()
        };
        self.store
            .advance_if_current(epoch, state.current_step, Change::TeamInviteData, |s| {
                s.team_invite_data.apply(patch)
            })
            .await
    }

    // ── Navigation ──────────────────────────────────────────────────

    pub async fn back(&self) -> Result<Option<Transition>, OnboardingError> {
        if self.store.is_closed() {
            return Err(OnboardingError::SessionClosed(self.session_id()));
        }
        Ok(self.store.go_to_previous_step().await)
    }

    /// Progress-bar click. `Ok(false)` when the step is not accessible.
    pub async fn go_to(&self, step: StepNumber) -> Result<bool, OnboardingError> {
        if self.store.is_closed() {
            return Err(OnboardingError::SessionClosed(self.session_id()));
        }
        Ok(self.store.set_current_step(step).await)
    }
}

fn require_field(field: &'static str, value: &str) -> Result<(), ValidationFailure> {
    if value.trim().is_empty() {
        Err(ValidationFailure::MissingField { field })
    } else {
        Ok(())
    }
}
