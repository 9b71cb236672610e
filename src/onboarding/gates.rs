//! Step gates — per-step predicates that decide whether the store may
//! advance past a step.
//!
//! The store is built with a [`StepGates`] table. `go_to_next_step` runs the
//! gate for the current step's kind and refuses to advance on failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::registry::StepKind;
use super::state::OnboardingState;
use crate::validation::validate_email;

/// Why a step's data is not good enough to move on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ValidationFailure {
    #[error("choose an account type first")]
    AccountTypeMissing,

    #[error("'{email}' is not a valid email address")]
    InvalidEmail { email: String },

    #[error("password is too weak (score {score}, need {required})")]
    WeakPassword { score: u8, required: u8 },

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("account registration has not completed")]
    NotRegistered,

    #[error("email address has not been confirmed")]
    EmailNotConfirmed,

    #[error("access request has not been sent")]
    AccessNotRequested,

    #[error("recording consent is required to continue")]
    ConsentRequired,

    #[error("choose a plan first")]
    PlanMissing,

    #[error("connect a calendar or skip this step")]
    CalendarPending,

    #[error("send the invites or skip this step")]
    InvitesPending,
}

/// A gate checks the whole snapshot; most only look at their own slice.
pub type StepGate = Arc<dyn Fn(&OnboardingState) -> Result<(), ValidationFailure> + Send + Sync>;

/// Gate table keyed by step kind. Kinds without a gate always pass.
#[derive(Clone, Default)]
pub struct StepGates {
    gates: HashMap<StepKind, StepGate>,
}

impl std::fmt::Debug for StepGates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.gates.keys().collect();
        kinds.sort_by_key(|k| format!("{k:?}"));
        f.debug_struct("StepGates").field("kinds", &kinds).finish()
    }
}

impl StepGates {
    /// No gates: the store trusts its caller for every advance.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// The gates the onboarding flow ships with.
    pub fn standard() -> Self {
        Self::default()
            .with(StepKind::AccountType, |s| {
                s.account_type
                    .map(|_| ())
                    .ok_or(ValidationFailure::AccountTypeMissing)
            })
            .with(StepKind::Register, |s| {
                let user = &s.user_data;
                match user.email.as_deref() {
                    None => return Err(ValidationFailure::MissingField { field: "email" }),
                    Some(email) if !validate_email(email) => {
                        return Err(ValidationFailure::InvalidEmail {
                            email: email.to_string(),
                        });
                    }
                    Some(_) => {}
                }
                if !user.registered {
                    return Err(ValidationFailure::NotRegistered);
                }
                if !user.email_confirmed {
                    return Err(ValidationFailure::EmailNotConfirmed);
                }
                Ok(())
            })
            .with(StepKind::RequestAccess, |s| {
                if s.user_data.access_requested {
                    Ok(())
                } else {
                    Err(ValidationFailure::AccessNotRequested)
                }
            })
            .with(StepKind::Consent, |s| {
                if s.consent_data.recording_consent {
                    Ok(())
                } else {
                    Err(ValidationFailure::ConsentRequired)
                }
            })
            .with(StepKind::Plan, |s| {
                s.plan_data
                    .plan
                    .map(|_| ())
                    .ok_or(ValidationFailure::PlanMissing)
            })
            .with(StepKind::Calendar, |s| {
                let cal = &s.calendar_data;
                if cal.connected || cal.skipped {
                    Ok(())
                } else {
                    Err(ValidationFailure::CalendarPending)
                }
            })
            .with(StepKind::InviteTeam, |s| {
                let team = &s.team_invite_data;
                if team.skipped {
                    return Ok(());
                }
                if !team.sent {
                    return Err(ValidationFailure::InvitesPending);
                }
                match team.invites.iter().find(|e| !validate_email(e)) {
                    Some(bad) => Err(ValidationFailure::InvalidEmail { email: bad.clone() }),
                    None => Ok(()),
                }
            })
    }

    /// Install (or replace) the gate for a step kind.
    pub fn with<F>(mut self, kind: StepKind, gate: F) -> Self
    where
        F: Fn(&OnboardingState) -> Result<(), ValidationFailure> + Send + Sync + 'static,
    {
        self.gates.insert(kind, Arc::new(gate));
        self
    }

    /// Run the gate for `kind` against the snapshot.
    pub fn check(&self, kind: StepKind, state: &OnboardingState) -> Result<(), ValidationFailure> {
        match self.gates.get(&kind) {
            Some(gate) => gate(state),
            None => Ok(()),
        }
    }
}
