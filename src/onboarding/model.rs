//! Data collected by the onboarding steps, and the patches that update it.
//!
//! Each `update_*` operation on the store takes one of the `*Patch` types
//! and shallow-merges the fields that are present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::registry::AccountType;

/// Identity and registration fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserData {
    pub account_type: Option<AccountType>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub team_size: Option<u32>,
    /// Registration service accepted the account.
    pub registered: bool,
    /// Email ownership confirmed (code or SSO).
    pub email_confirmed: bool,
    /// Enterprise access request submitted.
    pub access_requested: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDataPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub team_size: Option<u32>,
    pub registered: Option<bool>,
    pub email_confirmed: Option<bool>,
    pub access_requested: Option<bool>,
}

impl UserData {
    pub fn apply(&mut self, patch: UserDataPatch) {
        if let Some(v) = patch.first_name {
            self.first_name = Some(v);
        }
        if let Some(v) = patch.last_name {
            self.last_name = Some(v);
        }
        if let Some(v) = patch.email {
            self.email = Some(v.trim().to_string());
        }
        if let Some(v) = patch.company {
            self.company = Some(v);
        }
        if let Some(v) = patch.job_title {
            self.job_title = Some(v);
        }
        if let Some(v) = patch.team_size {
            self.team_size = Some(v);
        }
        if let Some(v) = patch.registered {
            self.registered = v;
        }
        if let Some(v) = patch.email_confirmed {
            self.email_confirmed = v;
        }
        if let Some(v) = patch.access_requested {
            self.access_requested = v;
        }
    }
}

/// Meeting-recording consent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentData {
    pub recording_consent: bool,
    /// Set when consent goes from false to true, cleared when withdrawn.
    pub consent_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentPatch {
    pub recording_consent: Option<bool>,
}

impl ConsentData {
    pub fn apply(&mut self, patch: ConsentPatch, now: DateTime<Utc>) {
        let Some(consent) = patch.recording_consent else {
            return;
        };
        match (self.recording_consent, consent) {
            (false, true) => self.consent_date = Some(now),
            (_, false) => self.consent_date = None,
            (true, true) => {}
        }
        self.recording_consent = consent;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Starter,
    Pro,
    Business,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Annual,
}

/// Subscription choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanData {
    pub plan: Option<PlanTier>,
    pub billing_cycle: BillingCycle,
    pub seats: u32,
}

impl Default for PlanData {
    fn default() -> Self {
        Self {
            plan: None,
            billing_cycle: BillingCycle::default(),
            seats: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanPatch {
    pub plan: Option<PlanTier>,
    pub billing_cycle: Option<BillingCycle>,
    pub seats: Option<u32>,
}

impl PlanData {
    pub fn apply(&mut self, patch: PlanPatch) {
        if let Some(v) = patch.plan {
            self.plan = Some(v);
        }
        if let Some(v) = patch.billing_cycle {
            self.billing_cycle = v;
        }
        if let Some(v) = patch.seats {
            self.seats = v.max(1);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarProvider {
    Google,
    Outlook,
}

impl std::fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Outlook => write!(f, "outlook"),
        }
    }
}

/// Calendar link used to auto-join meetings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarData {
    pub provider: Option<CalendarProvider>,
    pub connected: bool,
    pub skipped: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarPatch {
    pub provider: Option<CalendarProvider>,
    pub connected: Option<bool>,
    pub skipped: Option<bool>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CalendarData {
    pub fn apply(&mut self, patch: CalendarPatch) {
        if let Some(v) = patch.provider {
            self.provider = Some(v);
        }
        if let Some(v) = patch.connected {
            self.connected = v;
        }
        if let Some(v) = patch.skipped {
            self.skipped = v;
        }
        if let Some(v) = patch.connected_at {
            self.connected_at = Some(v);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    #[default]
    Member,
    Admin,
}

/// Teammates invited from the business-only step 6.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamInviteData {
    pub invites: Vec<String>,
    pub role: TeamRole,
    pub sent: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamInvitePatch {
    pub invites: Option<Vec<String>>,
    pub role: Option<TeamRole>,
    pub sent: Option<bool>,
    pub skipped: Option<bool>,
}

impl TeamInviteData {
    pub fn apply(&mut self, patch: TeamInvitePatch) {
        if let Some(v) = patch.invites {
            self.invites = v
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(v) = patch.role {
            self.role = v;
        }
        if let Some(v) = patch.sent {
            self.sent = v;
        }
        if let Some(v) = patch.skipped {
            self.skipped = v;
        }
    }
}

/// Settings keys used for snapshot persistence.
pub mod settings_keys {
    /// Key for the OnboardingState JSON blob in the settings table.
    pub const ONBOARDING_STATE: &str = "onboarding_state";
}
