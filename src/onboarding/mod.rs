//! Onboarding system — the multi-step sign-up flow.
//!
//! A new user picks an account type (solo, business or enterprise), which
//! selects the step table they walk through: register, recording consent,
//! plan, calendar and, for business accounts, team invites. Enterprise
//! accounts send an access request instead. Every variant ends on the shared
//! Complete step.

pub mod flow;
pub mod gates;
pub mod model;
pub mod registry;
pub mod routes;
pub mod sessions;
pub mod state;
pub mod store;

pub use flow::{OnboardingFlow, RegistrationForm};
pub use gates::{StepGates, ValidationFailure};
pub use model::{
    BillingCycle, CalendarData, CalendarProvider, ConsentData, PlanData, PlanTier, TeamInviteData,
    TeamRole, UserData,
};
pub use registry::{AccountType, COMPLETE_STEP, FIRST_STEP, StepDescriptor, StepKind, StepNumber};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use sessions::OnboardingSessions;
pub use state::{OnboardingState, ProgressView, Transition};
pub use store::{Change, OnboardingStore, StoreEvent};
