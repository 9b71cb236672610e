//! Step registry — the ordered step tables for each account type.
//!
//! Step numbers form a flat sequence, but two slots change meaning with the
//! account type: step 2 is "Register" for solo/business and "Send request"
//! for enterprise, and step 6 ("Invite team") only exists for business.
//! Every variant ends on the shared terminal step [`COMPLETE_STEP`].

use serde::{Deserialize, Serialize};

/// Step ordinal as shown in the progress bar.
pub type StepNumber = u8;

/// First step of every variant.
pub const FIRST_STEP: StepNumber = 1;

/// Terminal "Complete" screen reached after the last step of any variant.
pub const COMPLETE_STEP: StepNumber = 7;

/// Account type chosen on step 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Solo,
    Business,
    Enterprise,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Solo => "solo",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solo" => Ok(Self::Solo),
            "business" => Ok(Self::Business),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

/// What a step slot does. Used to dispatch to the right step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    AccountType,
    Register,
    RequestAccess,
    Consent,
    Plan,
    Calendar,
    InviteTeam,
    Complete,
}

impl StepKind {
    /// Step number this kind occupies in whichever variant has it.
    pub fn slot(self) -> StepNumber {
        match self {
            Self::AccountType => 1,
            Self::Register | Self::RequestAccess => 2,
            Self::Consent => 3,
            Self::Plan => 4,
            Self::Calendar => 5,
            Self::InviteTeam => 6,
            Self::Complete => COMPLETE_STEP,
        }
    }
}

/// One entry of a variant's step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub number: StepNumber,
    pub label: &'static str,
    pub kind: StepKind,
}

const fn step(number: StepNumber, label: &'static str, kind: StepKind) -> StepDescriptor {
    StepDescriptor {
        number,
        label,
        kind,
    }
}

static SOLO_STEPS: [StepDescriptor; 5] = [
    step(1, "Account type", StepKind::AccountType),
    step(2, "Register", StepKind::Register),
    step(3, "Recording consent", StepKind::Consent),
    step(4, "Choose plan", StepKind::Plan),
    step(5, "Connect calendar", StepKind::Calendar),
];

static BUSINESS_STEPS: [StepDescriptor; 6] = [
    step(1, "Account type", StepKind::AccountType),
    step(2, "Register", StepKind::Register),
    step(3, "Recording consent", StepKind::Consent),
    step(4, "Choose plan", StepKind::Plan),
    step(5, "Connect calendar", StepKind::Calendar),
    step(6, "Invite team", StepKind::InviteTeam),
];

static ENTERPRISE_STEPS: [StepDescriptor; 2] = [
    step(1, "Account type", StepKind::AccountType),
    step(2, "Send request", StepKind::RequestAccess),
];

static COMPLETE: StepDescriptor = step(COMPLETE_STEP, "Complete", StepKind::Complete);

/// Progress-bar steps for an account type. `None` falls back to solo.
pub fn steps_for(account_type: Option<AccountType>) -> &'static [StepDescriptor] {
    match account_type {
        None | Some(AccountType::Solo) => &SOLO_STEPS,
        Some(AccountType::Business) => &BUSINESS_STEPS,
        Some(AccountType::Enterprise) => &ENTERPRISE_STEPS,
    }
}

/// Number of progress-bar steps (Complete not counted).
pub fn step_count(account_type: Option<AccountType>) -> usize {
    steps_for(account_type).len()
}

/// Last progress-bar step of the variant.
pub fn last_step(account_type: Option<AccountType>) -> StepNumber {
    steps_for(account_type)
        .last()
        .map(|s| s.number)
        .unwrap_or(FIRST_STEP)
}

/// Every step number the variant can be on, in order, ending with Complete.
pub fn sequence(account_type: Option<AccountType>) -> impl Iterator<Item = StepNumber> {
    steps_for(account_type)
        .iter()
        .map(|s| s.number)
        .chain(std::iter::once(COMPLETE_STEP))
}

/// Whether `step` is part of the variant's sequence.
pub fn contains(account_type: Option<AccountType>, step: StepNumber) -> bool {
    sequence(account_type).any(|s| s == step)
}

/// Look up the descriptor for a step in the variant.
pub fn descriptor(account_type: Option<AccountType>, step: StepNumber) -> Option<&'static StepDescriptor> {
    if step == COMPLETE_STEP {
        return Some(&COMPLETE);
    }
    steps_for(account_type).iter().find(|s| s.number == step)
}

/// Step that follows `step` in the variant, if any.
pub fn next_step(account_type: Option<AccountType>, step: StepNumber) -> Option<StepNumber> {
    let mut seq = sequence(account_type).skip_while(|s| *s != step);
    seq.next()?;
    seq.next()
}

/// Step that precedes `step` in the variant. Complete has no predecessor to
/// return to.
pub fn previous_step(account_type: Option<AccountType>, step: StepNumber) -> Option<StepNumber> {
    if step == COMPLETE_STEP {
        return None;
    }
    steps_for(account_type)
        .iter()
        .map(|s| s.number)
        .take_while(|s| *s != step)
        .last()
        .filter(|_| contains(account_type, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_sizes() {
        assert_eq!(step_count(Some(AccountType::Solo)), 5);
        assert_eq!(step_count(Some(AccountType::Business)), 6);
        assert_eq!(step_count(Some(AccountType::Enterprise)), 2);
        assert_eq!(step_count(None), 5);
    }

    #[test]
    fn null_account_type_uses_solo_table() {
        assert_eq!(steps_for(None), steps_for(Some(AccountType::Solo)));
    }

    #[test]
    fn step_two_depends_on_account_type() {
        let solo = descriptor(Some(AccountType::Solo), 2).unwrap();
        let ent = descriptor(Some(AccountType::Enterprise), 2).unwrap();
        assert_eq!(solo.kind, StepKind::Register);
        assert_eq!(ent.kind, StepKind::RequestAccess);
        assert_eq!(ent.label, "Send request");
    }

    #[test]
    fn invite_step_is_business_only() {
        assert!(descriptor(Some(AccountType::Solo), 6).is_none());
        assert!(descriptor(Some(AccountType::Enterprise), 6).is_none());
        assert_eq!(
            descriptor(Some(AccountType::Business), 6).unwrap().kind,
            StepKind::InviteTeam
        );
    }

    #[test]
    fn sequences_end_on_complete() {
        let solo: Vec<_> = sequence(Some(AccountType::Solo)).collect();
        let business: Vec<_> = sequence(Some(AccountType::Business)).collect();
        let enterprise: Vec<_> = sequence(Some(AccountType::Enterprise)).collect();
        assert_eq!(solo, vec![1, 2, 3, 4, 5, 7]);
        assert_eq!(business, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(enterprise, vec![1, 2, 7]);
    }

    #[test]
    fn next_and_previous_walk_the_variant() {
        let ent = Some(AccountType::Enterprise);
        assert_eq!(next_step(ent, 1), Some(2));
        assert_eq!(next_step(ent, 2), Some(COMPLETE_STEP));
        assert_eq!(next_step(ent, COMPLETE_STEP), None);
        assert_eq!(next_step(ent, 4), None);

        let solo = Some(AccountType::Solo);
        assert_eq!(next_step(solo, 5), Some(COMPLETE_STEP));
        assert_eq!(previous_step(solo, 5), Some(4));
        assert_eq!(previous_step(solo, 1), None);
        assert_eq!(previous_step(solo, 6), None);
        assert_eq!(previous_step(solo, COMPLETE_STEP), None);
    }

    #[test]
    fn account_type_parses_and_displays() {
        for at in [AccountType::Solo, AccountType::Business, AccountType::Enterprise] {
            let parsed: AccountType = at.to_string().parse().unwrap();
            assert_eq!(parsed, at);
        }
        assert!("team".parse::<AccountType>().is_err());
    }

    #[test]
    fn kind_slots_match_tables() {
        for at in [AccountType::Solo, AccountType::Business, AccountType::Enterprise] {
            for d in steps_for(Some(at)) {
                assert_eq!(d.kind.slot(), d.number, "{at}: {:?}", d.kind);
            }
        }
        assert_eq!(StepKind::Complete.slot(), COMPLETE_STEP);
    }
}
