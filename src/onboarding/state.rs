//! Onboarding state machine — the snapshot record and its transition rules.
//!
//! Two levels: an outer step counter and the account type, which picks the
//! step table (and so the total step count and the meaning of steps 2 and 6).
//! Everything here is synchronous and pure; the store wraps it with locking,
//! notification and persistence.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::model::{CalendarData, ConsentData, PlanData, TeamInviteData, UserData};
use super::registry::{
    self, AccountType, COMPLETE_STEP, FIRST_STEP, StepDescriptor, StepKind, StepNumber,
};

/// A move from one step to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StepNumber,
    pub to: StepNumber,
}

/// Outcome of trying to advance past the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved(Transition),
    /// Already on the terminal step; nothing changed.
    AtTerminal,
    /// An earlier step (or the current one, if stale) is not completed.
    Blocked { missing: StepNumber },
}

/// Per-session onboarding state.
///
/// Persisted as JSON in the `settings` table under `"onboarding_state"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingState {
    pub current_step: StepNumber,
    pub completed_steps: BTreeSet<StepNumber>,
    pub account_type: Option<AccountType>,
    pub user_data: UserData,
    pub consent_data: ConsentData,
    pub plan_data: PlanData,
    pub calendar_data: CalendarData,
    pub team_invite_data: TeamInviteData,
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self {
            current_step: FIRST_STEP,
            completed_steps: BTreeSet::new(),
            account_type: None,
            user_data: UserData::default(),
            consent_data: ConsentData::default(),
            plan_data: PlanData::default(),
            calendar_data: CalendarData::default(),
            team_invite_data: TeamInviteData::default(),
        }
    }
}

impl OnboardingState {
    /// Progress-bar steps of the active variant.
    pub fn steps(&self) -> &'static [StepDescriptor] {
        registry::steps_for(self.account_type)
    }

    /// Descriptor of the step the user is on.
    pub fn current_descriptor(&self) -> Option<&'static StepDescriptor> {
        registry::descriptor(self.account_type, self.current_step)
    }

    pub fn current_kind(&self) -> Option<StepKind> {
        self.current_descriptor().map(|d| d.kind)
    }

    pub fn is_complete(&self) -> bool {
        self.current_step == COMPLETE_STEP
    }

    /// Highest completed step that belongs to the active variant.
    pub fn highest_completed(&self) -> Option<StepNumber> {
        self.completed_steps
            .iter()
            .rev()
            .copied()
            .find(|s| registry::contains(self.account_type, *s))
    }

    /// The single not-yet-reached step the user may enter next.
    pub fn next_unreached(&self) -> StepNumber {
        match self.highest_completed() {
            Some(step) => registry::next_step(self.account_type, step).unwrap_or(step),
            None => FIRST_STEP,
        }
    }

    /// Whether the user may navigate to `step`.
    ///
    /// Any step already reached (at or below the current one, or completed)
    /// plus the immediate successor of the highest completed step.
    pub fn can_access_step(&self, step: StepNumber) -> bool {
        if !registry::contains(self.account_type, step) {
            return false;
        }
        step <= self.current_step
            || self.completed_steps.contains(&step)
            || step == self.next_unreached()
    }

    /// First step before `step` in the variant that is not completed.
    fn first_missing_before(&self, step: StepNumber) -> Option<StepNumber> {
        registry::sequence(self.account_type)
            .take_while(|s| *s != step)
            .find(|s| !self.completed_steps.contains(s))
    }

    /// Mark the current step completed and move to the next one.
    pub fn advance(&mut self) -> Advance {
        if !registry::contains(self.account_type, self.current_step) {
            return Advance::Blocked {
                missing: self.current_step,
            };
        }
        let Some(next) = registry::next_step(self.account_type, self.current_step) else {
            return Advance::AtTerminal;
        };
        if let Some(missing) = self.first_missing_before(self.current_step) {
            return Advance::Blocked { missing };
        }

        let from = self.current_step;
        self.completed_steps.insert(from);
        self.current_step = next;
        Advance::Moved(Transition { from, to: next })
    }

    /// Step back one ordinal. Completion marks stay.
    pub fn retreat(&mut self) -> Option<Transition> {
        if self.is_complete() {
            return None;
        }
        let previous = registry::previous_step(self.account_type, self.current_step)?;
        let from = self.current_step;
        self.current_step = previous;
        Some(Transition { from, to: previous })
    }

    /// Jump to an accessible step. Returns `None` (and changes nothing) when
    /// the step is not accessible, already current, or onboarding is complete.
    pub fn jump_to(&mut self, step: StepNumber) -> Option<Transition> {
        if self.is_complete() || step == self.current_step || !self.can_access_step(step) {
            return None;
        }
        let from = self.current_step;
        self.current_step = step;
        Some(Transition { from, to: step })
    }

    /// Switch the account type and drop completion marks the new variant
    /// cannot hold. Returns the dropped step numbers.
    pub fn set_account_type(&mut self, account_type: AccountType) -> Vec<StepNumber> {
        self.account_type = Some(account_type);
        self.user_data.account_type = Some(account_type);
        self.prune_completed()
    }

    /// Keep only the completed prefix of the active variant.
    pub fn prune_completed(&mut self) -> Vec<StepNumber> {
        let keep: BTreeSet<StepNumber> = registry::sequence(self.account_type)
            .take_while(|s| self.completed_steps.contains(s))
            .collect();
        let dropped: Vec<StepNumber> = self.completed_steps.difference(&keep).copied().collect();
        self.completed_steps = keep;
        dropped
    }

    /// Mount-time access check.
    ///
    /// Drops stale completion marks, then if the current step is no longer
    /// reachable (or sits past an uncompleted step) walks steps 1..=7 and
    /// settles on the first accessible one.
    pub fn settle(&mut self) -> Option<Transition> {
        self.prune_completed();
        if self.can_access_step(self.current_step)
            && self.first_missing_before(self.current_step).is_none()
        {
            return None;
        }
        let from = self.current_step;
        let to = (FIRST_STEP..=COMPLETE_STEP)
            .find(|s| self.can_access_step(*s))
            .unwrap_or(FIRST_STEP);
        self.current_step = to;
        Some(Transition { from, to })
    }

    /// Progress view for the hosting page.
    pub fn progress(&self) -> ProgressView {
        let steps = self
            .steps()
            .iter()
            .map(|d| ProgressStep {
                number: d.number,
                label: d.label,
                kind: d.kind,
                completed: self.completed_steps.contains(&d.number),
                current: d.number == self.current_step,
                accessible: self.can_access_step(d.number),
            })
            .collect();
        ProgressView {
            current_step: self.current_step,
            completed_steps: self.completed_steps.iter().copied().collect(),
            account_type: self.account_type,
            total_steps: self.steps().len(),
            is_complete: self.is_complete(),
            steps,
        }
    }
}

/// Progress-bar rendering data.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub current_step: StepNumber,
    pub completed_steps: Vec<StepNumber>,
    pub account_type: Option<AccountType>,
    pub total_steps: usize,
    pub is_complete: bool,
    pub steps: Vec<ProgressStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressStep {
    pub number: StepNumber,
    pub label: &'static str,
    pub kind: StepKind,
    pub completed: bool,
    pub current: bool,
    pub accessible: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [AccountType; 3] = [
        AccountType::Solo,
        AccountType::Business,
        AccountType::Enterprise,
    ];

    fn state_for(account_type: AccountType) -> OnboardingState {
        let mut state = OnboardingState::default();
        state.set_account_type(account_type);
        state
    }

    fn walk(state: &mut OnboardingState) -> Vec<StepNumber> {
        let mut visited = vec![state.current_step];
        while let Advance::Moved(t) = state.advance() {
            visited.push(t.to);
        }
        visited
    }

    #[test]
    fn default_state() {
        let state = OnboardingState::default();
        assert_eq!(state.current_step, 1);
        assert!(state.completed_steps.is_empty());
        assert!(state.account_type.is_none());
        assert_eq!(state.current_kind(), Some(StepKind::AccountType));
    }

    #[test]
    fn walks_each_variant_to_complete() {
        assert_eq!(walk(&mut state_for(AccountType::Solo)), vec![1, 2, 3, 4, 5, 7]);
        assert_eq!(
            walk(&mut state_for(AccountType::Business)),
            vec![1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(walk(&mut state_for(AccountType::Enterprise)), vec![1, 2, 7]);
    }

    #[test]
    fn advance_is_idempotent_at_terminal() {
        let mut state = state_for(AccountType::Business);
        walk(&mut state);
        let before = state.clone();
        for _ in 0..3 {
            assert_eq!(state.advance(), Advance::AtTerminal);
        }
        assert_eq!(state, before);
    }

    #[test]
    fn access_window_is_reached_steps_plus_one() {
        for at in ALL_TYPES {
            let mut state = state_for(at);
            loop {
                let s = state.current_step;
                assert!(
                    state.completed_steps.iter().all(|c| *c < s),
                    "{at}: completed steps must precede {s}"
                );
                assert!(state.can_access_step(s), "{at}: step {s} must be accessible");
                assert!(
                    !state.can_access_step(s + 2),
                    "{at}: step {} must not be accessible",
                    s + 2
                );
                if !matches!(state.advance(), Advance::Moved(_)) {
                    break;
                }
            }
        }
    }

    #[test]
    fn revisit_keeps_forward_steps_reachable() {
        let mut state = state_for(AccountType::Solo);
        for _ in 0..3 {
            state.advance();
        }
        assert_eq!(state.current_step, 4);
        assert!(state.jump_to(2).is_some());
        assert!(state.can_access_step(3), "completed step stays reachable");
        assert!(state.can_access_step(4), "next unreached step stays reachable");
        assert!(!state.can_access_step(5));
        assert!(state.jump_to(5).is_none());
        assert_eq!(state.current_step, 2);
    }

    #[test]
    fn retreat_keeps_completion_marks() {
        let mut state = state_for(AccountType::Solo);
        state.advance();
        state.advance();
        let t = state.retreat().unwrap();
        assert_eq!(t, Transition { from: 3, to: 2 });
        assert!(state.completed_steps.contains(&2));
        state.retreat();
        assert!(state.retreat().is_none(), "cannot go before step 1");
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn complete_is_terminal() {
        let mut state = state_for(AccountType::Enterprise);
        walk(&mut state);
        assert!(state.is_complete());
        let before = state.clone();

        assert!(state.jump_to(1).is_none());
        assert!(state.jump_to(2).is_none());
        assert!(state.retreat().is_none());
        assert_eq!(state, before);
    }

    #[test]
    fn business_to_enterprise_shrinks_variant() {
        let mut state = state_for(AccountType::Business);
        assert_eq!(state.steps().len(), 6);
        for _ in 0..5 {
            state.advance();
        }
        assert_eq!(state.current_step, 6);

        let dropped = state.set_account_type(AccountType::Enterprise);
        assert_eq!(state.steps().len(), 2);
        assert_eq!(dropped, vec![3, 4, 5]);
        assert!(state.completed_steps.iter().all(|s| *s <= 2));

        let t = state.settle().unwrap();
        assert_eq!(t.from, 6);
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn settle_keeps_reachable_current_step() {
        let mut state = state_for(AccountType::Solo);
        state.advance();
        assert!(state.settle().is_none());
        assert_eq!(state.current_step, 2);
    }

    #[test]
    fn settle_repairs_gapped_snapshot() {
        let mut state = state_for(AccountType::Solo);
        state.completed_steps = [1, 3, 4].into_iter().collect();
        state.current_step = 5;
        state.settle();
        assert_eq!(state.completed_steps, [1].into_iter().collect());
        assert_eq!(state.current_step, 1);
    }

    #[test]
    fn advance_blocked_by_missing_prerequisite() {
        let mut state = state_for(AccountType::Solo);
        state.current_step = 3;
        assert_eq!(state.advance(), Advance::Blocked { missing: 1 });
        assert!(state.completed_steps.is_empty());
    }

    #[test]
    fn progress_view_marks_steps() {
        let mut state = state_for(AccountType::Enterprise);
        state.advance();
        let view = state.progress();
        assert_eq!(view.total_steps, 2);
        assert!(view.steps[0].completed);
        assert!(view.steps[1].current);
        assert_eq!(view.steps[1].label, "Send request");
        assert!(!view.is_complete);
    }

    #[test]
    fn state_serde_roundtrip() {
        let mut state = state_for(AccountType::Business);
        state.advance();
        let json = serde_json::to_string(&state).unwrap();
        let parsed: OnboardingState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);

        // Older snapshots missing fields still load
        let partial: OnboardingState =
            serde_json::from_str(r#"{"current_step":2,"completed_steps":[1]}"#).unwrap();
        assert_eq!(partial.current_step, 2);
        assert!(partial.account_type.is_none());
    }
}
