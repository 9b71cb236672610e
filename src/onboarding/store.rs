//! OnboardingStore — the authoritative, session-scoped holder of onboarding
//! state.
//!
//! All mutation goes through the store. After each change it persists the
//! snapshot (when a database is attached) and broadcasts it to subscribers,
//! which is how progress bars and WebSocket clients stay in sync.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gates::StepGates;
use super::model::{
    CalendarPatch, ConsentPatch, PlanPatch, TeamInvitePatch, UserDataPatch, settings_keys,
};
use super::registry::{AccountType, FIRST_STEP, StepKind, StepNumber};
use super::state::{Advance, OnboardingState, Transition};
use crate::error::{DatabaseError, OnboardingError};
use crate::store::{Database, TransitionRecord};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// What kind of mutation produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Step,
    AccountType,
    UserData,
    ConsentData,
    PlanData,
    CalendarData,
    TeamInviteData,
    Reset,
}

/// Event broadcast to store subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Full snapshot sent to a subscriber that just connected or lagged.
    Sync {
        session_id: Uuid,
        state: OnboardingState,
    },
    StateChanged {
        session_id: Uuid,
        change: Change,
        state: OnboardingState,
    },
    Closed {
        session_id: Uuid,
    },
}

/// Session-scoped onboarding state store.
pub struct OnboardingStore {
    session_id: Uuid,
    state: RwLock<OnboardingState>,
    gates: StepGates,
    db: Option<Arc<dyn Database>>,
    tx: broadcast::Sender<StoreEvent>,
    /// Bumped on reset so in-flight collaborator results can be dropped.
    epoch: AtomicU64,
    closed: AtomicBool,
}

impl OnboardingStore {
    /// Create a store with default state and no persistence.
    pub fn new(session_id: Uuid, gates: StepGates) -> Arc<Self> {
        Self::build(session_id, OnboardingState::default(), gates, None)
    }

    /// Create a store with default state that persists to `db`.
    pub fn with_db(session_id: Uuid, gates: StepGates, db: Arc<dyn Database>) -> Arc<Self> {
        Self::build(session_id, OnboardingState::default(), gates, Some(db))
    }

    /// Rebuild a store from its persisted snapshot, then run the mount-time
    /// access check. Returns `None` when the session has no snapshot.
    pub async fn restore(
        session_id: Uuid,
        gates: StepGates,
        db: Arc<dyn Database>,
    ) -> Result<Option<Arc<Self>>, DatabaseError> {
        let Some(value) = db
            .get_setting(&session_id.to_string(), settings_keys::ONBOARDING_STATE)
            .await?
        else {
            return Ok(None);
        };

        let state: OnboardingState = match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Discarding unreadable onboarding snapshot");
                OnboardingState::default()
            }
        };

        let store = Self::build(session_id, state, gates, Some(db));
        store.ensure_accessible().await;
        info!(session_id = %session_id, "Onboarding session restored");
        Ok(Some(store))
    }

    fn build(
        session_id: Uuid,
        state: OnboardingState,
        gates: StepGates,
        db: Option<Arc<dyn Database>>,
    ) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            session_id,
            state: RwLock::new(state),
            gates,
            db,
            tx,
            epoch: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Subscribe to snapshots. Each progress view or WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Snapshot event for (re)syncing a subscriber.
    pub async fn sync_event(&self) -> StoreEvent {
        StoreEvent::Sync {
            session_id: self.session_id,
            state: self.get_state().await,
        }
    }

    /// Current reset generation.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail unless the session is open and has not been reset since `epoch`.
    pub fn ensure_current(&self, epoch: u64) -> Result<(), OnboardingError> {
        if self.is_closed() {
            return Err(OnboardingError::SessionClosed(self.session_id));
        }
        if self.epoch() != epoch {
            return Err(OnboardingError::Superseded(self.session_id));
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Snapshot of the current state.
    pub async fn get_state(&self) -> OnboardingState {
        self.state.read().await.clone()
    }

    pub async fn can_access_step(&self, step: StepNumber) -> bool {
        self.state.read().await.can_access_step(step)
    }

    /// Step history recorded for this session (empty without a database).
    pub async fn history(&self) -> Result<Vec<TransitionRecord>, DatabaseError> {
        match &self.db {
            Some(db) => db.list_transitions(self.session_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Epoch and state read together, so a later commit can tell whether
    /// the session was reset or moved in between.
    pub async fn checkpoint(&self) -> (u64, OnboardingState) {
        let state = self.state.read().await;
        (self.epoch(), state.clone())
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Move to `step` if it is accessible. Inaccessible steps are ignored.
    pub async fn set_current_step(&self, step: StepNumber) -> bool {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return false;
        }
        let Some(transition) = state.jump_to(step) else {
            debug!(session_id = %self.session_id, step, current = state.current_step, "Ignoring navigation to inaccessible step");
            return false;
        };
        self.record(transition, "jump").await;
        self.publish(Change::Step, &state).await;
        true
    }

    /// Run the current step's gate, mark it completed and move on.
    ///
    /// `Ok(None)` on the terminal step. Gate rejections leave the state
    /// untouched.
    pub async fn go_to_next_step(&self) -> Result<Option<Transition>, OnboardingError> {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return Err(OnboardingError::SessionClosed(self.session_id));
        }
        self.advance_locked(&mut state).await
    }

    /// Step back one ordinal; completion marks stay.
    pub async fn go_to_previous_step(&self) -> Option<Transition> {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return None;
        }
        let transition = state.retreat()?;
        self.record(transition, "previous").await;
        self.publish(Change::Step, &state).await;
        Some(transition)
    }

    /// Mount-time access check; see [`OnboardingState::settle`].
    pub async fn ensure_accessible(&self) -> Option<Transition> {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return None;
        }
        let transition = state.settle()?;
        info!(
            session_id = %self.session_id,
            from = transition.from,
            to = transition.to,
            "Redirected stale onboarding step"
        );
        self.record(transition, "settle").await;
        self.publish(Change::Step, &state).await;
        Some(transition)
    }

    // ── Data updates ────────────────────────────────────────────────

    /// Choose the account type.
    ///
    /// Only meaningful on step 1; the step handler enforces that. Completion
    /// marks the new variant cannot hold are dropped.
    pub async fn set_account_type(&self, account_type: AccountType) {
        self.mutate(Change::AccountType, |state| {
            if state.current_step != FIRST_STEP {
                warn!(current = state.current_step, %account_type, "Account type changed outside step 1");
            }
            apply_account_type(state, account_type);
        })
        .await;
    }

    pub async fn update_user_data(&self, patch: UserDataPatch) {
        self.mutate(Change::UserData, |state| state.user_data.apply(patch))
            .await;
    }

    pub async fn update_consent_data(&self, patch: ConsentPatch) {
        let now = Utc::now();
        self.mutate(Change::ConsentData, |state| {
            state.consent_data.apply(patch, now)
        })
        .await;
    }

    pub async fn update_plan_data(&self, patch: PlanPatch) {
        self.mutate(Change::PlanData, |state| state.plan_data.apply(patch))
            .await;
    }

    pub async fn update_calendar_data(&self, patch: CalendarPatch) {
        self.mutate(Change::CalendarData, |state| {
            state.calendar_data.apply(patch)
        })
        .await;
    }

    pub async fn update_team_invite_data(&self, patch: TeamInvitePatch) {
        self.mutate(Change::TeamInviteData, |state| {
            state.team_invite_data.apply(patch)
        })
        .await;
    }

    /// Restore every field to its default and return to step 1.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        if self.is_closed() {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *state = OnboardingState::default();
        self.publish(Change::Reset, &state).await;
        info!(session_id = %self.session_id, "Onboarding reset");
    }

    // ── Step results ────────────────────────────────────────────────

    /// Apply a step's result if the session is still where `checkpoint`
    /// found it: open, not reset since `epoch`, and on `step`.
    pub async fn apply_if_current<F>(
        &self,
        epoch: u64,
        step: StepNumber,
        change: Change,
        f: F,
    ) -> Result<(), OnboardingError>
    where
        F: FnOnce(&mut OnboardingState),
    {
        let mut state = self.state.write().await;
        self.check_current(&state, epoch, step)?;
        f(&mut state);
        self.publish(change, &state).await;
        Ok(())
    }

    /// Like [`apply_if_current`](Self::apply_if_current), then advance past
    /// `step` under the same lock.
    pub async fn advance_if_current<F>(
        &self,
        epoch: u64,
        step: StepNumber,
        change: Change,
        f: F,
    ) -> Result<Option<Transition>, OnboardingError>
    where
        F: FnOnce(&mut OnboardingState),
    {
        let mut state = self.state.write().await;
        self.check_current(&state, epoch, step)?;
        f(&mut state);
        self.publish(change, &state).await;
        self.advance_locked(&mut state).await
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Unmount: ignore every later mutation and tell subscribers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(StoreEvent::Closed {
            session_id: self.session_id,
        });
        debug!(session_id = %self.session_id, "Onboarding store closed");
    }

    /// Close and drop the persisted snapshot.
    pub async fn discard(&self) {
        // Held so no in-flight mutation can persist after the delete
        let _state = self.state.write().await;
        self.close();
        if let Some(db) = &self.db {
            if let Err(e) = db
                .delete_setting(&self.session_id.to_string(), settings_keys::ONBOARDING_STATE)
                .await
            {
                warn!(session_id = %self.session_id, "Failed to delete onboarding snapshot: {}", e);
            }
        }
    }

    /// Write the current snapshot without notifying subscribers.
    pub async fn flush(&self) {
        let state = self.state.read().await;
        if self.is_closed() {
            return;
        }
        self.persist(&state).await;
    }

    // ── Internals ───────────────────────────────────────────────────

    fn check_current(
        &self,
        state: &OnboardingState,
        epoch: u64,
        step: StepNumber,
    ) -> Result<(), OnboardingError> {
        self.ensure_current(epoch)?;
        if state.current_step != step {
            debug!(session_id = %self.session_id, expected = step, current = state.current_step, "Dropping result for a step the user has left");
            return Err(OnboardingError::Superseded(self.session_id));
        }
        Ok(())
    }

    /// Gate, advance, record and publish. Caller holds the write lock.
    async fn advance_locked(
        &self,
        state: &mut OnboardingState,
    ) -> Result<Option<Transition>, OnboardingError> {
        if let Some(kind) = state.current_kind() {
            if let Err(failure) = self.gates.check(kind, state) {
                debug!(session_id = %self.session_id, step = state.current_step, ?kind, %failure, "Step gate rejected advance");
                return Err(failure.into());
            }
        }
        let transition = match state.advance() {
            Advance::Moved(t) => t,
            Advance::AtTerminal => return Ok(None),
            Advance::Blocked { missing } => {
                warn!(session_id = %self.session_id, current = state.current_step, missing, "Advance blocked by uncompleted step");
                return Err(OnboardingError::StepNotReachable { step: missing });
            }
        };

        info!(
            session_id = %self.session_id,
            from = transition.from,
            to = transition.to,
            account_type = ?state.account_type,
            "Onboarding advanced"
        );
        if state.current_kind() == Some(StepKind::Complete) {
            info!(session_id = %self.session_id, "Onboarding complete");
        }

        self.record(transition, "next").await;
        self.publish(Change::Step, state).await;
        Ok(Some(transition))
    }

    /// Mutate under the write lock, then persist and broadcast before
    /// releasing it so snapshots leave in mutation order.
    async fn mutate<F>(&self, change: Change, f: F)
    where
        F: FnOnce(&mut OnboardingState),
    {
        let mut state = self.state.write().await;
        if self.is_closed() {
            debug!(session_id = %self.session_id, ?change, "Ignoring mutation on closed store");
            return;
        }
        f(&mut state);
        self.publish(change, &state).await;
    }

    /// Persist the snapshot and broadcast it. Caller holds the write lock.
    async fn publish(&self, change: Change, state: &OnboardingState) {
        self.persist(state).await;
        // Ok if no subscribers are listening
        let _ = self.tx.send(StoreEvent::StateChanged {
            session_id: self.session_id,
            change,
            state: state.clone(),
        });
    }

    /// Save the snapshot, or drop it once onboarding is complete.
    async fn persist(&self, snapshot: &OnboardingState) {
        let Some(db) = &self.db else {
            return;
        };
        let user_id = self.session_id.to_string();

        if snapshot.is_complete() {
            if let Err(e) = db
                .delete_setting(&user_id, settings_keys::ONBOARDING_STATE)
                .await
            {
                warn!("Failed to clear completed onboarding snapshot: {}", e);
            }
            return;
        }

        let value = match serde_json::to_value(snapshot) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize onboarding state: {}", e);
                return;
            }
        };
        if let Err(e) = db
            .set_setting(&user_id, settings_keys::ONBOARDING_STATE, &value)
            .await
        {
            warn!("Failed to persist onboarding state: {}", e);
        }
    }

    async fn record(&self, transition: Transition, cause: &str) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = db
            .record_transition(self.session_id, transition.from, transition.to, cause)
            .await
        {
            warn!("Failed to record onboarding transition: {}", e);
        }
    }
}

/// Set the account type and pull the current step back inside the variant.
pub(crate) fn apply_account_type(state: &mut OnboardingState, account_type: AccountType) {
    let dropped = state.set_account_type(account_type);
    if !dropped.is_empty() {
        debug!(?dropped, %account_type, "Dropped completion marks outside new variant");
    }
    state.settle();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OnboardingError;
    use crate::onboarding::gates::ValidationFailure;
    use crate::onboarding::registry::COMPLETE_STEP;
    use crate::store::LibSqlBackend;

    fn permissive() -> Arc<OnboardingStore> {
        OnboardingStore::new(Uuid::new_v4(), StepGates::permissive())
    }

    async fn memory_db() -> Arc<dyn Database> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    async fn advance_n(store: &OnboardingStore, n: usize) {
        for _ in 0..n {
            store.go_to_next_step().await.unwrap();
        }
    }

    #[tokio::test]
    async fn starts_at_step_one() {
        let store = permissive();
        let state = store.get_state().await;
        assert_eq!(state.current_step, 1);
        assert!(state.completed_steps.is_empty());
        assert!(store.can_access_step(1).await);
        assert!(!store.can_access_step(2).await);
    }

    #[tokio::test]
    async fn solo_flow_ends_on_complete() {
        let store = permissive();
        store.set_account_type(AccountType::Solo).await;
        advance_n(&store, 4).await;
        assert_eq!(store.get_state().await.current_step, 5);

        let t = store.go_to_next_step().await.unwrap().unwrap();
        assert_eq!(t, Transition { from: 5, to: COMPLETE_STEP });

        let before = store.get_state().await;
        for _ in 0..3 {
            assert!(store.go_to_next_step().await.unwrap().is_none());
        }
        assert_eq!(store.get_state().await, before);
    }

    #[tokio::test]
    async fn business_visits_invite_step() {
        let store = permissive();
        store.set_account_type(AccountType::Business).await;
        advance_n(&store, 5).await;
        let state = store.get_state().await;
        assert_eq!(state.current_step, 6);
        assert_eq!(state.current_kind(), Some(StepKind::InviteTeam));
        let t = store.go_to_next_step().await.unwrap().unwrap();
        assert_eq!(t.to, COMPLETE_STEP);
    }

    #[tokio::test]
    async fn enterprise_jumps_to_complete_after_request() {
        let store = permissive();
        store.set_account_type(AccountType::Enterprise).await;
        advance_n(&store, 1).await;
        assert_eq!(
            store.get_state().await.current_kind(),
            Some(StepKind::RequestAccess)
        );
        let t = store.go_to_next_step().await.unwrap().unwrap();
        assert_eq!(t, Transition { from: 2, to: COMPLETE_STEP });
    }

    #[tokio::test]
    async fn inaccessible_navigation_is_silent_noop() {
        let store = permissive();
        store.set_account_type(AccountType::Solo).await;
        let mut rx = store.subscribe();
        assert!(!store.set_current_step(3).await);
        assert!(!store.set_current_step(6).await);
        assert_eq!(store.get_state().await.current_step, 1);
        assert!(rx.try_recv().is_err(), "no notification for ignored navigation");

        assert!(store.set_current_step(2).await);
        assert_eq!(store.get_state().await.current_step, 2);
    }

    #[tokio::test]
    async fn previous_step_keeps_completion() {
        let store = permissive();
        advance_n(&store, 2).await;
        let t = store.go_to_previous_step().await.unwrap();
        assert_eq!(t, Transition { from: 3, to: 2 });
        let state = store.get_state().await;
        assert!(state.completed_steps.contains(&2));
        store.go_to_previous_step().await;
        assert!(store.go_to_previous_step().await.is_none());
    }

    #[tokio::test]
    async fn gates_block_advance_without_mutation() {
        let store = OnboardingStore::new(Uuid::new_v4(), StepGates::standard());
        let err = store.go_to_next_step().await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Validation(ValidationFailure::AccountTypeMissing)
        ));
        assert_eq!(store.get_state().await, OnboardingState::default());

        store.set_account_type(AccountType::Solo).await;
        store.go_to_next_step().await.unwrap();
        store
            .update_user_data(UserDataPatch {
                email: Some("sam@example.com".into()),
                registered: Some(true),
                email_confirmed: Some(true),
                ..Default::default()
            })
            .await;
        store.go_to_next_step().await.unwrap();

        // Consent step
        let err = store.go_to_next_step().await.unwrap_err();
        assert!(matches!(
            err,
            OnboardingError::Validation(ValidationFailure::ConsentRequired)
        ));
        store
            .update_consent_data(ConsentPatch {
                recording_consent: Some(true),
            })
            .await;
        let t = store.go_to_next_step().await.unwrap().unwrap();
        assert_eq!(t, Transition { from: 3, to: 4 });
    }

    #[tokio::test]
    async fn consent_toggle_clears_date() {
        let store = permissive();
        store
            .update_consent_data(ConsentPatch {
                recording_consent: Some(true),
            })
            .await;
        assert!(store.get_state().await.consent_data.consent_date.is_some());
        store
            .update_consent_data(ConsentPatch {
                recording_consent: Some(false),
            })
            .await;
        let consent = store.get_state().await.consent_data;
        assert!(!consent.recording_consent);
        assert!(consent.consent_date.is_none());
    }

    #[tokio::test]
    async fn switching_to_enterprise_prunes_completed_steps() {
        let store = permissive();
        store.set_account_type(AccountType::Business).await;
        advance_n(&store, 5).await;
        store.set_current_step(1).await;

        store.set_account_type(AccountType::Enterprise).await;
        let state = store.get_state().await;
        assert_eq!(state.steps().len(), 2);
        assert!(state.completed_steps.iter().all(|s| *s <= 2));
        assert_eq!(state.current_step, 1);
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots() {
        let store = permissive();
        let mut rx = store.subscribe();
        store
            .update_plan_data(PlanPatch {
                seats: Some(4),
                ..Default::default()
            })
            .await;
        match rx.recv().await.unwrap() {
            StoreEvent::StateChanged { change, state, .. } => {
                assert_eq!(change, Change::PlanData);
                assert_eq!(state.plan_data.seats, 4);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_restores_defaults_and_bumps_epoch() {
        let store = permissive();
        store.set_account_type(AccountType::Business).await;
        advance_n(&store, 3).await;
        let epoch = store.epoch();

        store.reset().await;
        assert_eq!(store.get_state().await, OnboardingState::default());
        assert_eq!(store.epoch(), epoch + 1);
        assert!(matches!(
            store.ensure_current(epoch),
            Err(OnboardingError::Superseded(_))
        ));
        assert!(store.ensure_current(epoch + 1).is_ok());
    }

    #[tokio::test]
    async fn closed_store_ignores_mutations() {
        let store = permissive();
        let mut rx = store.subscribe();
        store.close();
        assert!(matches!(rx.recv().await.unwrap(), StoreEvent::Closed { .. }));

        store
            .update_user_data(UserDataPatch {
                first_name: Some("Late".into()),
                ..Default::default()
            })
            .await;
        assert!(store.get_state().await.user_data.first_name.is_none());
        assert!(matches!(
            store.go_to_next_step().await,
            Err(OnboardingError::SessionClosed(_))
        ));
        assert!(!store.set_current_step(1).await);
    }

    #[tokio::test]
    async fn snapshot_survives_restore() {
        let db = memory_db().await;
        let id = Uuid::new_v4();
        let store = OnboardingStore::with_db(id, StepGates::permissive(), Arc::clone(&db));
        store.set_account_type(AccountType::Business).await;
        advance_n(&store, 2).await;
        store
            .update_plan_data(PlanPatch {
                seats: Some(3),
                ..Default::default()
            })
            .await;

        let restored = OnboardingStore::restore(id, StepGates::permissive(), Arc::clone(&db))
            .await
            .unwrap()
            .unwrap();
        let state = restored.get_state().await;
        assert_eq!(state.current_step, 3);
        assert_eq!(state.account_type, Some(AccountType::Business));
        assert_eq!(state.plan_data.seats, 3);

        let history = restored.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.cause == "next"));
    }

    #[tokio::test]
    async fn restore_settles_stale_snapshot() {
        let db = memory_db().await;
        let id = Uuid::new_v4();
        let mut stale = OnboardingState::default();
        stale.set_account_type(AccountType::Enterprise);
        stale.current_step = 5;
        stale.completed_steps = [1, 2, 3, 4].into_iter().collect();
        db.set_setting(
            &id.to_string(),
            settings_keys::ONBOARDING_STATE,
            &serde_json::to_value(&stale).unwrap(),
        )
        .await
        .unwrap();

        let store = OnboardingStore::restore(id, StepGates::permissive(), db)
            .await
            .unwrap()
            .unwrap();
        let state = store.get_state().await;
        assert_eq!(state.completed_steps, [1, 2].into_iter().collect());
        assert_eq!(state.current_step, 1);
    }

    #[tokio::test]
    async fn restore_unknown_session_is_none() {
        let db = memory_db().await;
        let restored = OnboardingStore::restore(Uuid::new_v4(), StepGates::permissive(), db)
            .await
            .unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn completing_drops_snapshot() {
        let db = memory_db().await;
        let id = Uuid::new_v4();
        let store = OnboardingStore::with_db(id, StepGates::permissive(), Arc::clone(&db));
        store.set_account_type(AccountType::Enterprise).await;
        advance_n(&store, 1).await;
        assert!(
            db.get_setting(&id.to_string(), settings_keys::ONBOARDING_STATE)
                .await
                .unwrap()
                .is_some()
        );
        advance_n(&store, 1).await;
        assert!(store.get_state().await.is_complete());
        assert!(
            db.get_setting(&id.to_string(), settings_keys::ONBOARDING_STATE)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn completed_session_cannot_be_reentered() {
        let db = memory_db().await;
        let id = Uuid::new_v4();
        let store = OnboardingStore::with_db(id, StepGates::permissive(), Arc::clone(&db));
        store.set_account_type(AccountType::Enterprise).await;
        advance_n(&store, 2).await;
        assert!(store.get_state().await.is_complete());

        assert!(!store.set_current_step(1).await);
        assert!(store.go_to_previous_step().await.is_none());
        assert_eq!(store.get_state().await.current_step, COMPLETE_STEP);
        assert!(
            db.get_setting(&id.to_string(), settings_keys::ONBOARDING_STATE)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrent_updates_persist_in_order() {
        let db = memory_db().await;
        let id = Uuid::new_v4();
        let store = OnboardingStore::with_db(id, StepGates::permissive(), Arc::clone(&db));
        let mut rx = store.subscribe();

        let handles: Vec<_> = (1..=20u32)
            .map(|seats| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update_plan_data(PlanPatch {
                            seats: Some(seats),
                            ..Default::default()
                        })
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let StoreEvent::StateChanged { state, .. } = event {
                last = Some(state);
            }
        }
        let live = store.get_state().await;
        assert_eq!(last.as_ref(), Some(&live), "last broadcast is the live state");

        let persisted: OnboardingState = serde_json::from_value(
            db.get_setting(&id.to_string(), settings_keys::ONBOARDING_STATE)
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(persisted, live, "last write is the live state");
    }

    #[tokio::test]
    async fn result_for_left_step_is_rejected() {
        let store = permissive();
        store.set_account_type(AccountType::Solo).await;
        advance_n(&store, 1).await;
        let (epoch, state) = store.checkpoint().await;
        assert_eq!(state.current_step, 2);

        store.go_to_previous_step().await;
        let result = store
            .advance_if_current(epoch, state.current_step, Change::UserData, |s| {
                s.user_data.registered = true;
            })
            .await;
        assert!(matches!(result, Err(OnboardingError::Superseded(_))));
        let state = store.get_state().await;
        assert_eq!(state.current_step, 1);
        assert!(!state.user_data.registered);
    }
}
