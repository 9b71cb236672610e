//! Session registry — one flow per onboarding session id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::flow::OnboardingFlow;
use super::gates::StepGates;
use super::store::{OnboardingStore, StoreEvent};
use crate::collaborators::OnboardingServices;
use crate::config::OnboardingConfig;
use crate::error::OnboardingError;
use crate::store::Database;

type FlowMap = Arc<RwLock<HashMap<Uuid, Arc<OnboardingFlow>>>>;

/// Live onboarding sessions, restored from the database on demand.
///
/// A session that reaches Complete is closed and dropped from the map.
pub struct OnboardingSessions {
    flows: FlowMap,
    db: Option<Arc<dyn Database>>,
    services: Arc<dyn OnboardingServices>,
    gates: StepGates,
    min_password_score: u8,
}

impl OnboardingSessions {
    pub fn new(
        config: &OnboardingConfig,
        services: Arc<dyn OnboardingServices>,
        db: Option<Arc<dyn Database>>,
    ) -> Self {
        let gates = if config.enforce_gates {
            StepGates::standard()
        } else {
            StepGates::permissive()
        };
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            db,
            services,
            gates,
            min_password_score: config.min_password_score,
        }
    }

    fn flow_for(&self, store: Arc<OnboardingStore>) -> Arc<OnboardingFlow> {
        Arc::new(OnboardingFlow::new(
            store,
            Arc::clone(&self.services),
            self.min_password_score,
        ))
    }

    /// Start a fresh session on step 1.
    pub async fn create(&self) -> Arc<OnboardingFlow> {
        let id = Uuid::new_v4();
        let store = match &self.db {
            Some(db) => OnboardingStore::with_db(id, self.gates.clone(), Arc::clone(db)),
            None => OnboardingStore::new(id, self.gates.clone()),
        };
        store.flush().await;

        let flow = self.flow_for(store);
        self.flows.write().await.insert(id, Arc::clone(&flow));
        self.release_on_complete(&flow);
        info!(session_id = %id, "Onboarding session created");
        flow
    }

    /// Look up a live session, falling back to its persisted snapshot.
    pub async fn get(&self, id: Uuid) -> Result<Arc<OnboardingFlow>, OnboardingError> {
        if let Some(flow) = self.flows.read().await.get(&id) {
            return Ok(Arc::clone(flow));
        }

        let Some(db) = &self.db else {
            return Err(OnboardingError::SessionNotFound(id));
        };
        let store = match OnboardingStore::restore(id, self.gates.clone(), Arc::clone(db)).await {
            Ok(Some(store)) => store,
            Ok(None) => return Err(OnboardingError::SessionNotFound(id)),
            Err(e) => {
                warn!(session_id = %id, "Failed to load onboarding snapshot: {}", e);
                return Err(OnboardingError::SessionNotFound(id));
            }
        };

        // Another request may have restored it first
        let mut flows = self.flows.write().await;
        if let Some(existing) = flows.get(&id) {
            return Ok(Arc::clone(existing));
        }
        let flow = self.flow_for(store);
        flows.insert(id, Arc::clone(&flow));
        drop(flows);
        self.release_on_complete(&flow);
        Ok(flow)
    }

    /// Unmount a session: drop it from memory and discard its snapshot.
    pub async fn close(&self, id: Uuid) -> Result<(), OnboardingError> {
        let flow = self.get(id).await?;
        self.flows.write().await.remove(&id);
        flow.store().discard().await;
        info!(session_id = %id, "Onboarding session closed");
        Ok(())
    }

    /// Close the session and drop it from the map once it reaches Complete.
    ///
    /// The watcher holds weak references only, so it never keeps a session
    /// or the registry alive.
    fn release_on_complete(&self, flow: &OnboardingFlow) {
        let id = flow.session_id();
        let mut rx = flow.store().subscribe();
        let store = Arc::downgrade(flow.store());
        let flows = Arc::downgrade(&self.flows);

        tokio::spawn(async move {
            loop {
                let complete = match rx.recv().await {
                    Ok(StoreEvent::StateChanged { state, .. }) => state.is_complete(),
                    Ok(StoreEvent::Sync { .. }) => false,
                    Ok(StoreEvent::Closed { .. }) | Err(RecvError::Closed) => return,
                    Err(RecvError::Lagged(n)) => {
                        debug!(session_id = %id, skipped = n, "Completion watcher lagged");
                        match store.upgrade() {
                            Some(store) => store.get_state().await.is_complete(),
                            None => return,
                        }
                    }
                };
                if !complete {
                    continue;
                }

                if let Some(flows) = flows.upgrade() {
                    flows.write().await.remove(&id);
                }
                if let Some(store) = store.upgrade() {
                    store.close();
                }
                info!(session_id = %id, "Completed onboarding session released");
                return;
            }
        });
    }

    /// Number of sessions held in memory.
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::collaborators::{AccessRequest, MockServices};
    use crate::config::CollaboratorConfig;
    use crate::onboarding::registry::AccountType;
    use crate::store::LibSqlBackend;

    fn config() -> OnboardingConfig {
        OnboardingConfig {
            db_path: None,
            collaborators: CollaboratorConfig::reliable(),
            ..Default::default()
        }
    }

    fn services() -> Arc<dyn OnboardingServices> {
        Arc::new(MockServices::new(CollaboratorConfig::reliable()))
    }

    #[tokio::test]
    async fn create_and_get() {
        let sessions = OnboardingSessions::new(&config(), services(), None);
        let flow = sessions.create().await;
        let again = sessions.get(flow.session_id()).await.unwrap();
        assert!(Arc::ptr_eq(&flow, &again));
        assert_eq!(sessions.len().await, 1);

        let missing = sessions.get(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(OnboardingError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let sessions = OnboardingSessions::new(&config(), services(), None);
        let a = sessions.create().await;
        let b = sessions.create().await;
        a.choose_account_type(AccountType::Enterprise).await.unwrap();

        assert_eq!(a.store().get_state().await.current_step, 2);
        assert_eq!(b.store().get_state().await.current_step, 1);
        assert!(b.store().get_state().await.account_type.is_none());
    }

    #[tokio::test]
    async fn restores_from_database_after_restart() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let id = {
            let sessions = OnboardingSessions::new(&config(), services(), Some(Arc::clone(&db)));
            let flow = sessions.create().await;
            flow.choose_account_type(AccountType::Business).await.unwrap();
            flow.session_id()
        };

        let sessions = OnboardingSessions::new(&config(), services(), Some(db));
        assert!(sessions.is_empty().await);
        let flow = sessions.get(id).await.unwrap();
        let state = flow.store().get_state().await;
        assert_eq!(state.current_step, 2);
        assert_eq!(state.account_type, Some(AccountType::Business));
    }

    #[tokio::test]
    async fn fresh_session_survives_restart() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sessions = OnboardingSessions::new(&config(), services(), Some(Arc::clone(&db)));
        let id = sessions.create().await.session_id();

        let reopened = OnboardingSessions::new(&config(), services(), Some(db));
        assert!(reopened.get(id).await.is_ok());
    }

    #[tokio::test]
    async fn close_discards_snapshot() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let sessions = OnboardingSessions::new(&config(), services(), Some(Arc::clone(&db)));
        let flow = sessions.create().await;
        let id = flow.session_id();

        sessions.close(id).await.unwrap();
        assert!(flow.store().is_closed());
        assert!(matches!(
            sessions.get(id).await,
            Err(OnboardingError::SessionNotFound(_))
        ));
        assert!(matches!(
            sessions.close(id).await,
            Err(OnboardingError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn completed_session_is_released() {
        let sessions = OnboardingSessions::new(&config(), services(), None);
        let done = sessions.create().await;
        let open = sessions.create().await;
        assert_eq!(sessions.len().await, 2);

        done.choose_account_type(AccountType::Enterprise).await.unwrap();
        done.request_access(AccessRequest {
            email: "cio@bigcorp.com".into(),
            company: "BigCorp".into(),
            first_name: "Ada".into(),
            last_name: "Ng".into(),
            team_size: None,
            message: None,
        })
        .await
        .unwrap();
        assert!(done.store().get_state().await.is_complete());

        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.len().await != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("completed session was not released");

        assert!(done.store().is_closed());
        assert!(matches!(
            sessions.get(done.session_id()).await,
            Err(OnboardingError::SessionNotFound(_))
        ));
        assert!(sessions.get(open.session_id()).await.is_ok());
    }
}
