//! REST + WebSocket endpoints for onboarding sessions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::flow::{OnboardingFlow, RegistrationForm};
use super::model::{
    CalendarPatch, CalendarProvider, ConsentPatch, PlanPatch, TeamInvitePatch, TeamRole,
    UserDataPatch,
};
use super::registry::{AccountType, StepNumber};
use super::sessions::OnboardingSessions;
use super::state::{OnboardingState, ProgressView, Transition};
use super::store::{OnboardingStore, StoreEvent};
use crate::collaborators::{AccessRequest, SsoProvider};
use crate::error::OnboardingError;
use crate::validation::{validate_email, validate_password};

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub sessions: Arc<OnboardingSessions>,
}

/// Build the onboarding REST + WebSocket routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/onboarding/sessions", post(create_session))
        .route(
            "/api/onboarding/sessions/{id}",
            get(get_session).delete(close_session),
        )
        .route("/api/onboarding/sessions/{id}/progress", get(get_progress))
        .route("/api/onboarding/sessions/{id}/history", get(get_history))
        .route(
            "/api/onboarding/sessions/{id}/steps/{step}/access",
            get(check_access),
        )
        .route("/api/onboarding/sessions/{id}/step", post(set_step))
        .route("/api/onboarding/sessions/{id}/next", post(next_step))
        .route("/api/onboarding/sessions/{id}/previous", post(previous_step))
        .route("/api/onboarding/sessions/{id}/reset", post(reset))
        .route("/api/onboarding/sessions/{id}/user-data", patch(patch_user_data))
        .route(
            "/api/onboarding/sessions/{id}/consent-data",
            patch(patch_consent_data),
        )
        .route("/api/onboarding/sessions/{id}/plan-data", patch(patch_plan_data))
        .route(
            "/api/onboarding/sessions/{id}/calendar-data",
            patch(patch_calendar_data),
        )
        .route(
            "/api/onboarding/sessions/{id}/team-invite-data",
            patch(patch_team_invite_data),
        )
        .route(
            "/api/onboarding/sessions/{id}/account-type",
            post(choose_account_type),
        )
        .route("/api/onboarding/sessions/{id}/register", post(register))
        .route(
            "/api/onboarding/sessions/{id}/confirm-email",
            post(confirm_email),
        )
        .route("/api/onboarding/sessions/{id}/sso", post(sso_login))
        .route(
            "/api/onboarding/sessions/{id}/request-access",
            post(request_access),
        )
        .route("/api/onboarding/sessions/{id}/consent", post(set_consent))
        .route(
            "/api/onboarding/sessions/{id}/consent/accept",
            post(accept_consent),
        )
        .route("/api/onboarding/sessions/{id}/plan", post(choose_plan))
        .route(
            "/api/onboarding/sessions/{id}/calendar/connect",
            post(connect_calendar),
        )
        .route(
            "/api/onboarding/sessions/{id}/calendar/skip",
            post(skip_calendar),
        )
        .route("/api/onboarding/sessions/{id}/invites", post(send_invites))
        .route(
            "/api/onboarding/sessions/{id}/invites/skip",
            post(skip_invites),
        )
        .route("/api/onboarding/sessions/{id}/ws", get(ws_handler))
        .route("/api/onboarding/validate/password", post(check_password))
        .route("/api/onboarding/validate/email", post(check_email))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// HTTP rendering of an [`OnboardingError`].
#[derive(Debug)]
pub struct ApiError(OnboardingError);

impl From<OnboardingError> for ApiError {
    fn from(e: OnboardingError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match &self.0 {
            OnboardingError::Validation(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({"error": message, "failure": failure}),
            ),
            OnboardingError::Collaborator(e) => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({"error": message, "service": e.service()}),
            ),
            OnboardingError::StepNotReachable { step } => (
                StatusCode::CONFLICT,
                serde_json::json!({"error": message, "step": step}),
            ),
            OnboardingError::WrongStep { expected, current } => (
                StatusCode::CONFLICT,
                serde_json::json!({"error": message, "expected": expected, "current": current}),
            ),
            OnboardingError::Superseded(_) => {
                (StatusCode::CONFLICT, serde_json::json!({"error": message}))
            }
            OnboardingError::SessionClosed(_) => {
                (StatusCode::GONE, serde_json::json!({"error": message}))
            }
            OnboardingError::SessionNotFound(_) => {
                (StatusCode::NOT_FOUND, serde_json::json!({"error": message}))
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SessionView {
    session_id: Uuid,
    state: OnboardingState,
    progress: ProgressView,
}

impl SessionView {
    async fn of(store: &OnboardingStore) -> Self {
        let state = store.get_state().await;
        Self {
            session_id: store.session_id(),
            progress: state.progress(),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    transition: Option<Transition>,
    #[serde(flatten)]
    session: SessionView,
}

impl ActionResponse {
    async fn of(store: &OnboardingStore, transition: Option<Transition>) -> Json<Self> {
        Json(Self {
            transition,
            session: SessionView::of(store).await,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StepRequest {
    step: StepNumber,
}

#[derive(Debug, Deserialize)]
struct AccountTypeRequest {
    account_type: AccountType,
}

#[derive(Debug, Deserialize)]
struct ConfirmEmailRequest {
    code: String,
}

#[derive(Debug, Deserialize)]
struct SsoRequest {
    provider: SsoProvider,
}

#[derive(Debug, Deserialize)]
struct ConsentRequest {
    recording_consent: bool,
}

#[derive(Debug, Deserialize)]
struct CalendarRequest {
    provider: CalendarProvider,
}

#[derive(Debug, Deserialize)]
struct InvitesRequest {
    emails: Vec<String>,
    #[serde(default)]
    role: Option<TeamRole>,
}

// PATCH bodies carry only what the user types. Flags owned by the step
// actions (registered, connected, sent, ...) are rejected as unknown fields.

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct UserDataEdit {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    company: Option<String>,
    job_title: Option<String>,
    team_size: Option<u32>,
}

impl From<UserDataEdit> for UserDataPatch {
    fn from(edit: UserDataEdit) -> Self {
        Self {
            first_name: edit.first_name,
            last_name: edit.last_name,
            email: edit.email,
            company: edit.company,
            job_title: edit.job_title,
            team_size: edit.team_size,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CalendarEdit {
    provider: Option<CalendarProvider>,
}

impl From<CalendarEdit> for CalendarPatch {
    fn from(edit: CalendarEdit) -> Self {
        Self {
            provider: edit.provider,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TeamInviteEdit {
    invites: Option<Vec<String>>,
    role: Option<TeamRole>,
}

impl From<TeamInviteEdit> for TeamInvitePatch {
    fn from(edit: TeamInviteEdit) -> Self {
        Self {
            invites: edit.invites,
            role: edit.role,
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
struct PasswordRequest {
    password: String,
}

#[derive(Debug, Deserialize)]
struct EmailRequest {
    email: String,
}

async fn open_flow(state: &OnboardingRouteState, id: Uuid) -> ApiResult<Arc<OnboardingFlow>> {
    let flow = state.sessions.get(id).await?;
    if flow.store().is_closed() {
        return Err(OnboardingError::SessionClosed(id).into());
    }
    Ok(flow)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scribe-onboarding",
        "sessions": state.sessions.len().await,
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn create_session(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    let flow = state.sessions.create().await;
    (
        StatusCode::CREATED,
        Json(SessionView::of(flow.store()).await),
    )
}

async fn get_session(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn close_session(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.sessions.close(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_progress(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProgressView>> {
    let flow = open_flow(&state, id).await?;
    Ok(Json(flow.store().get_state().await.progress()))
}

async fn get_history(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let flow = open_flow(&state, id).await?;
    let response = match flow.store().history().await {
        Ok(records) => {
            let items: Vec<_> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "from": r.from_step,
                        "to": r.to_step,
                        "cause": r.cause,
                        "at": r.created_at,
                    })
                })
                .collect();
            Json(serde_json::json!({ "transitions": items })).into_response()
        }
        Err(e) => {
            warn!(session_id = %id, "Failed to load onboarding history: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to load history"})),
            )
                .into_response()
        }
    };
    Ok(response)
}

async fn check_access(
    State(state): State<OnboardingRouteState>,
    Path((id, step)): Path<(Uuid, StepNumber)>,
) -> ApiResult<Json<serde_json::Value>> {
    let flow = open_flow(&state, id).await?;
    let accessible = flow.store().can_access_step(step).await;
    Ok(Json(serde_json::json!({ "step": step, "accessible": accessible })))
}

// ── Navigation ──────────────────────────────────────────────────────────

/// Progress-bar click. Inaccessible steps answer 200 with `moved: false`.
async fn set_step(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StepRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let flow = open_flow(&state, id).await?;
    let moved = flow.go_to(body.step).await?;
    let session = SessionView::of(flow.store()).await;
    Ok(Json(serde_json::json!({ "moved": moved, "session": session })))
}

async fn next_step(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.store().go_to_next_step().await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn previous_step(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.back().await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn reset(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().reset().await;
    Ok(Json(SessionView::of(flow.store()).await))
}

// ── Data patches ────────────────────────────────────────────────────────

async fn patch_user_data(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(edit): Json<UserDataEdit>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().update_user_data(edit.into()).await;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn patch_consent_data(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<ConsentPatch>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().update_consent_data(patch).await;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn patch_plan_data(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<PlanPatch>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().update_plan_data(patch).await;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn patch_calendar_data(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(edit): Json<CalendarEdit>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().update_calendar_data(edit.into()).await;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn patch_team_invite_data(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(edit): Json<TeamInviteEdit>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.store().update_team_invite_data(edit.into()).await;
    Ok(Json(SessionView::of(flow.store()).await))
}

// ── Step actions ────────────────────────────────────────────────────────

async fn choose_account_type(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccountTypeRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.choose_account_type(body.account_type).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn register(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(form): Json<RegistrationForm>,
) -> ApiResult<Json<serde_json::Value>> {
    let flow = open_flow(&state, id).await?;
    let registration = flow.register(form).await?;
    let session = SessionView::of(flow.store()).await;
    Ok(Json(
        serde_json::json!({ "registration": registration, "session": session }),
    ))
}

async fn confirm_email(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmEmailRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.confirm_email(&body.code).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn sso_login(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SsoRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.sso_login(body.provider).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn request_access(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AccessRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let flow = open_flow(&state, id).await?;
    let (ticket, transition) = flow.request_access(body).await?;
    let session = SessionView::of(flow.store()).await;
    Ok(Json(serde_json::json!({
        "ticket": ticket,
        "transition": transition,
        "session": session,
    })))
}

async fn set_consent(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConsentRequest>,
) -> ApiResult<Json<SessionView>> {
    let flow = open_flow(&state, id).await?;
    flow.set_recording_consent(body.recording_consent).await?;
    Ok(Json(SessionView::of(flow.store()).await))
}

async fn accept_consent(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.accept_consent().await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn choose_plan(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<PlanPatch>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.choose_plan(patch).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn connect_calendar(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CalendarRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.connect_calendar(body.provider).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn skip_calendar(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.skip_calendar().await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn send_invites(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
    Json(body): Json<InvitesRequest>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.send_invites(body.emails, body.role).await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

async fn skip_invites(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ActionResponse>> {
    let flow = open_flow(&state, id).await?;
    let transition = flow.skip_invites().await?;
    Ok(ActionResponse::of(flow.store(), transition).await)
}

// ── Validators ──────────────────────────────────────────────────────────

async fn check_password(Json(body): Json<PasswordRequest>) -> impl IntoResponse {
    let strength = validate_password(&body.password);
    Json(serde_json::json!({
        "score": strength.score,
        "label": strength.label(),
        "checks": strength.checks,
        "feedback": strength.feedback,
    }))
}

async fn check_email(Json(body): Json<EmailRequest>) -> impl IntoResponse {
    Json(serde_json::json!({ "valid": validate_email(&body.email) }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

/// Navigation commands a progress-bar client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientAction {
    Next,
    Previous,
    GoTo { step: StepNumber },
    Reset,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<OnboardingRouteState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let flow = open_flow(&state, id).await?;
    info!(session_id = %id, "Onboarding WebSocket client connecting");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, flow)))
}

async fn send_event(socket: &mut WebSocket, event: &StoreEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize onboarding event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, flow: Arc<OnboardingFlow>) {
    let session_id = flow.session_id();

    // Subscribe before the initial sync so no change falls in between
    let mut rx = flow.store().subscribe();

    let sync = flow.store().sync_event().await;
    if !send_event(&mut socket, &sync).await {
        warn!(session_id = %session_id, "Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let closed = matches!(event, StoreEvent::Closed { .. });
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                        if closed {
                            let _ = socket.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(session_id = %session_id, missed = n, "WS client lagged behind onboarding broadcast");
                        let sync = flow.store().sync_event().await;
                        if !send_event(&mut socket, &sync).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(error) = handle_client_message(&text, &flow).await {
                            let msg = serde_json::json!({"type": "error", "error": error});
                            if socket.send(Message::Text(msg.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %session_id, "Onboarding WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(session_id = %session_id, "Onboarding WebSocket connection closed");
}

/// Apply a client command. Returns an error message to send back, if any.
async fn handle_client_message(text: &str, flow: &OnboardingFlow) -> Option<String> {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return Some(format!("unrecognized message: {e}"));
        }
    };
    let result = match action {
        ClientAction::Next => flow.store().go_to_next_step().await.map(|_| ()),
        ClientAction::Previous => flow.back().await.map(|_| ()),
        ClientAction::GoTo { step } => flow.go_to(step).await.map(|_| ()),
        ClientAction::Reset => {
            flow.store().reset().await;
            Ok(())
        }
    };
    result.err().map(|e| e.to_string())
}
