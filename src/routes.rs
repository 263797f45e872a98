//! HTTP API routes and handlers
//!
//! Protected handlers compose the guards in a fixed order: the
//! `AuthAccount` extractor authenticates, then `require_role`, then
//! `require_entitlement` where delegation is being authorized.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{self, AuthAccount};
use crate::delegation::TaskStatus;
use crate::error::{AppError, Result};
use crate::models::{
    Account, AccountSummary, AssignAssistantRequest, DelegateRequest, LoginRequest, PlanTier,
    RegisterRequest, Role, SubscribeRequest, TrackActivityRequest, UpdateTaskStatusRequest,
    REGISTRATION_CREDITS,
};
use crate::recommend::RecommendationRequest;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/session", get(session))
        .route("/api/auth/subscription", get(subscription))
        .route("/api/auth/subscribe", post(subscribe))
        .route("/api/jobs/delegate", post(delegate))
        .route("/api/jobs/assigned", get(assigned))
        .route("/api/jobs/:id/status", patch(update_status))
        .route("/api/jobs/recommendations", post(recommendations))
        .route("/api/admin/assistants", post(create_assistant).get(list_assistants))
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/assign", post(assign))
        .route("/api/admin/progress/:assistant_id", get(progress))
        .route("/api/activity/track", post(track_activity))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    auth::validate_email(&request.email)?;
    auth::validate_password_strength(&request.password)?;

    let hash = auth::hash_password(&request.password)?;
    let account = state
        .store
        .create_account(
            &request.name,
            &request.email,
            &hash,
            Role::Subscriber,
            REGISTRATION_CREDITS,
        )
        .await?;

    let token = auth::issue_token(&account, &state.jwt_secret)?;
    Ok((StatusCode::CREATED, Json(json!({ "token": token }))))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let account = state
        .store
        .find_account_by_email(&request.email)
        .await?
        .ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

    if !auth::verify_password(&request.password, &account.password_hash)? {
        return Err(AppError::Authentication(
            crate::error::AuthFailure::InvalidCredentials,
        ));
    }

    let token = auth::issue_token(&account, &state.jwt_secret)?;
    Ok(Json(json!({ "token": token })))
}

async fn session(AuthAccount(account): AuthAccount) -> Result<Json<Account>> {
    Ok(Json(account))
}

async fn subscription(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Subscriber])?;
    let snapshot = state.manager.entitlement(account.id).await?;
    Ok(Json(snapshot))
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Subscriber])?;
    let tier: PlanTier = request.plan.parse().map_err(AppError::Validation)?;
    let snapshot = state.manager.purchase_plan(account.id, tier).await?;
    Ok(Json(snapshot))
}

async fn delegate(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<DelegateRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Subscriber])?;
    let entitled = auth::require_entitlement(&state.store, &account).await?;

    let details = state.manager.delegate(&entitled, request).await?;
    Ok((StatusCode::CREATED, Json(details)))
}

async fn assigned(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Assistant])?;
    let tasks = state.manager.list_assigned(account.id).await?;
    Ok(Json(tasks))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Path(task_id): Path<Uuid>,
    Json(request): Json<UpdateTaskStatusRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Assistant, Role::Admin])?;
    let status: TaskStatus = request.status.parse().map_err(AppError::Validation)?;

    let task = state
        .manager
        .update_status(&account, task_id, status, request.proof, request.note)
        .await?;
    Ok(Json(task))
}

async fn recommendations(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<RecommendationRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Subscriber])?;
    auth::require_entitlement(&state.store, &account).await?;

    let response = state.recommender.recommendations(request).await?;
    Ok(Json(response))
}

async fn create_assistant(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Admin])?;

    if request.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    auth::validate_email(&request.email)?;
    auth::validate_password_strength(&request.password)?;

    let hash = auth::hash_password(&request.password)?;
    let assistant = state
        .store
        .create_account(&request.name, &request.email, &hash, Role::Assistant, 0)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Assistant created successfully",
            "assistant": AccountSummary::from(&assistant),
        })),
    ))
}

/// A subscriber together with their resolved assistant
#[derive(Debug, Serialize)]
struct SubscriberOverview {
    account: Account,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant: Option<AccountSummary>,
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Admin])?;

    let subscribers = state.store.list_accounts_by_role(Role::Subscriber).await?;
    let mut overview = Vec::with_capacity(subscribers.len());
    for subscriber in subscribers {
        let assistant = match subscriber.assigned_assistant {
            Some(id) => Some(AccountSummary::from(&state.store.get_account(id).await?)),
            None => None,
        };
        overview.push(SubscriberOverview {
            account: subscriber,
            assistant,
        });
    }
    Ok(Json(overview))
}

async fn list_assistants(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Admin])?;
    let assistants = state.store.list_accounts_by_role(Role::Assistant).await?;
    Ok(Json(assistants))
}

/// The updated subscriber/assistant pair after reassignment
#[derive(Debug, Serialize)]
struct AssignmentPair {
    subscriber: Account,
    assistant: Account,
}

async fn assign(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<AssignAssistantRequest>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Admin])?;

    let (subscriber, assistant) = state
        .manager
        .reassign(request.subscriber_id, request.assistant_id)
        .await?;
    Ok(Json(AssignmentPair {
        subscriber,
        assistant,
    }))
}

async fn progress(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Path(assistant_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    auth::require_role(&account, &[Role::Admin])?;
    let progress = state.manager.progress(assistant_id).await?;
    Ok(Json(progress))
}

async fn track_activity(
    State(state): State<Arc<AppState>>,
    AuthAccount(account): AuthAccount,
    Json(request): Json<TrackActivityRequest>,
) -> Result<impl IntoResponse> {
    let activity = state
        .store
        .record_activity(account.id, &request.kind, request.data)
        .await?;
    Ok((StatusCode::CREATED, Json(activity)))
}
