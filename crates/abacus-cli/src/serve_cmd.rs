//! The `abacus serve` command: hosts the public expression API and the
//! internal worker RPC on one axum router.
//!
//! The submission path (user requests) and the dispatcher path (worker
//! RPCs) run concurrently over the shared store; after a result is
//! recorded the lifecycle re-plan is fired and forgotten so the worker's
//! ack returns immediately.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use abacus_core::auth::{self, AuthConfig};
use abacus_core::dispatch::{self, DispatchConfig};
use abacus_core::latency::OperationTimes;
use abacus_core::lifecycle;
use abacus_core::rpc::{FetchTaskRequest, SubmitResultRequest, SubmitResultResponse};
use abacus_db::models::Expression;
use abacus_db::queries::users;
use abacus_db::store::{PgStore, Store};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: msg.into(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    store: Arc<PgStore>,
    times: Arc<OperationTimes>,
    auth: Arc<AuthConfig>,
    dispatch: Arc<DispatchConfig>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        times: OperationTimes,
        auth: AuthConfig,
        dispatch: DispatchConfig,
    ) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self {
            pool,
            store,
            times: Arc::new(times),
            auth: Arc::new(auth),
            dispatch: Arc::new(dispatch),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    pub expression: String,
}

#[derive(Debug, Serialize)]
pub struct ExpressionsResponse {
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Serialize)]
pub struct ExpressionResponse {
    pub expression: Expression,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/register", post(register))
        .route("/api/v1/login", post(login))
        .route("/api/v1/calculate", post(calculate))
        .route("/api/v1/expressions", get(list_expressions))
        .route("/api/v1/expressions/{id}", get(get_expression))
        .route("/internal/v1/task/fetch", post(fetch_task))
        .route("/internal/v1/task/result", post(submit_result))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("abacus serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("abacus serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Auth helper
// ---------------------------------------------------------------------------

/// Extract and validate the bearer token, returning the user id.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("malformed Authorization header"))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthorized("expected a bearer token"))?;

    let claims = auth::validate_session_token(&state.auth, token, Utc::now())
        .map_err(|e| AppError::unauthorized(format!("invalid session token: {e}")))?;

    Ok(claims.user_id)
}

// ---------------------------------------------------------------------------
// Public API handlers
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<axum::response::Response, AppError> {
    if req.login.is_empty() || req.password.is_empty() {
        return Err(AppError::invalid_input("login and password are required"));
    }

    let password_hash = auth::hash_password(&req.password).map_err(AppError::internal)?;

    let id = users::insert_user(&state.pool, &req.login, &password_hash)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::conflict(format!("login {:?} is already taken", req.login)))?;

    tracing::info!(user_id = id, login = %req.login, "user registered");
    Ok((StatusCode::CREATED, Json(IdResponse { id })).into_response())
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<axum::response::Response, AppError> {
    let user = users::get_user_by_login(&state.pool, &req.login)
        .await
        .map_err(AppError::internal)?;

    // A missing user and a bad password answer identically.
    let valid = user
        .as_ref()
        .is_some_and(|u| auth::verify_password(&req.password, &u.password_hash));
    let Some(user) = user.filter(|_| valid) else {
        return Err(AppError::unauthorized("invalid login or password"));
    };

    let token = auth::issue_session_token(&state.auth, user.id, Utc::now());
    Ok(Json(TokenResponse { token }).into_response())
}

async fn calculate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CalculateRequest>,
) -> Result<axum::response::Response, AppError> {
    let user_id = authenticate(&state, &headers)?;

    if req.expression.is_empty() {
        return Err(AppError::invalid_input("expression is required"));
    }

    let id = lifecycle::submit(state.store.as_ref(), user_id, &req.expression)
        .await
        .map_err(AppError::internal)?;

    Ok((StatusCode::CREATED, Json(IdResponse { id })).into_response())
}

async fn list_expressions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let expressions = state
        .store
        .list_expressions(user_id)
        .await
        .map_err(AppError::internal)?;

    Ok(Json(ExpressionsResponse { expressions }).into_response())
}

async fn get_expression(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<axum::response::Response, AppError> {
    let user_id = authenticate(&state, &headers)?;

    let expression = state
        .store
        .get_expression_for_user(id, user_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("expression {id} not found")))?;

    Ok(Json(ExpressionResponse { expression }).into_response())
}

// ---------------------------------------------------------------------------
// Worker RPC handlers
// ---------------------------------------------------------------------------

async fn fetch_task(
    State(state): State<AppState>,
    Json(req): Json<FetchTaskRequest>,
) -> Result<axum::response::Response, AppError> {
    let info = dispatch::fetch_task(
        state.store.as_ref(),
        &state.times,
        &state.dispatch,
        &req.worker_id,
    )
    .await
    .map_err(AppError::internal)?;

    Ok(Json(info).into_response())
}

async fn submit_result(
    State(state): State<AppState>,
    Json(req): Json<SubmitResultRequest>,
) -> Result<axum::response::Response, AppError> {
    dispatch::submit_result(
        state.store.as_ref(),
        &state.dispatch,
        req.task_id,
        &req.worker_id,
        &req.outcome,
    )
    .await
    .map_err(AppError::internal)?;

    // Fire-and-forget the re-plan; the ack returns before it runs.
    let store = Arc::clone(&state.store);
    let task_id = req.task_id;
    tokio::spawn(async move {
        if let Err(e) = lifecycle::on_task_completed(store.as_ref(), task_id).await {
            tracing::error!(task_id, error = %e, "lifecycle re-plan failed");
        }
    });

    Ok(Json(SubmitResultResponse { acknowledged: true }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
