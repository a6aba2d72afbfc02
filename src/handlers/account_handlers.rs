//! HTTP handlers for sessions, the caller's profile and role assignments.

use crate::{
    AppState,
    auth::Caller,
    errors::AppError,
    models::user::{Profile, Role, RoleAssignment},
    services::account_service::{Session, SessionInfo},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SignUpReq {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignInReq {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshReq {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileReq {
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrantRoleReq {
    pub user_id: Uuid,
    pub role: Role,
}

/// `POST /auth/signup`
pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpReq>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .accounts
        .sign_up(&req.email, &req.password, req.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `POST /auth/login`
pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInReq>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.accounts.sign_in(&req.email, &req.password).await?))
}

/// `POST /auth/refresh`
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshReq>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.accounts.refresh(&req.refresh_token).await?))
}

/// `GET /auth/session`
pub async fn session(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<SessionInfo>, AppError> {
    Ok(Json(state.accounts.session_info(&caller).await?))
}

/// `GET /api/profile`
pub async fn get_profile(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.accounts.get_profile(&caller).await?))
}

/// `PATCH /api/profile`
pub async fn update_profile(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<UpdateProfileReq>,
) -> Result<Json<Profile>, AppError> {
    let profile = state
        .accounts
        .update_display_name(&caller, req.display_name)
        .await?;
    Ok(Json(profile))
}

/// `GET /api/roles`: own rows, or every row for admins.
pub async fn list_roles(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<RoleAssignment>>, AppError> {
    Ok(Json(state.accounts.visible_roles(&caller).await?))
}

/// `POST /api/admin/roles`
pub async fn grant_role(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<GrantRoleReq>,
) -> Result<impl IntoResponse, AppError> {
    let assignment = state
        .accounts
        .grant_role(&caller, req.user_id, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// `DELETE /api/admin/roles/{user_id}/{role}`
pub async fn revoke_role(
    State(state): State<AppState>,
    caller: Caller,
    Path((user_id, role)): Path<(Uuid, String)>,
) -> Result<StatusCode, AppError> {
    let role: Role = role.parse().map_err(AppError::bad_request)?;
    state.accounts.revoke_role(&caller, user_id, role).await?;
    Ok(StatusCode::NO_CONTENT)
}
