use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, AuthUser};
use crate::auth::policy::{authorize, Action};
use crate::error::{CmsError, Result};
use crate::models::{Role, User};
use crate::users::{self, LoginRequest, NewUser, RegisterRequest, UserUpdate};

pub(super) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(CmsError::validation("Username and password are required"));
    }
    let user = state
        .db
        .call(move |conn| users::authenticate(conn, &req.username, &req.password))
        .await?;
    let token = state.tokens.issue(&user)?;
    Ok(Json(json!({ "access_token": token, "user": user })))
}

pub(super) async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = state.db.call(move |conn| users::register(conn, req)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully", "user": user })),
    ))
}

pub(super) async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct UserQuery {
    role: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

pub(super) async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UserQuery>,
) -> Result<Json<Value>> {
    authorize(&user.actor(), Action::ListUsers, None)?;
    let role = query
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(str::parse::<Role>)
        .transpose()
        .map_err(CmsError::Validation)?;
    let page = state.pagination(query.page, query.per_page);
    let users = state
        .db
        .call(move |conn| users::list_users(conn, role, page))
        .await?;
    Ok(Json(users.into_json("users")))
}

pub(super) async fn get_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<User>> {
    authorize(&user.actor(), Action::ViewUser, None)?;
    let found = state.db.call(move |conn| users::get_user(conn, id)).await?;
    Ok(Json(found))
}

pub(super) async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<NewUser>,
) -> Result<(StatusCode, Json<User>)> {
    let actor = user.actor();
    let created = state
        .db
        .call(move |conn| users::create_user(conn, &actor, input))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn update_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<UserUpdate>,
) -> Result<Json<User>> {
    let actor = user.actor();
    let updated = state
        .db
        .call(move |conn| users::update_user(conn, &actor, id, input))
        .await?;
    Ok(Json(updated))
}

pub(super) async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    state
        .db
        .call(move |conn| users::delete_user(conn, &actor, id))
        .await?;
    Ok(Json(json!({ "message": "User deleted successfully" })))
}
