use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::AuthUser,
    error::ApiError,
    state::AppState,
    users::{
        dto::{CreateUserDto, DeleteResult, LoginUserDto, UpdateUserDto, UserResponse},
        repo_types::User,
        services::UserService,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/login", post(login))
        .route("/users/:id", get(get_user).put(update_user))
        .route("/users/by-email/:email", delete(delete_user))
        .route("/user", get(current_user))
}

#[instrument(skip(users))]
pub async fn list_users(State(users): State<UserService>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(users.find_all().await?))
}

#[instrument(skip(users, payload))]
pub async fn create_user(
    State(users): State<UserService>,
    Json(payload): Json<CreateUserDto>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let created = users.create(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(users, payload))]
pub async fn login(
    State(users): State<UserService>,
    Json(payload): Json<LoginUserDto>,
) -> Result<Json<UserResponse>, ApiError> {
    let email = payload.email.clone();
    let Some(user) = users.find_one(payload).await? else {
        warn!(%email, "login rejected");
        return Err(ApiError::UserNotFound);
    };
    info!(user_id = user.id, "user logged in");
    Ok(Json(users.build_user_ro(&user)?))
}

#[instrument(skip(users))]
pub async fn get_user(
    State(users): State<UserService>,
    Path(id): Path<i32>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(users.find_by_id(id).await?))
}

#[instrument(skip(users, claims))]
pub async fn current_user(
    State(users): State<UserService>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(users.find_by_email(&claims.email).await?))
}

#[instrument(skip(users, claims, payload))]
pub async fn update_user(
    State(users): State<UserService>,
    AuthUser(claims): AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserDto>,
) -> Result<Json<User>, ApiError> {
    info!(caller = claims.id, target = id, "update requested");
    Ok(Json(users.update(id, payload).await?))
}

#[instrument(skip(users, claims))]
pub async fn delete_user(
    State(users): State<UserService>,
    AuthUser(claims): AuthUser,
    Path(email): Path<String>,
) -> Result<Json<DeleteResult>, ApiError> {
    info!(caller = claims.id, "delete requested");
    Ok(Json(users.delete(&email).await?))
}
