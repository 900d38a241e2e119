use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::{
    auth::{hash_password, verify_password, AuthUser},
    database::{
        is_unique_violation,
        users::{CreateUserRequest, Role, User},
    },
    error::{AppError, Result},
    server::AppState,
};

const DEFAULT_JUNIOR_PASSWORD: &str = "password";

#[derive(Debug, Deserialize)]
pub struct SignupBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub role: Option<Role>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedJuniorBody {
    #[serde(default)]
    pub email: String,
    pub password: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

fn validate_credentials(email: &str, password: &str) -> Result<()> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("A valid email is required".to_string()));
    }
    if password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_string()));
    }
    Ok(())
}

async fn register(
    state: &AppState,
    email: &str,
    password: &str,
    role: Role,
    skills: Vec<String>,
) -> Result<User> {
    validate_credentials(email, password)?;
    if User::email_exists(&state.db, email).await? {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    let password_hash = hash_password(password, state.config.bcrypt_cost)?;
    let user = User::create(
        &state.db,
        CreateUserRequest {
            email: email.to_string(),
            password_hash,
            role,
            skills,
        },
    )
    .await
    .map_err(|e| {
        // A concurrent signup can win between the check and the insert.
        if is_unique_violation(&e) {
            AppError::Conflict("Email is already registered".to_string())
        } else {
            AppError::Internal(e)
        }
    })?;

    info!(user_id = %user.id, role = %user.role, "Registered user");
    Ok(user)
}

/// POST /api/users/signup
pub async fn signup(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignupBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(body) = payload?;
    let user = register(
        &state,
        &body.email,
        &body.password,
        body.role.unwrap_or_default(),
        body.skills,
    )
    .await?;
    let token = state.jwt.issue(&user.id, user.role)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user, "token": token })),
    ))
}

/// POST /api/users/login
pub async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(body) = payload?;
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let user = User::get_by_email(&state.db, &body.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&body.password, &user.password_hash) {
        return Err(invalid());
    }

    let token = state.jwt.issue(&user.id, user.role)?;
    Ok(Json(json!({ "success": true, "user": user, "token": token })))
}

/// GET /api/users/me
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<impl IntoResponse> {
    let user = User::get_by_id(&state.db, &auth.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(json!({ "success": true, "user": user })))
}

/// POST /api/users/seed-junior
pub async fn seed_junior(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: std::result::Result<Json<SeedJuniorBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    auth.require_role(&[Role::Senior])?;
    let Json(body) = payload?;

    let password = body.password.as_deref().unwrap_or(DEFAULT_JUNIOR_PASSWORD);
    let user = register(&state, &body.email, password, Role::Junior, body.skills).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "user": user })),
    ))
}
