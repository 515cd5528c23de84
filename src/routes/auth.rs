use axum::{extract::State, routing::post, Json, Router};

use crate::auth::{create_access_token, hash_password, verify_password, AppState};
use crate::database::{fetch_one, insert_returning_id, queries};
use crate::error::{AppError, AppResult};
use crate::models::{LoginRequest, RegisterRequest, TokenResponse, UserResponse};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

struct UserAuthRow {
    id: i64,
    username: String,
    email: String,
    hashed_password: String,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Json<TokenResponse>> {
    let username = request.username.trim();
    let email = request.email.trim();

    if username.is_empty() || email.is_empty() {
        return Err(AppError::Validation(
            "Username and email are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if request.password.len() < 6 {
        return Err(AppError::Validation(
            "Password must be at least 6 characters long".to_string(),
        ));
    }

    let conn = state.pool.get().map_err(AppError::Pool)?;

    let taken: i64 = fetch_one(
        &conn,
        queries::users::COUNT_BY_USERNAME_OR_EMAIL,
        &[&username, &email],
        |row| row.get(0),
    )?
    .unwrap_or(0);

    if taken > 0 {
        return Err(AppError::Validation(
            "Username or email is already in use".to_string(),
        ));
    }

    let hashed = hash_password(&request.password)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let user_id = insert_returning_id(
        &conn,
        queries::users::INSERT,
        &[&username, &email, &hashed],
    )?;

    let token = create_access_token(user_id, username, &state.config)?;

    Ok(Json(TokenResponse {
        token,
        user: UserResponse {
            id: user_id,
            username: username.to_string(),
            email: email.to_string(),
        },
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let conn = state.pool.get().map_err(AppError::Pool)?;

    let user = fetch_one(
        &conn,
        queries::users::SELECT_BY_USERNAME,
        &[&request.username],
        |row| {
            Ok(UserAuthRow {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                hashed_password: row.get(3)?,
            })
        },
    )?
    .ok_or_else(|| AppError::Authentication("Invalid credentials".to_string()))?;

    if !verify_password(&request.password, &user.hashed_password) {
        return Err(AppError::Authentication("Invalid credentials".to_string()));
    }

    let token = create_access_token(user.id, &user.username, &state.config)?;

    Ok(Json(TokenResponse {
        token,
        user: UserResponse {
            id: user.id,
            username: user.username,
            email: user.email,
        },
    }))
}
