/// Authentication Routes
///
/// Sign-up, login, refresh-token exchange, logout and account deletion.
/// Handlers only shape requests and responses; every rule lives in `SessionService`.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::claims::SessionPayload;
use crate::error::{AppError, ErrorContext};
use crate::session::SessionService;

/// User registration request
#[derive(Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request; the access token may be sent with or without the `Bearer ` prefix
#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub access_token: String,
}

#[derive(Serialize)]
pub struct SignUpResponse {
    pub username: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Uuid,
}

#[derive(Serialize)]
pub struct TokenPairResponse {
    pub refresh_token: Uuid,
    pub access_token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /api/v1/auth/signup
///
/// # Errors
/// - 400: Validation errors (username, email or password)
/// - 409: Email already used by a live account
pub async fn signup(
    form: web::Json<SignUpRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_signup");
    let deadline = sessions.deadline();

    let user = sessions
        .sign_up(&deadline, &form.username, &form.email, &form.password)
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = context.operation,
        user_id = user.id,
        "User signed up"
    );

    Ok(HttpResponse::Created().json(SignUpResponse {
        username: user.username,
        email: user.email,
    }))
}

/// POST /api/v1/auth/login
///
/// # Errors
/// - 400: Invalid email format
/// - 401: Unknown email or wrong password (same response for both)
pub async fn login(
    form: web::Json<LoginRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let deadline = sessions.deadline();

    let session = sessions.login(&deadline, &form.email, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = context.operation,
        user_id = session.user.id,
        "Login succeeded"
    );

    Ok(HttpResponse::Ok().json(LoginResponse {
        id: session.user.id,
        username: session.user.username,
        email: session.user.email,
        access_token: session.access_token,
        refresh_token: session.refresh_token,
    }))
}

/// POST /api/v1/auth/refresh_token
///
/// # Errors
/// - 401: Access token invalid, refresh token unknown or expired
pub async fn refresh_token(
    form: web::Json<RefreshRequest>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");
    let deadline = sessions.deadline();

    let pair = sessions
        .refresh(&deadline, &form.refresh_token, &form.access_token)
        .await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = context.operation,
        "Token pair refreshed"
    );

    Ok(HttpResponse::Ok().json(TokenPairResponse {
        refresh_token: pair.refresh_token,
        access_token: pair.access_token,
    }))
}

/// POST /api/v1/auth/logout
///
/// **Requires a valid access token**; the payload is injected by `SessionMiddleware`.
pub async fn logout(
    payload: web::ReqData<SessionPayload>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let context = ErrorContext::new("user_logout").with_user_id(payload.user_id);
    let deadline = sessions.deadline();

    sessions.logout(&deadline, &payload).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = context.operation,
        user_id = ?context.user_id,
        "Logout succeeded"
    );

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "logged out",
    }))
}

/// DELETE /api/v1/auth/delete_user
///
/// **Requires a valid access token**. Soft-deletes the caller's own account.
pub async fn delete_user(
    payload: web::ReqData<SessionPayload>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AppError> {
    let payload = payload.into_inner();
    let context = ErrorContext::new("user_delete").with_user_id(payload.user_id);
    let deadline = sessions.deadline();

    sessions.delete_user(&deadline, &payload).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = context.operation,
        user_id = ?context.user_id,
        "Account deleted"
    );

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "user deleted",
    }))
}
