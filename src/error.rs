/// Error Handling Module
///
/// One taxonomy for the whole service:
/// 1. Domain-specific error types (validation, storage, tokens, authentication)
/// 2. A unified `AppError` that the session layer returns
/// 3. HTTP response mapping with structured logging
///
/// Storage and crypto failures are wrapped with context and handed up to the
/// session orchestrator, which is the only place that decides what a client
/// gets to see.

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

// ============================================================================
// 1. DOMAIN-SPECIFIC ERROR TYPES
// ============================================================================

/// Request field validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is empty")]
    EmptyField(&'static str),
    #[error("{0} is too short (minimum {1} characters)")]
    TooShort(&'static str, usize),
    #[error("{0} is too long (maximum {1} characters)")]
    TooLong(&'static str, usize),
    #[error("{0} has invalid format")]
    InvalidFormat(&'static str),
}

/// Failures raised by any backing store: Postgres, Redis or the in-memory doubles
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate entry: {0}")]
    Conflict(String),
    #[error("invalid reference: {0}")]
    ForeignKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("deadline exceeded during {0}")]
    Timeout(&'static str),
    #[error("store error: {0}")]
    Unexpected(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Token codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    TokenInvalid(String),
    #[error("token signature or algorithm rejected")]
    SignatureInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("token encoding failed: {0}")]
    EncodingFailed(String),
}

/// Authentication and session errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed authorization header")]
    MissingToken,
    #[error("no user registered with this email")]
    NoSuchUser,
    #[error("password does not match")]
    BadCredentials,
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("token identity no longer matches a live user")]
    IdentityMismatch,
    #[error("no active session for this user")]
    NoActiveSession,
    #[error("refresh token is not recognised")]
    RefreshTokenUnknown,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error("email address is already in use")]
    EmailTaken,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("record not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Conflict(db.message().to_string()),
                // foreign_key_violation
                Some("23503") => StoreError::ForeignKey(db.message().to_string()),
                _ => StoreError::Unexpected(db.message().to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable("database pool exhausted or closed".to_string())
            }
            sqlx::Error::Io(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Unexpected(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout("cache command")
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

// ============================================================================
// 2. UNIFIED APPLICATION ERROR TYPE
// ============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
    #[error("revocation store unavailable: {0}")]
    RevocationStoreUnavailable(String),
    #[error("deadline exceeded during {0}")]
    Timeout(&'static str),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout(operation) => AppError::Timeout(operation),
            other => AppError::Store(other),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    /// Unique error ID for correlating with logs
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

const UNAUTHORIZED: (StatusCode, &str, &str) =
    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "unauthorized");
const INTERNAL: (StatusCode, &str, &str) = (
    StatusCode::INTERNAL_SERVER_ERROR,
    "INTERNAL_ERROR",
    "internal server error",
);
const UNAVAILABLE: (StatusCode, &str, &str) = (
    StatusCode::SERVICE_UNAVAILABLE,
    "SERVICE_UNAVAILABLE",
    "service temporarily unavailable",
);

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", ""),

            // Token failures stay opaque regardless of which check tripped
            AppError::Token(TokenError::EncodingFailed(_)) => INTERNAL,
            AppError::Token(_) => UNAUTHORIZED,

            AppError::Auth(e) => match e {
                AuthError::NoSuchUser | AuthError::BadCredentials => (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS",
                    "invalid email or password",
                ),
                AuthError::RefreshTokenExpired => (
                    StatusCode::UNAUTHORIZED,
                    "REFRESH_TOKEN_EXPIRED",
                    "refresh token expired, please log in again",
                ),
                AuthError::EmailTaken => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_ENTRY",
                    "email address is already in use",
                ),
                AuthError::MissingToken
                | AuthError::TokenRevoked
                | AuthError::IdentityMismatch
                | AuthError::NoActiveSession
                | AuthError::RefreshTokenUnknown => UNAUTHORIZED,
            },

            AppError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", "not found"),
                StoreError::Conflict(_) => {
                    (StatusCode::CONFLICT, "DUPLICATE_ENTRY", "duplicate entry")
                }
                StoreError::ForeignKey(_) => (
                    StatusCode::BAD_REQUEST,
                    "INVALID_REFERENCE",
                    "referenced record does not exist",
                ),
                StoreError::Unavailable(_) => UNAVAILABLE,
                StoreError::Timeout(_) => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "TIMEOUT",
                    "request deadline exceeded",
                ),
                StoreError::Unexpected(_) => INTERNAL,
            },

            AppError::RevocationStoreUnavailable(_) => UNAVAILABLE,
            AppError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "request deadline exceeded",
            ),
            AppError::KeyUnavailable(_) | AppError::Config(_) | AppError::Internal(_) => INTERNAL,
        }
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = self.classify();
        let message = match self {
            AppError::Validation(e) => e.to_string(),
            _ => message.to_string(),
        };

        let error_response =
            ErrorResponse::new(request_id.to_string(), message, code.to_string(), status.as_u16());

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Token(TokenError::EncodingFailed(_)) => {
                tracing::error!(request_id = request_id, error = %self, "Token encoding failed");
            }
            AppError::Token(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Token rejected");
            }
            AppError::Auth(AuthError::NoSuchUser | AuthError::BadCredentials) => {
                tracing::warn!(request_id = request_id, error = %self, "Invalid credentials attempt");
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Authentication error");
            }
            AppError::Store(StoreError::Conflict(_)) => {
                tracing::warn!(request_id = request_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Store(e) => {
                tracing::error!(request_id = request_id, error = %e, "Store error");
            }
            AppError::KeyUnavailable(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Signing key unavailable");
            }
            AppError::RevocationStoreUnavailable(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Revocation store unavailable");
            }
            AppError::Timeout(operation) => {
                tracing::error!(request_id = request_id, operation = operation, "Deadline exceeded");
            }
            AppError::Config(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-operation context attached to log lines
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<i32>,
    pub operation: &'static str,
}

impl ErrorContext {
    pub fn new(operation: &'static str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation,
        }
    }

    pub fn with_user_id(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }
}
