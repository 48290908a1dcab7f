/// User store
///
/// Create, look up, restore and soft-delete user rows. Email is unique across
/// live and deleted rows, so a deleted account's email is reclaimed by
/// restoring the old row rather than inserting a new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::auth::refresh_token::delete_for_user;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub created_at: DateTime<Utc>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Fields needed to create or restore a user; the password is already hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub hashed_password: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `Conflict` when the email is already taken by any row
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError>;

    /// Any row with this email, deleted or not. `NotFound` if there is none.
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Bring a soft-deleted row back with new credentials.
    /// `NotFound` unless a deleted row with this email exists.
    async fn restore_deleted_user(&self, user: &NewUser) -> Result<User, StoreError>;

    /// True when a live row carries exactly this email and username
    async fn identity_matches(&self, email: &str, username: &str) -> Result<bool, StoreError>;

    /// Drop the user's refresh records and soft-delete the row as one unit.
    /// `NotFound` (and nothing changed) unless a live row matches both `id` and `email`.
    async fn soft_delete_user(&self, id: i32, email: &str) -> Result<(), StoreError>;
}

const USER_COLUMNS: &str = "id, username, email, hashed_password, created_at, is_deleted, deleted_at";

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, hashed_password, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(user_id = created.id, "User created");
        Ok(created)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound("user".to_string()))
    }

    async fn restore_deleted_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let restored = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET username = $1, hashed_password = $2, is_deleted = FALSE, deleted_at = NULL
            WHERE email = $3 AND is_deleted = TRUE
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(&user.email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("deleted user".to_string()))?;

        tracing::info!(user_id = restored.id, "Deleted user restored");
        Ok(restored)
    }

    async fn identity_matches(&self, email: &str, username: &str) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                WHERE email = $1 AND username = $2 AND is_deleted = FALSE
            )
            "#,
        )
        .bind(email)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(found)
    }

    async fn soft_delete_user(&self, id: i32, email: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // No refresh record is fine here
        let removed = delete_for_user(&mut tx, id).await?;

        let result = sqlx::query(
            r#"
            UPDATE users SET is_deleted = TRUE, deleted_at = NOW()
            WHERE id = $1 AND email = $2 AND is_deleted = FALSE
            "#,
        )
        .bind(id)
        .bind(email)
        .execute(&mut tx)
        .await?;

        if result.rows_affected() == 0 {
            // Dropping `tx` rolls the refresh deletion back
            return Err(StoreError::NotFound("user".to_string()));
        }
        tx.commit().await?;

        tracing::info!(user_id = id, refresh_records_removed = removed, "User soft-deleted");
        Ok(())
    }
}
