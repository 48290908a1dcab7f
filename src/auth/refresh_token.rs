/// Refresh Token Ledger
///
/// Server-side record of the one refresh token each user currently holds.
/// Rows live in `refresh_token_whitelist`; the table has no per-user
/// uniqueness constraint, so `replace` keeps the one-row-per-user rule by
/// locking the owning user row, clearing old rows and inserting inside a
/// single transaction.
///
/// The validity window is stamped by the ledger at insert time, never by callers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::StoreError;

/// One row of the ledger
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefreshRecord {
    pub id: i32,
    pub user_id: i32,
    /// Nullable in storage; a missing value never matches a presented token
    pub refresh_token: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// Store `refresh_token` for `user_id`.
    /// `Conflict` if the token id is already stored, `ForeignKey` if the user does not exist.
    async fn insert(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError>;

    /// Exact match on `(user_id, refresh_token)`, `NotFound` otherwise
    async fn get(&self, user_id: i32, refresh_token: Uuid) -> Result<RefreshRecord, StoreError>;

    /// Remove every record of `user_id`; `NotFound` when there was none
    async fn delete(&self, user_id: i32) -> Result<(), StoreError>;

    /// Delete then insert as one unit. Leaves the previous record in place if the insert fails.
    async fn replace(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError>;
}

/// Postgres-backed ledger
#[derive(Clone)]
pub struct PgRefreshLedger {
    pool: PgPool,
    validity: Duration,
}

impl PgRefreshLedger {
    pub fn new(pool: PgPool, validity: Duration) -> Self {
        Self { pool, validity }
    }

    fn validity_seconds(&self) -> f64 {
        self.validity.as_secs_f64()
    }

    async fn insert_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: i32,
        refresh_token: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_token_whitelist (user_id, refresh_token, expires_at, created_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3), NOW())
            "#,
        )
        .bind(user_id)
        .bind(refresh_token)
        .bind(self.validity_seconds())
        .execute(&mut *tx)
        .await?;

        Ok(())
    }
}

/// Delete every ledger row of `user_id` inside `tx`, returning how many went
pub(crate) async fn delete_for_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i32,
) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM refresh_token_whitelist WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    Ok(result.rows_affected())
}

#[async_trait]
impl RefreshLedger for PgRefreshLedger {
    async fn insert(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        self.insert_in(&mut tx, user_id, refresh_token).await?;
        tx.commit().await?;

        tracing::debug!(user_id = user_id, "Refresh token stored");
        Ok(())
    }

    async fn get(&self, user_id: i32, refresh_token: Uuid) -> Result<RefreshRecord, StoreError> {
        sqlx::query_as::<_, RefreshRecord>(
            r#"
            SELECT id, user_id, refresh_token, expires_at, created_at
            FROM refresh_token_whitelist
            WHERE user_id = $1 AND refresh_token = $2
            "#,
        )
        .bind(user_id)
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("refresh token".to_string()))
    }

    async fn delete(&self, user_id: i32) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_for_user(&mut tx, user_id).await?;
        if removed == 0 {
            return Err(StoreError::NotFound("refresh token".to_string()));
        }
        tx.commit().await?;

        tracing::debug!(user_id = user_id, removed = removed, "Refresh token deleted");
        Ok(())
    }

    async fn replace(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialises concurrent replaces for the same user
        sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::ForeignKey(format!("user {} does not exist", user_id)))?;

        delete_for_user(&mut tx, user_id).await?;
        self.insert_in(&mut tx, user_id, refresh_token).await?;
        tx.commit().await?;

        tracing::debug!(user_id = user_id, "Refresh token replaced");
        Ok(())
    }
}
