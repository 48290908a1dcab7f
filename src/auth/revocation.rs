/// Access Token Revocation
///
/// A revoked token id is stored in an expiring key-value cache under
/// `block <token id>`, holding the owner's user id. The entry lives exactly
/// as long as the token would have, so nothing ever needs cleaning up.
/// Absence of an entry means "not revoked".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use uuid::Uuid;

use crate::auth::claims::SessionPayload;
use crate::error::StoreError;

/// The two cache commands revocation needs: `SET key value EX ttl` and `EXISTS key`
#[async_trait]
pub trait ExpiringCache: Send + Sync {
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Redis-backed expiring cache over a multiplexed connection
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            tracing::error!("Failed to parse Redis URL: {}", e);
            StoreError::Unavailable(format!("invalid Redis URL: {}", e))
        })?;
        let connection = client.get_multiplexed_async_connection().await?;

        tracing::info!("Connected to Redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl ExpiringCache for RedisCache {
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        // EX takes whole seconds and refuses zero
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }
}

/// Revocation list for access tokens
#[derive(Clone)]
pub struct RevocationList {
    cache: Arc<dyn ExpiringCache>,
}

impl RevocationList {
    pub fn new(cache: Arc<dyn ExpiringCache>) -> Self {
        Self { cache }
    }

    fn key(token_id: &Uuid) -> String {
        format!("block {}", token_id)
    }

    /// Revoke `payload` until its natural expiry.
    /// A token that has already expired is left alone.
    pub async fn revoke(&self, payload: &SessionPayload) -> Result<(), StoreError> {
        if payload.is_expired() {
            tracing::debug!(token_id = %payload.id, "Token already expired, nothing to revoke");
            return Ok(());
        }
        let remaining = payload.remaining_seconds();

        self.cache
            .set_with_expiry(
                &Self::key(&payload.id),
                &payload.user_id.to_string(),
                Duration::from_secs(remaining as u64),
            )
            .await?;

        tracing::info!(
            token_id = %payload.id,
            user_id = payload.user_id,
            ttl_secs = remaining,
            "Access token revoked"
        );
        Ok(())
    }

    pub async fn is_revoked(&self, token_id: &Uuid) -> Result<bool, StoreError> {
        self.cache.exists(&Self::key(token_id)).await
    }
}
