/// Signing Key Provider
///
/// Loads the RSA private key from the `sec_m` table, keeps it in memory for a
/// bounded time and hands it to every session operation.
///
/// Reads of a fresh cached key are a lock-free atomic load and never touch
/// the reload mutex. When the key is
/// missing or stale, callers serialise on the mutex and re-check the cache
/// once they hold it, so at most one load is in flight and late arrivals pick
/// up the key the winner stored.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::RsaPrivateKey;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::deadline::Deadline;
use crate::error::{AppError, StoreError};

const GENERATED_KEY_BITS: usize = 2048;

/// Source of the persisted private key
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// PKCS#1 DER bytes of the single stored private key.
    /// `StoreError::NotFound` when the table is empty.
    async fn load_private_key(&self) -> Result<Vec<u8>, StoreError>;
}

/// RSA key material with a reload deadline
pub struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_at: Instant,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Decode a PKCS#1 DER private key and derive its public half
    pub fn from_pkcs1_der(der: &[u8], ttl: Duration) -> Result<Self, String> {
        let private = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| format!("failed to parse private key: {}", e))?;
        Self::from_rsa(&private, ttl)
    }

    pub fn from_pkcs1_pem(pem: &str, ttl: Duration) -> Result<Self, String> {
        let private = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| format!("failed to parse private key: {}", e))?;
        Self::from_rsa(&private, ttl)
    }

    fn from_rsa(private: &RsaPrivateKey, ttl: Duration) -> Result<Self, String> {
        let private_der = private
            .to_pkcs1_der()
            .map_err(|e| format!("failed to encode private key: {}", e))?;
        let public_der = private
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| format!("failed to encode public key: {}", e))?;

        Ok(Self {
            encoding: EncodingKey::from_rsa_der(private_der.as_bytes()),
            decoding: DecodingKey::from_rsa_der(public_der.as_bytes()),
            expires_at: Instant::now() + ttl,
        })
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Convert a PEM (PKCS#1) private key into the DER bytes stored in `sec_m`
pub fn private_key_der_from_pem(pem: &str) -> Result<Vec<u8>, String> {
    let private = RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| format!("failed to parse private key: {}", e))?;
    private
        .to_pkcs1_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| format!("failed to encode private key: {}", e))
}

/// Cached, lazily reloaded signing key
pub struct KeyProvider {
    store: Arc<dyn KeyStore>,
    ttl: Duration,
    cached: ArcSwapOption<SigningKey>,
    reload: Mutex<()>,
}

impl KeyProvider {
    pub fn new(store: Arc<dyn KeyStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cached: ArcSwapOption::empty(),
            reload: Mutex::new(()),
        }
    }

    fn fresh_cached(&self) -> Option<Arc<SigningKey>> {
        self.cached.load_full().filter(|key| key.is_fresh())
    }

    /// Current signing key, reloading it from the store when missing or stale
    ///
    /// # Errors
    /// `AppError::KeyUnavailable` when the store has no key, more than one, or
    /// the stored bytes do not decode. `AppError::Timeout` when the deadline passes.
    pub async fn get(&self, deadline: &Deadline) -> Result<Arc<SigningKey>, AppError> {
        if let Some(key) = self.fresh_cached() {
            return Ok(key);
        }

        let _reload = deadline
            .bound("signing key reload", async { Ok(self.reload.lock().await) })
            .await?;

        // Another caller may have finished a reload while we waited
        if let Some(key) = self.fresh_cached() {
            return Ok(key);
        }

        let der = deadline
            .bound("signing key load", self.store.load_private_key())
            .await
            .map_err(|e| match e {
                StoreError::Timeout(operation) => AppError::Timeout(operation),
                other => AppError::KeyUnavailable(other.to_string()),
            })?;

        let key = Arc::new(SigningKey::from_pkcs1_der(&der, self.ttl).map_err(AppError::KeyUnavailable)?);

        self.cached.store(Some(key.clone()));
        tracing::info!(ttl_secs = self.ttl.as_secs(), "Signing key loaded into cache");

        Ok(key)
    }
}

/// Postgres-backed key store reading the `sec_m` table
#[derive(Clone)]
pub struct PgKeyStore {
    pool: PgPool,
}

impl PgKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Generate and store a fresh RSA key if `sec_m` is empty.
    /// Returns true when a key was created.
    pub async fn provision_if_missing(&self) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query("LOCK TABLE sec_m IN EXCLUSIVE MODE")
            .execute(&mut tx)
            .await
            .map_err(StoreError::from)?;

        let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sec_m")
            .fetch_one(&mut tx)
            .await
            .map_err(StoreError::from)?;
        if existing > 0 {
            return Ok(false);
        }

        let der = generate_private_key_der().map_err(AppError::KeyUnavailable)?;
        sqlx::query("INSERT INTO sec_m (private_key) VALUES ($1)")
            .bind(der)
            .execute(&mut tx)
            .await
            .map_err(StoreError::from)?;
        tx.commit().await.map_err(StoreError::from)?;

        tracing::info!(bits = GENERATED_KEY_BITS, "Provisioned new signing key");
        Ok(true)
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn load_private_key(&self) -> Result<Vec<u8>, StoreError> {
        let mut rows = sqlx::query_scalar::<_, Vec<u8>>("SELECT private_key FROM sec_m LIMIT 2")
            .fetch_all(&self.pool)
            .await?;

        match rows.len() {
            0 => Err(StoreError::NotFound("no private key found in database".to_string())),
            1 => Ok(rows.remove(0)),
            _ => Err(StoreError::Conflict("more than one private key stored".to_string())),
        }
    }
}

fn generate_private_key_der() -> Result<Vec<u8>, String> {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), GENERATED_KEY_BITS)
        .map_err(|e| format!("failed to generate private key: {}", e))?;
    private
        .to_pkcs1_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| format!("failed to encode private key: {}", e))
}
