/// In-memory stores
///
/// Process-local implementations of every storage trait with the same
/// observable semantics as the Postgres and Redis ones. Used by the test
/// suites and for running the service without external infrastructure.
/// The cache can be switched offline to simulate an outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::key_provider::{private_key_der_from_pem, KeyStore};
use crate::auth::refresh_token::{RefreshLedger, RefreshRecord};
use crate::auth::revocation::ExpiringCache;
use crate::error::StoreError;
use crate::users::{NewUser, User, UserStore};

/// Expiring key-value cache
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Take the cache on or offline; offline calls fail with `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Time left on a live entry
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries()
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(_, expires_at)| *expires_at - now)
    }

    /// True when no live entry remains
    pub fn is_empty(&self) -> bool {
        let now = Instant::now();
        !self.entries().values().any(|(_, expires_at)| *expires_at > now)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("cache is offline".to_string()))
        }
    }
}

#[async_trait]
impl ExpiringCache for MemoryCache {
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut entries = self.entries();
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    private_key: Option<Vec<u8>>,
    users: Vec<User>,
    refresh_tokens: Vec<RefreshRecord>,
    next_user_id: i32,
    next_refresh_id: i32,
}

impl State {
    fn user_exists(&self, user_id: i32) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }

    fn insert_refresh(
        &mut self,
        user_id: i32,
        refresh_token: Uuid,
        validity: Duration,
    ) -> Result<(), StoreError> {
        if !self.user_exists(user_id) {
            return Err(StoreError::ForeignKey(format!("user {} does not exist", user_id)));
        }
        if self
            .refresh_tokens
            .iter()
            .any(|r| r.refresh_token == Some(refresh_token))
        {
            return Err(StoreError::Conflict("refresh token already stored".to_string()));
        }

        let validity = chrono::Duration::from_std(validity)
            .map_err(|e| StoreError::Unexpected(e.to_string()))?;
        let now = Utc::now();
        self.next_refresh_id += 1;
        self.refresh_tokens.push(RefreshRecord {
            id: self.next_refresh_id,
            user_id,
            refresh_token: Some(refresh_token),
            expires_at: now + validity,
            created_at: now,
        });
        Ok(())
    }

    fn delete_refresh(&mut self, user_id: i32) -> usize {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|r| r.user_id != user_id);
        before - self.refresh_tokens.len()
    }
}

/// Key store, user store and refresh ledger over one lock.
/// Every operation runs under the lock, so each is atomic.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    refresh_validity: Duration,
}

impl MemoryStore {
    pub fn new(refresh_validity: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            refresh_validity,
        }
    }

    /// Seed the key store with PKCS#1 DER bytes
    pub fn with_key_der(self, der: Vec<u8>) -> Self {
        self.state().private_key = Some(der);
        self
    }

    /// Seed the key store from a PKCS#1 PEM private key
    pub fn with_key_pem(self, pem: &str) -> Result<Self, String> {
        let der = private_key_der_from_pem(pem)?;
        Ok(self.with_key_der(der))
    }

    /// All refresh records currently held for `user_id`
    pub fn refresh_records(&self, user_id: i32) -> Vec<RefreshRecord> {
        self.state()
            .refresh_tokens
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Push every refresh record of `user_id` past its expiry
    pub fn expire_refresh_records(&self, user_id: i32) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for record in self
            .state()
            .refresh_tokens
            .iter_mut()
            .filter(|r| r.user_id == user_id)
        {
            record.expires_at = past;
        }
    }

    /// Change a user's name in place
    pub fn rename_user(&self, user_id: i32, username: &str) {
        if let Some(user) = self.state().users.iter_mut().find(|u| u.id == user_id) {
            user.username = username.to_string();
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn load_private_key(&self) -> Result<Vec<u8>, StoreError> {
        self.state()
            .private_key
            .clone()
            .ok_or_else(|| StoreError::NotFound("no private key found in database".to_string()))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.state();
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }

        state.next_user_id += 1;
        let created = User {
            id: state.next_user_id,
            username: user.username.clone(),
            email: user.email.clone(),
            hashed_password: user.hashed_password.clone(),
            created_at: Utc::now(),
            is_deleted: false,
            deleted_at: None,
        };
        state.users.push(created.clone());
        Ok(created)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError> {
        self.state()
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("user".to_string()))
    }

    async fn restore_deleted_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut state = self.state();
        let row = state
            .users
            .iter_mut()
            .find(|u| u.email == user.email && u.is_deleted)
            .ok_or_else(|| StoreError::NotFound("deleted user".to_string()))?;

        row.username = user.username.clone();
        row.hashed_password = user.hashed_password.clone();
        row.is_deleted = false;
        row.deleted_at = None;
        Ok(row.clone())
    }

    async fn identity_matches(&self, email: &str, username: &str) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .users
            .iter()
            .any(|u| !u.is_deleted && u.email == email && u.username == username))
    }

    async fn soft_delete_user(&self, id: i32, email: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        let index = state
            .users
            .iter()
            .position(|u| u.id == id && u.email == email && !u.is_deleted)
            .ok_or_else(|| StoreError::NotFound("user".to_string()))?;

        state.delete_refresh(id);
        let user = &mut state.users[index];
        user.is_deleted = true;
        user.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl RefreshLedger for MemoryStore {
    async fn insert(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError> {
        self.state()
            .insert_refresh(user_id, refresh_token, self.refresh_validity)
    }

    async fn get(&self, user_id: i32, refresh_token: Uuid) -> Result<RefreshRecord, StoreError> {
        self.state()
            .refresh_tokens
            .iter()
            .find(|r| r.user_id == user_id && r.refresh_token == Some(refresh_token))
            .cloned()
            .ok_or_else(|| StoreError::NotFound("refresh token".to_string()))
    }

    async fn delete(&self, user_id: i32) -> Result<(), StoreError> {
        match self.state().delete_refresh(user_id) {
            0 => Err(StoreError::NotFound("refresh token".to_string())),
            _ => Ok(()),
        }
    }

    async fn replace(&self, user_id: i32, refresh_token: Uuid) -> Result<(), StoreError> {
        let mut state = self.state();
        let previous = state.refresh_tokens.clone();

        state.delete_refresh(user_id);
        if let Err(e) = state.insert_refresh(user_id, refresh_token, self.refresh_validity) {
            state.refresh_tokens = previous;
            return Err(e);
        }
        Ok(())
    }
}
