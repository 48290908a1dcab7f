/// Session Orchestrator
///
/// Composes the key provider, token codec, revocation list, refresh ledger
/// and user store into the session use cases: sign-up, login, request
/// authentication, logout, refresh-token exchange and account deletion.
///
/// This is the one place that turns storage and crypto failures into the
/// outcomes clients see. Every store call runs under the caller's `Deadline`.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::claims::{SessionIdentity, SessionPayload};
use crate::auth::codec::{self, TokenCodec};
use crate::auth::key_provider::{KeyProvider, KeyStore};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::refresh_token::RefreshLedger;
use crate::auth::revocation::{ExpiringCache, RevocationList};
use crate::configuration::SessionSettings;
use crate::deadline::Deadline;
use crate::error::{AppError, AuthError, StoreError};
use crate::users::{NewUser, User, UserStore};
use crate::validators::{validate_email, validate_password, validate_username};

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub user: User,
    pub access_token: String,
    pub refresh_token: Uuid,
    pub payload: SessionPayload,
}

/// Result of a successful refresh-token exchange
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Uuid,
}

pub struct SessionService {
    keys: KeyProvider,
    codec: TokenCodec,
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn RefreshLedger>,
    revocations: RevocationList,
    access_token_ttl: Duration,
    password_hash_cost: u32,
    request_timeout: Duration,
}

/// A cache failure on a path that must fail closed
fn revocation_failure(err: StoreError) -> AppError {
    match err {
        StoreError::Timeout(operation) => AppError::Timeout(operation),
        other => AppError::RevocationStoreUnavailable(other.to_string()),
    }
}

impl SessionService {
    pub fn new(
        settings: &SessionSettings,
        key_store: Arc<dyn KeyStore>,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn RefreshLedger>,
        cache: Arc<dyn ExpiringCache>,
    ) -> Self {
        Self {
            keys: KeyProvider::new(key_store, settings.key_cache_ttl()),
            codec: TokenCodec::new(settings.issuer.clone()),
            users,
            ledger,
            revocations: RevocationList::new(cache),
            access_token_ttl: settings.access_token_ttl(),
            password_hash_cost: settings.password_hash_cost,
            request_timeout: settings.request_timeout(),
        }
    }

    /// Deadline for a request starting now
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }

    /// Register a user, or bring back a soft-deleted account holding this email
    pub async fn sign_up(
        &self,
        deadline: &Deadline,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AppError> {
        let username = validate_username(username)?;
        let email = validate_email(email)?;
        validate_password(password)?;

        let existing = match deadline
            .bound("user lookup", self.users.get_user_by_email(&email))
            .await
        {
            Ok(user) => Some(user),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        if matches!(&existing, Some(user) if !user.is_deleted) {
            return Err(AuthError::EmailTaken.into());
        }

        let new_user = NewUser {
            username,
            email,
            hashed_password: hash_password(password, self.password_hash_cost)?,
        };

        // An error below means a concurrent sign-up for the same email got there first
        match existing {
            Some(_) => match deadline
                .bound("user restore", self.users.restore_deleted_user(&new_user))
                .await
            {
                Ok(user) => Ok(user),
                Err(StoreError::NotFound(_)) | Err(StoreError::Conflict(_)) => {
                    Err(AuthError::EmailTaken.into())
                }
                Err(e) => Err(e.into()),
            },
            None => match deadline.bound("user insert", self.users.create_user(&new_user)).await {
                Ok(user) => Ok(user),
                Err(StoreError::Conflict(_)) => Err(AuthError::EmailTaken.into()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Check credentials and issue a fresh access token plus refresh token.
    /// Any previous refresh token of the user is replaced.
    pub async fn login(
        &self,
        deadline: &Deadline,
        email: &str,
        password: &str,
    ) -> Result<IssuedSession, AppError> {
        let email = validate_email(email)?;

        let user = deadline
            .bound("user lookup", self.users.get_user_by_email(&email))
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => AppError::Auth(AuthError::NoSuchUser),
                other => other.into(),
            })?;
        if user.is_deleted {
            return Err(AuthError::NoSuchUser.into());
        }
        if !verify_password(password, &user.hashed_password)? {
            return Err(AuthError::BadCredentials.into());
        }

        let key = self.keys.get(deadline).await?;
        let identity = SessionIdentity {
            user_id: user.id,
            name: user.username.clone(),
            email: user.email.clone(),
            address: None,
        };
        let issued = self.codec.encode(&identity, self.access_token_ttl, &key)?;

        let refresh_token = Uuid::new_v4();
        deadline
            .bound("refresh token replace", self.ledger.replace(user.id, refresh_token))
            .await?;

        tracing::info!(user_id = user.id, token_id = %issued.payload.id, "User logged in");

        Ok(IssuedSession {
            user,
            access_token: issued.token,
            refresh_token,
            payload: issued.payload,
        })
    }

    /// Validate the `Authorization` value of an inbound request
    ///
    /// Checks run in order and stop at the first failure: framing, signature
    /// and expiry, revocation, then identity against the user store.
    pub async fn authenticate(
        &self,
        deadline: &Deadline,
        authorization: Option<&str>,
    ) -> Result<SessionPayload, AppError> {
        let framed = authorization.ok_or(AuthError::MissingToken)?;
        codec::strip_scheme(framed).map_err(|_| AuthError::MissingToken)?;

        let key = self.keys.get(deadline).await?;
        let payload = self.codec.decode(framed, &key)?;

        let revoked = deadline
            .bound("revocation lookup", self.revocations.is_revoked(&payload.id))
            .await
            .map_err(revocation_failure)?;
        if revoked {
            return Err(AuthError::TokenRevoked.into());
        }

        let live = deadline
            .bound(
                "identity check",
                self.users.identity_matches(&payload.email, &payload.name),
            )
            .await?;
        if !live {
            return Err(AuthError::IdentityMismatch.into());
        }

        tracing::debug!(user_id = payload.user_id, token_id = %payload.id, "Request authenticated");
        Ok(payload)
    }

    /// End the session behind `payload`
    ///
    /// Fails with `NoActiveSession` when the user holds no refresh record, so a
    /// repeated logout with the same payload is an error. Revoking the access
    /// token is best-effort: a cache outage is logged and the logout still succeeds.
    pub async fn logout(&self, deadline: &Deadline, payload: &SessionPayload) -> Result<(), AppError> {
        deadline
            .bound("refresh token delete", self.ledger.delete(payload.user_id))
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => AppError::Auth(AuthError::NoActiveSession),
                other => other.into(),
            })?;

        if let Err(e) = deadline
            .bound("revocation write", self.revocations.revoke(payload))
            .await
        {
            tracing::warn!(
                user_id = payload.user_id,
                token_id = %payload.id,
                error = %e,
                "Access token could not be revoked during logout"
            );
        }

        tracing::info!(user_id = payload.user_id, "User logged out");
        Ok(())
    }

    /// Trade a refresh token and its access token for a new pair
    ///
    /// The access token must still verify and must not already be revoked;
    /// it is revoked before the refresh token is even looked up. The new access token carries the claims of
    /// the old one.
    pub async fn refresh(
        &self,
        deadline: &Deadline,
        refresh_token: &str,
        access_token: &str,
    ) -> Result<TokenPair, AppError> {
        let key = self.keys.get(deadline).await?;
        let payload = self.codec.decode(&codec::with_scheme(access_token), &key)?;

        let revoked = deadline
            .bound("revocation lookup", self.revocations.is_revoked(&payload.id))
            .await
            .map_err(revocation_failure)?;
        if revoked {
            tracing::warn!(user_id = payload.user_id, token_id = %payload.id, "Refresh presented a revoked access token");
            return Err(AuthError::TokenRevoked.into());
        }

        deadline
            .bound("revocation write", self.revocations.revoke(&payload))
            .await
            .map_err(revocation_failure)?;

        let presented =
            Uuid::parse_str(refresh_token.trim()).map_err(|_| AuthError::RefreshTokenUnknown)?;

        let record = deadline
            .bound("refresh token lookup", self.ledger.get(payload.user_id, presented))
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => AppError::Auth(AuthError::RefreshTokenUnknown),
                other => other.into(),
            })?;
        if record.refresh_token != Some(presented) {
            return Err(AuthError::RefreshTokenUnknown.into());
        }

        if record.is_expired() {
            match deadline
                .bound("refresh token delete", self.ledger.delete(payload.user_id))
                .await
            {
                Ok(()) => (),
                Err(e) if e.is_not_found() => (),
                Err(e) => return Err(e.into()),
            }
            tracing::info!(user_id = payload.user_id, "Expired refresh token removed");
            return Err(AuthError::RefreshTokenExpired.into());
        }

        let issued = self
            .codec
            .encode(&payload.identity(), self.access_token_ttl, &key)?;
        let next = Uuid::new_v4();
        deadline
            .bound("refresh token replace", self.ledger.replace(payload.user_id, next))
            .await?;

        tracing::info!(
            user_id = payload.user_id,
            revoked_token_id = %payload.id,
            token_id = %issued.payload.id,
            "Session refreshed"
        );

        Ok(TokenPair {
            access_token: issued.token,
            refresh_token: next,
        })
    }

    /// Soft-delete the account behind `payload` along with its refresh record
    pub async fn delete_user(&self, deadline: &Deadline, payload: &SessionPayload) -> Result<(), AppError> {
        deadline
            .bound(
                "user delete",
                self.users.soft_delete_user(payload.user_id, &payload.email),
            )
            .await?;

        tracing::info!(user_id = payload.user_id, "User deleted");
        Ok(())
    }
}
