/// Authentication module
///
/// Signing key management, access token encoding and validation,
/// revocation, password hashing and refresh token bookkeeping.

pub mod claims;
pub mod codec;
pub mod key_provider;
pub mod password;
pub mod refresh_token;
pub mod revocation;

pub use claims::{SessionIdentity, SessionPayload};
pub use codec::{IssuedToken, TokenCodec};
pub use key_provider::{KeyProvider, KeyStore, PgKeyStore, SigningKey};
pub use password::{hash_password, verify_password};
pub use refresh_token::{PgRefreshLedger, RefreshLedger, RefreshRecord};
pub use revocation::{ExpiringCache, RedisCache, RevocationList};
