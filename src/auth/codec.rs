/// Access Token Codec
///
/// Signs session payloads into RS256 JWTs framed as `Bearer <jwt>` and turns
/// framed strings back into payloads. Signature, algorithm family, issuer and
/// expiry are all checked in `decode`, so a payload never leaves this module
/// unvalidated.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};

use crate::auth::claims::{SessionIdentity, SessionPayload};
use crate::auth::key_provider::SigningKey;
use crate::error::TokenError;

/// Scheme tag in front of every access token
pub const SCHEME: &str = "Bearer";

/// RSA family accepted on decode; anything else is treated as a forgery attempt
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// A signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub payload: SessionPayload,
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: String,
}

impl TokenCodec {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    /// Issue a new access token for `identity`, valid for `ttl`
    ///
    /// # Errors
    /// `TokenError::EncodingFailed` when `ttl` is under one second or signing fails
    pub fn encode(
        &self,
        identity: &SessionIdentity,
        ttl: Duration,
        key: &SigningKey,
    ) -> Result<IssuedToken, TokenError> {
        let ttl_seconds = i64::try_from(ttl.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| TokenError::EncodingFailed("ttl must be at least one second".to_string()))?;

        let payload = SessionPayload::issue(identity, &self.issuer, ttl_seconds);
        let jwt = encode(&Header::new(Algorithm::RS256), &payload, key.encoding_key())
            .map_err(|e| TokenError::EncodingFailed(e.to_string()))?;

        Ok(IssuedToken {
            token: format!("{} {}", SCHEME, jwt),
            payload,
        })
    }

    /// Validate a framed token and return its payload
    ///
    /// # Errors
    /// - `TokenInvalid`: wrong framing, undecodable structure or foreign issuer
    /// - `SignatureInvalid`: bad signature or a non-RSA algorithm in the header
    /// - `TokenExpired`: `exp` has passed
    pub fn decode(&self, framed: &str, key: &SigningKey) -> Result<SessionPayload, TokenError> {
        let jwt = strip_scheme(framed)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        decode::<SessionPayload>(jwt, key.decoding_key(), &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::TokenExpired,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::SignatureInvalid,
                other => TokenError::TokenInvalid(format!("{:?}", other)),
            })
    }
}

/// Split `<scheme> <token>` and return the token part
pub fn strip_scheme(framed: &str) -> Result<&str, TokenError> {
    let parts: Vec<&str> = framed.split(' ').collect();

    match parts.as_slice() {
        [scheme, token] if *scheme == SCHEME && !token.is_empty() => Ok(token),
        _ => Err(TokenError::TokenInvalid(
            "authorization value must be formatted as `Bearer <token>`".to_string(),
        )),
    }
}

/// Frame a bare token with the scheme tag; framed input is returned unchanged
pub fn with_scheme(token: &str) -> String {
    let token = token.trim();
    if token.starts_with(SCHEME) && token[SCHEME.len()..].starts_with(' ') {
        token.to_string()
    } else {
        format!("{} {}", SCHEME, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::EncodingKey;

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/signing_key.pem");
    const FOREIGN_KEY_PEM: &str = include_str!("../../tests/fixtures/foreign_key.pem");

    fn key(pem: &str) -> SigningKey {
        SigningKey::from_pkcs1_pem(pem, Duration::from_secs(3600)).expect("Failed to parse test key")
    }

    fn identity() -> SessionIdentity {
        SessionIdentity {
            user_id: 42,
            name: "ann".to_string(),
            email: "ann@example.com".to_string(),
            address: Some("1 Main St".to_string()),
        }
    }

    #[test]
    fn test_encode_and_decode_token() {
        let codec = TokenCodec::new("test");
        let key = key(TEST_KEY_PEM);

        let issued = codec.encode(&identity(), Duration::from_secs(60), &key).expect("Failed to encode");
        assert!(issued.token.starts_with("Bearer "));

        let payload = codec.decode(&issued.token, &key).expect("Failed to decode");
        assert_eq!(payload, issued.payload);
        assert_eq!(payload.identity(), identity());
        assert_eq!(payload.exp - payload.iat, 60);
    }

    #[test]
    fn test_each_issuance_gets_a_new_id() {
        let codec = TokenCodec::new("test");
        let key = key(TEST_KEY_PEM);

        let a = codec.encode(&identity(), Duration::from_secs(60), &key).unwrap();
        let b = codec.encode(&identity(), Duration::from_secs(60), &key).unwrap();
        assert_ne!(a.payload.id, b.payload.id);
    }

    #[test]
    fn test_rejects_bad_framing() {
        let codec = TokenCodec::new("test");
        let key = key(TEST_KEY_PEM);
        let issued = codec.encode(&identity(), Duration::from_secs(60), &key).unwrap();
        let jwt = issued.token.trim_start_matches("Bearer ");

        for framed in [jwt.to_string(), format!("Basic {}", jwt), format!("Bearer {} extra", jwt), "Bearer ".to_string()] {
            assert!(
                matches!(codec.decode(&framed, &key), Err(TokenError::TokenInvalid(_))),
                "accepted {:?}",
                framed
            );
        }
    }

    #[test]
    fn test_rejects_token_signed_by_another_key() {
        let codec = TokenCodec::new("test");
        let issued = codec.encode(&identity(), Duration::from_secs(60), &key(FOREIGN_KEY_PEM)).unwrap();

        assert_eq!(codec.decode(&issued.token, &key(TEST_KEY_PEM)), Err(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_rejects_symmetric_algorithm() {
        let codec = TokenCodec::new("test");
        let payload = SessionPayload::issue(&identity(), "test", 60);
        let jwt = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(b"guessable-secret"),
        )
        .unwrap();

        assert_eq!(
            codec.decode(&format!("Bearer {}", jwt), &key(TEST_KEY_PEM)),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_rejects_expired_token() {
        let codec = TokenCodec::new("test");
        let key = key(TEST_KEY_PEM);
        let mut payload = SessionPayload::issue(&identity(), "test", 60);
        payload.iat -= 120;
        payload.exp = payload.iat + 60;
        let jwt = encode(&Header::new(Algorithm::RS256), &payload, key.encoding_key()).unwrap();

        assert_eq!(codec.decode(&format!("Bearer {}", jwt), &key), Err(TokenError::TokenExpired));
    }

    #[test]
    fn test_rejects_foreign_issuer() {
        let key = key(TEST_KEY_PEM);
        let issued = TokenCodec::new("someone-else")
            .encode(&identity(), Duration::from_secs(60), &key)
            .unwrap();

        assert!(matches!(
            TokenCodec::new("test").decode(&issued.token, &key),
            Err(TokenError::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_zero_ttl_is_refused() {
        let codec = TokenCodec::new("test");
        let result = codec.encode(&identity(), Duration::from_millis(500), &key(TEST_KEY_PEM));
        assert!(matches!(result, Err(TokenError::EncodingFailed(_))));
    }

    #[test]
    fn test_with_scheme() {
        assert_eq!(with_scheme("abc"), "Bearer abc");
        assert_eq!(with_scheme("Bearer abc"), "Bearer abc");
        assert_eq!(with_scheme(" abc "), "Bearer abc");
    }
}
