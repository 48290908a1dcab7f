/// Session token claims
///
/// The payload carried inside every access token. `id` is generated per
/// issuance and keys the revocation list; it is never the user's id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a session belongs to, as stamped into the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: i32,
    pub name: String,
    pub email: String,
    pub address: Option<String>,
}

/// Claims of an access token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionPayload {
    /// Unique per issuance
    pub id: Uuid,
    pub user_id: i32,
    pub iss: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expires at (Unix seconds)
    pub exp: i64,
}

impl SessionPayload {
    /// Stamp a fresh payload for `identity`, valid for `ttl_seconds` from now
    pub fn issue(identity: &SessionIdentity, issuer: &str, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id,
            iss: issuer.to_string(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            address: identity.address.clone(),
            iat: now,
            exp: now + ttl_seconds,
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            user_id: self.user_id,
            name: self.name.clone(),
            email: self.email.clone(),
            address: self.address.clone(),
        }
    }

    /// Seconds left until `exp`; zero or negative once expired
    pub fn remaining_seconds(&self) -> i64 {
        self.exp - chrono::Utc::now().timestamp()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_seconds() <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> SessionIdentity {
        SessionIdentity {
            user_id: 7,
            name: "ann".to_string(),
            email: "ann@example.com".to_string(),
            address: None,
        }
    }

    #[test]
    fn test_issue_stamps_times() {
        let payload = SessionPayload::issue(&identity(), "test", 3600);

        assert_eq!(payload.user_id, 7);
        assert_eq!(payload.iss, "test");
        assert_eq!(payload.exp - payload.iat, 3600);
        assert!(!payload.is_expired());
        assert_eq!(payload.identity(), identity());
    }

    #[test]
    fn test_ids_are_unique_per_issuance() {
        let a = SessionPayload::issue(&identity(), "test", 60);
        let b = SessionPayload::issue(&identity(), "test", 60);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_expired_payload() {
        let mut payload = SessionPayload::issue(&identity(), "test", 60);
        payload.exp = payload.iat - 1;
        assert!(payload.is_expired());
        assert!(payload.remaining_seconds() < 0);
    }

    #[test]
    fn test_address_is_omitted_when_absent() {
        let payload = SessionPayload::issue(&identity(), "test", 60);
        let json = serde_json::to_value(&payload).unwrap();

        assert!(json.get("address").is_none());
        for field in ["id", "user_id", "iss", "name", "email", "iat", "exp"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }
}
