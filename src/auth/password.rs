/// Password Hashing and Verification
///
/// bcrypt hashes with a configurable cost. Length rules live in
/// `validators::validate_password` and run before anything reaches here.

use bcrypt::{hash, verify};

use crate::error::AppError;

/// Hash a password using bcrypt
///
/// # Errors
/// Returns `AppError::Internal` if bcrypt rejects the cost or the input
pub fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    hash(password, cost).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against its hash
///
/// # Errors
/// Returns error if the stored hash is not a valid bcrypt string
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    // bcrypt keeps its MIN_COST private; this mirrors its value.
    const MIN_COST: u32 = 4;

    #[test]
    fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password, MIN_COST).expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("ValidPassword123", MIN_COST).expect("Failed to hash password");

        let is_valid = verify_password("ValidPassword123", &hash).expect("Failed to verify password");
        assert!(is_valid);
    }

    #[test]
    fn test_verify_wrong_password() {
        let hash = hash_password("ValidPassword123", MIN_COST).expect("Failed to hash password");

        let is_valid = verify_password("WrongPassword123", &hash).expect("Failed to verify password");
        assert!(!is_valid);
    }

    #[test]
    fn test_same_password_hashes_differently() {
        let a = hash_password("ValidPassword123", MIN_COST).unwrap();
        let b = hash_password("ValidPassword123", MIN_COST).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_cost_is_rejected() {
        assert!(hash_password("ValidPassword123", 2).is_err());
    }

    #[test]
    fn test_garbage_hash_is_an_error() {
        assert!(verify_password("ValidPassword123", "not-a-hash").is_err());
    }
}
