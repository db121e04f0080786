//! Shared-secret authentication for student-system callbacks.
//!
//! Both webhook endpoints carry the instructor's shared secret inside the
//! JSON body. Comparison goes through a digest so the check is
//! constant-time with respect to the secret contents.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of generated request nonces.
pub const NONCE_LEN: usize = 16;

/// Verify a provided shared secret against the configured one.
///
/// An empty configured secret always fails: a deployment without a secret
/// must not accept webhook traffic.
pub fn verify_shared_secret(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected == provided
}

/// Generate a fresh alphanumeric nonce for an outbound task dispatch.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_shared_secret() {
        assert!(verify_shared_secret("s3cret", "s3cret"));
        assert!(!verify_shared_secret("s3cret", "wrong"));
        assert!(!verify_shared_secret("s3cret", ""));
    }

    #[test]
    fn test_empty_configured_secret_rejects_everything() {
        assert!(!verify_shared_secret("", ""));
        assert!(!verify_shared_secret("", "anything"));
    }

    #[test]
    fn test_nonce_shape() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), NONCE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
