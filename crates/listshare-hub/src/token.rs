//! Possession tokens
//!
//! The edit token is a random UUID handed to the list creator exactly once.
//! Only its SHA-256 digest is persisted.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Generate a fresh raw edit token.
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Hex-encoded SHA-256 digest of a raw token.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a claimed raw token against a stored digest.
///
/// Both sides are fixed-length hex digests, compared in constant time.
pub fn verify(claimed: &str, stored_digest: &str) -> bool {
    let claimed_digest = digest(claimed);
    bool::from(claimed_digest.as_bytes().ct_eq(stored_digest.as_bytes()))
}
