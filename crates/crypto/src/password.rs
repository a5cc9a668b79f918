//! bcrypt hashing for passwords and client secrets.

use lodestar_core::{Error, Result};

/// Default bcrypt cost when the config does not override it.
pub const DEFAULT_COST: u32 = 10;

/// Hash a plaintext secret.
pub fn hash(plain: &str, cost: u32) -> Result<String> {
    bcrypt::hash(plain, cost).map_err(|e| Error::Crypto(format!("bcrypt hash failed: {e}")))
}

/// Compare a plaintext secret against a stored hash.
pub fn verify(plain: &str, hashed: &str) -> Result<bool> {
    bcrypt::verify(plain, hashed).map_err(|e| Error::Crypto(format!("bcrypt verify failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cost 4 is bcrypt's minimum; production cost makes these tests crawl.
    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash("hunter2", TEST_COST).unwrap();
        assert!(verify("hunter2", &hashed).unwrap());
        assert!(!verify("hunter3", &hashed).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash("same", TEST_COST).unwrap();
        let b = hash("same", TEST_COST).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        assert!(verify("x", "not-a-bcrypt-hash").is_err());
    }
}
