//! AES-GCM encryption under a salt-derived key.
//!
//! Values encrypted here travel and rest as `ENC:` + base64(nonce ‖
//! ciphertext). The AES key is derived from a caller-supplied salt by
//! padding with zeros (or truncating) to the smallest of 16/24/32 bytes
//! that covers the salt, capped at 32 — so the cipher is AES-128, -192, or
//! -256 GCM depending on salt length.

use aes_gcm::aead::generic_array::typenum::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lodestar_core::{Error, Result};
use rand::RngCore;
use zeroize::Zeroizing;

/// Marker prefix of encrypted values at rest.
pub const ENC_PREFIX: &str = "ENC:";

/// Nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

enum Cipher {
    A128(Box<Aes128Gcm>),
    A192(Box<Aes192Gcm>),
    A256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| Error::Crypto(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Ok(Cipher::A128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            24 => Ok(Cipher::A192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            32 => Ok(Cipher::A256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(invalid)?,
            ))),
            other => Err(Error::Crypto(format!("invalid AES key length {other}"))),
        }
    }

    fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(nonce);
        let out = match self {
            Cipher::A128(c) => c.encrypt(nonce, plaintext),
            Cipher::A192(c) => c.encrypt(nonce, plaintext),
            Cipher::A256(c) => c.encrypt(nonce, plaintext),
        };
        out.map_err(|e| Error::Crypto(format!("encryption failed: {e}")))
    }

    fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(nonce);
        let out = match self {
            Cipher::A128(c) => c.decrypt(nonce, ciphertext),
            Cipher::A192(c) => c.decrypt(nonce, ciphertext),
            Cipher::A256(c) => c.decrypt(nonce, ciphertext),
        };
        out.map_err(|e| Error::Crypto(format!("decryption failed: {e}")))
    }
}

/// Pad with zeros or truncate to the smallest AES key length that covers
/// `material`, capped at 32 bytes.
fn derive_key(material: &[u8]) -> Zeroizing<Vec<u8>> {
    let target = match material.len() {
        0..=16 => 16,
        17..=24 => 24,
        _ => 32,
    };
    let mut key = Zeroizing::new(vec![0u8; target]);
    let n = material.len().min(target);
    key[..n].copy_from_slice(&material[..n]);
    key
}

/// AES-GCM cipher keyed by a process-wide salt.
pub struct SaltCipher {
    cipher: Cipher,
}

impl SaltCipher {
    /// Derive the key from `salt` alone.
    ///
    /// # Errors
    /// Fails only when the salt is empty.
    pub fn new(salt: &[u8]) -> Result<Self> {
        if salt.is_empty() {
            return Err(Error::Crypto("salt must not be empty".to_string()));
        }
        let key = derive_key(salt);
        Ok(Self {
            cipher: Cipher::new(&key)?,
        })
    }

    /// Derive the key from `password` concatenated with `salt`.
    ///
    /// Used for the config export blob, where the operator supplies a
    /// password on top of the process salt.
    pub fn with_password(password: &str, salt: &[u8]) -> Result<Self> {
        if password.is_empty() {
            return Err(Error::Crypto("password must not be empty".to_string()));
        }
        let mut material = Zeroizing::new(password.as_bytes().to_vec());
        material.extend_from_slice(salt);
        let key = derive_key(&material);
        Ok(Self {
            cipher: Cipher::new(&key)?,
        })
    }

    /// Encrypt raw bytes to nonce ‖ ciphertext.
    pub fn encrypt_raw(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt nonce ‖ ciphertext.
    pub fn decrypt_raw(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(Error::Crypto("ciphertext shorter than nonce".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher.decrypt(nonce, ciphertext)
    }

    /// Encrypt a string into the `ENC:` at-rest form.
    ///
    /// Encrypting a value that already carries the prefix is a no-op, so
    /// re-writing an entry never double-encrypts.
    pub fn encrypt_string(&self, plaintext: &str) -> Result<String> {
        if plaintext.starts_with(ENC_PREFIX) {
            return Ok(plaintext.to_string());
        }
        let sealed = self.encrypt_raw(plaintext.as_bytes())?;
        Ok(format!("{ENC_PREFIX}{}", BASE64.encode(sealed)))
    }

    /// Decrypt an `ENC:`-prefixed value back to the plaintext string.
    ///
    /// # Errors
    /// Refuses inputs lacking the prefix with `Crypto`.
    pub fn decrypt_string(&self, value: &str) -> Result<String> {
        let encoded = value
            .strip_prefix(ENC_PREFIX)
            .ok_or_else(|| Error::Crypto("value is not ENC:-prefixed".to_string()))?;
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| Error::Crypto(format!("invalid base64 payload: {e}")))?;
        let plain = self.decrypt_raw(&sealed)?;
        String::from_utf8(plain)
            .map_err(|e| Error::Crypto(format!("decrypted payload is not utf-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = SaltCipher::new(b"some-process-salt").unwrap();
        let sealed = cipher.encrypt_string("p@ss").unwrap();
        assert!(sealed.starts_with(ENC_PREFIX));
        assert_eq!(cipher.decrypt_string(&sealed).unwrap(), "p@ss");
    }

    #[test]
    fn test_encrypting_enc_value_is_noop() {
        let cipher = SaltCipher::new(b"salt").unwrap();
        let sealed = cipher.encrypt_string("secret").unwrap();
        let again = cipher.encrypt_string(&sealed).unwrap();
        assert_eq!(sealed, again);
    }

    #[test]
    fn test_decrypt_refuses_unprefixed_input() {
        let cipher = SaltCipher::new(b"salt").unwrap();
        assert!(cipher.decrypt_string("plaintext").is_err());
    }

    #[test]
    fn test_key_length_tiers() {
        // 16-, 24-, and 32-byte tiers all roundtrip.
        for salt_len in [1usize, 16, 17, 24, 25, 32, 40] {
            let salt = vec![7u8; salt_len];
            let cipher = SaltCipher::new(&salt).unwrap();
            let sealed = cipher.encrypt_string("x").unwrap();
            assert_eq!(cipher.decrypt_string(&sealed).unwrap(), "x");
        }
    }

    #[test]
    fn test_derive_key_sizes() {
        assert_eq!(derive_key(&[1; 4]).len(), 16);
        assert_eq!(derive_key(&[1; 16]).len(), 16);
        assert_eq!(derive_key(&[1; 17]).len(), 24);
        assert_eq!(derive_key(&[1; 24]).len(), 24);
        assert_eq!(derive_key(&[1; 25]).len(), 32);
        assert_eq!(derive_key(&[1; 64]).len(), 32);
    }

    #[test]
    fn test_wrong_salt_fails_decryption() {
        let sealed = SaltCipher::new(b"salt-a")
            .unwrap()
            .encrypt_string("secret")
            .unwrap();
        assert!(SaltCipher::new(b"salt-b")
            .unwrap()
            .decrypt_string(&sealed)
            .is_err());
    }

    #[test]
    fn test_nonces_are_unique_per_encryption() {
        let cipher = SaltCipher::new(b"salt").unwrap();
        let a = cipher.encrypt_string("v").unwrap();
        let b = cipher.encrypt_string("v").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_password_cipher_requires_matching_password() {
        let salt = b"process-salt";
        let sealed = SaltCipher::with_password("pw1", salt)
            .unwrap()
            .encrypt_raw(b"blob")
            .unwrap();
        let ok = SaltCipher::with_password("pw1", salt)
            .unwrap()
            .decrypt_raw(&sealed)
            .unwrap();
        assert_eq!(ok, b"blob");
        assert!(SaltCipher::with_password("pw2", salt)
            .unwrap()
            .decrypt_raw(&sealed)
            .is_err());
    }
}
