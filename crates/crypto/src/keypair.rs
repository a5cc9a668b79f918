//! RSA keypair generation and PEM handling.
//!
//! The JWT signing keypair shared across cluster peers is generated here
//! once (under the auth manager's init lock) and stored as PEM in the KV
//! store: PKCS#8 for the private half, SPKI for the public half.

use lodestar_core::{Error, Result};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Key size for generated pairs.
pub const KEY_BITS: usize = 2048;

/// An RSA keypair held as PEM text.
#[derive(Clone)]
pub struct RsaKeypair {
    private_pem: String,
    public_pem: String,
}

impl RsaKeypair {
    /// Generate a fresh 2048-bit pair.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| Error::Crypto(format!("RSA key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("private key PEM encoding failed: {e}")))?
            .to_string();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("public key PEM encoding failed: {e}")))?;

        Ok(Self {
            private_pem,
            public_pem,
        })
    }

    /// Adopt an existing pair, validating that both halves parse and match.
    pub fn from_pem(private_pem: impl Into<String>, public_pem: impl Into<String>) -> Result<Self> {
        let private_pem = private_pem.into();
        let public_pem = public_pem.into();

        let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| Error::Crypto(format!("invalid private key PEM: {e}")))?;
        let public = RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| Error::Crypto(format!("invalid public key PEM: {e}")))?;
        if RsaPublicKey::from(&private) != public {
            return Err(Error::Crypto(
                "public key does not match private key".to_string(),
            ));
        }

        Ok(Self {
            private_pem,
            public_pem,
        })
    }

    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }
}

impl std::fmt::Debug for RsaKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeypair")
            .field("private_pem", &"[REDACTED]")
            .field("public_pem", &self.public_pem)
            .finish()
    }
}
