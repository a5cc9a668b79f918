//! # Lodestar Crypto
//!
//! Pure Rust cryptography primitives shared across the control plane:
//!
//! - `keypair`: RSA-2048 keypair generation and PEM encoding (JWT signing)
//! - `aead`: AES-GCM encryption under a salt-derived key, producing the
//!   `ENC:`-prefixed at-rest format used by the config service
//! - `password`: bcrypt hashing for passwords and client secrets
//! - `codegen`: cryptographically random base62 short codes and hex suffixes

pub mod aead;
pub mod codegen;
pub mod keypair;
pub mod password;

pub use aead::{SaltCipher, ENC_PREFIX};
pub use keypair::RsaKeypair;
