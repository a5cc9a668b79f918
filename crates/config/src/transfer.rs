//! Bulk export and import.
//!
//! The export blob is the JSON array of entries — with `encrypted` fields
//! decrypted back to plaintext so the blob is portable across salts —
//! sealed with AES-GCM under a key derived from the operator password
//! concatenated with the process salt, then base64-encoded. Import reverses
//! the pipeline and re-encrypts `encrypted` fields under the importing
//! process's salt.

use crate::service::ConfigService;
use crate::types::{ConfigEntry, ValueKind};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lodestar_core::{Error, Result};
use lodestar_crypto::SaltCipher;
use tracing::info;

impl ConfigService {
    /// Serialize every entry into a password-protected blob.
    pub async fn export_all(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::InvalidInput("export password is required".to_string()));
        }
        let mut entries = self.list_all().await?;
        for entry in &mut entries {
            for tv in entry.value.values_mut() {
                if tv.kind == ValueKind::Encrypted {
                    tv.value = self.cipher().decrypt_string(&tv.value)?;
                }
            }
        }
        let payload = serde_json::to_vec(&entries)?;
        let sealed = SaltCipher::with_password(password, self.salt())?.encrypt_raw(&payload)?;
        Ok(BASE64.encode(sealed))
    }

    /// Import a blob produced by [`export_all`](Self::export_all).
    ///
    /// With `skip_existing` set, entries whose key already exists are left
    /// untouched; the list of skipped keys is returned.
    pub async fn import_all(
        &self,
        blob: &str,
        password: &str,
        skip_existing: bool,
    ) -> Result<Vec<String>> {
        if password.is_empty() {
            return Err(Error::InvalidInput("import password is required".to_string()));
        }
        let sealed = BASE64
            .decode(blob.trim())
            .map_err(|e| Error::InvalidInput(format!("invalid export blob: {e}")))?;
        let payload = SaltCipher::with_password(password, self.salt())?.decrypt_raw(&sealed)?;
        let entries: Vec<ConfigEntry> = serde_json::from_slice(&payload)?;

        let mut skipped = Vec::new();
        for entry in entries {
            if skip_existing {
                match self.get(&entry.key).await {
                    Ok(_) => {
                        skipped.push(entry.key);
                        continue;
                    }
                    Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            // `set` re-seals plaintext `encrypted` values under our salt.
            self.set(&entry.key, entry.value, entry.metadata).await?;
        }
        info!(skipped = skipped.len(), "config import finished");
        Ok(skipped)
    }
}
