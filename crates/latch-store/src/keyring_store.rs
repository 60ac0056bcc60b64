use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use tracing::debug;

use crate::error::StoreError;
use crate::secret_store::{AccessOptions, SecretStore};

pub const DEFAULT_SERVICE: &str = "Latch";

/// Secret store backed by the platform credential store (Keychain, Windows
/// Credential Manager, Secret Service).
///
/// Values are base64-encoded at this boundary because credential stores take
/// passwords, not bytes. Desktop stores enforce their own release policy for
/// gated records; `require_authentication` is passed through and honored
/// where the platform supports a prompt-on-read access control.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

#[async_trait::async_trait]
impl SecretStore for KeyringStore {
    async fn put(
        &self,
        name: &str,
        value: &[u8],
        options: AccessOptions,
    ) -> Result<(), StoreError> {
        let service = self.service.clone();
        let name = name.to_string();
        let encoded = general_purpose::STANDARD.encode(value);
        if options.require_authentication {
            debug!("storing secret {name} as authentication-gated");
        }
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let entry = Entry::new(&service, &name)
                .map_err(|e| StoreError::Backend(format!("keyring init: {e}")))?;
            entry
                .set_password(&encoded)
                .map_err(|e| StoreError::Backend(format!("store secret: {e}")))
        })
        .await
        .map_err(|e| StoreError::Backend(format!("keyring task: {e}")))?
    }

    async fn get(
        &self,
        name: &str,
        options: AccessOptions,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let service = self.service.clone();
        let record = name.to_string();
        debug!(
            "loading secret {name} (gated: {})",
            options.require_authentication
        );
        let encoded = tokio::task::spawn_blocking(move || -> Result<Option<String>, StoreError> {
            let entry = Entry::new(&service, &record)
                .map_err(|e| StoreError::Backend(format!("keyring init: {e}")))?;
            match entry.get_password() {
                Ok(encoded) => Ok(Some(encoded)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StoreError::Backend(format!("load secret: {e}"))),
            }
        })
        .await
        .map_err(|e| StoreError::Backend(format!("keyring task: {e}")))??;

        match encoded {
            Some(encoded) => {
                let decoded = general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| StoreError::Malformed(format!("decode secret: {e}")))?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let service = self.service.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let entry = Entry::new(&service, &name)
                .map_err(|e| StoreError::Backend(format!("keyring init: {e}")))?;
            match entry.delete_password() {
                Ok(()) => Ok(()),
                Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(StoreError::Backend(format!("delete secret: {e}"))),
            }
        })
        .await
        .map_err(|e| StoreError::Backend(format!("keyring task: {e}")))?
    }
}
