use async_trait::async_trait;

use crate::error::StoreError;

/// Per-operation access policy for a secret record.
///
/// `require_authentication` on a `put` marks the record as gated: the
/// platform may demand device authentication (biometric or passcode) before
/// releasing it again. On a `get` it requests gated access explicitly even
/// if the record was stored ungated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessOptions {
    pub require_authentication: bool,
}

impl AccessOptions {
    pub fn gated() -> Self {
        Self {
            require_authentication: true,
        }
    }

    pub fn ungated() -> Self {
        Self::default()
    }
}

/// Gated key/value storage for small secrets.
///
/// Implementations classify failures structurally: a dismissed
/// authentication prompt is `StoreError::Cancelled`, never a string to be
/// sniffed by callers. A `get` of an absent record is `Ok(None)`, not an
/// error.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, name: &str, value: &[u8], options: AccessOptions) -> Result<(), StoreError>;

    /// May suspend on a device-authentication prompt when the record (or the
    /// request) is gated.
    async fn get(&self, name: &str, options: AccessOptions)
        -> Result<Option<Vec<u8>>, StoreError>;

    /// Deleting an absent record is not an error.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}
