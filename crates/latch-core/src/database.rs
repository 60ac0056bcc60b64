use async_trait::async_trait;

use crate::error::DatabaseError;

/// Database setting that records whether first-run onboarding finished.
/// Readable only after the database is open; the value is `"true"` when
/// complete.
pub const ONBOARDING_COMPLETE_SETTING: &str = "onboarding_complete";

/// Contract for the encrypted database component this core unlocks.
///
/// Implementations fetch the key through [`KeyManager::key`] inside
/// `initialize`, so the manager must have resolved a key first.
///
/// [`KeyManager::key`]: crate::keys::KeyManager::key
#[async_trait]
pub trait Database: Send + Sync {
    /// Open (and decrypt) the local database.
    async fn initialize(&self) -> Result<(), DatabaseError>;

    /// Look up a settings row. Absent settings are `Ok(None)`.
    async fn setting(&self, name: &str) -> Result<Option<String>, DatabaseError>;

    /// Drop any decrypted in-memory state. Infallible; called on every lock.
    fn clear_cache(&self);
}
