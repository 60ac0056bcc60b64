use latch_store::{FlagStoreError, StoreError};
use thiserror::Error;

/// Key lifecycle failures.
///
/// `Clone` because one initialization outcome is delivered to every caller
/// that joined the in-flight session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The user dismissed the device-authentication prompt.
    #[error("authentication prompt was dismissed")]
    Cancelled,

    /// A mode record exists but the key record is absent or unusable.
    #[error("encryption key record is missing or unreadable")]
    MissingKey,

    /// `key()` or `set_mode()` before a successful `initialize()`.
    #[error("encryption key is not initialized")]
    NotInitialized,

    #[error("secret store: {0}")]
    Store(StoreError),

    #[error("flag store: {0}")]
    Flags(#[from] FlagStoreError),
}

// Cancellation is classified here, once. Callers match on the variant and
// never inspect messages.
impl From<StoreError> for KeyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Cancelled => KeyError::Cancelled,
            other => KeyError::Store(other),
        }
    }
}

/// Failure surfaced by the database component this core drives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database: {0}")]
pub struct DatabaseError(pub String);

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_classified_structurally() {
        assert_eq!(KeyError::from(StoreError::Cancelled), KeyError::Cancelled);
        assert_eq!(
            KeyError::from(StoreError::Backend("io".into())),
            KeyError::Store(StoreError::Backend("io".into()))
        );
    }
}
