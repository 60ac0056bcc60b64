use thiserror::Error;

/// Secret-store failures, classified at the adapter boundary.
///
/// Variants carry `String` payloads so the error stays `Clone`able: a
/// single failed initialization is broadcast to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("authentication prompt was dismissed")]
    Cancelled,

    #[error("secret store backend: {0}")]
    Backend(String),

    #[error("stored value is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagStoreError {
    #[error("flag storage io: {0}")]
    Io(String),

    #[error("flag document format: {0}")]
    Format(String),
}
