//! latch-store — gated secret storage and unauthenticated flags
//!
//! # Storage split
//! Two deliberately separate contracts:
//! - [`SecretStore`]: small secrets in gated storage. A record stored with
//!   `require_authentication` may trigger a device prompt (biometric or
//!   passcode) on read, and a dismissed prompt surfaces as the structured
//!   [`StoreError::Cancelled`].
//! - [`FlagStore`]: plain string flags that must stay readable *without*
//!   any prompt, because they decide how the gated store is asked.
//!
//! `KeyringStore` is the platform-credential-store implementation;
//! `MemoryStore` / `MemoryFlagStore` are the deterministic in-memory ones
//! with scriptable prompt outcomes.

pub mod error;
pub mod flags;
pub mod keyring_store;
pub mod memory;
pub mod paths;
pub mod secret_store;

pub use error::{FlagStoreError, StoreError};
pub use flags::{FileFlagStore, FlagStore};
pub use keyring_store::KeyringStore;
pub use memory::{MemoryFlagStore, MemoryStore, PromptOutcome};
pub use secret_store::{AccessOptions, SecretStore};
