//! latch-core — encryption-key lifecycle and app-unlock state machine
//!
//! # Unlock sequence
//! A shell calls [`UnlockFlow::start`] on launch. The flow asks
//! [`KeyManager`] for the database key (loading it from gated storage,
//! prompting for device authentication in `Protected` mode, or generating a
//! fresh key on first run), opens the [`Database`], checks onboarding and
//! lands in `Ready`. A dismissed prompt parks the flow in
//! `Locked { AuthCancelled }`; any other failure in `DbError`, both
//! recoverable via [`UnlockFlow::retry`]. Returning from background while
//! `Ready` forces a re-lock.
//!
//! Key material is held in memory only between unlock and lock, zeroized on
//! drop, and resolved by at most one initialization session at a time no
//! matter how many callers race.

pub mod database;
pub mod error;
pub mod keys;
pub mod material;
pub mod unlock;

pub use database::{Database, ONBOARDING_COMPLETE_SETTING};
pub use error::{DatabaseError, KeyError};
pub use keys::{EncryptionMode, KeyManager};
pub use material::{KeyMaterial, KEY_LEN};
pub use unlock::{InitialRoute, LockReason, UnlockFlow, UnlockState};
