//! Encryption-key lifecycle: cached material, persisted mode, single-flight
//! initialization.
//!
//! The manager owns the only in-memory copy of the database key. One
//! initialization session runs at a time; concurrent callers join it and
//! observe the same outcome, so the user sees at most one authentication
//! prompt. The mode flag lives in the unauthenticated flag store because it
//! must be read before the gated key request can be framed.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use latch_store::{AccessOptions, FlagStore, SecretStore, StoreError};

use crate::error::KeyError;
use crate::material::KeyMaterial;

/// Secret-store record holding the raw database key.
pub const KEY_RECORD: &str = "db_encryption_key";
/// Flag-store record holding the persisted [`EncryptionMode`].
pub const MODE_FLAG: &str = "encryption_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncryptionMode {
    /// Key released without device authentication.
    Basic,
    /// Key wrapped behind a device-authentication prompt.
    Protected,
}

impl EncryptionMode {
    pub fn requires_authentication(self) -> bool {
        matches!(self, EncryptionMode::Protected)
    }

    fn as_flag(self) -> &'static str {
        match self {
            EncryptionMode::Basic => "BASIC",
            EncryptionMode::Protected => "PROTECTED",
        }
    }

    fn from_flag(value: &str) -> Option<Self> {
        match value {
            "BASIC" => Some(EncryptionMode::Basic),
            "PROTECTED" => Some(EncryptionMode::Protected),
            _ => None,
        }
    }
}

fn parse_mode(value: &str) -> EncryptionMode {
    EncryptionMode::from_flag(value).unwrap_or_else(|| {
        warn!("unknown encryption mode {value:?}, falling back to basic");
        EncryptionMode::Basic
    })
}

type SessionResult = Result<KeyMaterial, KeyError>;

/// Cloneable handle over the process-wide key state.
#[derive(Clone)]
pub struct KeyManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SecretStore>,
    flags: Arc<dyn FlagStore>,
    cached: Mutex<Option<KeyMaterial>>,
    /// Single-slot registry for the in-flight initialization session.
    session: Mutex<Option<watch::Receiver<Option<SessionResult>>>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecretStore>, flags: Arc<dyn FlagStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                flags,
                cached: Mutex::new(None),
                session: Mutex::new(None),
            }),
        }
    }

    /// Resolve the key: cached, joined from the in-flight session, or loaded
    /// / generated by a fresh session.
    ///
    /// Every caller of the same session receives the identical outcome. The
    /// session slot is freed on all exit paths, so a later call after a
    /// failure starts over instead of replaying the stale result.
    pub async fn initialize(&self) -> Result<KeyMaterial, KeyError> {
        if let Some(key) = self.inner.cached.lock().clone() {
            return Ok(key);
        }
        let mut rx = self.join_or_spawn_session();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Session task was lost without reporting; free the slot so
                // the next attempt can start fresh.
                self.inner.session.lock().take();
                return Err(KeyError::Store(StoreError::Backend(
                    "initialization session dropped".into(),
                )));
            }
        }
    }

    fn join_or_spawn_session(&self) -> watch::Receiver<Option<SessionResult>> {
        let mut session = self.inner.session.lock();
        if let Some(rx) = session.as_ref() {
            debug!("joining in-flight key initialization");
            return rx.clone();
        }
        let (tx, rx) = watch::channel(None);
        *session = Some(rx.clone());
        let manager = self.clone();
        tokio::spawn(async move {
            let result = manager.load_or_create().await;
            manager.finish_session(&result);
            // Broadcast only after the slot is freed: a caller arriving now
            // starts a fresh session instead of observing this outcome.
            let _ = tx.send(Some(result));
        });
        rx
    }

    fn finish_session(&self, result: &SessionResult) {
        *self.inner.cached.lock() = result.as_ref().ok().cloned();
        self.inner.session.lock().take();
    }

    async fn load_or_create(&self) -> Result<KeyMaterial, KeyError> {
        // A session that raced a completed one resolves from the cache
        // without touching the store again.
        if let Some(key) = self.inner.cached.lock().clone() {
            return Ok(key);
        }

        let mode_flag = self.inner.flags.get(MODE_FLAG)?;
        let mode = mode_flag
            .as_deref()
            .map(parse_mode)
            .unwrap_or(EncryptionMode::Basic);

        let options = AccessOptions {
            require_authentication: mode.requires_authentication(),
        };
        match self.inner.store.get(KEY_RECORD, options).await? {
            Some(bytes) => {
                let key = KeyMaterial::from_bytes(&bytes).ok_or(KeyError::MissingKey)?;
                debug!("loaded existing encryption key ({mode:?})");
                Ok(key)
            }
            // A recorded mode with no key record means the key was lost.
            None if mode_flag.is_some() => {
                warn!("encryption mode recorded but key record absent");
                Err(KeyError::MissingKey)
            }
            None => {
                let key = KeyMaterial::generate();
                self.inner
                    .store
                    .put(KEY_RECORD, key.as_bytes(), AccessOptions::ungated())
                    .await?;
                self.inner
                    .flags
                    .set(MODE_FLAG, EncryptionMode::Basic.as_flag())?;
                info!("generated new encryption key (basic mode)");
                Ok(key)
            }
        }
    }

    /// The cached key. Fails until an `initialize` has succeeded.
    pub fn key(&self) -> Result<KeyMaterial, KeyError> {
        self.inner
            .cached
            .lock()
            .clone()
            .ok_or(KeyError::NotInitialized)
    }

    /// Persisted encryption mode; `Basic` when nothing is recorded yet.
    pub fn mode(&self) -> Result<EncryptionMode, KeyError> {
        Ok(self
            .inner
            .flags
            .get(MODE_FLAG)?
            .as_deref()
            .map(parse_mode)
            .unwrap_or(EncryptionMode::Basic))
    }

    /// Re-wrap the cached key under `mode`'s gating, then persist the mode.
    ///
    /// Order is the invariant here: the mode record changes only after the
    /// re-wrapped key is stored, so the flag can never claim a gating the
    /// stored record does not have.
    pub async fn set_mode(&self, mode: EncryptionMode) -> Result<(), KeyError> {
        let key = self.key()?;
        let options = AccessOptions {
            require_authentication: mode.requires_authentication(),
        };
        self.inner
            .store
            .put(KEY_RECORD, key.as_bytes(), options)
            .await?;
        self.inner.flags.set(MODE_FLAG, mode.as_flag())?;
        info!("encryption mode set to {mode:?}");
        Ok(())
    }

    /// Drop the in-memory key. Persisted records and any in-flight
    /// initialization session are untouched.
    pub fn clear_cache(&self) {
        *self.inner.cached.lock() = None;
        debug!("key cache cleared");
    }

    /// Remove the key record, the mode flag and the cache. Irreversible;
    /// the recovery path for a corrupt record. Cleanup problems are logged
    /// and the remaining steps still run.
    pub async fn destroy_all_keys(&self) {
        if let Err(err) = self.inner.store.delete(KEY_RECORD).await {
            warn!("failed to delete key record: {err}");
        }
        if let Err(err) = self.inner.flags.remove(MODE_FLAG) {
            warn!("failed to remove mode flag: {err}");
        }
        self.clear_cache();
        info!("destroyed all key material");
    }
}
