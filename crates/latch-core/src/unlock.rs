//! App-unlock orchestration: key resolution, database unlock, onboarding
//! check, background re-lock.
//!
//! The flow drives [`KeyManager`] and the external [`Database`] through an
//! exhaustive state enum that shells render directly. Four entry points move
//! it: `start` (app launch / re-unlock), `retry` (user recovery),
//! `on_background_return` (forced re-lock), `take_initial_route` (one-time
//! navigation decision).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::database::{Database, ONBOARDING_COMPLETE_SETTING};
use crate::error::KeyError;
use crate::keys::KeyManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReason {
    AuthCancelled,
    BackgroundReturn,
}

/// Current position in the unlock sequence.
///
/// Exactly one variant is active at a time. Never persisted: every cold
/// start begins at `Initializing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnlockState {
    Initializing,
    Locked {
        reason: LockReason,
    },
    DbError {
        message: String,
    },
    CheckingOnboarding,
    #[serde(rename_all = "camelCase")]
    Ready {
        onboarding_complete: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialRoute {
    Onboarding,
    Home,
}

enum SetupFailure {
    Cancelled,
    Fatal(String),
}

/// Cloneable handle over the unlock state machine.
#[derive(Clone)]
pub struct UnlockFlow {
    inner: Arc<FlowInner>,
}

struct FlowInner {
    keys: KeyManager,
    database: Arc<dyn Database>,
    state_tx: watch::Sender<UnlockState>,
    /// Local re-entrancy guard for `start`, distinct from the key manager's
    /// session slot. Reset by `on_background_return`.
    setup_running: AtomicBool,
    nav_decided: AtomicBool,
    initial_route: Mutex<Option<InitialRoute>>,
}

impl UnlockFlow {
    pub fn new(keys: KeyManager, database: Arc<dyn Database>) -> Self {
        let (state_tx, _) = watch::channel(UnlockState::Initializing);
        Self {
            inner: Arc::new(FlowInner {
                keys,
                database,
                state_tx,
                setup_running: AtomicBool::new(false),
                nav_decided: AtomicBool::new(false),
                initial_route: Mutex::new(None),
            }),
        }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.inner.keys
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> UnlockState {
        self.inner.state_tx.borrow().clone()
    }

    /// Watch state changes; shells render from this.
    pub fn subscribe(&self) -> watch::Receiver<UnlockState> {
        self.inner.state_tx.subscribe()
    }

    /// Begin the unlock sequence. Acts only from `Initializing` or
    /// `Locked { BackgroundReturn }`; in any other state, or while a setup
    /// is already running, the trigger is ignored.
    pub async fn start(&self) {
        let eligible = matches!(
            self.state(),
            UnlockState::Initializing
                | UnlockState::Locked {
                    reason: LockReason::BackgroundReturn
                }
        );
        if !eligible {
            debug!("start ignored in state {:?}", self.state());
            return;
        }
        if self.inner.setup_running.swap(true, Ordering::SeqCst) {
            debug!("setup already running");
            return;
        }
        self.run_setup().await;
    }

    /// User-triggered recovery from `DbError` or a cancelled unlock. Clears
    /// both caches and restarts the sequence from `Initializing`.
    pub async fn retry(&self) {
        let eligible = matches!(
            self.state(),
            UnlockState::DbError { .. }
                | UnlockState::Locked {
                    reason: LockReason::AuthCancelled
                }
        );
        if !eligible {
            debug!("retry ignored in state {:?}", self.state());
            return;
        }
        self.inner.keys.clear_cache();
        self.inner.database.clear_cache();
        self.set_state(UnlockState::Initializing);
        self.start().await;
    }

    /// Signal that the app returned from background.
    ///
    /// From `Ready` this is a forced re-lock: both caches are dropped and
    /// the state moves to `Locked { BackgroundReturn }`. In every other
    /// state only the local in-flight guard resets; a setup already
    /// suspended on an authentication prompt keeps running, and its result
    /// applies to whatever state is current when it lands (the platform
    /// cannot revoke a prompt that is already showing).
    pub fn on_background_return(&self) {
        self.inner.setup_running.store(false, Ordering::SeqCst);
        if matches!(self.state(), UnlockState::Ready { .. }) {
            self.inner.keys.clear_cache();
            self.inner.database.clear_cache();
            self.set_state(UnlockState::Locked {
                reason: LockReason::BackgroundReturn,
            });
            info!("re-locked after background return");
        }
    }

    /// The one-time navigation decision, consumed by the shell on first
    /// `Ready`. Later unlocks after background re-locks return `None`.
    pub fn take_initial_route(&self) -> Option<InitialRoute> {
        self.inner.initial_route.lock().take()
    }

    async fn run_setup(&self) {
        let outcome = self.unlock_database().await;
        self.inner.setup_running.store(false, Ordering::SeqCst);
        match outcome {
            Ok(()) => self.check_onboarding().await,
            Err(SetupFailure::Cancelled) => {
                info!("unlock cancelled by user");
                self.inner.keys.clear_cache();
                self.inner.database.clear_cache();
                self.set_state(UnlockState::Locked {
                    reason: LockReason::AuthCancelled,
                });
            }
            Err(SetupFailure::Fatal(message)) => {
                warn!("unlock failed: {message}");
                self.set_state(UnlockState::DbError { message });
            }
        }
    }

    async fn unlock_database(&self) -> Result<(), SetupFailure> {
        self.inner.keys.initialize().await.map_err(|err| match err {
            KeyError::Cancelled => SetupFailure::Cancelled,
            other => SetupFailure::Fatal(other.to_string()),
        })?;
        self.inner
            .database
            .initialize()
            .await
            .map_err(|err| SetupFailure::Fatal(err.to_string()))?;
        Ok(())
    }

    async fn check_onboarding(&self) {
        self.set_state(UnlockState::CheckingOnboarding);
        let complete = match self
            .inner
            .database
            .setting(ONBOARDING_COMPLETE_SETTING)
            .await
        {
            Ok(value) => value.as_deref() == Some("true"),
            // Fail open: a broken lookup sends the user through onboarding
            // instead of blocking the unlock.
            Err(err) => {
                warn!("onboarding lookup failed, assuming incomplete: {err}");
                false
            }
        };
        self.decide_initial_route(complete);
        self.set_state(UnlockState::Ready {
            onboarding_complete: complete,
        });
    }

    fn decide_initial_route(&self, onboarding_complete: bool) {
        if self.inner.nav_decided.swap(true, Ordering::SeqCst) {
            return;
        }
        let route = if onboarding_complete {
            InitialRoute::Home
        } else {
            InitialRoute::Onboarding
        };
        *self.inner.initial_route.lock() = Some(route);
        info!("initial route decided: {route:?}");
    }

    fn set_state(&self, next: UnlockState) {
        let previous = self.inner.state_tx.send_replace(next.clone());
        if previous != next {
            debug!("unlock state {previous:?} -> {next:?}");
        }
    }
}
