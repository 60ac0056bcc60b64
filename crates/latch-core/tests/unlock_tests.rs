use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use latch_core::keys::{KEY_RECORD, MODE_FLAG};
use latch_core::{
    Database, DatabaseError, EncryptionMode, InitialRoute, KeyError, KeyManager, LockReason,
    UnlockFlow, UnlockState, KEY_LEN, ONBOARDING_COMPLETE_SETTING,
};
use latch_store::{
    AccessOptions, FlagStore, MemoryFlagStore, MemoryStore, PromptOutcome, SecretStore,
};

/// Database double that pulls the key through the manager, like the real
/// component, and can be scripted to fail.
struct MockDatabase {
    keys: KeyManager,
    settings: Mutex<HashMap<String, String>>,
    failures_before_success: Mutex<u32>,
    failed_setting_reads: Mutex<u32>,
    init_attempts: AtomicUsize,
    clear_count: AtomicUsize,
}

impl MockDatabase {
    fn new(keys: KeyManager) -> Self {
        Self {
            keys,
            settings: Mutex::new(HashMap::new()),
            failures_before_success: Mutex::new(0),
            failed_setting_reads: Mutex::new(0),
            init_attempts: AtomicUsize::new(0),
            clear_count: AtomicUsize::new(0),
        }
    }

    fn set_setting(&self, name: &str, value: &str) {
        self.settings
            .lock()
            .insert(name.to_string(), value.to_string());
    }

    fn fail_inits(&self, count: u32) {
        *self.failures_before_success.lock() = count;
    }

    fn fail_setting_reads(&self, count: u32) {
        *self.failed_setting_reads.lock() = count;
    }

    fn init_attempts(&self) -> usize {
        self.init_attempts.load(Ordering::SeqCst)
    }

    fn clear_count(&self) -> usize {
        self.clear_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn initialize(&self) -> Result<(), DatabaseError> {
        self.init_attempts.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures_before_success.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(DatabaseError::new("simulated database failure"));
        }
        drop(failures);
        self.keys
            .key()
            .map_err(|err| DatabaseError::new(format!("key unavailable: {err}")))?;
        Ok(())
    }

    async fn setting(&self, name: &str) -> Result<Option<String>, DatabaseError> {
        let mut failures = self.failed_setting_reads.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(DatabaseError::new("settings table unavailable"));
        }
        drop(failures);
        Ok(self.settings.lock().get(name).cloned())
    }

    fn clear_cache(&self) {
        self.clear_count.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    flow: UnlockFlow,
    store: Arc<MemoryStore>,
    flags: Arc<MemoryFlagStore>,
    database: Arc<MockDatabase>,
}

fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let flags = Arc::new(MemoryFlagStore::new());
    let keys = KeyManager::new(store.clone(), flags.clone());
    let database = Arc::new(MockDatabase::new(keys.clone()));
    let flow = UnlockFlow::new(keys, database.clone());
    Harness {
        flow,
        store,
        flags,
        database,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn seed_protected_key(h: &Harness) {
    h.store
        .put(KEY_RECORD, &[7u8; KEY_LEN], AccessOptions::gated())
        .await
        .unwrap();
    h.flags.set(MODE_FLAG, "PROTECTED").unwrap();
}

#[tokio::test]
async fn fresh_install_unlocks_to_onboarding() {
    let h = harness();
    assert_eq!(h.flow.state(), UnlockState::Initializing);

    h.flow.start().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.flow.take_initial_route(), Some(InitialRoute::Onboarding));
    assert_eq!(h.flow.take_initial_route(), None);
    assert_eq!(h.store.prompt_count(), 0);
    assert_eq!(h.database.init_attempts(), 1);
    assert!(h.store.contains(KEY_RECORD));
}

#[tokio::test]
async fn completed_onboarding_routes_home() {
    let h = harness();
    h.database.set_setting(ONBOARDING_COMPLETE_SETTING, "true");

    h.flow.start().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: true
        }
    );
    assert_eq!(h.flow.take_initial_route(), Some(InitialRoute::Home));
}

#[tokio::test]
async fn dismissed_prompt_locks_and_retry_recovers() {
    let h = harness();
    seed_protected_key(&h).await;
    h.store.script_prompt(PromptOutcome::Dismissed);

    h.flow.start().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Locked {
            reason: LockReason::AuthCancelled
        }
    );
    assert_eq!(h.flow.keys().key().unwrap_err(), KeyError::NotInitialized);
    assert_eq!(h.database.clear_count(), 1);
    assert_eq!(h.database.init_attempts(), 0);

    // The unscripted retry prompt approves.
    h.flow.retry().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.store.prompt_count(), 2);
}

#[tokio::test]
async fn background_return_from_ready_forces_relock() {
    let h = harness();
    h.flow.start().await;
    assert!(matches!(h.flow.state(), UnlockState::Ready { .. }));

    h.flow.on_background_return();

    assert_eq!(
        h.flow.state(),
        UnlockState::Locked {
            reason: LockReason::BackgroundReturn
        }
    );
    assert_eq!(h.flow.keys().key().unwrap_err(), KeyError::NotInitialized);
    assert_eq!(h.database.clear_count(), 1);

    // Unlocking again in basic mode needs no prompt, and the navigation
    // decision from the first unlock is still the only one.
    h.flow.start().await;
    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.store.prompt_count(), 0);
    assert_eq!(h.flow.take_initial_route(), Some(InitialRoute::Onboarding));
    assert_eq!(h.flow.take_initial_route(), None);
}

#[tokio::test]
async fn background_return_outside_ready_keeps_state() {
    let h = harness();
    h.database.fail_inits(1);
    h.flow.start().await;
    assert!(matches!(h.flow.state(), UnlockState::DbError { .. }));

    h.flow.on_background_return();
    assert!(matches!(h.flow.state(), UnlockState::DbError { .. }));

    let fresh = harness();
    fresh.flow.on_background_return();
    assert_eq!(fresh.flow.state(), UnlockState::Initializing);
}

#[tokio::test]
async fn database_failure_surfaces_db_error_then_retry_succeeds() {
    let h = harness();
    h.database.fail_inits(1);

    h.flow.start().await;

    let UnlockState::DbError { message } = h.flow.state() else {
        panic!("expected DbError, got {:?}", h.flow.state());
    };
    assert!(message.contains("simulated database failure"));

    h.flow.retry().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.database.init_attempts(), 2);
    // The key generated before the failure is reloaded, not regenerated.
    assert_eq!(h.store.put_count(), 1);
}

#[tokio::test]
async fn missing_key_record_surfaces_db_error_and_destroy_recovers() {
    let h = harness();
    // Mode recorded but no key record: the corruption case.
    h.flags.set(MODE_FLAG, "BASIC").unwrap();

    h.flow.start().await;
    assert!(matches!(h.flow.state(), UnlockState::DbError { .. }));

    h.flow.keys().destroy_all_keys().await;
    h.flow.retry().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert!(h.store.contains(KEY_RECORD));
}

#[tokio::test]
async fn onboarding_lookup_failure_fails_open() {
    let h = harness();
    h.database.fail_setting_reads(1);

    h.flow.start().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
}

#[tokio::test]
async fn stale_setup_result_applies_after_background_return() {
    let h = harness();
    seed_protected_key(&h).await;
    let gate = h.store.gate_prompts();

    let flow = h.flow.clone();
    let setup = tokio::spawn(async move { flow.start().await });
    while h.store.prompt_count() == 0 {
        tokio::task::yield_now().await;
    }

    // Background return while the prompt is showing: not Ready, so the
    // state holds and only the in-flight guard resets.
    h.flow.on_background_return();
    assert_eq!(h.flow.state(), UnlockState::Initializing);

    gate.notify_one();
    setup.await.unwrap();

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.store.prompt_count(), 1);
}

#[tokio::test]
async fn start_is_ignored_while_setup_runs() {
    let h = harness();
    seed_protected_key(&h).await;
    let gate = h.store.gate_prompts();

    let flow = h.flow.clone();
    let setup = tokio::spawn(async move { flow.start().await });
    while h.store.prompt_count() == 0 {
        tokio::task::yield_now().await;
    }

    h.flow.start().await;
    assert_eq!(h.store.get_count(), 1);

    gate.notify_one();
    setup.await.unwrap();

    assert!(matches!(h.flow.state(), UnlockState::Ready { .. }));
    assert_eq!(h.store.prompt_count(), 1);
}

#[tokio::test]
async fn mode_upgrade_requires_auth_on_next_unlock() {
    let h = harness();
    h.flow.start().await;
    assert_eq!(h.store.prompt_count(), 0);

    h.flow
        .keys()
        .set_mode(EncryptionMode::Protected)
        .await
        .unwrap();
    assert_eq!(h.flow.keys().mode().unwrap(), EncryptionMode::Protected);

    h.flow.on_background_return();
    h.flow.start().await;

    assert_eq!(
        h.flow.state(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
    assert_eq!(h.store.prompt_count(), 1);
}

#[tokio::test]
async fn subscribers_observe_the_final_state() {
    let h = harness();
    let mut states = h.flow.subscribe();

    h.flow.start().await;

    assert_eq!(
        *states.borrow_and_update(),
        UnlockState::Ready {
            onboarding_complete: false
        }
    );
}
