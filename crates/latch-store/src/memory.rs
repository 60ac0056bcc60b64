//! In-memory stores with scripted authentication prompts.
//!
//! `MemoryStore` is the deterministic secret store used by tests and
//! headless environments. Prompts can be scripted to approve, be dismissed,
//! or fail, and an optional gate parks a prompting `get` until released, so
//! concurrent-caller behavior can be exercised without a real device.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{FlagStoreError, StoreError};
use crate::flags::FlagStore;
use crate::secret_store::{AccessOptions, SecretStore};

/// Outcome of the next scripted authentication prompt.
#[derive(Debug, Clone)]
pub enum PromptOutcome {
    Approved,
    Dismissed,
    Failed(String),
}

struct StoredRecord {
    value: Vec<u8>,
    require_authentication: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, StoredRecord>>,
    prompt_script: Mutex<VecDeque<PromptOutcome>>,
    prompt_gate: Mutex<Option<Arc<Notify>>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    prompts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next authentication prompt. Unscripted
    /// prompts approve.
    pub fn script_prompt(&self, outcome: PromptOutcome) {
        self.prompt_script.lock().push_back(outcome);
    }

    /// Park every subsequent prompt until the returned handle is notified.
    /// Each `notify_one` releases one parked prompt.
    pub fn gate_prompts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.prompt_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.lock().contains_key(name)
    }

    /// Whether the named record was stored authentication-gated.
    pub fn is_gated(&self, name: &str) -> bool {
        self.records
            .lock()
            .get(name)
            .map(|record| record.require_authentication)
            .unwrap_or(false)
    }

    async fn run_prompt(&self) -> Result<(), StoreError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        // Clone the gate out so no lock is held across the await.
        let gate = self.prompt_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let outcome = self
            .prompt_script
            .lock()
            .pop_front()
            .unwrap_or(PromptOutcome::Approved);
        match outcome {
            PromptOutcome::Approved => Ok(()),
            PromptOutcome::Dismissed => {
                debug!("scripted prompt dismissed");
                Err(StoreError::Cancelled)
            }
            PromptOutcome::Failed(message) => Err(StoreError::Backend(message)),
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for MemoryStore {
    async fn put(
        &self,
        name: &str,
        value: &[u8],
        options: AccessOptions,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(
            name.to_string(),
            StoredRecord {
                value: value.to_vec(),
                require_authentication: options.require_authentication,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        name: &str,
        options: AccessOptions,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let (exists, stored_gated) = {
            let records = self.records.lock();
            match records.get(name) {
                Some(record) => (true, record.require_authentication),
                None => (false, false),
            }
        };
        if !exists {
            return Ok(None);
        }
        // A prompt fires when the record was stored gated or the caller
        // requests gated access; absent records never prompt.
        if stored_gated || options.require_authentication {
            self.run_prompt().await?;
        }
        Ok(self
            .records
            .lock()
            .get(name)
            .map(|record| record.value.clone()))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.records.lock().remove(name);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFlagStore {
    flags: Mutex<HashMap<String, String>>,
    failed_reads: Mutex<u32>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` reads with an io error.
    pub fn fail_reads(&self, count: u32) {
        *self.failed_reads.lock() = count;
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, name: &str) -> Result<Option<String>, FlagStoreError> {
        let mut failures = self.failed_reads.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(FlagStoreError::Io("simulated read failure".into()));
        }
        drop(failures);
        Ok(self.flags.lock().get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), FlagStoreError> {
        self.flags
            .lock()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), FlagStoreError> {
        self.flags.lock().remove(name);
        Ok(())
    }
}
