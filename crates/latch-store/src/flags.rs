use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FlagStoreError;

const DOCUMENT_VERSION: u32 = 1;

/// Unauthenticated string flags persisted outside the gated secret store.
///
/// Flags must stay readable without any authentication prompt: the
/// encryption-mode flag in particular is read before the key record can be
/// requested, to know whether that request will be gated.
pub trait FlagStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>, FlagStoreError>;
    fn set(&self, name: &str, value: &str) -> Result<(), FlagStoreError>;
    fn remove(&self, name: &str) -> Result<(), FlagStoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlagDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    flags: HashMap<String, String>,
}

/// Flag store backed by a single JSON document.
///
/// Writes go through a sibling temp file and rename so a crash mid-write
/// cannot truncate the document.
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    cached: Mutex<FlagDocument>,
}

impl FileFlagStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, FlagStoreError> {
        let path = path.as_ref().to_path_buf();
        let cached = Self::load(&path)?;
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    /// Open the flag document at its default location under the app data
    /// directory.
    pub fn open_default() -> anyhow::Result<Self> {
        let path = crate::paths::flags_file_path()?;
        Ok(Self::new(path)?)
    }

    fn load(path: &Path) -> Result<FlagDocument, FlagStoreError> {
        if !path.exists() {
            return Ok(FlagDocument {
                version: DOCUMENT_VERSION,
                flags: HashMap::new(),
            });
        }
        let data = fs::read_to_string(path)
            .map_err(|e| FlagStoreError::Io(format!("read flags: {e}")))?;
        serde_json::from_str(&data)
            .map_err(|e| FlagStoreError::Format(format!("parse flags: {e}")))
    }

    fn persist(&self, document: &FlagDocument) -> Result<(), FlagStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| FlagStoreError::Io(format!("create flag dir: {e}")))?;
        }
        let data = serde_json::to_string_pretty(document)
            .map_err(|e| FlagStoreError::Format(format!("encode flags: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data).map_err(|e| FlagStoreError::Io(format!("write flags: {e}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| FlagStoreError::Io(format!("commit flags: {e}")))?;
        Ok(())
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, name: &str) -> Result<Option<String>, FlagStoreError> {
        Ok(self.cached.lock().flags.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), FlagStoreError> {
        let mut cached = self.cached.lock();
        cached.flags.insert(name.to_string(), value.to_string());
        cached.version = DOCUMENT_VERSION;
        self.persist(&cached)?;
        debug!("flag {name} updated");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), FlagStoreError> {
        let mut cached = self.cached.lock();
        if cached.flags.remove(name).is_none() {
            return Ok(());
        }
        self.persist(&cached)
    }
}
