// Durable key-value state that survives restarts: cache key and reset markers.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LOCAL_STORE_FILE;
use crate::error::BootError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct StoredState {
    cache: Option<String>,
    auto_start: bool,
    clear_on_next_load: bool,
}

pub struct LocalStore {
    path: PathBuf,
    state: Mutex<StoredState>,
}

impl LocalStore {
    /// Open (or create) the store inside `state_dir`.
    ///
    /// An unreadable file is treated as empty state rather than a boot failure.
    pub fn open(state_dir: &Path) -> Result<Self, BootError> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCAL_STORE_FILE);

        let state = match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<StoredState>(&raw) {
                Ok(state) => state,
                Err(e) => {
                    warn!("local store {} unreadable, starting empty: {}", path.display(), e);
                    StoredState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &StoredState) -> Result<(), BootError> {
        let raw = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        debug!("local store written to {}", self.path.display());
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut StoredState)) -> Result<(), BootError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        f(&mut next);
        if next != *state {
            self.persist(&next)?;
            *state = next;
        }
        Ok(())
    }

    pub fn cache_key(&self) -> Option<String> {
        self.state.lock().cache.clone()
    }

    pub fn set_cache_key(&self, key: &str) -> Result<(), BootError> {
        self.update(|s| s.cache = Some(key.to_string()))
    }

    pub fn clear_cache_key(&self) -> Result<(), BootError> {
        self.update(|s| s.cache = None)
    }

    pub fn auto_start(&self) -> bool {
        self.state.lock().auto_start
    }

    pub fn set_auto_start(&self, value: bool) -> Result<(), BootError> {
        self.update(|s| s.auto_start = value)
    }

    /// Request a destructive wipe of every cache region on the next boot.
    pub fn mark_clear_on_next_load(&self) -> Result<(), BootError> {
        self.update(|s| s.clear_on_next_load = true)
    }

    /// Consume the wipe marker, returning whether it was set.
    pub fn take_clear_on_next_load(&self) -> Result<bool, BootError> {
        let was_set = self.state.lock().clear_on_next_load;
        if was_set {
            self.update(|s| s.clear_on_next_load = false)?;
        }
        Ok(was_set)
    }

    /// Forget everything.
    pub fn clear(&self) -> Result<(), BootError> {
        self.update(|s| *s = StoredState::default())
    }
}
