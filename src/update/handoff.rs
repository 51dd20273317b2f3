// State carried from one boot invocation to the next across a hot swap.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{BuildInfo, CACHE_KEY_NONCE_DIGITS, HANDOFF_ENV};
use crate::engine::local_store::LocalStore;
use crate::error::BootError;
use crate::status::StatusSink;

/// Cache-busting key appended to the bundle URL. Fixed for the lifetime of a
/// running instance; only a version update produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// `<version>-<random digits>`.
    pub fn derive(version: &str) -> Self {
        let bound = 10u32.pow(CACHE_KEY_NONCE_DIGITS);
        let nonce = rand::thread_rng().gen_range(0..bound);
        Self(format!(
            "{}-{:0width$}",
            version,
            nonce,
            width = CACHE_KEY_NONCE_DIGITS as usize
        ))
    }

    /// The persisted key, or a fresh one for the running build.
    pub fn resume(store: &LocalStore, build: &BuildInfo) -> Self {
        match store.cache_key() {
            Some(key) if !key.is_empty() => Self(key),
            _ => Self::derive(&build.version),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type RevealFn = Arc<dyn Fn() + Send + Sync>;

/// Everything a boot invocation owns. Moved into the successor on a hot swap.
pub struct BootContext {
    pub status: Option<Arc<dyn StatusSink>>,
    /// Called once the application is ready to be shown.
    pub reveal: Option<RevealFn>,
    pub cache: CacheKey,
    /// Version of the predecessor; set only on the post-swap invocation.
    pub upgraded_from: Option<String>,
}

impl BootContext {
    pub fn new(cache: CacheKey) -> Self {
        Self {
            status: None,
            reveal: None,
            cache,
            upgraded_from: None,
        }
    }

    pub fn with_status(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    pub fn with_reveal(mut self, reveal: impl Fn() + Send + Sync + 'static) -> Self {
        self.reveal = Some(Arc::new(reveal));
        self
    }

    pub fn from_entry(entry: EntryContext) -> Self {
        Self {
            status: None,
            reveal: None,
            cache: CacheKey(entry.cache),
            upgraded_from: entry.upgraded,
        }
    }

    /// Serializable part of the context.
    pub fn entry(&self) -> EntryContext {
        EntryContext {
            cache: self.cache.0.clone(),
            upgraded: self.upgraded_from.clone(),
        }
    }

    /// Context for the successor: the caller's callbacks, the live sink, the
    /// new cache key and the upgrade marker.
    pub fn successor(
        &self,
        sink: Arc<dyn StatusSink>,
        cache: CacheKey,
        upgraded_from: &str,
    ) -> Self {
        Self {
            status: Some(sink),
            reveal: self.reveal.clone(),
            cache,
            upgraded_from: Some(upgraded_from.to_string()),
        }
    }
}

impl fmt::Debug for BootContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootContext")
            .field("status", &self.status.is_some())
            .field("reveal", &self.reveal.is_some())
            .field("cache", &self.cache)
            .field("upgraded_from", &self.upgraded_from)
            .finish()
    }
}

/// Wire form of the boot entry contract. Must stay readable by older and
/// newer builds: unknown fields are ignored, `upgraded` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContext {
    pub cache: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgraded: Option<String>,
}

impl EntryContext {
    pub fn to_json(&self) -> Result<String, BootError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, BootError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Entry context handed over by a predecessor process, if any.
    pub fn from_env() -> Result<Option<Self>, BootError> {
        match std::env::var(HANDOFF_ENV) {
            Ok(raw) if !raw.trim().is_empty() => Self::from_json(&raw).map(Some),
            _ => Ok(None),
        }
    }
}
