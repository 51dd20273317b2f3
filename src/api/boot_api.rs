// Boot entry points: standard wiring, handoff acceptance, reset actions.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::agent::server::LocalAgentPlatform;
use crate::boot::sequencer::{BootSequencer, BootServices};
use crate::boot::shell::{AppShell, InitStep};
use crate::config::{BootConfig, BuildInfo, CACHES_DIR, HANDSHAKE_READY_LINE};
use crate::engine::cache::CacheStore;
use crate::engine::local_store::LocalStore;
use crate::error::BootError;
use crate::source::http_origin::HttpOrigin;
use crate::source::traits::Origin;
use crate::update::activator::ProcessActivator;
use crate::update::handoff::{BootContext, CacheKey, EntryContext};

static INIT_TRACING: Once = Once::new();

/// Install the global subscriber once. Logs go to stderr so stdout stays free
/// for the handoff handshake.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();

        info!("hotboot tracing initialized");
    });
}

/// Wire a sequencer to the HTTP origin, the local agent and the process activator.
///
/// The configured `production` flag overrides the one `build` carries.
pub fn assemble(
    config: BootConfig,
    build: BuildInfo,
    shell: Arc<dyn AppShell>,
) -> Result<BootSequencer, BootError> {
    let build = BuildInfo {
        production: config.production,
        ..build
    };
    let origin: Arc<dyn Origin> = Arc::new(
        HttpOrigin::new(&config.base_url, HashMap::new())
            .map_err(|e| BootError::network(&config.base_url, e))?,
    );
    let store = Arc::new(LocalStore::open(&config.state_dir)?);
    let cache = Arc::new(CacheStore::new(
        &config.state_dir.join(CACHES_DIR),
        Arc::clone(&origin),
        config.max_concurrency,
    )?);
    let platform = Arc::new(LocalAgentPlatform::new(
        Arc::clone(&cache),
        Arc::clone(&origin),
        config.agent_port,
    ));
    let activator = Arc::new(ProcessActivator::new(&config.state_dir, &config.activator));

    Ok(BootSequencer::new(BootServices {
        config: Arc::new(config),
        build,
        origin,
        cache,
        store,
        platform,
        activator,
        shell,
    }))
}

/// Context for this invocation: the predecessor's, when started by a hot
/// swap, otherwise one resumed from durable state. Accepting a predecessor's
/// context completes its handshake.
pub fn entry_context(sequencer: &BootSequencer) -> Result<BootContext, BootError> {
    match EntryContext::from_env()? {
        Some(entry) => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", HANDSHAKE_READY_LINE)?;
            stdout.flush()?;
            info!("accepted handoff from {:?}", entry.upgraded);
            Ok(BootContext::from_entry(entry))
        }
        None => Ok(BootContext::new(CacheKey::resume(
            sequencer.store(),
            sequencer.build(),
        ))),
    }
}

fn open_stores(config: &BootConfig) -> Result<(LocalStore, CacheStore), BootError> {
    let store = LocalStore::open(&config.state_dir)?;
    let origin: Arc<dyn Origin> = Arc::new(
        HttpOrigin::new(&config.base_url, HashMap::new())
            .map_err(|e| BootError::network(&config.base_url, e))?,
    );
    let cache = CacheStore::new(
        &config.state_dir.join(CACHES_DIR),
        origin,
        config.max_concurrency,
    )?;
    Ok((store, cache))
}

/// Re-download the bundle on the next boot. User data is untouched.
pub fn reset_build(config: &BootConfig) -> Result<(), BootError> {
    let (store, cache) = open_stores(config)?;
    store.clear_cache_key()?;
    cache.invalidate(&config.primary_region)?;
    info!("build reset, next boot re-downloads the client");
    Ok(())
}

/// Forget all local state and wipe every cache region on the next boot.
pub fn reset_all(config: &BootConfig) -> Result<(), BootError> {
    let store = LocalStore::open(&config.state_dir)?;
    store.clear()?;
    store.mark_clear_on_next_load()?;
    info!("local state cleared, caches dropped on next boot");
    Ok(())
}

/// Shell for headless runs: every step succeeds, notices go to the log.
#[derive(Default)]
pub struct ConsoleShell {
    reload_requested: AtomicBool,
}

impl ConsoleShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppShell for ConsoleShell {
    async fn initialize(&self, step: InitStep) -> anyhow::Result<()> {
        info!("{}", step.label());
        Ok(())
    }

    async fn alert(&self, title: &str, text: &str) {
        error!("{}: {}", title, text);
    }

    fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::SeqCst);
    }

    async fn secondary_region_ready(&self, region: &str) {
        info!("secondary region {} available", region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> BootConfig {
        BootConfig {
            state_dir: dir.to_path_buf(),
            ..BootConfig::default()
        }
    }

    #[test]
    fn test_configured_production_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        for production in [true, false] {
            let cfg = BootConfig {
                production,
                ..config(dir.path())
            };
            let embedded = BuildInfo::new("v1", !production);
            let sequencer = assemble(cfg, embedded, Arc::new(ConsoleShell::new())).unwrap();
            assert_eq!(sequencer.build().production, production);
            assert_eq!(sequencer.build().version, "v1");
        }
    }

    #[test]
    fn test_reset_build_forgets_cache_key() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        LocalStore::open(dir.path())
            .unwrap()
            .set_cache_key("v1-000001")
            .unwrap();

        reset_build(&cfg).unwrap();
        assert_eq!(LocalStore::open(dir.path()).unwrap().cache_key(), None);
    }

    #[test]
    fn test_reset_all_sets_clear_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let store = LocalStore::open(dir.path()).unwrap();
        store.set_auto_start(true).unwrap();

        reset_all(&cfg).unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        assert!(!store.auto_start());
        assert!(store.take_clear_on_next_load().unwrap());
    }
}
