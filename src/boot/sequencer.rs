// Boot state machine: agent, version check, optional hot swap, caches, then
// hand-off to the application shell.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::shell::{AppShell, InitStep};
use super::stage::BootStage;
use crate::agent::{AgentPlatform, AgentRegistration, BackgroundAgentLifecycle};
use crate::config::{BootConfig, BuildInfo};
use crate::engine::cache::{CacheStore, PopulateOutcome};
use crate::engine::local_store::LocalStore;
use crate::error::BootError;
use crate::source::traits::Origin;
use crate::status::{LoadingOverlay, ProgressTracker, StatusSink};
use crate::update::activator::{Bundle, CodeActivator, Handoff};
use crate::update::fetcher::UpdatePackageFetcher;
use crate::update::handoff::{BootContext, CacheKey};
use crate::update::version::{VersionCheck, VersionOracle};

/// What the version stage concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionOutcome {
    UpToDate,
    /// The version endpoint could not be reached; booted the current code.
    Unreachable { reason: String },
    /// A post-swap instance saw yet another version; left for the next boot.
    Deferred { latest: String },
    DownloadFailed { latest: String, reason: String },
    ActivationFailed { latest: String, reason: String },
}

#[derive(Debug)]
pub struct BootReport {
    pub stages: Vec<BootStage>,
    pub version: VersionOutcome,
    pub cache_key: CacheKey,
    pub registration: AgentRegistration,
    /// Build that reached `Ready`.
    pub build: BuildInfo,
    /// Activation error that was shown to the user, if any.
    pub surfaced_error: Option<String>,
    /// Detached secondary-region work; dropping the handles detaches it.
    pub background: Vec<JoinHandle<()>>,
}

impl BootReport {
    /// Wait for detached secondary-region work to settle.
    pub async fn join_background(&mut self) {
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                warn!("secondary region task failed: {}", e);
            }
        }
    }
}

#[derive(Debug)]
pub enum BootOutcome {
    Ready(BootReport),
    /// Control transferred to new code; this instance is done.
    HandedOff(Handoff),
}

/// Everything the sequencer is wired to.
pub struct BootServices {
    pub config: Arc<BootConfig>,
    pub build: BuildInfo,
    pub origin: Arc<dyn Origin>,
    pub cache: Arc<CacheStore>,
    pub store: Arc<LocalStore>,
    pub platform: Arc<dyn AgentPlatform>,
    pub activator: Arc<dyn CodeActivator>,
    pub shell: Arc<dyn AppShell>,
}

struct StageReporter {
    sink: Arc<dyn StatusSink>,
    tracker: ProgressTracker,
}

impl StageReporter {
    fn report(&self, stage: BootStage, text: &str, local: Option<f64>) {
        let (start, end) = stage.span();
        let overall = self.tracker.advance(start, end, local.unwrap_or(0.0));
        self.sink.status(text, Some(overall));
    }
}

struct StageLog {
    stages: Vec<BootStage>,
}

impl StageLog {
    fn enter(&mut self, reporter: &StageReporter, stage: BootStage) {
        if let Some(prev) = self.stages.last() {
            debug_assert!(stage.can_follow(*prev), "{:?} -> {:?}", prev, stage);
        }
        debug!("boot stage {:?}", stage);
        self.stages.push(stage);
        reporter.report(stage, stage.label(), Some(0.0));
    }
}

pub struct BootSequencer {
    config: Arc<BootConfig>,
    build: BuildInfo,
    cache: Arc<CacheStore>,
    store: Arc<LocalStore>,
    oracle: VersionOracle,
    fetcher: UpdatePackageFetcher,
    activator: Arc<dyn CodeActivator>,
    agent: BackgroundAgentLifecycle,
    shell: Arc<dyn AppShell>,
}

impl BootSequencer {
    pub fn new(services: BootServices) -> Self {
        let BootServices {
            config,
            build,
            origin,
            cache,
            store,
            platform,
            activator,
            shell,
        } = services;

        let oracle = VersionOracle::new(
            Arc::clone(&origin),
            config.version_path.clone(),
            build.production,
        );
        let fetcher = UpdatePackageFetcher::new(origin);
        let agent = BackgroundAgentLifecycle::new(
            platform,
            Arc::clone(&cache),
            config.agent_script.clone(),
            config.primary_region.clone(),
        );

        Self {
            config,
            build,
            cache,
            store,
            oracle,
            fetcher,
            activator,
            agent,
            shell,
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn build(&self) -> &BuildInfo {
        &self.build
    }

    /// Run one boot invocation to `Ready`, or until control is handed off.
    pub async fn run(&self, ctx: BootContext) -> Result<BootOutcome, BootError> {
        let sink: Arc<dyn StatusSink> = match &ctx.status {
            Some(sink) => Arc::clone(sink),
            None => Arc::new(LoadingOverlay::new()),
        };
        let reporter = StageReporter {
            sink: Arc::clone(&sink),
            tracker: ProgressTracker::new(),
        };
        let mut log = StageLog { stages: Vec::new() };

        info!(
            "boot version={} built={} cache={} upgraded_from={:?}",
            self.build.version, self.build.build_date, ctx.cache, ctx.upgraded_from
        );

        log.enter(&reporter, BootStage::Init);
        if ctx.upgraded_from.is_some() {
            reporter.report(BootStage::Init, "Finalizing Updates", Some(0.0));
        }
        let registration = match self.agent.ensure_ready(ctx.upgraded_from.is_some()).await {
            Ok(registration) => registration,
            Err(e) => return Err(self.abort(e).await),
        };

        log.enter(&reporter, BootStage::AgentReady);
        if self.store.take_clear_on_next_load()? {
            let removed = self.cache.invalidate_all()?;
            info!("clear-on-next-load marker consumed, {} regions dropped", removed);
        }
        if ctx.upgraded_from.is_some() {
            match self.activator.prune(&ctx.cache).await {
                Ok(0) => {}
                Ok(n) => info!("pruned {} stale bundles", n),
                Err(e) => warn!("pruning stale bundles failed: {}", e),
            }
        }
        let check = match self
            .oracle
            .check_for_update(&self.build.version, ctx.upgraded_from.as_deref())
            .await
        {
            Ok(check) => Ok(check),
            Err(e) => {
                warn!("could not check version, updates skipped: {}", e);
                Err(e.to_string())
            }
        };

        log.enter(&reporter, BootStage::VersionChecked);
        let version = match check {
            Ok(VersionCheck::UpToDate) => VersionOutcome::UpToDate,
            Err(reason) => VersionOutcome::Unreachable { reason },
            Ok(VersionCheck::UpdateAvailable { latest }) if ctx.upgraded_from.is_some() => {
                warn!("already upgraded this run, deferring {} to next boot", latest);
                VersionOutcome::Deferred { latest }
            }
            Ok(VersionCheck::UpdateAvailable { latest }) => {
                log.enter(&reporter, BootStage::Swapping);
                match self.swap(&latest, &ctx, &sink, &reporter).await {
                    Ok(handoff) => {
                        self.agent.release(&registration).await;
                        log.enter(&reporter, BootStage::SwapSucceeded);
                        return Ok(BootOutcome::HandedOff(handoff));
                    }
                    Err(outcome) => outcome,
                }
            }
        };

        let pending_alert = match &version {
            VersionOutcome::ActivationFailed { reason, .. } => {
                log.enter(&reporter, BootStage::SwapFailed);
                Some(reason.clone())
            }
            VersionOutcome::DownloadFailed { .. } => {
                log.enter(&reporter, BootStage::SwapFailed);
                None
            }
            _ => None,
        };

        log.enter(&reporter, BootStage::CacheCheck);
        if let Err(e) = self.ensure_primary(&ctx.cache, &reporter).await {
            return Err(self.abort(e).await);
        }

        log.enter(&reporter, BootStage::CachePopulated);
        let background = self.spawn_secondary();

        let mut surfaced_error = None;
        let steps = InitStep::ALL.len() as f64;
        for (i, step) in InitStep::ALL.into_iter().enumerate() {
            reporter.report(BootStage::CachePopulated, step.label(), Some(i as f64 / steps));
            if let Err(source) = self.shell.initialize(step).await {
                let err = BootError::Shell {
                    step: step.label(),
                    source,
                };
                return Err(self.abort(err).await);
            }
            if step.completes_core() {
                if let Some(reason) = &pending_alert {
                    self.shell
                        .alert(
                            "Failed to apply updates.",
                            &format!(
                                "You are playing a potentially outdated version. Error: {}",
                                reason
                            ),
                        )
                        .await;
                    surfaced_error = Some(reason.clone());
                }
            }
        }

        log.enter(&reporter, BootStage::AssetsLoaded);
        if let Err(e) = self.store.set_cache_key(ctx.cache.as_str()) {
            warn!("persisting cache key failed: {}", e);
        }

        log.enter(&reporter, BootStage::Ready);
        sink.dispose();
        if let Some(reveal) = &ctx.reveal {
            reveal();
        }
        if let Err(e) = self.store.set_auto_start(true) {
            warn!("persisting auto-start flag failed: {}", e);
        }

        info!("boot ready version={} cache={}", self.build.version, ctx.cache);

        Ok(BootOutcome::Ready(BootReport {
            stages: log.stages,
            version,
            cache_key: ctx.cache,
            registration,
            build: self.build.clone(),
            surfaced_error,
            background,
        }))
    }

    /// Download `latest` and activate it. `Err` carries the outcome to record
    /// when this instance keeps running.
    async fn swap(
        &self,
        latest: &str,
        ctx: &BootContext,
        sink: &Arc<dyn StatusSink>,
        reporter: &StageReporter,
    ) -> Result<Handoff, VersionOutcome> {
        self.shell.reset_builtin_themes().await;

        let cache_key = CacheKey::derive(latest);
        let url = self.config.bundle_url(cache_key.as_str());
        let label = BootStage::Swapping.label();

        let bytes = self
            .fetcher
            .download(&url, |p| reporter.report(BootStage::Swapping, label, p.percent))
            .await
            .map_err(|e| {
                warn!("update download failed, continuing on {}: {}", self.build.version, e);
                VersionOutcome::DownloadFailed {
                    latest: latest.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let bundle = Bundle {
            version: latest.to_string(),
            cache_key: cache_key.clone(),
            bytes,
        };
        let successor = ctx.successor(Arc::clone(sink), cache_key.clone(), &self.build.version);

        match self.activator.activate(bundle, successor).await {
            Ok(handoff) => {
                if let Err(e) = self.store.set_cache_key(cache_key.as_str()) {
                    warn!("persisting new cache key failed: {}", e);
                }
                info!("handed off {} -> {}", self.build.version, latest);
                Ok(handoff)
            }
            Err(e) => {
                error!("applying update {} failed: {}", latest, e);
                reporter.report(BootStage::Swapping, BootStage::SwapFailed.label(), Some(0.0));
                Err(VersionOutcome::ActivationFailed {
                    latest: latest.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Populate the primary region if absent, mounting theme assets meanwhile.
    async fn ensure_primary(
        &self,
        cache_key: &CacheKey,
        reporter: &StageReporter,
    ) -> Result<(), BootError> {
        let region = self.config.primary_region.as_str();

        if self.cache.exists(region) {
            debug!("primary region {} present", region);
            return self
                .shell
                .mount_theme()
                .await
                .map_err(|source| BootError::Shell {
                    step: "Mounting Theme",
                    source,
                });
        }

        let urls = self.config.primary_urls(cache_key.as_str());
        let label = BootStage::CacheCheck.label();
        let (populated, themed) = tokio::join!(
            self.cache.populate(region, &urls, |p| {
                reporter.report(BootStage::CacheCheck, label, p.percent)
            }),
            self.shell.mount_theme(),
        );

        match populated? {
            PopulateOutcome::Populated { count } => info!("primary region ready ({} assets)", count),
            PopulateOutcome::AlreadyPresent => {}
        }
        themed.map_err(|source| BootError::Shell {
            step: "Mounting Theme",
            source,
        })
    }

    /// Drop retired regions and fill each absent secondary region in a
    /// detached task. Failures are logged and never reach the boot.
    fn spawn_secondary(&self) -> Vec<JoinHandle<()>> {
        for retired in &self.config.retired_regions {
            match self.cache.invalidate(retired) {
                Ok(true) => info!("dropped retired region {}", retired),
                Ok(false) => {}
                Err(e) => warn!("dropping retired region {} failed: {}", retired, e),
            }
        }

        self.config
            .secondary_regions
            .iter()
            .cloned()
            .map(|region| {
                let cache = Arc::clone(&self.cache);
                let shell = Arc::clone(&self.shell);
                tokio::spawn(async move {
                    if !cache.exists(&region.name) {
                        if let Err(e) = cache.populate(&region.name, &region.assets, |_| {}).await {
                            warn!("secondary region {} not cached: {}", region.name, e);
                            return;
                        }
                    }
                    shell.secondary_region_ready(&region.name).await;
                })
            })
            .collect()
    }

    /// Report a fatal error to the user and ask for a reload.
    async fn abort(&self, err: BootError) -> BootError {
        error!("boot aborted: {}", err);
        let text = match &err {
            BootError::Unsupported(_) => {
                "Background agents are not supported here, the game cannot start.".to_string()
            }
            other => other.to_string(),
        };
        self.shell.alert("Cannot start", &text).await;
        self.shell.request_reload();
        err
    }
}
