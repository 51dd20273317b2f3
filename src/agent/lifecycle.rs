use std::sync::Arc;

use tracing::{info, warn};

use super::{AgentPlatform, AgentRegistration};
use crate::engine::cache::CacheStore;
use crate::error::BootError;

pub struct BackgroundAgentLifecycle {
    platform: Arc<dyn AgentPlatform>,
    cache: Arc<CacheStore>,
    script: String,
    primary_region: String,
}

impl BackgroundAgentLifecycle {
    pub fn new(
        platform: Arc<dyn AgentPlatform>,
        cache: Arc<CacheStore>,
        script: impl Into<String>,
        primary_region: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            cache,
            script: script.into(),
            primary_region: primary_region.into(),
        }
    }

    /// Register the agent and wait until it serves.
    ///
    /// On the upgrade path every existing registration and the primary region
    /// are dropped first, so nothing from the previous build is served.
    pub async fn ensure_ready(&self, upgraded: bool) -> Result<AgentRegistration, BootError> {
        if !self.platform.is_supported() {
            return Err(BootError::Unsupported(
                "this platform cannot run a background network agent".into(),
            ));
        }

        if upgraded {
            self.purge_stale().await?;
        }

        self.platform
            .register(&self.script)
            .await
            .map_err(|e| BootError::AgentStart(format!("registering {}: {}", self.script, e)))?;
        let registration = self
            .platform
            .ready()
            .await
            .map_err(|e| BootError::AgentStart(format!("agent never became ready: {}", e)))?;

        info!(
            "agent ready id={} script={} addr={:?}",
            registration.id, registration.script, registration.addr
        );
        Ok(registration)
    }

    /// Stop serving through `registration` once a successor owns the boot.
    /// The successor cannot see this process's agents, so the owner releases
    /// its own. Returns whether the registration was still active.
    pub async fn release(&self, registration: &AgentRegistration) -> bool {
        match self.platform.unregister(registration).await {
            Ok(released) => {
                info!("agent id={} released={}", registration.id, released);
                released
            }
            Err(e) => {
                warn!("releasing agent id={} failed: {}", registration.id, e);
                false
            }
        }
    }

    /// Drop all registrations and the primary region. Returns how many
    /// registrations were removed.
    pub async fn purge_stale(&self) -> Result<usize, BootError> {
        let registrations = self.platform.registrations().await.unwrap_or_else(|e| {
            warn!("listing agent registrations failed: {}", e);
            Vec::new()
        });

        let mut removed = 0;
        for registration in &registrations {
            match self.platform.unregister(registration).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("unregistering agent id={} failed: {}", registration.id, e),
            }
        }

        self.cache.invalidate(&self.primary_region)?;
        info!(
            "purged {} stale agent registrations and region {}",
            removed, self.primary_region
        );
        Ok(removed)
    }
}
