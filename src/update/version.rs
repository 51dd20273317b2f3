use std::sync::Arc;

use tracing::{debug, info};

use crate::error::BootError;
use crate::source::traits::Origin;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    UpToDate,
    UpdateAvailable { latest: String },
}

/// Asks the origin for the authoritative version token.
pub struct VersionOracle {
    origin: Arc<dyn Origin>,
    path: String,
    production: bool,
}

impl VersionOracle {
    pub fn new(origin: Arc<dyn Origin>, path: impl Into<String>, production: bool) -> Self {
        Self {
            origin,
            path: path.into(),
            production,
        }
    }

    /// Compare the remote token with `current` by exact equality.
    ///
    /// Non-production builds report an update on every fresh boot so the
    /// swap path gets exercised; a post-swap invocation (`upgraded_from` set)
    /// only reports a real mismatch.
    pub async fn check_for_update(
        &self,
        current: &str,
        upgraded_from: Option<&str>,
    ) -> Result<VersionCheck, BootError> {
        let latest = self
            .origin
            .fetch_text(&self.path)
            .await
            .map_err(|e| BootError::network(&self.path, e))?;

        let forced = !self.production && upgraded_from.is_none();
        debug!(
            "version check current={} latest={} forced={}",
            current, latest, forced
        );

        if latest != current || forced {
            info!("update available: {} -> {}", current, latest);
            Ok(VersionCheck::UpdateAvailable { latest })
        } else {
            Ok(VersionCheck::UpToDate)
        }
    }
}
