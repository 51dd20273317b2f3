// Seam to the application shell around the boot: UI, themes, audio, backend API.

use anyhow::Result;
use async_trait::async_trait;

/// Core systems brought up after the caches are in place, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStep {
    Document,
    Servers,
    Themes,
    Settings,
    Audio,
    Elements,
    Api,
}

impl InitStep {
    pub const ALL: [InitStep; 7] = [
        InitStep::Document,
        InitStep::Servers,
        InitStep::Themes,
        InitStep::Settings,
        InitStep::Audio,
        InitStep::Elements,
        InitStep::Api,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Document => "Loading Game HTML",
            Self::Servers => "Loading Servers",
            Self::Themes => "Loading Themes",
            Self::Settings => "Loading Settings",
            Self::Audio => "Loading Audio",
            Self::Elements => "Loading Element UI",
            Self::Api => "Loading API",
        }
    }

    /// Deferred update errors are shown once this step has finished.
    pub fn completes_core(self) -> bool {
        self == Self::Themes
    }
}

#[async_trait]
pub trait AppShell: Send + Sync {
    /// Mount theme assets; runs alongside primary region population.
    async fn mount_theme(&self) -> Result<()> {
        Ok(())
    }

    /// Called when an update was found, before it is downloaded.
    async fn reset_builtin_themes(&self) {}

    async fn initialize(&self, step: InitStep) -> Result<()>;

    /// Blocking, user-acknowledged notice.
    async fn alert(&self, title: &str, text: &str);

    /// Ask the host to restart the client from scratch.
    fn request_reload(&self);

    /// A secondary asset region is available.
    async fn secondary_region_ready(&self, _region: &str) {}
}
