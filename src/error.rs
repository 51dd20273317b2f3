// Boot failure taxonomy. Which variants are fatal is decided by the sequencer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    /// Version or bundle endpoint could not be reached or answered badly.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// A streamed download ended before the advertised length arrived.
    #[error("download of {url} aborted after {received} of {expected} bytes")]
    Aborted {
        url: String,
        received: u64,
        expected: u64,
    },

    /// The successor code could not be started.
    #[error("activation failed: {0}")]
    Activation(String),

    /// At least one asset of a bulk population failed; the region stays absent.
    #[error("populating region {region} failed: {} of {total} assets could not be fetched", failed.len())]
    PartialFetch {
        region: String,
        failed: Vec<String>,
        total: usize,
    },

    /// No background network agent on this platform.
    #[error("background agent unsupported: {0}")]
    Unsupported(String),

    /// The platform supports agents but this one could not be started.
    #[error("background agent failed to start: {0}")]
    AgentStart(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("persisted state unreadable: {0}")]
    State(#[from] serde_json::Error),

    /// An external collaborator failed during initialization.
    #[error("{step} failed: {source}")]
    Shell {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl BootError {
    pub fn network(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must stop the boot and force a reload.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unsupported(_)
                | Self::AgentStart(_)
                | Self::PartialFetch { .. }
                | Self::Shell { .. }
        )
    }
}
