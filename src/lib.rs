pub mod agent;
pub mod api;
pub mod boot;
pub mod config;
pub mod engine;
pub mod error;
pub mod source;
pub mod status;
pub mod update;

pub use boot::sequencer::{BootOutcome, BootReport, BootSequencer, BootServices};
pub use config::{BootConfig, BuildInfo};
pub use error::BootError;
pub use update::handoff::{BootContext, CacheKey, EntryContext};
