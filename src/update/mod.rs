// Update protocol: version check, bundle download, and handoff to new code.

pub mod activator;
pub mod fetcher;
pub mod handoff;
pub mod version;
