// Background network agent: a long-lived local server that answers asset
// requests from the cache regions so the client keeps working offline.

pub mod lifecycle;
pub mod server;

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;

pub use lifecycle::BackgroundAgentLifecycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistration {
    pub id: u64,
    /// Well-known path the agent was registered under.
    pub script: String,
    /// Where the agent answers, for agents reachable over the network.
    pub addr: Option<SocketAddr>,
}

/// Platform primitive for registering background agents.
#[async_trait]
pub trait AgentPlatform: Send + Sync {
    fn is_supported(&self) -> bool;
    async fn registrations(&self) -> Result<Vec<AgentRegistration>>;
    /// Returns whether the registration was still active.
    async fn unregister(&self, registration: &AgentRegistration) -> Result<bool>;
    async fn register(&self, script: &str) -> Result<AgentRegistration>;
    /// Resolves once an agent is active and serving.
    async fn ready(&self) -> Result<AgentRegistration>;
}
