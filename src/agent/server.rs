// Axum server backing the local background agent: answers from the cache
// regions first and falls through to the origin.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::{AgentPlatform, AgentRegistration};
use crate::engine::cache::CacheStore;
use crate::source::traits::Origin;

const CACHE_STATUS_HEADER: &str = "x-hotboot-cache";

const BIND_ATTEMPTS: u32 = 40;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone)]
struct AgentState {
    cache: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
}

pub struct AgentServer {
    addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl AgentServer {
    /// Start serving on `127.0.0.1:port` (0 picks a free port).
    pub async fn start(cache: Arc<CacheStore>, origin: Arc<dyn Origin>, port: u16) -> Result<Self> {
        let listener = bind(port).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .fallback(serve_asset)
            .with_state(AgentState { cache, origin });

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("agent listening on {}", addr);
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL of an origin-relative path on this agent.
    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Bind the agent port. A fixed port may still be held by a predecessor that
/// is releasing its agent, so `AddrInUse` is retried for a short while.
async fn bind(port: u16) -> Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if port != 0 && e.kind() == ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                debug!("agent port {} busy (attempt {}), retrying", port, attempt);
                attempt += 1;
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(e) => return Err(anyhow!("binding 127.0.0.1:{}: {}", port, e)),
        }
    }
}

/// GET any path: the cached body if a region holds it, otherwise the origin's.
async fn serve_asset(State(state): State<AgentState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let key = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    match state.cache.match_url(&key).await {
        Ok(Some(hit)) => {
            debug!("agent hit {}", key);
            return (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, hit.content_type),
                    (HeaderName::from_static(CACHE_STATUS_HEADER), "hit".to_string()),
                ],
                hit.body,
            )
                .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!("agent cache lookup {} failed: {}", key, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {}", e)).into_response();
        }
    }

    match state.origin.fetch(&key).await {
        Ok(fetched) => {
            debug!("agent miss {} served from origin", key);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, fetched.content_type),
                    (HeaderName::from_static(CACHE_STATUS_HEADER), "miss".to_string()),
                ],
                fetched.body,
            )
                .into_response()
        }
        Err(e) => {
            warn!("agent miss {} and origin unreachable: {}", key, e);
            (StatusCode::BAD_GATEWAY, format!("offline: {}", e)).into_response()
        }
    }
}

struct RunningAgent {
    registration: AgentRegistration,
    server: AgentServer,
}

/// Agent platform backed by an in-process [`AgentServer`] per registration.
pub struct LocalAgentPlatform {
    cache: Arc<CacheStore>,
    origin: Arc<dyn Origin>,
    port: u16,
    next_id: AtomicU64,
    active: Mutex<Vec<RunningAgent>>,
}

impl LocalAgentPlatform {
    pub fn new(cache: Arc<CacheStore>, origin: Arc<dyn Origin>, port: u16) -> Self {
        Self {
            cache,
            origin,
            port,
            next_id: AtomicU64::new(1),
            active: Mutex::new(Vec::new()),
        }
    }

    fn find(&self, script: &str) -> Option<AgentRegistration> {
        self.active
            .lock()
            .iter()
            .find(|a| a.registration.script == script)
            .map(|a| a.registration.clone())
    }
}

#[async_trait]
impl AgentPlatform for LocalAgentPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    async fn registrations(&self) -> Result<Vec<AgentRegistration>> {
        Ok(self
            .active
            .lock()
            .iter()
            .map(|a| a.registration.clone())
            .collect())
    }

    async fn unregister(&self, registration: &AgentRegistration) -> Result<bool> {
        let removed = {
            let mut active = self.active.lock();
            active
                .iter()
                .position(|a| a.registration.id == registration.id)
                .map(|i| active.remove(i))
        };
        match removed {
            Some(agent) => {
                info!("agent id={} unregistered", agent.registration.id);
                agent.server.shutdown();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn register(&self, script: &str) -> Result<AgentRegistration> {
        if let Some(existing) = self.find(script) {
            return Ok(existing);
        }

        let server = AgentServer::start(
            Arc::clone(&self.cache),
            Arc::clone(&self.origin),
            self.port,
        )
        .await?;

        let mut active = self.active.lock();
        // Another caller may have registered while the server was starting.
        let existing = active
            .iter()
            .find(|a| a.registration.script == script)
            .map(|a| a.registration.clone());
        if let Some(existing) = existing {
            drop(active);
            server.shutdown();
            return Ok(existing);
        }

        let registration = AgentRegistration {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            script: script.to_string(),
            addr: Some(server.addr()),
        };
        active.push(RunningAgent {
            registration: registration.clone(),
            server,
        });
        Ok(registration)
    }

    async fn ready(&self) -> Result<AgentRegistration> {
        self.active
            .lock()
            .last()
            .map(|a| a.registration.clone())
            .ok_or_else(|| anyhow!("no agent registered"))
    }
}
