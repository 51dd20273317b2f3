// Shared in-memory fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use hotboot::agent::{AgentPlatform, AgentRegistration};
use hotboot::boot::shell::{AppShell, InitStep};
use hotboot::source::traits::{BodyStream, Fetched, Origin};
use hotboot::status::StatusSink;

/// Origin serving fixed bodies, matched on the path without its query string
/// unless an exact entry exists.
#[derive(Default)]
pub struct MemoryOrigin {
    bodies: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    requests: Mutex<Vec<String>>,
}

impl MemoryOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, path: &str, body: impl Into<Bytes>) {
        self.bodies.lock().insert(path.to_string(), body.into());
    }

    pub fn fail(&self, path: &str) {
        self.failing.lock().insert(path.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests whose path (query stripped) equals `path`.
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.split('?').next() == Some(path))
            .count()
    }

    fn lookup(&self, path: &str) -> Result<Bytes> {
        self.requests.lock().push(path.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("offline"));
        }
        let bare = path.split('?').next().unwrap_or(path);
        if self.failing.lock().contains(bare) {
            return Err(anyhow!("GET {} failed: HTTP 500", path));
        }
        let bodies = self.bodies.lock();
        bodies
            .get(path)
            .or_else(|| bodies.get(bare))
            .cloned()
            .ok_or_else(|| anyhow!("GET {} failed: HTTP 404", path))
    }
}

#[async_trait]
impl Origin for MemoryOrigin {
    async fn fetch(&self, path: &str) -> Result<Fetched> {
        let body = self.lookup(path)?;
        tokio::task::yield_now().await;
        Ok(Fetched {
            content_type: "text/plain".to_string(),
            body,
        })
    }

    async fn fetch_stream(&self, path: &str) -> Result<BodyStream> {
        let body = self.lookup(path)?;
        let total = body.len() as u64;
        let pieces: Vec<Result<Bytes>> = body
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(BodyStream {
            content_type: "application/javascript".to_string(),
            total: Some(total),
            chunks: stream::iter(pieces).boxed(),
        })
    }
}

/// Agent platform keeping registrations in memory.
pub struct FakePlatform {
    supported: bool,
    next_id: AtomicU64,
    active: Mutex<Vec<AgentRegistration>>,
    pub unregistered: Mutex<Vec<u64>>,
}

impl FakePlatform {
    pub fn supported() -> Arc<Self> {
        Arc::new(Self::with_support(true))
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self::with_support(false))
    }

    fn with_support(supported: bool) -> Self {
        Self {
            supported,
            next_id: AtomicU64::new(1),
            active: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
        }
    }

    pub fn active(&self) -> Vec<AgentRegistration> {
        self.active.lock().clone()
    }
}

#[async_trait]
impl AgentPlatform for FakePlatform {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn registrations(&self) -> Result<Vec<AgentRegistration>> {
        Ok(self.active())
    }

    async fn unregister(&self, registration: &AgentRegistration) -> Result<bool> {
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|r| r.id != registration.id);
        let removed = active.len() != before;
        if removed {
            self.unregistered.lock().push(registration.id);
        }
        Ok(removed)
    }

    async fn register(&self, script: &str) -> Result<AgentRegistration> {
        if !self.supported {
            return Err(anyhow!("unsupported"));
        }
        let mut active = self.active.lock();
        if let Some(existing) = active.iter().find(|r| r.script == script) {
            return Ok(existing.clone());
        }
        let registration = AgentRegistration {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            script: script.to_string(),
            addr: None,
        };
        active.push(registration.clone());
        Ok(registration)
    }

    async fn ready(&self) -> Result<AgentRegistration> {
        self.active
            .lock()
            .last()
            .cloned()
            .ok_or_else(|| anyhow!("no agent registered"))
    }
}

/// Everything the shell was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    MountTheme,
    ResetThemes,
    Init(InitStep),
    Alert(String),
    Reload,
    SecondaryReady(String),
}

#[derive(Default)]
pub struct RecordingShell {
    events: Mutex<Vec<ShellEvent>>,
    fail_step: Mutex<Option<InitStep>>,
}

impl RecordingShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_at(&self, step: InitStep) {
        *self.fail_step.lock() = Some(step);
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        self.events.lock().clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ShellEvent::Alert(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, event: &ShellEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

#[async_trait]
impl AppShell for RecordingShell {
    async fn mount_theme(&self) -> Result<()> {
        self.events.lock().push(ShellEvent::MountTheme);
        Ok(())
    }

    async fn reset_builtin_themes(&self) {
        self.events.lock().push(ShellEvent::ResetThemes);
    }

    async fn initialize(&self, step: InitStep) -> Result<()> {
        self.events.lock().push(ShellEvent::Init(step));
        if *self.fail_step.lock() == Some(step) {
            return Err(anyhow!("{} broke", step.label()));
        }
        Ok(())
    }

    async fn alert(&self, title: &str, text: &str) {
        self.events
            .lock()
            .push(ShellEvent::Alert(format!("{}: {}", title, text)));
    }

    fn request_reload(&self) {
        self.events.lock().push(ShellEvent::Reload);
    }

    async fn secondary_region_ready(&self, region: &str) {
        self.events
            .lock()
            .push(ShellEvent::SecondaryReady(region.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<(String, Option<f64>)>>,
    disposed: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<(String, Option<f64>)> {
        self.updates.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.updates().into_iter().map(|(t, _)| t).collect()
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl StatusSink for RecordingSink {
    fn status(&self, text: &str, progress: Option<f64>) {
        self.updates.lock().push((text.to_string(), progress));
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
