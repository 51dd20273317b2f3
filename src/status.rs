// Status reporting: the sink a host UI supplies, and the transient overlay used
// when none is supplied.

use parking_lot::Mutex;
use tracing::{debug, info};

/// Receives `(text, progress)` updates from the boot sequence.
///
/// `progress` is a fraction in `[0, 1]`, or `None` when the current stage has
/// no measurable progress.
pub trait StatusSink: Send + Sync {
    fn status(&self, text: &str, progress: Option<f64>);

    /// Called once the boot no longer needs the sink. Host-owned sinks usually
    /// ignore it; a synthesized overlay tears itself down.
    fn dispose(&self) {}
}

/// Transient progress of a single download or population pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// `current / total`, absent when the total is unknown.
    pub percent: Option<f64>,
    pub current: u64,
    pub total: Option<u64>,
}

impl ProgressEvent {
    pub fn new(current: u64, total: Option<u64>) -> Self {
        let percent = match total {
            Some(0) => Some(1.0),
            Some(t) => Some((current as f64 / t as f64).min(1.0)),
            None => None,
        };
        Self {
            percent,
            current,
            total,
        }
    }
}

/// Sink synthesized when the caller has no visible UI of its own.
#[derive(Default)]
pub struct LoadingOverlay {
    last: Mutex<Option<(String, Option<f64>)>>,
    disposed: Mutex<bool>,
}

impl LoadingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent update shown by the overlay.
    pub fn last_status(&self) -> Option<(String, Option<f64>)> {
        self.last.lock().clone()
    }

    pub fn is_disposed(&self) -> bool {
        *self.disposed.lock()
    }
}

impl StatusSink for LoadingOverlay {
    fn status(&self, text: &str, progress: Option<f64>) {
        if *self.disposed.lock() {
            debug!("overlay disposed, dropping status {:?}", text);
            return;
        }
        match progress {
            Some(p) => info!("{} [{:>3.0}%]", text, p * 100.0),
            None => info!("{}", text),
        }
        *self.last.lock() = Some((text.to_string(), progress));
    }

    fn dispose(&self) {
        *self.disposed.lock() = true;
        debug!("loading overlay disposed");
    }
}

/// Maps per-stage progress onto one bar spanning the whole boot and keeps it
/// from moving backwards.
pub struct ProgressTracker {
    reported: Mutex<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            reported: Mutex::new(0.0),
        }
    }

    /// Overall position for `local` progress inside the span `[start, end)`.
    pub fn advance(&self, start: f64, end: f64, local: f64) -> f64 {
        let local = local.clamp(0.0, 1.0);
        let target = (start + (end - start) * local).clamp(0.0, 1.0);
        let mut reported = self.reported.lock();
        if target > *reported {
            *reported = target;
        }
        *reported
    }

    pub fn current(&self) -> f64 {
        *self.reported.lock()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
