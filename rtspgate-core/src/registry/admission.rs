use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::metrics;

/// Capacity switch flipped by the Supervisor. While closed, session
/// creation fails with `resource-exhausted`.
pub struct AdmissionGate {
    closed: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl AdmissionGate {
    #[must_use]
    pub fn new() -> Self {
        metrics::system::ADMISSION_OPEN.set(1);
        Self {
            closed: AtomicBool::new(false),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        if self.closed.swap(false, Ordering::SeqCst) {
            tracing::info!("Capacity available again, admitting new sessions");
        }
        *self.reason.write() = None;
        metrics::system::ADMISSION_OPEN.set(1);
    }

    pub fn close(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!(reason = %reason, "Capacity cap reached, rejecting new sessions");
        }
        *self.reason.write() = Some(reason);
        metrics::system::ADMISSION_OPEN.set(0);
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}
