//! In-memory notifier for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{EntitlementNotifier, NotificationError};

/// Records every grant and optionally fails or stalls them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    grants: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent grants fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent grants never complete, like a service that drops
    /// requests without answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// `(uid, duration)` pairs granted so far.
    pub fn grants(&self) -> Vec<(String, String)> {
        self.grants
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntitlementNotifier for RecordingNotifier {
    async fn grant(&self, uid: &str, duration: &str) -> Result<(), NotificationError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        if let Ok(mut grants) = self.grants.lock() {
            grants.push((uid.to_string(), duration.to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
