//! In-process change bus.
//!
//! Intake publishes a [`ChangeNotice`] after each committed referral write.
//! The accrual worker subscribes and applies bonuses. Each subscriber has an
//! independent buffer; a subscriber that falls behind sees `Lagged`. The bus
//! is only a wake-up: every published change also has a pending marker in
//! the database, which the worker sweeps.

use fission_types::ReferralChange;
use tokio::sync::broadcast;

/// A referral change plus its deduplication key.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    pub event_id: String,
    pub change: ReferralChange,
}

impl ChangeNotice {
    pub fn new(change: ReferralChange) -> Self {
        Self {
            event_id: change.event_id(),
            change,
        }
    }
}

/// Broadcasts referral changes to subscribers.
#[derive(Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeNotice>,
}

impl ChangeBus {
    /// Create a new bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change. Returns the number of subscribers reached.
    pub fn publish(&self, change: ReferralChange) -> usize {
        // No subscribers is not an error
        self.sender.send(ChangeNotice::new(change)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}
