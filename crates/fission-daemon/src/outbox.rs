//! Entitlement grant delivery and periodic redelivery.
//!
//! Grants are queued with the history write. Accrual hands each new grant to
//! its own task right after commit, so a slow entitlement service never
//! holds up accrual. Anything still undelivered is retried here on a fixed
//! interval until `max_attempts` is reached.

use std::sync::Arc;
use std::time::Duration;

use fission_db::queries::outbox;
use fission_db::DbError;
use fission_entitlement::EntitlementNotifier;
use fission_types::unix_now;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Recorded as a failed attempt; the row stays pending.
    Failed,
}

/// Counts from one redelivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Attempt one queued grant and record the result.
///
/// The database lock is not held across the network call.
pub async fn deliver(
    state: &AppState,
    notifier: &dyn EntitlementNotifier,
    id: i64,
    uid: &str,
    duration: &str,
) -> Result<Delivery, DbError> {
    match notifier.grant(uid, duration).await {
        Ok(()) => {
            let db = state.db.lock().await;
            match outbox::mark_delivered(&db, id, unix_now()) {
                Ok(()) => Ok(Delivery::Delivered),
                Err(DbError::NotFound(_)) => {
                    debug!(outbox_id = id, "grant already marked delivered");
                    Ok(Delivery::Delivered)
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => {
            warn!(
                class = "notification",
                notifier = notifier.name(),
                outbox_id = id,
                %uid,
                duration,
                error = %e,
                "entitlement grant failed"
            );
            let db = state.db.lock().await;
            outbox::record_failure(&db, id, &e.to_string())?;
            Ok(Delivery::Failed)
        }
    }
}

/// Attempt a freshly queued grant in the background.
pub fn spawn_delivery(
    state: Arc<AppState>,
    notifier: Arc<dyn EntitlementNotifier>,
    id: i64,
    uid: String,
    duration: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match deliver(&state, notifier.as_ref(), id, &uid, duration).await {
            Ok(Delivery::Delivered) => debug!(outbox_id = id, %uid, duration, "entitlement granted"),
            Ok(Delivery::Failed) => {}
            Err(e) => {
                // The history is committed; the row stays for redelivery.
                error!(class = "persistence", outbox_id = id, error = %e, "failed to record grant result");
            }
        }
    })
}

/// Retry pending grants queued at least one retry interval before `now`.
pub async fn redeliver_pending(state: &AppState, now: i64) -> Result<RedeliveryReport, DbError> {
    let Some(notifier) = state.notifier.as_deref() else {
        return Ok(RedeliveryReport::default());
    };
    let settings = &state.config.outbox;
    let min_age = i64::try_from(settings.retry_interval_secs).unwrap_or(i64::MAX);

    let rows = {
        let db = state.db.lock().await;
        outbox::pending(&db, settings.max_attempts, settings.batch_size)?
    };

    let mut report = RedeliveryReport::default();
    for row in rows
        .into_iter()
        .filter(|r| r.created_at.saturating_add(min_age) <= now)
    {
        report.attempted += 1;
        if deliver(state, notifier, row.id, &row.uid, &row.duration).await? == Delivery::Delivered {
            report.delivered += 1;
        } else if row.attempts + 1 >= settings.max_attempts {
            error!(
                class = "notification",
                outbox_id = row.id,
                uid = %row.uid,
                attempts = row.attempts + 1,
                "entitlement grant abandoned"
            );
        }
    }
    Ok(report)
}

/// Run redelivery passes until shutdown.
pub async fn run_redelivery(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let period = Duration::from_secs(state.config.outbox.retry_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    info!(period_secs = period.as_secs(), "entitlement redelivery started");
    loop {
        tokio::select! {
            _ = ticker.tick() => match redeliver_pending(&state, unix_now()).await {
                Ok(report) if report.attempted > 0 => {
                    info!(attempted = report.attempted, delivered = report.delivered, "redelivery pass");
                }
                Ok(_) => {}
                Err(e) => error!(class = "persistence", error = %e, "redelivery pass failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    info!("entitlement redelivery stopped");
}
