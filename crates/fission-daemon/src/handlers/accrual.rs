//! Bonus accrual.
//!
//! A referral record change credits the acting user, the referrer, or both,
//! according to the record's direction. All credits of one change commit in
//! one transaction. Entitlement grants for integrated records are queued in
//! that transaction and attempted only after it commits.
//!
//! The bus delivers at most once, so the worker also sweeps referral records
//! still marked pending: at startup, after the bus drops changes, on a timer
//! and before it exits.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use fission_db::queries::bonus_history::{self, AccrualOutcome, Credit};
use fission_db::queries::referrals::{self, PendingAccrual};
use fission_db::DbError;
use fission_types::firestore::ChangeEventPayload;
use fission_types::{unix_now, BonusCondition, ReferralChange, TypesError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::ChangeNotice;
use crate::outbox;
use crate::server::{ApiError, Envelope, INVALID_PAYLOAD};
use crate::AppState;

/// Header carrying a caller-assigned event id.
pub const EVENT_ID_HEADER: &str = "x-event-id";

/// Attempts at the accrual transaction when the database is busy.
const MAX_TX_ATTEMPTS: u32 = 3;

const TX_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Accrual failures, by class.
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    #[error("invalid change: {0}")]
    InvalidPayload(#[from] TypesError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] DbError),
}

impl AccrualError {
    /// Failure class used in logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Persistence(_) => "persistence",
        }
    }
}

/// What one accrual did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualReport {
    pub outcome: AccrualOutcome,
    /// Grants handed to background delivery.
    pub grants: usize,
}

/// Decide who to credit for a change.
///
/// Empty target uids are skipped. Grants are only queued when `notify` is
/// set and the record is integrated with the purchase service.
pub fn plan_credits(change: &ReferralChange, notify: bool) -> Result<Vec<Credit>, AccrualError> {
    let record = &change.value;
    let kind = record.bonus_type()?;
    let direction = record.direction();

    if record.condition() != BonusCondition::Immediately {
        debug!(uid = %record.uid, "deferred bonus condition applied immediately");
    }

    let mut targets = Vec::with_capacity(2);
    if direction.credits_uid() {
        targets.push(record.uid.as_str());
    }
    if direction.credits_referrer() {
        targets.push(record.referred_by_uid.as_str());
    }

    let integrated = notify && record.is_integrated_purchase_service;
    let credits = targets
        .into_iter()
        .filter(|uid| {
            if uid.is_empty() {
                warn!(record = %record.uid, ?direction, "skipping credit for empty uid");
            }
            !uid.is_empty()
        })
        .map(|uid| Credit {
            uid: uid.to_string(),
            kind,
            referraled_at: change.event_timestamp(),
            integrated,
        })
        .collect();
    Ok(credits)
}

/// Apply a change: credit histories, then start delivery of queued grants.
///
/// When `event_id` was already applied nothing is written. Returns once the
/// transaction commits; grants complete in the background.
pub async fn accrue(
    state: &Arc<AppState>,
    change: &ReferralChange,
    event_id: Option<&str>,
) -> Result<AccrualReport, AccrualError> {
    let credits = plan_credits(change, state.notifier.is_some())?;
    let outcome = apply_with_retry(state, event_id, &credits).await?;

    let mut grants = 0;
    if let (AccrualOutcome::Applied(outcomes), Some(notifier)) = (&outcome, &state.notifier) {
        for (credit, applied) in credits.iter().zip(outcomes) {
            if let Some(id) = applied.outbox_id {
                outbox::spawn_delivery(
                    state.clone(),
                    notifier.clone(),
                    id,
                    credit.uid.clone(),
                    credit.kind.name(),
                );
                grants += 1;
            }
        }
    }

    Ok(AccrualReport { outcome, grants })
}

async fn apply_with_retry(
    state: &AppState,
    event_id: Option<&str>,
    credits: &[Credit],
) -> Result<AccrualOutcome, DbError> {
    let mut attempt = 1;
    loop {
        let result = {
            let mut db = state.db.lock().await;
            bonus_history::apply(&mut db, event_id, credits, unix_now())
        };
        match result {
            Err(e) if e.is_busy() && attempt < MAX_TX_ATTEMPTS => {
                warn!(attempt, error = %e, "accrual transaction busy, retrying");
                tokio::time::sleep(TX_RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Apply one change and log the result.
///
/// A change that can never apply has its pending marker dropped. Persistence
/// failures leave the marker for the next sweep.
pub async fn handle_change(state: &Arc<AppState>, notice: &ChangeNotice) -> Result<(), DbError> {
    let uid = &notice.change.value.uid;
    match accrue(state, &notice.change, Some(&notice.event_id)).await {
        Ok(AccrualReport {
            outcome: AccrualOutcome::Applied(outcomes),
            grants,
        }) => {
            info!(
                event_id = %notice.event_id,
                %uid,
                credited = outcomes.len(),
                grants,
                "bonus accrued"
            );
            Ok(())
        }
        Ok(_) => {
            debug!(event_id = %notice.event_id, "duplicate change ignored");
            Ok(())
        }
        Err(AccrualError::InvalidPayload(e)) => {
            error!(
                class = "invalid_payload",
                event_id = %notice.event_id,
                %uid,
                error = %e,
                "change cannot be applied, dropping"
            );
            let db = state.db.lock().await;
            referrals::discard_pending(&db, &notice.event_id)?;
            Ok(())
        }
        Err(AccrualError::Persistence(e)) => {
            error!(class = "persistence", event_id = %notice.event_id, %uid, error = %e, "accrual failed");
            Err(e)
        }
    }
}

/// Apply every referral record still marked pending, oldest first.
///
/// Stops at the first persistence failure. Returns how many changes were
/// handled.
pub async fn drain_backlog(state: &Arc<AppState>) -> Result<usize, DbError> {
    let limit = state.config.accrual.backlog_batch.max(1);
    let mut handled = 0;
    loop {
        let batch = {
            let db = state.db.lock().await;
            referrals::pending(&db, limit)?
        };
        let full = batch.len() >= limit as usize;
        for PendingAccrual { event_id, record } in batch {
            let notice = ChangeNotice {
                event_id,
                change: ReferralChange::created(record),
            };
            handle_change(state, &notice).await?;
            handled += 1;
        }
        if !full {
            return Ok(handled);
        }
    }
}

async fn sweep(state: &Arc<AppState>, reason: &'static str) {
    match drain_backlog(state).await {
        Ok(0) => debug!(reason, "accrual backlog empty"),
        Ok(handled) => info!(reason, handled, "accrual backlog swept"),
        Err(e) => error!(class = "persistence", reason, error = %e, "accrual backlog sweep failed"),
    }
}

/// Consume changes from the bus until shutdown.
///
/// Pending records are swept before the first change, after a lag, on every
/// backlog tick and once more before returning.
pub async fn run_worker(
    state: Arc<AppState>,
    mut changes: broadcast::Receiver<ChangeNotice>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("accrual worker started");
    sweep(&state, "startup").await;

    let period = Duration::from_secs(state.config.accrual.backlog_interval_secs.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            received = changes.recv() => match received {
                Ok(notice) => {
                    // Logged inside; the marker is picked up by a later sweep.
                    let _ = handle_change(&state, &notice).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(class = "dropped_change", missed, "accrual worker lagged, sweeping backlog");
                    sweep(&state, "lagged").await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => sweep(&state, "interval").await,
            _ = shutdown.recv() => break,
        }
    }

    sweep(&state, "shutdown").await;
    info!("accrual worker stopped");
}

/// `POST /triggers/referral_records`
///
/// Accepts a change event in plain or document-store form.
pub async fn on_referral_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope>), ApiError> {
    let payload: ChangeEventPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(class = "invalid_payload", error = %e, "malformed change event");
        ApiError::InvalidPayload(INVALID_PAYLOAD.to_string())
    })?;
    let change = payload.into_change().map_err(|e| {
        warn!(class = "invalid_payload", error = %e, "rejected change event");
        ApiError::InvalidPayload(format!("{INVALID_PAYLOAD}: {e}"))
    })?;

    let event_id = headers
        .get(EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| change.event_id());

    let notice = ChangeNotice { event_id, change };
    match accrue(&state, &notice.change, Some(&notice.event_id)).await {
        Ok(report) => {
            info!(event_id = %notice.event_id, outcome = ?report.outcome, "change event processed");
            Ok((StatusCode::ACCEPTED, Json(Envelope::ok())))
        }
        Err(e) => {
            error!(class = e.class(), event_id = %notice.event_id, error = %e, "change event failed");
            Err(match e {
                AccrualError::InvalidPayload(e) => ApiError::InvalidPayload(e.to_string()),
                AccrualError::Persistence(e) => ApiError::Internal(e.to_string()),
            })
        }
    }
}
