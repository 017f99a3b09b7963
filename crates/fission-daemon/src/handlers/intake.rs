//! Referral intake.
//!
//! Records, once per user, who referred them and on what bonus terms. The
//! write is create-if-absent: a second intake for the same uid fails and
//! leaves the first record untouched.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use fission_db::{queries::referrals, DbError};
use fission_types::{unix_now, IntakeRequest, ReferralChange, ReferralRecord};
use tracing::{error, info, warn};

use crate::server::{ApiError, Envelope, INVALID_PAYLOAD, UID_EXISTS};
use crate::AppState;

/// `POST /referral`
pub async fn create_referral(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Envelope>, ApiError> {
    let uid = state.identity.resolve(&headers).map_err(|e| {
        warn!(resolver = state.identity.name(), error = %e, "unauthenticated intake");
        ApiError::Unauthenticated(e.to_string())
    })?;

    let request: IntakeRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!(class = "invalid_payload", %uid, error = %e, "malformed referral payload");
        ApiError::InvalidPayload(INVALID_PAYLOAD.to_string())
    })?;

    let intake = request.validate().map_err(|e| {
        warn!(class = "invalid_payload", %uid, error = %e, "rejected referral payload");
        ApiError::InvalidPayload(format!("{INVALID_PAYLOAD}: {e}"))
    })?;

    let change = ReferralChange::created(ReferralRecord::new(&uid, &intake, unix_now()));
    {
        let db = state.db.lock().await;
        referrals::create(&db, &change.value, &change.event_id()).map_err(|e| match e {
            DbError::AlreadyExists(_) => {
                info!(%uid, "referral record already exists");
                ApiError::AlreadyExists(UID_EXISTS.to_string())
            }
            other => {
                error!(class = "persistence", %uid, error = %other, "failed to store referral record");
                ApiError::Internal(other.to_string())
            }
        })?;
    }

    let subscribers = state.bus.publish(change);
    info!(
        %uid,
        referred_by = %intake.referred_by_uid,
        bonus_type = intake.kind.name(),
        direction = ?intake.direction,
        legacy = intake.legacy,
        subscribers,
        "referral recorded"
    );
    Ok(Json(Envelope::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use fission_types::BonusDirection;

    use crate::handlers::test_support::{post_json, send, test_state, TEST_UID};

    #[tokio::test]
    async fn test_intake_stores_record() {
        let state = test_state();
        let mut rx = state.bus.subscribe();

        let (status, body) = send(
            &state,
            post_json(
                "/referral",
                r#"{"referred_by_uid":"r1","bonus_condition":1,"bonus_direction":3,"bonus_type":2,"is_integrated_purchase_service":false}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok", "message": "succeed."}));

        let record = {
            let db = state.db.lock().await;
            referrals::get(&db, TEST_UID).expect("record")
        };
        assert_eq!(record.referred_by_uid, "r1");
        assert_eq!(record.bonus_type, 2);
        assert_eq!(record.created_at, record.updated_at);

        let notice = rx.try_recv().expect("change published");
        assert!(notice.change.old_value.is_none());
        assert_eq!(notice.change.value, record);

        // Awaiting accrual until the worker applies the same event.
        let db = state.db.lock().await;
        let pending = referrals::pending(&db, 10).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_id, notice.event_id);
    }

    #[tokio::test]
    async fn test_second_intake_conflicts() {
        let state = test_state();
        let first = r#"{"referred_by_uid":"r1","bonus_type":2}"#;
        let second = r#"{"referred_by_uid":"r2","bonus_type":7}"#;

        assert_eq!(send(&state, post_json("/referral", first)).await.0, StatusCode::OK);
        let (status, body) = send(&state, post_json("/referral", second)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "error=UID Exists!");

        let db = state.db.lock().await;
        let record = referrals::get(&db, TEST_UID).expect("record");
        assert_eq!(record.referred_by_uid, "r1");
        assert_eq!(record.bonus_type, 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let state = test_state();
        let (status, body) = send(&state, post_json("/referral", "not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "error=Invalid Request Payload!");

        let db = state.db.lock().await;
        assert!(matches!(referrals::get(&db, TEST_UID), Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_bonus_type_rejected() {
        let state = test_state();
        let (status, body) = send(&state, post_json("/referral", r#"{"bonus_type":99}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let db = state.db.lock().await;
        assert!(matches!(referrals::get(&db, TEST_UID), Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_composite_bonus_type_accepted() {
        let state = test_state();
        let (status, _) = send(
            &state,
            post_json("/referral", r#"{"referred_by_uid":"r1","bonus_type":"1_weekly"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let db = state.db.lock().await;
        let record = referrals::get(&db, TEST_UID).expect("record");
        assert_eq!(record.direction(), BonusDirection::Uid);
        assert_eq!(record.bonus_type, 3);
    }

    #[tokio::test]
    async fn test_header_identity_required() {
        use crate::identity::HeaderIdentity;
        use axum::http::HeaderName;

        let conn = fission_db::open_memory().expect("db");
        let mut config = crate::config::DaemonConfig::default();
        config.project_id = "test".into();
        let state = Arc::new(AppState::new(
            conn,
            config,
            Box::new(HeaderIdentity::new(HeaderName::from_static("x-fission-uid"))),
            None,
        ));

        let (status, body) = send(&state, post_json("/referral", r#"{"bonus_type":1}"#)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");

        let request = axum::http::Request::post("/referral")
            .header("x-fission-uid", "u9")
            .body(axum::body::Body::from(r#"{"bonus_type":1}"#))
            .expect("request");
        assert_eq!(send(&state, request).await.0, StatusCode::OK);

        let db = state.db.lock().await;
        assert_eq!(referrals::get(&db, "u9").expect("record").bonus_type, 1);
    }
}
