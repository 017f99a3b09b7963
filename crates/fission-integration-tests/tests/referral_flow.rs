//! Integration test: referral intake through bonus accrual.
//!
//! Drives the daemon over HTTP:
//! 1. A user declares a referrer
//! 2. The accrual worker credits both sides
//! 3. Repeat and invalid intakes leave storage untouched
//! 4. Change events delivered directly stack durations and deduplicate

mod common;

use common::{start, test_config};
use fission_db::queries::referrals;
use serde_json::{json, Value};

const THREE_DAYS: i64 = 3 * 86_400;
const WEEK: i64 = 7 * 86_400;

fn change_event(uid: &str, referrer: &str, direction: i64, bonus_type: i64, at: i64) -> Value {
    json!({
        "old_value": null,
        "value": {
            "created_at": at,
            "updated_at": at,
            "uid": uid,
            "referred_by_uid": referrer,
            "bonus_condition": 1,
            "bonus_direction": direction,
            "bonus_type": bonus_type,
            "level": 0,
            "is_integrated_purchase_service": false,
        },
    })
}

#[tokio::test]
async fn intake_credits_user_and_referrer() {
    let harness = start(test_config(), None).await;

    // =========================================================
    // Step 1: u1 declares r1 as referrer, three-day bonus, both sides
    // =========================================================
    let (status, body) = harness
        .intake(
            "u1",
            r#"{"referred_by_uid":"r1","bonus_condition":1,"bonus_direction":3,"bonus_type":2,"is_integrated_purchase_service":false}"#,
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"status": "ok", "message": "succeed."}));

    // =========================================================
    // Step 2: both histories gain one three-day item
    // =========================================================
    let record_created_at = {
        let db = harness.state.db.lock().await;
        referrals::get(&db, "u1").expect("record").created_at
    };
    for uid in ["u1", "r1"] {
        let history = harness.wait_for_history(uid, 1).await;
        assert_eq!(history["uid"], uid);
        assert_eq!(history["expired_at"], THREE_DAYS);
        let item = &history["bonuses"][0];
        assert_eq!(item["bonus_type"], 2);
        assert_eq!(item["expire_time"], THREE_DAYS);
        assert_eq!(item["referraled_at"], record_created_at);
    }

    // =========================================================
    // Step 3: a second intake for u1 is rejected and changes nothing
    // =========================================================
    let (status, body) = harness
        .intake("u1", r#"{"referred_by_uid":"r2","bonus_type":7}"#)
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["message"], "error=UID Exists!");

    let (_, history) = harness.history("u1").await;
    assert_eq!(history["bonuses"].as_array().map(Vec::len), Some(1));
    let (status, _) = harness.history("r2").await;
    assert_eq!(status, 404);

    let db = harness.state.db.lock().await;
    assert_eq!(referrals::get(&db, "u1").expect("record").referred_by_uid, "r1");
}

#[tokio::test]
async fn organic_user_credits_only_self() {
    let harness = start(test_config(), None).await;

    let (status, _) = harness.intake("u2", r#"{"bonus_type":1}"#).await;
    assert_eq!(status, 200);

    let history = harness.wait_for_history("u2", 1).await;
    assert_eq!(history["expired_at"], 86_400);
}

#[tokio::test]
async fn invalid_intake_writes_nothing() {
    let harness = start(test_config(), None).await;

    for body in ["{not json", r#"{"bonus_type":99}"#, r#"{"bonus_type":1,"bonus_direction":9}"#] {
        let (status, json) = harness.intake("u3", body).await;
        assert_eq!(status, 400, "body {body}");
        assert_eq!(json["status"], "error");
    }

    let db = harness.state.db.lock().await;
    assert!(referrals::get(&db, "u3").is_err());
    assert!(referrals::pending(&db, 10).expect("pending").is_empty());
    drop(db);
    assert_eq!(harness.history("u3").await.0, 404);
}

#[tokio::test]
async fn missing_identity_is_unauthenticated() {
    let harness = start(test_config(), None).await;

    let response = harness
        .client
        .post(format!("{}/referral", harness.base))
        .body(r#"{"bonus_type":1}"#)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn direct_events_stack_and_deduplicate() {
    let harness = start(test_config(), None).await;

    // Two distinct weekly referrals by r9 and one replay of the first.
    let first = change_event("a1", "r9", 2, 3, 1_000);
    let second = change_event("a2", "r9", 2, 3, 2_000);

    assert_eq!(harness.trigger(None, &first).await.0, 202);
    assert_eq!(harness.trigger(None, &second).await.0, 202);
    assert_eq!(harness.trigger(None, &first).await.0, 202);

    let (status, history) = harness.history("r9").await;
    assert_eq!(status, 200);
    assert_eq!(history["expired_at"], 2 * WEEK);
    let referraled: Vec<i64> = history["bonuses"]
        .as_array()
        .expect("bonuses")
        .iter()
        .filter_map(|b| b["referraled_at"].as_i64())
        .collect();
    assert_eq!(referraled, vec![1_000, 2_000]);

    // Referrer-only direction leaves the acting users untouched.
    assert_eq!(harness.history("a1").await.0, 404);
}

#[tokio::test]
async fn explicit_event_ids_deduplicate() {
    let harness = start(test_config(), None).await;
    let event = change_event("b1", "", 1, 1, 5_000);

    assert_eq!(harness.trigger(Some("evt-1"), &event).await.0, 202);
    assert_eq!(harness.trigger(Some("evt-1"), &event).await.0, 202);
    // A different id for the same content is a new delivery.
    assert_eq!(harness.trigger(Some("evt-2"), &event).await.0, 202);

    let (_, history) = harness.history("b1").await;
    assert_eq!(history["bonuses"].as_array().map(Vec::len), Some(2));
    assert_eq!(history["expired_at"], 2 * 86_400);
}

#[tokio::test]
async fn document_store_event_form() {
    let harness = start(test_config(), None).await;

    let event = json!({
        "oldValue": {},
        "value": {
            "name": "projects/p/databases/(default)/documents/referral_records/c1",
            "fields": {
                "created_at": {"integerValue": "7000"},
                "updated_at": {"integerValue": "7000"},
                "uid": {"stringValue": "c1"},
                "referred_by_uid": {"stringValue": "r7"},
                "bonus_condition": {"integerValue": "1"},
                "bonus_direction": {"integerValue": "3"},
                "bonus_type": {"integerValue": "4"},
                "is_integrated_purchase_service": {"booleanValue": false},
            },
        },
    });

    assert_eq!(harness.trigger(None, &event).await.0, 202);
    for uid in ["c1", "r7"] {
        let (status, history) = harness.history(uid).await;
        assert_eq!(status, 200, "history for {uid}");
        assert_eq!(history["expired_at"], 30 * 86_400);
        assert_eq!(history["bonuses"][0]["referraled_at"], 7_000);
    }
}
