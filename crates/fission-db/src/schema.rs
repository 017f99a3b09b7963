//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Referral records: one per uid, first write wins
-- ============================================================

CREATE TABLE IF NOT EXISTS referral_records (
    uid TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    referred_by_uid TEXT NOT NULL DEFAULT '',
    bonus_condition INTEGER NOT NULL,
    bonus_direction INTEGER NOT NULL,
    bonus_type INTEGER NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    is_integrated_purchase_service INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_referral_records_referrer
    ON referral_records(referred_by_uid);

-- ============================================================
-- Bonus history: document header plus append-only items
-- ============================================================

CREATE TABLE IF NOT EXISTS bonus_history (
    uid TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    expired_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bonus_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL REFERENCES bonus_history(uid),
    referraled_at INTEGER NOT NULL,
    started_at INTEGER NOT NULL,
    bonus_type INTEGER NOT NULL,
    expire_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bonus_items_uid ON bonus_items(uid, seq);

CREATE TRIGGER IF NOT EXISTS bonus_items_no_update
BEFORE UPDATE ON bonus_items
BEGIN
    SELECT RAISE(ABORT, 'bonus items are append-only');
END;

CREATE TRIGGER IF NOT EXISTS bonus_items_no_delete
BEFORE DELETE ON bonus_items
BEGIN
    SELECT RAISE(ABORT, 'bonus items are append-only');
END;

-- ============================================================
-- Change event deduplication
-- ============================================================

CREATE TABLE IF NOT EXISTS processed_events (
    event_id TEXT PRIMARY KEY,
    processed_at INTEGER NOT NULL
);

-- ============================================================
-- Pending entitlement grants
-- ============================================================

CREATE TABLE IF NOT EXISTS entitlement_outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL,
    duration TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    delivered_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_entitlement_outbox_pending
    ON entitlement_outbox(delivered_at, id);
"#;

/// v2: referral records still waiting for accrual.
///
/// A row is written in the same transaction as its referral record and
/// removed in the transaction that applies (or dedupes) the matching change.
pub const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS pending_accruals (
    event_id TEXT PRIMARY KEY,
    uid TEXT NOT NULL REFERENCES referral_records(uid),
    queued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_accruals_queued
    ON pending_accruals(queued_at, event_id);
"#;
