//! Database query functions organized by collection.

pub mod bonus_history;
pub mod outbox;
pub mod referrals;
