//! Integration test crate for the fission referral service.
//!
//! This crate has no library code. It only contains integration tests that
//! drive the daemon over real HTTP, with the accrual worker running and an
//! in-process stand-in for the entitlement service.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p fission-integration-tests
//! ```
