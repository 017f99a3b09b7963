//! Request and event handlers.

pub mod accrual;
pub mod history;
pub mod intake;
