//! Utility modules: retry, deferred values, ids, timeout.

pub mod deferred;
pub mod id;
pub mod retry;
pub mod timeout;
