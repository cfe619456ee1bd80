//! # Runtime
//!
//! Process-level wiring: startup, the controller watch loops and the error
//! policy applied to failed reconciles.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
