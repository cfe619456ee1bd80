//! # Controller
//!
//! Core controller modules for the OneAgent operator.
//!
//! - `backoff`: Fibonacci backoff for the error policy
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
