//! # Configuration
//!
//! Operator-level settings. Per-resource settings live on the custom resources
//! themselves; everything here applies to every managed resource.

mod controller;

pub use controller::{ControllerConfig, Platform};
