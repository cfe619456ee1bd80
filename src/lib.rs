//! OneAgent Operator Library
//!
//! Reconciliation engine of the OneAgent operator. Tests are included in the
//! module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use oneagent_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod dtclient;
pub mod observability;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod version;
