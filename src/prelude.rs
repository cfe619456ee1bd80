//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use oneagent_operator::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, reconcile_resource, BackoffState, Reconciler, ReconcilerError,
};

// Collaborator seams
pub use crate::dtclient::{DtClient, DtClientError, DtClientFactory, DtClientOptions};
pub use crate::registry::{ImageDigest, ImageDigestResolver, RegistryError};
pub use crate::store::{KubeStore, MemoryStore, ObjectStore, StoreError};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, Platform};
