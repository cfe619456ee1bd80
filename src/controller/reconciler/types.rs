//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::dtclient::{DtClientError, DtClientFactory};
use crate::registry::ImageDigestResolver;
use crate::store::{ObjectStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Required spec field missing or malformed
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("token secret {0} not found")]
    SecretNotFound(String),
    #[error("tokens missing in secret {secret}: {tokens}")]
    TokenMissing { secret: String, tokens: String },
    #[error("monitoring API error: {0}")]
    Api(#[from] DtClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("rollout failed: {0}")]
    Rollout(String),
    /// Reconcile failed and the accumulated status could not be saved either
    #[error("{source}; additionally failed to persist status: {status_error}")]
    StatusPersist {
        source: Box<ReconcilerError>,
        status_error: StoreError,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// The single error kind that is requeued quickly instead of backing off
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ReconcilerError::Api(e) => e.is_rate_limited(),
            ReconcilerError::StatusPersist { source, .. } => source.is_rate_limited(),
            _ => false,
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::default(),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciler context shared by every reconcile of every resource
///
/// Holds the collaborators; all per-resource state lives in the resource's
/// status, except for the error backoff which is keyed by `namespace/name`.
pub struct Reconciler<S: ObjectStore> {
    pub store: Arc<S>,
    pub dt_clients: Arc<dyn DtClientFactory>,
    pub image_resolver: Arc<dyn ImageDigestResolver>,
    pub config: ControllerConfig,
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<S: ObjectStore> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        dt_clients: Arc<dyn DtClientFactory>,
        image_resolver: Arc<dyn ImageDigestResolver>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            dt_clients,
            image_resolver,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error backoff of a resource after a successful reconcile
    ///
    /// The entry is dropped so that the map only holds failing resources.
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}
