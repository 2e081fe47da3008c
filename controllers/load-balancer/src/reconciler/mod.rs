//! Reconciliation logic for LoadBalancer services.
//!
//! - `load_balancer`: get / ensure / update / ensure-deleted for one service
//!
//! The [`Reconciler`] also owns the per-service locks that serialize
//! operations on the same service and the per-service error backoff used by
//! the controller's error policy.

pub mod load_balancer;

use crate::announcer::Announcer;
use crate::backoff::FibonacciBackoff;
use crate::ip_blocks::IpBlockRegistry;
use crate::metrics::Metrics;
use crate::network::NetworkAttachment;
use crate::nodes::LabelSelector;
use crate::service::ServiceStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Backoff state for a service
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }
}

/// Static inputs of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Public network every service block is attached to
    pub network_id: String,
    /// Location used when a service carries no location annotation
    pub default_location: String,
    /// Annotation that overrides the location per service
    pub location_annotation: String,
    pub node_selector: LabelSelector,
}

/// One async mutex per service key
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the mutex of a key nobody holds or waits on
    fn release(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }
}

/// Reconciles LoadBalancer services against phoenixNAP IP blocks.
pub struct Reconciler {
    pub(crate) registry: IpBlockRegistry,
    pub(crate) network: NetworkAttachment,
    pub(crate) announcer: Announcer,
    pub(crate) services: Arc<dyn ServiceStore>,
    pub(crate) settings: ReconcilerSettings,
    pub(crate) metrics: Metrics,
    locks: KeyedLocks,
    /// Error count tracking per service (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("announcer", &self.announcer.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        registry: IpBlockRegistry,
        network: NetworkAttachment,
        announcer: Announcer,
        services: Arc<dyn ServiceStore>,
        settings: ReconcilerSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            network,
            announcer,
            services,
            settings,
            metrics,
            locks: KeyedLocks::default(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    /// Hold the lock of one service for the duration of an operation
    pub(crate) async fn lock_service(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }

    pub(crate) fn release_service(&self, key: &str) {
        self.locks.release(key);
    }

    /// Record a failed reconcile and return how long to wait before the next one
    pub fn next_backoff(&self, resource_key: &str) -> (Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(resource_key.to_string())
            .or_insert_with(BackoffState::new);
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Reset error count after a successful reconcile
    pub fn reset_error(&self, resource_key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states.remove(resource_key);
    }
}
