//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the phoenixNAP
//! client, the reconciler, the garbage collector, the Service watcher and
//! the probe/metrics server together, and runs them until shutdown.

use crate::announcer::Announcer;
use crate::config::Config;
use crate::error::ControllerError;
use crate::gc::{GarbageCollector, GcHandle};
use crate::ip_blocks::IpBlockRegistry;
use crate::metrics::{self, Metrics};
use crate::network::NetworkAttachment;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::service::KubeServiceStore;
use crate::tags::{VOCABULARY, ensure_tags};
use crate::watcher::Watcher;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use pnap_client::{DEFAULT_BASE_URL, PnapClient, PnapClientTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Namespace whose UID identifies the cluster
const CLUSTER_ID_NAMESPACE: &str = "kube-system";

type TaskHandle = JoinHandle<Result<(), ControllerError>>;

/// Main controller for LoadBalancer services.
pub struct Controller {
    probe_server: TaskHandle,
    /// `None` when load balancing is disabled
    service_watcher: Option<TaskHandle>,
    gc: Option<GcHandle>,
}

/// Cluster identity: the UID of the `kube-system` namespace
async fn cluster_id(client: Client) -> Result<String, ControllerError> {
    let namespaces: Api<Namespace> = Api::all(client);
    let namespace = namespaces.get(CLUSTER_ID_NAMESPACE).await?;
    namespace
        .metadata
        .uid
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| {
            ControllerError::Validation(format!(
                "namespace {} has no UID",
                CLUSTER_ID_NAMESPACE
            ))
        })
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing phoenixNAP load balancer controller");

        // Probes come up first so liveness holds during startup
        let metrics = Metrics::new()?;
        let ready = Arc::new(AtomicBool::new(false));
        let probe_server = {
            let metrics = metrics.clone();
            let ready = ready.clone();
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, metrics, ready).await })
        };

        let Some(setting) = config.load_balancer.clone() else {
            warn!("No load balancer setting; LoadBalancer services will not be handled");
            ready.store(true, Ordering::Relaxed);
            return Ok(Self {
                probe_server,
                service_watcher: None,
                gc: None,
            });
        };

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        // Create phoenixNAP client
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let pnap_client = PnapClient::new(base_url.clone(), config.credentials.clone())?;

        // Validate credentials and connectivity before proceeding
        info!("Validating phoenixNAP credentials and connectivity...");
        pnap_client.validate_credentials().await.map_err(|e| {
            error!("Failed to validate phoenixNAP credentials: {}", e);
            error!("Please ensure:");
            error!("  1. PNAP_CLIENT_ID and PNAP_CLIENT_SECRET are set correctly");
            error!("  2. The client has the bmc and tags scopes");
            error!("  3. The API is reachable at {}", base_url);
            ControllerError::Pnap(e)
        })?;
        info!("phoenixNAP credentials validated");

        let pnap_client: Arc<dyn PnapClientTrait> = Arc::new(pnap_client);
        let created = ensure_tags(pnap_client.as_ref(), &VOCABULARY).await?;
        if !created.is_empty() {
            info!("Created tag definitions: {}", created.join(", "));
        }

        let cluster_id = cluster_id(kube_client.clone()).await?;
        info!("Cluster ID: {}", cluster_id);

        let registry = IpBlockRegistry::new(pnap_client.clone(), cluster_id);
        let network = NetworkAttachment::new(pnap_client);
        let announcer = Announcer::from_setting(&setting);
        info!("Announcer: {}", announcer.name());

        let reconciler = Arc::new(Reconciler::new(
            registry.clone(),
            network.clone(),
            announcer,
            Arc::new(KubeServiceStore::new(kube_client.clone())),
            ReconcilerSettings {
                network_id: setting.network_id.clone(),
                default_location: config.location.clone(),
                location_annotation: config.location_annotation.clone(),
                node_selector: config.node_selector.clone(),
            },
            metrics.clone(),
        ));

        let gc = GarbageCollector::new(
            registry,
            network,
            setting.network_id.clone(),
            config.gc_interval,
            metrics,
        )
        .start();

        let watcher = Watcher::new(reconciler, kube_client, config.watch_namespace.clone());
        let service_watcher = tokio::spawn(async move { watcher.watch_services().await });

        ready.store(true, Ordering::Relaxed);
        info!("Controller started");

        Ok(Self {
            probe_server,
            service_watcher: Some(service_watcher),
            gc: Some(gc),
        })
    }

    /// Runs the controller until a task exits or a shutdown signal arrives.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("phoenixNAP load balancer controller running");

        let result = tokio::select! {
            result = &mut self.probe_server => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))
                    .and_then(|r| r)
            }
            result = wait_for(self.service_watcher.as_mut()) => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Service watcher panicked: {}", e)))
                    .and_then(|r| r)
            }
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                signal.map_err(ControllerError::Io)
            }
        };

        if let Some(gc) = self.gc.take() {
            gc.stop().await;
        }
        if let Some(watcher) = self.service_watcher.take() {
            watcher.abort();
        }
        self.probe_server.abort();

        if let Err(e) = &result {
            error!("Controller stopped: {}", e);
        }
        result
    }
}

/// Wait for an optional task; never completes when there is none
async fn wait_for(
    handle: Option<&mut TaskHandle>,
) -> Result<Result<(), ControllerError>, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
