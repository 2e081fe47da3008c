//! Kubernetes watcher for LoadBalancer services.
//!
//! Drives the [`Reconciler`] from a `kube_runtime::Controller` over Services,
//! re-triggered by Node changes. A finalizer keeps a deleted service around
//! until its IP block has been staged for garbage collection.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::reconciler::load_balancer::load_balancer_status;
use crate::service::{LbService, is_load_balancer};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Node, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Finalizer held on every LoadBalancer service this controller bound
pub const FINALIZER: &str = "phoenixnap.com/load-balancer-ip";

/// Periodic re-check of bound services
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state of the reconcile loop
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub client: Client,
    pub fingerprints: NodeFingerprints,
}

/// Last seen [`node_fingerprint`] per node name
#[derive(Debug, Default)]
pub struct NodeFingerprints {
    seen: Mutex<HashMap<String, String>>,
}

impl NodeFingerprints {
    /// Record a node event; true when the node changed in a way that matters
    pub fn observe(&self, node: &Node) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let name = node.name_any();
        if node.metadata.deletion_timestamp.is_some() {
            return seen.remove(&name).is_some();
        }
        let fingerprint = node_fingerprint(node);
        seen.insert(name, fingerprint.clone())
            .is_none_or(|previous| previous != fingerprint)
    }

    /// Forget nodes that are no longer in the cluster
    pub fn retain(&self, nodes: &[Node]) {
        let names: HashSet<String> = nodes.iter().map(|node| node.name_any()).collect();
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|name, _| names.contains(name));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub fn has_finalizer(service: &Service) -> bool {
    service.finalizers().iter().any(|f| f == FINALIZER)
}

/// Finalizer list with ours added
fn finalizers_with(service: &Service) -> Vec<String> {
    let mut finalizers = service.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with ours removed
fn finalizers_without(service: &Service) -> Vec<String> {
    service
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}

/// Node fields that matter for load balancing
///
/// Status heartbeats change nodes constantly; only a change of this
/// fingerprint re-triggers services.
pub fn node_fingerprint(node: &Node) -> String {
    format!(
        "{:?}|{:?}|{}",
        node.labels(),
        node.spec.as_ref().and_then(|spec| spec.provider_id.as_deref()),
        node.metadata.deletion_timestamp.is_some()
    )
}

fn current_status(service: &Service) -> Option<&LoadBalancerStatus> {
    service.status.as_ref()?.load_balancer.as_ref()
}

async fn patch_finalizers(
    api: &Api<Service>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), ControllerError> {
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn patch_load_balancer_status(
    api: &Api<Service>,
    name: &str,
    status: &LoadBalancerStatus,
) -> Result<(), ControllerError> {
    let patch = json!({ "status": { "loadBalancer": status } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Release a service's IP and drop the finalizer
async fn cleanup(
    service: &Service,
    lb: &LbService,
    api: &Api<Service>,
    ctx: &Context,
) -> Result<(), ControllerError> {
    ctx.reconciler.ensure_load_balancer_deleted(lb).await?;

    let name = service.name_any();
    if service.metadata.deletion_timestamp.is_none() && current_status(service).is_some() {
        let patch = json!({ "status": { "loadBalancer": { "ingress": null } } });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    patch_finalizers(api, &name, finalizers_without(service)).await?;
    info!("Released load balancer of service {}", lb.reference);
    Ok(())
}

async fn reconcile(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let lb = LbService::from_service(&service)?;
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &lb.reference.namespace);
    let key = lb.reference.to_string();

    // Deleted, or no longer of type LoadBalancer
    if service.metadata.deletion_timestamp.is_some() || !is_load_balancer(&service) {
        if has_finalizer(&service) {
            cleanup(&service, &lb, &api, &ctx).await?;
        }
        ctx.reconciler.reset_error(&key);
        return Ok(Action::await_change());
    }

    if !has_finalizer(&service) {
        patch_finalizers(&api, &service.name_any(), finalizers_with(&service)).await?;
        debug!("Added finalizer to service {}", key);
    }

    let nodes_api: Api<Node> = Api::all(ctx.client.clone());
    let nodes = nodes_api.list(&ListParams::default()).await?.items;
    ctx.fingerprints.retain(&nodes);
    let reconciler = &ctx.reconciler;

    let status = match reconciler.get_load_balancer(&lb).await {
        Ok(Some(status))
            if reconciler
                .announcer()
                .is_announced(&lb.reference.namespace, &lb.reference.name) =>
        {
            reconciler.update_load_balancer(&lb, &nodes).await?;
            status
        }
        Ok(_) => reconciler.ensure_load_balancer(&lb, &nodes).await?,
        // Partially bound; ensure resumes it
        Err(ControllerError::Validation(msg)) => {
            debug!("Service {} not bound yet: {}", key, msg);
            reconciler.ensure_load_balancer(&lb, &nodes).await?
        }
        Err(e) => return Err(e),
    };

    if current_status(&service) != Some(&status) {
        patch_load_balancer_status(&api, &service.name_any(), &status).await?;
        info!(
            "Service {} bound to {}",
            key,
            status
                .ingress
                .as_ref()
                .and_then(|ingress| ingress.first())
                .and_then(|ingress| ingress.ip.as_deref())
                .unwrap_or("<none>")
        );
    }

    reconciler.reset_error(&key);
    Ok(Action::requeue(RESYNC_INTERVAL))
}

fn error_policy(service: Arc<Service>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    );
    let (backoff, attempts) = ctx.reconciler.next_backoff(&key);
    match error {
        ControllerError::Conflict(_) => error!(
            "Service {} needs manual attention (attempt {}), retrying in {:?}: {}",
            key, attempts, backoff, error
        ),
        e if e.is_transient() => warn!(
            "Reconciling service {} failed (attempt {}), retrying in {:?}: {}",
            key, attempts, backoff, error
        ),
        _ => error!(
            "Reconciling service {} failed (attempt {}), retrying in {:?}: {}",
            key, attempts, backoff, error
        ),
    }
    Action::requeue(backoff)
}

/// Watches Services and Nodes and reconciles LoadBalancer services
pub struct Watcher {
    context: Arc<Context>,
    namespace: Option<String>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: Option<String>) -> Self {
        Self {
            context: Arc::new(Context {
                reconciler,
                client,
                fingerprints: NodeFingerprints::default(),
            }),
            namespace,
        }
    }

    /// Run the controller loop; returns only when the watch streams end
    pub async fn watch_services(&self) -> Result<(), ControllerError> {
        let client = self.context.client.clone();
        let services: Api<Service> = match &self.namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let nodes: Api<Node> = Api::all(client);
        info!(
            "Starting Service watcher ({})",
            self.namespace.as_deref().unwrap_or("all namespaces")
        );

        let controller = Controller::new(services, watcher::Config::default());
        let store = controller.store();
        let context = self.context.clone();

        // Debounce batches bursts of node events into one reconcile per service
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(4);

        controller
            .with_config(controller_config)
            .watches(nodes, watcher::Config::default(), move |node: Node| {
                if !context.fingerprints.observe(&node) {
                    return Vec::new();
                }
                debug!("Node {} changed, re-triggering LoadBalancer services", node.name_any());
                store
                    .state()
                    .into_iter()
                    .filter(|service| is_load_balancer(service))
                    .map(|service| ObjectRef::from_obj(&*service))
                    .collect()
            })
            .run(reconcile, error_policy, self.context.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled service {}", obj),
                    Err(e) => debug!("Service controller event error: {}", e),
                }
            })
            .await;

        Err(ControllerError::Watch(
            "Service watch stream ended".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service_with_finalizers(finalizers: &[&str]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc-a".to_string()),
                namespace: Some("ns1".to_string()),
                finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_finalizer_lists() {
        let service = service_with_finalizers(&["other/finalizer"]);
        assert!(!has_finalizer(&service));
        assert_eq!(finalizers_with(&service), vec!["other/finalizer", FINALIZER]);

        let service = service_with_finalizers(&["other/finalizer", FINALIZER]);
        assert!(has_finalizer(&service));
        assert_eq!(finalizers_with(&service).len(), 2);
        assert_eq!(finalizers_without(&service), vec!["other/finalizer"]);
    }

    #[test]
    fn test_node_fingerprint_ignores_status() {
        let node = create_test_node("n1", Some("phoenixnap://s1"), &[("role", "lb")]);
        let mut heartbeat = node.clone();
        heartbeat.status = Some(Default::default());
        assert_eq!(node_fingerprint(&node), node_fingerprint(&heartbeat));

        let relabeled = create_test_node("n1", Some("phoenixnap://s1"), &[("role", "worker")]);
        assert_ne!(node_fingerprint(&node), node_fingerprint(&relabeled));

        let moved = create_test_node("n1", Some("phoenixnap://s2"), &[("role", "lb")]);
        assert_ne!(node_fingerprint(&node), node_fingerprint(&moved));
    }

    #[test]
    fn test_fingerprints_track_changes_and_forget_nodes() {
        let fingerprints = NodeFingerprints::default();
        let n1 = create_test_node("n1", Some("phoenixnap://s1"), &[("role", "lb")]);
        let n2 = create_test_node("n2", Some("phoenixnap://s2"), &[]);

        assert!(fingerprints.observe(&n1));
        assert!(!fingerprints.observe(&n1));
        assert!(fingerprints.observe(&n2));

        let relabeled = create_test_node("n1", Some("phoenixnap://s1"), &[("role", "worker")]);
        assert!(fingerprints.observe(&relabeled));

        // A node being deleted is dropped and still re-triggers services
        let deleting: Node = serde_json::from_value(json!({
            "metadata": { "name": "n2", "deletionTimestamp": "2026-01-01T00:00:00Z" },
            "spec": { "providerID": "phoenixnap://s2" }
        }))
        .unwrap();
        assert!(fingerprints.observe(&deleting));
        assert_eq!(fingerprints.len(), 1);
        assert!(!fingerprints.observe(&deleting));

        // Nodes missing from a fresh listing are forgotten
        fingerprints.observe(&n2);
        fingerprints.retain(std::slice::from_ref(&relabeled));
        assert_eq!(fingerprints.len(), 1);
        assert!(!fingerprints.observe(&relabeled));
    }

    #[test]
    fn test_current_status() {
        let mut service = service_with_finalizers(&[]);
        assert!(current_status(&service).is_none());

        service.status = Some(k8s_openapi::api::core::v1::ServiceStatus {
            load_balancer: Some(load_balancer_status("10.0.0.3")),
            ..Default::default()
        });
        assert_eq!(
            current_status(&service),
            Some(&load_balancer_status("10.0.0.3"))
        );
    }
}
