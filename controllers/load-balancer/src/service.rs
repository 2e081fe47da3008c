//! Service identity and access to the recorded load balancer IP.
//!
//! The reconciler works on [`LbService`], a small view of a Kubernetes
//! `Service`, and persists the assigned IP through a [`ServiceStore`]. The
//! store is a trait so reconciler tests can run without an API server.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Service;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Stable identity of a service: namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl ServiceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Value of the `service` tag: `<namespace>.<name>`
    pub fn tag_value(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the reconciler needs to know about a LoadBalancer service
#[derive(Debug, Clone, PartialEq)]
pub struct LbService {
    pub reference: ServiceRef,
    /// `spec.loadBalancerIP`, if set and non-empty
    pub load_balancer_ip: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

impl LbService {
    pub fn new(reference: ServiceRef) -> Self {
        Self {
            reference,
            load_balancer_ip: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.load_balancer_ip = Some(ip.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Build the view from a Kubernetes Service
    pub fn from_service(service: &Service) -> Result<Self, ControllerError> {
        let namespace = service.namespace().ok_or_else(|| {
            ControllerError::Validation(format!("service {} has no namespace", service.name_any()))
        })?;

        let load_balancer_ip = service
            .spec
            .as_ref()
            .and_then(|spec| spec.load_balancer_ip.clone())
            .filter(|ip| !ip.is_empty());

        Ok(Self {
            reference: ServiceRef::new(namespace, service.name_any()),
            load_balancer_ip,
            annotations: service.annotations().clone(),
        })
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Whether a Service asks for a load balancer
pub fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer")
}

/// Persists the load balancer IP recorded on a service
#[async_trait::async_trait]
pub trait ServiceStore: Send + Sync {
    /// Set (`Some`) or clear (`None`) `spec.loadBalancerIP`
    async fn set_load_balancer_ip(
        &self,
        service: &ServiceRef,
        ip: Option<&str>,
    ) -> Result<(), ControllerError>;
}

/// [`ServiceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeServiceStore {
    client: Client,
}

impl fmt::Debug for KubeServiceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeServiceStore").finish_non_exhaustive()
    }
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ServiceStore for KubeServiceStore {
    async fn set_load_balancer_ip(
        &self,
        service: &ServiceRef,
        ip: Option<&str>,
    ) -> Result<(), ControllerError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &service.namespace);

        // Re-read so the update carries the latest resourceVersion
        let mut current = api.get(&service.name).await?;
        let spec = current.spec.get_or_insert_with(Default::default);
        if spec.load_balancer_ip.as_deref() == ip {
            debug!("Service {} already records {:?}", service, ip);
            return Ok(());
        }
        spec.load_balancer_ip = ip.map(str::to_string);

        api.replace(&service.name, &PostParams::default(), &current)
            .await?;
        debug!("Service {} now records load balancer IP {:?}", service, ip);
        Ok(())
    }
}
