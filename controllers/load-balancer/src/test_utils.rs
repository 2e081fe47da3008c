//! Test utilities for unit testing the reconciler and garbage collector
//!
//! This module provides helpers for creating test data, an in-memory
//! [`ServiceStore`], and a harness wiring a [`Reconciler`] to a
//! `MockPnapClient`.

#![cfg(test)]

use crate::announcer::Announcer;
use crate::error::ControllerError;
use crate::gc::GarbageCollector;
use crate::ip_blocks::{BLOCK_DESCRIPTION, IpBlockRegistry};
use crate::metrics::Metrics;
use crate::network::NetworkAttachment;
use crate::nodes::LabelSelector;
use crate::reconciler::{Reconciler, ReconcilerSettings};
use crate::service::{LbService, ServiceRef, ServiceStore};
use crate::tags::VOCABULARY;
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pnap_client::{IpBlock, IpBlockStatus, MockPnapClient, TagAssignment};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_CLUSTER: &str = "c1";
pub const TEST_NETWORK: &str = "net1";
pub const TEST_LOCATION: &str = "ASH";
pub const TEST_LOCATION_ANNOTATION: &str = "phoenixnap.com/ip-location";

/// Helper to create a test Node
pub fn create_test_node(name: &str, provider_id: Option<&str>, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create an unattached test IP block with the given tags
pub fn create_test_block(id: &str, cidr: &str, tags: &[(&str, &str)]) -> IpBlock {
    IpBlock {
        id: id.to_string(),
        location: TEST_LOCATION.to_string(),
        cidr_block_size: "/29".to_string(),
        cidr: cidr.to_string(),
        ip_version: Some("V4".to_string()),
        status: IpBlockStatus::Unassigned,
        assigned_resource_id: None,
        assigned_resource_type: None,
        description: Some(BLOCK_DESCRIPTION.to_string()),
        tags: tags
            .iter()
            .map(|(name, value)| TagAssignment {
                id: format!("tag-{}", name),
                name: name.to_string(),
                value: Some(value.to_string()),
                is_billing_tag: false,
                created_by: Some("USER".to_string()),
            })
            .collect(),
        is_bring_your_own: false,
        created_on: None,
    }
}

/// Helper to create the ownership tags of a service in the test cluster
pub fn service_tags(service: &ServiceRef) -> Vec<(&'static str, String)> {
    vec![
        ("usage", "cloud-provider-phoenixnap-auto".to_string()),
        ("cluster", TEST_CLUSTER.to_string()),
        ("service", service.tag_value()),
    ]
}

/// In-memory [`ServiceStore`] recording `spec.loadBalancerIP` per service
#[derive(Clone, Default)]
pub struct InMemoryServiceStore {
    ips: Arc<Mutex<HashMap<ServiceRef, Option<String>>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl InMemoryServiceStore {
    pub fn recorded_ip(&self, service: &ServiceRef) -> Option<String> {
        self.ips.lock().unwrap().get(service).cloned().flatten()
    }

    pub fn set(&self, service: &ServiceRef, ip: Option<&str>) {
        self.ips
            .lock()
            .unwrap()
            .insert(service.clone(), ip.map(str::to_string));
    }

    /// Make the next update fail with a Kubernetes-style error
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    /// Current view of a service, as the watcher would deliver it
    pub fn service(&self, service: &ServiceRef) -> LbService {
        LbService {
            reference: service.clone(),
            load_balancer_ip: self.recorded_ip(service),
            annotations: BTreeMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl ServiceStore for InMemoryServiceStore {
    async fn set_load_balancer_ip(
        &self,
        service: &ServiceRef,
        ip: Option<&str>,
    ) -> Result<(), ControllerError> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(ControllerError::Validation(format!(
                    "injected update failure for {}",
                    service
                )));
            }
        }
        self.set(service, ip);
        Ok(())
    }
}

/// Reconciler wired to a mock provider and an in-memory service store
pub struct TestHarness {
    pub client: MockPnapClient,
    pub services: InMemoryServiceStore,
    pub reconciler: Reconciler,
    pub metrics: Metrics,
}

impl TestHarness {
    /// Harness with the tag vocabulary declared and `net1` existing
    pub fn new() -> Self {
        Self::with_selector(LabelSelector::everything())
    }

    pub fn with_selector(node_selector: LabelSelector) -> Self {
        let client = MockPnapClient::new("http://mock-pnap");
        for name in VOCABULARY {
            client.add_tag(name);
        }
        client.add_public_network(TEST_NETWORK);

        let services = InMemoryServiceStore::default();
        let metrics = Metrics::new().unwrap();
        let settings = ReconcilerSettings {
            network_id: TEST_NETWORK.to_string(),
            default_location: TEST_LOCATION.to_string(),
            location_annotation: TEST_LOCATION_ANNOTATION.to_string(),
            node_selector,
        };
        let reconciler = Reconciler::new(
            IpBlockRegistry::new(Arc::new(client.clone()), TEST_CLUSTER),
            NetworkAttachment::new(Arc::new(client.clone())),
            Announcer::from_setting(&format!("pnap-l2://{}", TEST_NETWORK).parse().unwrap()),
            Arc::new(services.clone()),
            settings,
            metrics.clone(),
        );

        Self {
            client,
            services,
            reconciler,
            metrics,
        }
    }

    /// Garbage collector sharing this harness's mock provider
    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            IpBlockRegistry::new(Arc::new(self.client.clone()), TEST_CLUSTER),
            NetworkAttachment::new(Arc::new(self.client.clone())),
            TEST_NETWORK.to_string(),
            Duration::from_secs(60),
            self.metrics.clone(),
        )
    }

    pub fn nodes(&self) -> Vec<Node> {
        vec![
            create_test_node("node-1", Some("phoenixnap://srv-1"), &[("role", "lb")]),
            create_test_node("node-2", Some("phoenixnap://srv-2"), &[("role", "worker")]),
        ]
    }
}
