//! Load balancer operations for a single service.
//!
//! A service moves from Unbound (no IP recorded, no active block) through
//! Pending (block reserved, not yet attached or IP not yet recorded) to Bound
//! (active block attached to the configured network and the recorded IP
//! inside its CIDR). Every operation holds the service's lock for its whole
//! duration.

use super::Reconciler;
use crate::error::ControllerError;
use crate::network::{Attachment, attachment_of, is_attached_to};
use crate::nodes::{filter_nodes, server_ids};
use crate::service::LbService;
use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node};
use pnap_client::IpBlock;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Offset of the service address from the block's network address
///
/// The network address and the gateway at network + 1 are skipped.
const SERVICE_ADDRESS_OFFSET: u32 = 3;

/// Status reported for a bound service
pub fn load_balancer_status(ip: &str) -> LoadBalancerStatus {
    LoadBalancerStatus {
        ingress: Some(vec![LoadBalancerIngress {
            ip: Some(ip.to_string()),
            ..Default::default()
        }]),
    }
}

fn parse_cidr(block: &IpBlock) -> Result<Ipv4Net, ControllerError> {
    block.cidr.parse::<Ipv4Net>().map_err(|e| {
        ControllerError::Validation(format!(
            "IP block {} has an unparseable CIDR {:?}: {}",
            block.id, block.cidr, e
        ))
    })
}

/// Check that a recorded IP parses and lies inside the block
fn check_recorded_ip(ip: &str, block: &IpBlock, cidr: &Ipv4Net) -> Result<(), ControllerError> {
    let addr: Ipv4Addr = ip.parse().map_err(|e| {
        ControllerError::Validation(format!("recorded IP {:?} is not an IPv4 address: {}", ip, e))
    })?;
    if !cidr.contains(&addr) {
        return Err(ControllerError::Validation(format!(
            "recorded IP {} is not inside IP block {} ({})",
            ip, block.id, block.cidr
        )));
    }
    Ok(())
}

/// Deterministic service address of a block: network + 3
pub fn service_address(cidr: &Ipv4Net) -> Result<Ipv4Addr, ControllerError> {
    let address = u32::from(cidr.network())
        .checked_add(SERVICE_ADDRESS_OFFSET)
        .map(Ipv4Addr::from)
        .filter(|addr| *addr < cidr.broadcast())
        .ok_or_else(|| {
            ControllerError::Validation(format!(
                "IP block {} is too small to hold a service address",
                cidr
            ))
        })?;
    Ok(address)
}

impl Reconciler {
    /// Current status of a service's load balancer; `None` while Unbound
    pub async fn get_load_balancer(
        &self,
        service: &LbService,
    ) -> Result<Option<LoadBalancerStatus>, ControllerError> {
        let key = service.reference.to_string();
        let guard = self.lock_service(&key).await;
        let result = self.get_locked(service).await;
        drop(guard);
        self.release_service(&key);

        self.metrics.record_operation("get", &result);
        result
    }

    async fn get_locked(
        &self,
        service: &LbService,
    ) -> Result<Option<LoadBalancerStatus>, ControllerError> {
        let Some(ip) = service.load_balancer_ip.as_deref() else {
            debug!("Service {} has no recorded IP", service.reference);
            return Ok(None);
        };

        let block = self
            .registry
            .find_one_active(&service.reference)
            .await?
            .ok_or_else(|| {
                ControllerError::Validation(format!(
                    "service {} records IP {} but has no active IP block",
                    service.reference, ip
                ))
            })?;

        let cidr = parse_cidr(&block)?;
        check_recorded_ip(ip, &block, &cidr)?;

        match attachment_of(&block) {
            Attachment::PublicNetwork(id) if id == self.settings.network_id => {
                Ok(Some(load_balancer_status(ip)))
            }
            Attachment::PublicNetwork(other) => Err(ControllerError::Conflict(format!(
                "IP block {} of service {} is attached to {}, expected {}",
                block.id, service.reference, other, self.settings.network_id
            ))),
            Attachment::Other {
                resource_type,
                resource_id,
            } => Err(ControllerError::Conflict(format!(
                "IP block {} of service {} is assigned to {} {}",
                block.id, service.reference, resource_type, resource_id
            ))),
            Attachment::Unattached => Err(ControllerError::Validation(format!(
                "IP block {} of service {} is not attached to {}",
                block.id, service.reference, self.settings.network_id
            ))),
        }
    }

    /// Bind the service to an attached block and announce its IP
    pub async fn ensure_load_balancer(
        &self,
        service: &LbService,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ControllerError> {
        let key = service.reference.to_string();
        let guard = self.lock_service(&key).await;
        let result = self.ensure_locked(service, nodes).await;
        drop(guard);
        self.release_service(&key);

        self.metrics.record_operation("ensure", &result);
        result
    }

    async fn ensure_locked(
        &self,
        service: &LbService,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ControllerError> {
        let mut recorded_ip = service.load_balancer_ip.as_deref();

        let block = match self.registry.find_one_active(&service.reference).await? {
            Some(block) => block,
            None => {
                // Left over from a release whose IP could not be cleared
                if let Some(ip) = recorded_ip.take() {
                    warn!(
                        "Service {} records IP {} but has no active IP block, replacing it",
                        service.reference, ip
                    );
                }
                let location = service
                    .annotation(&self.settings.location_annotation)
                    .unwrap_or(&self.settings.default_location);
                let block = self.registry.create(location, &service.reference).await?;
                self.metrics.record_block_created();
                block
            }
        };

        let cidr = parse_cidr(&block)?;
        if let Some(ip) = recorded_ip {
            check_recorded_ip(ip, &block, &cidr)?;
        }

        let nodes = filter_nodes(nodes, &self.settings.node_selector);

        if let Some(ip) = recorded_ip {
            if is_attached_to(&block, &self.settings.network_id) {
                debug!("Service {} already bound to {}", service.reference, ip);
                self.announcer.add_service(
                    &service.reference.namespace,
                    &service.reference.name,
                    ip,
                    &nodes,
                )?;
                return Ok(load_balancer_status(ip));
            }
        }

        self.network
            .ensure_attached(&block, &self.settings.network_id)
            .await?;

        let ip = match recorded_ip {
            Some(ip) => ip.to_string(),
            None => {
                let ip = service_address(&cidr)?.to_string();
                self.services
                    .set_load_balancer_ip(&service.reference, Some(&ip))
                    .await?;
                info!(
                    "Recorded IP {} from block {} on service {}",
                    ip, block.id, service.reference
                );
                ip
            }
        };

        self.announcer.add_service(
            &service.reference.namespace,
            &service.reference.name,
            &ip,
            &nodes,
        )?;

        Ok(load_balancer_status(&ip))
    }

    /// Hand the current node set to the announcer
    ///
    /// Fails as a whole when any selected node lacks a provider id.
    pub async fn update_load_balancer(
        &self,
        service: &LbService,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        let key = service.reference.to_string();
        let guard = self.lock_service(&key).await;
        let result = self.update_locked(service, nodes);
        drop(guard);
        self.release_service(&key);

        self.metrics.record_operation("update", &result);
        result
    }

    fn update_locked(&self, service: &LbService, nodes: &[Node]) -> Result<(), ControllerError> {
        let nodes = filter_nodes(nodes, &self.settings.node_selector);
        server_ids(&nodes)?;

        self.announcer
            .update_service(&service.reference.namespace, &service.reference.name, &nodes)
    }

    /// Release the service's IP and stage its block for deletion
    ///
    /// The block is only marked; detaching and deleting it is left to the
    /// garbage collector.
    pub async fn ensure_load_balancer_deleted(
        &self,
        service: &LbService,
    ) -> Result<(), ControllerError> {
        let key = service.reference.to_string();
        let guard = self.lock_service(&key).await;
        let result = self.delete_locked(service).await;
        drop(guard);
        self.release_service(&key);

        self.metrics.record_operation("delete", &result);
        result
    }

    async fn delete_locked(&self, service: &LbService) -> Result<(), ControllerError> {
        let recorded_ip = service.load_balancer_ip.as_deref().unwrap_or_default();

        if !recorded_ip.is_empty() {
            if let Err(e) = self
                .services
                .set_load_balancer_ip(&service.reference, None)
                .await
            {
                warn!(
                    "Failed to clear IP {} from service {}, continuing: {}",
                    recorded_ip, service.reference, e
                );
            }
        }

        if let Err(e) = self.announcer.remove_service(
            &service.reference.namespace,
            &service.reference.name,
            recorded_ip,
        ) {
            warn!(
                "Announcer {} failed to remove service {}: {}",
                self.announcer.name(),
                service.reference,
                e
            );
        }

        match self.registry.find_one_active(&service.reference).await? {
            Some(block) => {
                self.registry.mark_deleted(&block).await?;
                info!(
                    "IP block {} of service {} staged for garbage collection",
                    block.id, service.reference
                );
            }
            None => debug!("Service {} has no active IP block", service.reference),
        }
        Ok(())
    }
}
