//! Network attachment manager.
//!
//! A service block is routed by attaching it to a phoenixNAP public network.
//! The provider records the attachment on the block itself
//! (`assignedResourceType` / `assignedResourceId`), which is what the
//! checks here read.

use crate::error::ControllerError;
use pnap_client::{IpBlock, PnapClientTrait, PnapError};
use std::sync::Arc;
use tracing::{debug, info};

/// `assignedResourceType` of a block attached to a public network
pub const PUBLIC_NETWORK_RESOURCE: &str = "public-network";

/// Where a block is currently attached, according to the block record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment<'a> {
    Unattached,
    PublicNetwork(&'a str),
    /// Assigned to something that is not a public network (e.g. a server)
    Other {
        resource_type: &'a str,
        resource_id: &'a str,
    },
}

/// Read the attachment recorded on a block
pub fn attachment_of(block: &IpBlock) -> Attachment<'_> {
    match (
        block.assigned_resource_type.as_deref(),
        block.assigned_resource_id.as_deref(),
    ) {
        (Some(PUBLIC_NETWORK_RESOURCE), Some(id)) if !id.is_empty() => Attachment::PublicNetwork(id),
        (Some(resource_type), Some(resource_id)) if !resource_id.is_empty() => Attachment::Other {
            resource_type,
            resource_id,
        },
        _ => Attachment::Unattached,
    }
}

/// Whether the block is attached to exactly this public network
pub fn is_attached_to(block: &IpBlock, network_id: &str) -> bool {
    attachment_of(block) == Attachment::PublicNetwork(network_id)
}

/// Outcome of [`NetworkAttachment::ensure_attached`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    AlreadyAttached,
    Attached,
}

/// Attaches and detaches blocks to/from public networks
#[derive(Clone)]
pub struct NetworkAttachment {
    client: Arc<dyn PnapClientTrait>,
}

impl std::fmt::Debug for NetworkAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkAttachment")
            .field("base_url", &self.client.base_url())
            .finish()
    }
}

impl NetworkAttachment {
    pub fn new(client: Arc<dyn PnapClientTrait>) -> Self {
        Self { client }
    }

    /// Attach the block to `network_id` unless it already is
    ///
    /// A block attached anywhere else is a [`ControllerError::Conflict`].
    pub async fn ensure_attached(
        &self,
        block: &IpBlock,
        network_id: &str,
    ) -> Result<AttachOutcome, ControllerError> {
        match attachment_of(block) {
            Attachment::PublicNetwork(id) if id == network_id => {
                debug!("IP block {} already attached to {}", block.id, network_id);
                Ok(AttachOutcome::AlreadyAttached)
            }
            Attachment::PublicNetwork(other) => Err(ControllerError::Conflict(format!(
                "IP block {} is attached to public network {}, expected {}",
                block.id, other, network_id
            ))),
            Attachment::Other {
                resource_type,
                resource_id,
            } => Err(ControllerError::Conflict(format!(
                "IP block {} is assigned to {} {}, expected public network {}",
                block.id, resource_type, resource_id, network_id
            ))),
            Attachment::Unattached => {
                self.client.attach_ip_block(network_id, &block.id).await?;
                info!("Attached IP block {} ({}) to {}", block.id, block.cidr, network_id);
                Ok(AttachOutcome::Attached)
            }
        }
    }

    /// Detach the block from `network_id`; a block that is not there counts as detached
    pub async fn detach(&self, block: &IpBlock, network_id: &str) -> Result<(), ControllerError> {
        match self.client.detach_ip_block(network_id, &block.id).await {
            Ok(()) => {
                info!("Detached IP block {} ({}) from {}", block.id, block.cidr, network_id);
                Ok(())
            }
            Err(PnapError::NotFound(msg)) => {
                debug!(
                    "IP block {} not attached to {}, treating as detached: {}",
                    block.id, network_id, msg
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_block;
    use pnap_client::{IpBlockStatus, MockOperation, MockPnapClient};

    fn attached(block_id: &str, resource_type: &str, resource_id: &str) -> IpBlock {
        let mut block = create_test_block(block_id, "10.0.0.0/29", &[]);
        block.status = IpBlockStatus::Assigned;
        block.assigned_resource_type = Some(resource_type.to_string());
        block.assigned_resource_id = Some(resource_id.to_string());
        block
    }

    #[test]
    fn test_attachment_of() {
        let free = create_test_block("b1", "10.0.0.0/29", &[]);
        assert_eq!(attachment_of(&free), Attachment::Unattached);

        let on_net = attached("b1", PUBLIC_NETWORK_RESOURCE, "net1");
        assert_eq!(attachment_of(&on_net), Attachment::PublicNetwork("net1"));
        assert!(is_attached_to(&on_net, "net1"));
        assert!(!is_attached_to(&on_net, "net2"));

        let on_server = attached("b1", "server", "srv-1");
        assert!(matches!(attachment_of(&on_server), Attachment::Other { .. }));
    }

    #[tokio::test]
    async fn test_ensure_attached_is_noop_when_attached() {
        let client = MockPnapClient::new("http://mock");
        let network = NetworkAttachment::new(Arc::new(client.clone()));

        let block = attached("b1", PUBLIC_NETWORK_RESOURCE, "net1");
        let outcome = network.ensure_attached(&block, "net1").await.unwrap();
        assert_eq!(outcome, AttachOutcome::AlreadyAttached);
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_attached_conflicts_with_other_network() {
        let client = MockPnapClient::new("http://mock");
        let network = NetworkAttachment::new(Arc::new(client.clone()));

        let block = attached("b1", PUBLIC_NETWORK_RESOURCE, "net2");
        let err = network.ensure_attached(&block, "net1").await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));

        let block = attached("b1", "server", "srv-1");
        let err = network.ensure_attached(&block, "net1").await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_attached_attaches_free_block() {
        let client = MockPnapClient::new("http://mock");
        client.add_public_network("net1");
        let block = create_test_block("b1", "10.0.0.0/29", &[]);
        client.add_ip_block(block.clone());
        let network = NetworkAttachment::new(Arc::new(client.clone()));

        let outcome = network.ensure_attached(&block, "net1").await.unwrap();
        assert_eq!(outcome, AttachOutcome::Attached);
        assert_eq!(client.network_blocks("net1"), vec!["b1"]);
        assert!(is_attached_to(&client.ip_block("b1").unwrap(), "net1"));
    }

    #[tokio::test]
    async fn test_detach_tolerates_missing_attachment() {
        let client = MockPnapClient::new("http://mock");
        client.add_public_network("net1");
        let block = create_test_block("b1", "10.0.0.0/29", &[]);
        client.add_ip_block(block.clone());
        let network = NetworkAttachment::new(Arc::new(client.clone()));

        network.detach(&block, "net1").await.unwrap();
        assert_eq!(client.call_count(MockOperation::DetachIpBlock), 1);
    }

    #[tokio::test]
    async fn test_detach_propagates_transient_errors() {
        let client = MockPnapClient::new("http://mock");
        client.add_ip_block(attached("b1", PUBLIC_NETWORK_RESOURCE, "net1"));
        client.fail_next(MockOperation::DetachIpBlock);
        let network = NetworkAttachment::new(Arc::new(client.clone()));

        let block = client.ip_block("b1").unwrap();
        assert!(network.detach(&block, "net1").await.is_err());
        network.detach(&block, "net1").await.unwrap();
        assert_eq!(client.ip_block("b1").unwrap().status, IpBlockStatus::Unassigning);
    }
}
