//! IP block registry.
//!
//! Finds, creates and stages for deletion the `/29` blocks owned by this
//! cluster. Ownership lives entirely in provider-side tags:
//! `usage`, `cluster` and `service` select a service's blocks, and the
//! presence of `deleted` separates active blocks from staged ones.

use crate::error::ControllerError;
use crate::service::ServiceRef;
use crate::tags::{CLUSTER_TAG, DELETED_TAG, SERVICE_TAG, USAGE_TAG, USAGE_VALUE};
use pnap_client::{IpBlock, IpBlockCreate, PnapClientTrait, PnapError, TagAssignmentRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Size of every block reserved for a service
pub const BLOCK_SIZE: &str = "/29";

/// Description carried by every block this controller creates
pub const BLOCK_DESCRIPTION: &str =
    "phoenixNAP Kubernetes load balancer controller auto-generated block";

/// Which blocks a lookup returns, by presence of the delete marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter {
    Active,
    Deleted,
    Any,
}

impl BlockFilter {
    fn accepts(self, block: &IpBlock) -> bool {
        match self {
            BlockFilter::Active => !block.has_tag(DELETED_TAG),
            BlockFilter::Deleted => block.has_tag(DELETED_TAG),
            BlockFilter::Any => true,
        }
    }
}

/// Tag-addressed view of the cluster's IP blocks
#[derive(Clone)]
pub struct IpBlockRegistry {
    client: Arc<dyn PnapClientTrait>,
    cluster_id: String,
}

impl std::fmt::Debug for IpBlockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpBlockRegistry")
            .field("base_url", &self.client.base_url())
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

impl IpBlockRegistry {
    pub fn new(client: Arc<dyn PnapClientTrait>, cluster_id: impl Into<String>) -> Self {
        Self {
            client,
            cluster_id: cluster_id.into(),
        }
    }

    /// Tags identifying the blocks of one service, or of the whole cluster
    fn ownership_tags(&self, service: Option<&ServiceRef>) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            (USAGE_TAG, USAGE_VALUE.to_string()),
            (CLUSTER_TAG, self.cluster_id.clone()),
        ];
        if let Some(service) = service {
            tags.push((SERVICE_TAG, service.tag_value()));
        }
        tags
    }

    /// Blocks owned by `service` (or by any service of the cluster when `None`)
    ///
    /// The result may hold more than one active block for a service; callers
    /// decide whether that is an error.
    pub async fn find(
        &self,
        service: Option<&ServiceRef>,
        filter: BlockFilter,
    ) -> Result<Vec<IpBlock>, ControllerError> {
        let tags = self.ownership_tags(service);
        let predicate: Vec<(&str, &str)> = tags.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let blocks = self.client.list_ip_blocks(&predicate).await?;
        let matched: Vec<IpBlock> = blocks.into_iter().filter(|b| filter.accepts(b)).collect();
        debug!(
            "Found {} {:?} block(s) for {}",
            matched.len(),
            filter,
            service.map_or_else(|| format!("cluster {}", self.cluster_id), ToString::to_string)
        );
        Ok(matched)
    }

    /// The single active block of a service, if any
    ///
    /// More than one active block is a [`ControllerError::Conflict`].
    pub async fn find_one_active(
        &self,
        service: &ServiceRef,
    ) -> Result<Option<IpBlock>, ControllerError> {
        let mut blocks = self.find(Some(service), BlockFilter::Active).await?;
        if blocks.len() > 1 {
            let ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
            return Err(ControllerError::Conflict(format!(
                "service {} has {} active IP blocks: {}",
                service,
                blocks.len(),
                ids.join(", ")
            )));
        }
        Ok(blocks.pop())
    }

    /// Reserve a new block for a service and tag it
    ///
    /// The block is created first and tagged in a second call. If the tag
    /// write fails the block exists untagged; it is reported by the garbage
    /// collector's orphan scan.
    pub async fn create(
        &self,
        location: &str,
        service: &ServiceRef,
    ) -> Result<IpBlock, ControllerError> {
        let block = self
            .client
            .create_ip_block(IpBlockCreate::new(
                location,
                BLOCK_SIZE,
                Some(BLOCK_DESCRIPTION.to_string()),
            ))
            .await?;
        info!(
            "Created IP block {} ({}) in {} for {}",
            block.id, block.cidr, location, service
        );

        let tags = self
            .ownership_tags(Some(service))
            .into_iter()
            .map(|(name, value)| TagAssignmentRequest::new(name, value))
            .collect();

        match self.client.put_ip_block_tags(&block.id, tags).await {
            Ok(tagged) => Ok(tagged),
            Err(e) => {
                warn!(
                    "IP block {} was created for {} but could not be tagged; it is now orphaned: {}",
                    block.id, service, e
                );
                Err(e.into())
            }
        }
    }

    /// Stage a block for deletion by adding the delete marker
    ///
    /// Writes the full current tag set plus the marker. No-op when the marker
    /// is already present.
    pub async fn mark_deleted(&self, block: &IpBlock) -> Result<IpBlock, ControllerError> {
        if block.has_tag(DELETED_TAG) {
            debug!("IP block {} already marked for deletion", block.id);
            return Ok(block.clone());
        }

        let mut tags: Vec<TagAssignmentRequest> =
            block.tags.iter().map(TagAssignmentRequest::from).collect();
        tags.push(TagAssignmentRequest::new(
            DELETED_TAG,
            chrono::Utc::now().to_rfc3339(),
        ));

        let marked = self.client.put_ip_block_tags(&block.id, tags).await?;
        info!("Marked IP block {} ({}) for deletion", block.id, block.cidr);
        Ok(marked)
    }

    /// Current state of one block; `None` once it no longer exists
    pub async fn refresh(&self, block_id: &str) -> Result<Option<IpBlock>, ControllerError> {
        match self.client.get_ip_block(block_id).await {
            Ok(block) => Ok(Some(block)),
            Err(PnapError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Permanently delete a block; the provider requires it to be unassigned
    pub async fn delete(&self, block: &IpBlock) -> Result<(), ControllerError> {
        self.client.delete_ip_block(&block.id).await?;
        info!("Deleted IP block {} ({})", block.id, block.cidr);
        Ok(())
    }

    /// Untagged blocks carrying this controller's description
    pub async fn find_orphans(&self) -> Result<Vec<IpBlock>, PnapError> {
        let blocks = self.client.list_ip_blocks(&[]).await?;
        Ok(blocks
            .into_iter()
            .filter(|b| b.tags.is_empty() && b.description.as_deref() == Some(BLOCK_DESCRIPTION))
            .collect())
    }
}
