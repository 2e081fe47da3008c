//! PnapClient trait for mocking
//!
//! This trait abstracts the PnapClient to enable mocking in unit tests.
//! The concrete PnapClient implements this trait, and tests use `MockPnapClient`.

use crate::error::PnapError;
use crate::models::*;

/// Trait for phoenixNAP API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait PnapClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Tag manager
    async fn list_tags(&self) -> Result<Vec<Tag>, PnapError>;
    async fn create_tag(&self, request: TagCreate) -> Result<Tag, PnapError>;

    // IP blocks
    /// List IP blocks carrying every given `(tag name, tag value)` pair
    async fn list_ip_blocks(&self, tags: &[(&str, &str)]) -> Result<Vec<IpBlock>, PnapError>;
    async fn get_ip_block(&self, id: &str) -> Result<IpBlock, PnapError>;
    async fn create_ip_block(&self, request: IpBlockCreate) -> Result<IpBlock, PnapError>;
    async fn delete_ip_block(&self, id: &str) -> Result<DeleteIpBlockResult, PnapError>;
    /// Replace the full tag set of an IP block
    async fn put_ip_block_tags(
        &self,
        id: &str,
        tags: Vec<TagAssignmentRequest>,
    ) -> Result<IpBlock, PnapError>;

    // Public networks
    async fn attach_ip_block(
        &self,
        network_id: &str,
        ip_block_id: &str,
    ) -> Result<PublicNetworkIpBlock, PnapError>;
    async fn detach_ip_block(&self, network_id: &str, ip_block_id: &str) -> Result<(), PnapError>;
}
