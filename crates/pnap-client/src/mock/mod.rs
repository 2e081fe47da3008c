//! Mock PnapClient for unit testing
//!
//! This module provides an in-memory implementation of `PnapClientTrait` that
//! behaves like the real API closely enough to test controllers against it.
//!
//! The mock is organized into domain-specific modules:
//! - `tags.rs` - tag manager (definitions)
//! - `ip_blocks.rs` - IP block reservation, tagging and deletion
//! - `networks.rs` - public network attach/detach
//!
//! Behaviour worth knowing when writing tests:
//! - new blocks are carved sequentially out of `10.0.0.0/8`, aligned to their size
//! - tag writes referencing an undefined tag name are rejected
//! - deleting a block that is not `unassigned` is rejected
//! - a detach leaves the block `unassigning`; `get_ip_block` reports
//!   `unassigning` once more and `unassigned` on the call after that (listing
//!   does not advance the transition)
//! - every call is counted and any operation can be made to fail once

mod ip_blocks;
mod networks;
mod tags;

use crate::error::PnapError;
use crate::models::*;
use crate::pnap_trait::PnapClientTrait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operations of the mock, for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    ListTags,
    CreateTag,
    ListIpBlocks,
    GetIpBlock,
    CreateIpBlock,
    DeleteIpBlock,
    PutIpBlockTags,
    AttachIpBlock,
    DetachIpBlock,
}

impl MockOperation {
    /// Whether the operation changes provider state
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            MockOperation::ListTags | MockOperation::ListIpBlocks | MockOperation::GetIpBlock
        )
    }
}

/// Mock PnapClient for testing
///
/// This mock stores resources in memory and can be configured to fail
/// specific operations for testing error paths.
#[derive(Clone, Debug)]
pub struct MockPnapClient {
    pub(crate) base_url: String,
    // In-memory storage for resources
    pub(crate) tags: Arc<Mutex<HashMap<String, Tag>>>,
    pub(crate) ip_blocks: Arc<Mutex<BTreeMap<String, IpBlock>>>,
    pub(crate) networks: Arc<Mutex<HashMap<String, HashSet<String>>>>,
    // Remaining gets for which a detached block still reports `unassigning`
    pub(crate) unassigning_reads: Arc<Mutex<HashMap<String, u32>>>,
    // Next free IPv4 address (as u32) for block allocation
    pub(crate) next_address: Arc<Mutex<u32>>,
    pub(crate) calls: Arc<Mutex<HashMap<MockOperation, usize>>>,
    pub(crate) failures: Arc<Mutex<HashMap<MockOperation, u32>>>,
}

/// Lock a mock store, ignoring poisoning from a panicked test thread
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPnapClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            tags: Arc::new(Mutex::new(HashMap::new())),
            ip_blocks: Arc::new(Mutex::new(BTreeMap::new())),
            networks: Arc::new(Mutex::new(HashMap::new())),
            unassigning_reads: Arc::new(Mutex::new(HashMap::new())),
            next_address: Arc::new(Mutex::new(u32::from_be_bytes([10, 0, 0, 0]))),
            calls: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Define a tag name (for test setup)
    pub fn add_tag(&self, name: &str) {
        lock(&self.tags).insert(name.to_string(), tags::new_tag(name, None));
    }

    /// Register a public network (for test setup)
    pub fn add_public_network(&self, network_id: &str) {
        lock(&self.networks)
            .entry(network_id.to_string())
            .or_default();
    }

    /// Insert an IP block as-is (for test setup)
    pub fn add_ip_block(&self, block: IpBlock) {
        if block.assigned_resource_type.as_deref() == Some(networks::PUBLIC_NETWORK) {
            if let Some(network_id) = &block.assigned_resource_id {
                lock(&self.networks)
                    .entry(network_id.clone())
                    .or_default()
                    .insert(block.id.clone());
            }
        }
        lock(&self.ip_blocks).insert(block.id.clone(), block);
    }

    /// Current state of a block without counting a call or advancing detach
    pub fn ip_block(&self, id: &str) -> Option<IpBlock> {
        lock(&self.ip_blocks).get(id).cloned()
    }

    /// All blocks without counting a call
    pub fn ip_blocks(&self) -> Vec<IpBlock> {
        lock(&self.ip_blocks).values().cloned().collect()
    }

    /// Names of all defined tags
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.tags).keys().cloned().collect();
        names.sort();
        names
    }

    /// Block ids attached to a public network
    pub fn network_blocks(&self, network_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.networks)
            .get(network_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Make the next call of `operation` fail with an API error
    pub fn fail_next(&self, operation: MockOperation) {
        *lock(&self.failures).entry(operation).or_insert(0) += 1;
    }

    /// Number of calls made for one operation
    pub fn call_count(&self, operation: MockOperation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    /// Number of state-changing calls made so far
    pub fn write_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    /// Forget recorded calls (for multi-phase tests)
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Count a call and consume an injected failure, if any
    pub(crate) fn begin(&self, operation: MockOperation) -> Result<(), PnapError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;

        let mut failures = lock(&self.failures);
        if let Some(remaining) = failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PnapError::Api(format!(
                    "injected failure for {:?}",
                    operation
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn new_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

#[async_trait::async_trait]
impl PnapClientTrait for MockPnapClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, PnapError> {
        tags::list_tags(self).await
    }

    async fn create_tag(&self, request: TagCreate) -> Result<Tag, PnapError> {
        tags::create_tag(self, request).await
    }

    async fn list_ip_blocks(&self, tags: &[(&str, &str)]) -> Result<Vec<IpBlock>, PnapError> {
        ip_blocks::list_ip_blocks(self, tags).await
    }

    async fn get_ip_block(&self, id: &str) -> Result<IpBlock, PnapError> {
        ip_blocks::get_ip_block(self, id).await
    }

    async fn create_ip_block(&self, request: IpBlockCreate) -> Result<IpBlock, PnapError> {
        ip_blocks::create_ip_block(self, request).await
    }

    async fn delete_ip_block(&self, id: &str) -> Result<DeleteIpBlockResult, PnapError> {
        ip_blocks::delete_ip_block(self, id).await
    }

    async fn put_ip_block_tags(
        &self,
        id: &str,
        tags: Vec<TagAssignmentRequest>,
    ) -> Result<IpBlock, PnapError> {
        ip_blocks::put_ip_block_tags(self, id, tags).await
    }

    async fn attach_ip_block(
        &self,
        network_id: &str,
        ip_block_id: &str,
    ) -> Result<PublicNetworkIpBlock, PnapError> {
        networks::attach_ip_block(self, network_id, ip_block_id).await
    }

    async fn detach_ip_block(&self, network_id: &str, ip_block_id: &str) -> Result<(), PnapError> {
        networks::detach_ip_block(self, network_id, ip_block_id).await
    }
}
