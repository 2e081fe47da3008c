//! Public network operations for MockPnapClient

use super::{MockOperation, MockPnapClient, lock};
use crate::error::PnapError;
use crate::models::*;

/// `assignedResourceType` of a block attached to a public network
pub(crate) const PUBLIC_NETWORK: &str = "public-network";

/// Gets for which a detached block keeps reporting `unassigning`
const UNASSIGNING_READS: u32 = 1;

pub async fn attach_ip_block(
    client: &MockPnapClient,
    network_id: &str,
    ip_block_id: &str,
) -> Result<PublicNetworkIpBlock, PnapError> {
    client.begin(MockOperation::AttachIpBlock)?;

    let mut networks = lock(&client.networks);
    let attached = networks
        .get_mut(network_id)
        .ok_or_else(|| PnapError::NotFound(format!("Public network {} not found", network_id)))?;

    let mut blocks = lock(&client.ip_blocks);
    let block = blocks
        .get_mut(ip_block_id)
        .ok_or_else(|| PnapError::NotFound(format!("IP block {} not found", ip_block_id)))?;
    if block.status != IpBlockStatus::Unassigned {
        return Err(PnapError::InvalidRequest(format!(
            "IP block {} is {} and cannot be assigned",
            ip_block_id, block.status
        )));
    }

    block.status = IpBlockStatus::Assigned;
    block.assigned_resource_id = Some(network_id.to_string());
    block.assigned_resource_type = Some(PUBLIC_NETWORK.to_string());
    attached.insert(ip_block_id.to_string());

    Ok(PublicNetworkIpBlock {
        id: ip_block_id.to_string(),
        cidr: Some(block.cidr.clone()),
        used_ips_count: Some("0".to_string()),
    })
}

pub async fn detach_ip_block(
    client: &MockPnapClient,
    network_id: &str,
    ip_block_id: &str,
) -> Result<(), PnapError> {
    client.begin(MockOperation::DetachIpBlock)?;

    let mut networks = lock(&client.networks);
    let attached = networks
        .get_mut(network_id)
        .ok_or_else(|| PnapError::NotFound(format!("Public network {} not found", network_id)))?;
    if !attached.remove(ip_block_id) {
        return Err(PnapError::NotFound(format!(
            "IP block {} is not assigned to public network {}",
            ip_block_id, network_id
        )));
    }

    if let Some(block) = lock(&client.ip_blocks).get_mut(ip_block_id) {
        block.status = IpBlockStatus::Unassigning;
        lock(&client.unassigning_reads).insert(ip_block_id.to_string(), UNASSIGNING_READS);
    }
    Ok(())
}
