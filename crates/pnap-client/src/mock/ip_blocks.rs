//! IP block operations for MockPnapClient

use super::{MockOperation, MockPnapClient, lock, tags};
use crate::error::PnapError;
use crate::models::*;
use std::net::Ipv4Addr;

/// Apply a pending detach transition as part of a single-block read
fn settle(client: &MockPnapClient, block: &mut IpBlock) {
    if block.status != IpBlockStatus::Unassigning {
        return;
    }

    let mut pending = lock(&client.unassigning_reads);
    match pending.get_mut(&block.id) {
        Some(remaining) if *remaining > 0 => *remaining -= 1,
        _ => {
            pending.remove(&block.id);
            block.status = IpBlockStatus::Unassigned;
            block.assigned_resource_id = None;
            block.assigned_resource_type = None;
        }
    }
}

fn matches_tags(block: &IpBlock, filters: &[(&str, &str)]) -> bool {
    filters
        .iter()
        .all(|(name, value)| block.tag_value(name) == Some(*value))
}

pub async fn list_ip_blocks(
    client: &MockPnapClient,
    filters: &[(&str, &str)],
) -> Result<Vec<IpBlock>, PnapError> {
    client.begin(MockOperation::ListIpBlocks)?;

    Ok(lock(&client.ip_blocks)
        .values()
        .filter(|block| matches_tags(block, filters))
        .cloned()
        .collect())
}

pub async fn get_ip_block(client: &MockPnapClient, id: &str) -> Result<IpBlock, PnapError> {
    client.begin(MockOperation::GetIpBlock)?;

    let mut blocks = lock(&client.ip_blocks);
    let block = blocks
        .get_mut(id)
        .ok_or_else(|| PnapError::NotFound(format!("IP block {} not found", id)))?;
    settle(client, block);
    Ok(block.clone())
}

/// Parse "/29" into a prefix length usable for IPv4
fn prefix_len(cidr_block_size: &str) -> Result<u32, PnapError> {
    cidr_block_size
        .trim_start_matches('/')
        .parse::<u32>()
        .ok()
        .filter(|len| (22..=31).contains(len))
        .ok_or_else(|| {
            PnapError::InvalidRequest(format!(
                "Unsupported CIDR block size {}",
                cidr_block_size
            ))
        })
}

pub async fn create_ip_block(
    client: &MockPnapClient,
    request: IpBlockCreate,
) -> Result<IpBlock, PnapError> {
    client.begin(MockOperation::CreateIpBlock)?;

    if request.location.is_empty() {
        return Err(PnapError::InvalidRequest("location is required".to_string()));
    }
    let len = prefix_len(&request.cidr_block_size)?;
    tags::validate_assignments(client, &request.tags)?;

    let size = 1u32 << (32 - len);
    let network = {
        let mut next = lock(&client.next_address);
        let aligned = next.div_ceil(size) * size;
        *next = aligned + size;
        Ipv4Addr::from(aligned)
    };

    let block = IpBlock {
        id: client.new_id(),
        location: request.location,
        cidr_block_size: request.cidr_block_size,
        cidr: format!("{}/{}", network, len),
        ip_version: Some("V4".to_string()),
        status: IpBlockStatus::Unassigned,
        assigned_resource_id: None,
        assigned_resource_type: None,
        description: request.description,
        tags: tags::to_assignments(client, request.tags),
        is_bring_your_own: false,
        created_on: Some(chrono::Utc::now().to_rfc3339()),
    };

    lock(&client.ip_blocks).insert(block.id.clone(), block.clone());
    Ok(block)
}

pub async fn delete_ip_block(
    client: &MockPnapClient,
    id: &str,
) -> Result<DeleteIpBlockResult, PnapError> {
    client.begin(MockOperation::DeleteIpBlock)?;

    let mut blocks = lock(&client.ip_blocks);
    let block = blocks
        .get(id)
        .ok_or_else(|| PnapError::NotFound(format!("IP block {} not found", id)))?;
    if block.status != IpBlockStatus::Unassigned {
        return Err(PnapError::InvalidRequest(format!(
            "IP block {} is {} and cannot be deleted",
            id, block.status
        )));
    }

    blocks.remove(id);
    Ok(DeleteIpBlockResult {
        result: "IP Block has been deleted.".to_string(),
        ip_block_id: id.to_string(),
    })
}

pub async fn put_ip_block_tags(
    client: &MockPnapClient,
    id: &str,
    requests: Vec<TagAssignmentRequest>,
) -> Result<IpBlock, PnapError> {
    client.begin(MockOperation::PutIpBlockTags)?;
    tags::validate_assignments(client, &requests)?;
    let assignments = tags::to_assignments(client, requests);

    let mut blocks = lock(&client.ip_blocks);
    let block = blocks
        .get_mut(id)
        .ok_or_else(|| PnapError::NotFound(format!("IP block {} not found", id)))?;
    block.tags = assignments;
    Ok(block.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pnap_trait::PnapClientTrait;

    #[tokio::test]
    async fn test_blocks_are_allocated_sequentially() {
        let client = MockPnapClient::new("http://mock");
        let first = client
            .create_ip_block(IpBlockCreate::new("ASH", "/29", None))
            .await
            .unwrap();
        let second = client
            .create_ip_block(IpBlockCreate::new("ASH", "/29", None))
            .await
            .unwrap();

        assert_eq!(first.cidr, "10.0.0.0/29");
        assert_eq!(second.cidr, "10.0.0.8/29");
        assert_eq!(first.status, IpBlockStatus::Unassigned);
    }

    #[tokio::test]
    async fn test_tag_write_requires_defined_tags() {
        let client = MockPnapClient::new("http://mock");
        let block = client
            .create_ip_block(IpBlockCreate::new("ASH", "/29", None))
            .await
            .unwrap();

        let result = client
            .put_ip_block_tags(&block.id, vec![TagAssignmentRequest::new("cluster", "c1")])
            .await;
        assert!(matches!(result, Err(PnapError::InvalidRequest(_))));

        client.add_tag("cluster");
        let tagged = client
            .put_ip_block_tags(&block.id, vec![TagAssignmentRequest::new("cluster", "c1")])
            .await
            .unwrap();
        assert_eq!(tagged.tag_value("cluster"), Some("c1"));
    }

    #[tokio::test]
    async fn test_list_filters_on_every_tag() {
        let client = MockPnapClient::new("http://mock");
        client.add_tag("cluster");
        client.add_tag("service");

        for (cluster, service) in [("c1", "ns.a"), ("c1", "ns.b"), ("c2", "ns.a")] {
            let block = client
                .create_ip_block(IpBlockCreate::new("ASH", "/29", None))
                .await
                .unwrap();
            client
                .put_ip_block_tags(
                    &block.id,
                    vec![
                        TagAssignmentRequest::new("cluster", cluster),
                        TagAssignmentRequest::new("service", service),
                    ],
                )
                .await
                .unwrap();
        }

        assert_eq!(client.list_ip_blocks(&[]).await.unwrap().len(), 3);
        assert_eq!(client.list_ip_blocks(&[("cluster", "c1")]).await.unwrap().len(), 2);
        assert_eq!(
            client
                .list_ip_blocks(&[("cluster", "c1"), ("service", "ns.a")])
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
