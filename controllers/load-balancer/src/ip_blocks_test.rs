//! Tests for the IP block registry

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::ip_blocks::{BLOCK_DESCRIPTION, BlockFilter, IpBlockRegistry};
    use crate::service::ServiceRef;
    use crate::tags::{DELETED_TAG, VOCABULARY};
    use crate::test_utils::{TEST_CLUSTER, create_test_block, service_tags};
    use pnap_client::{IpBlock, MockOperation, MockPnapClient};
    use std::sync::Arc;

    fn setup() -> (MockPnapClient, IpBlockRegistry) {
        let client = MockPnapClient::new("http://mock");
        for name in VOCABULARY {
            client.add_tag(name);
        }
        let registry = IpBlockRegistry::new(Arc::new(client.clone()), TEST_CLUSTER);
        (client, registry)
    }

    fn owned_block(id: &str, cidr: &str, service: &ServiceRef, deleted: bool) -> IpBlock {
        let mut tags = service_tags(service);
        if deleted {
            tags.push((DELETED_TAG, "2026-01-01T00:00:00+00:00".to_string()));
        }
        let tags: Vec<(&str, &str)> = tags.iter().map(|(k, v)| (*k, v.as_str())).collect();
        create_test_block(id, cidr, &tags)
    }

    fn ids(blocks: &[IpBlock]) -> Vec<&str> {
        blocks.iter().map(|b| b.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_find_filters_by_service_and_marker() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");
        let svc_b = ServiceRef::new("ns1", "svc-b");
        client.add_ip_block(owned_block("a-live", "10.0.0.0/29", &svc_a, false));
        client.add_ip_block(owned_block("a-gone", "10.0.0.8/29", &svc_a, true));
        client.add_ip_block(owned_block("b-live", "10.0.0.16/29", &svc_b, false));

        let active = registry.find(Some(&svc_a), BlockFilter::Active).await.unwrap();
        assert_eq!(ids(&active), vec!["a-live"]);

        let deleted = registry.find(None, BlockFilter::Deleted).await.unwrap();
        assert_eq!(ids(&deleted), vec!["a-gone"]);

        let active = registry.find(None, BlockFilter::Active).await.unwrap();
        assert_eq!(ids(&active), vec!["a-live", "b-live"]);

        let all = registry.find(None, BlockFilter::Any).await.unwrap();
        assert_eq!(ids(&all), vec!["a-gone", "a-live", "b-live"]);
    }

    #[tokio::test]
    async fn test_find_one_active() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");

        assert!(registry.find_one_active(&svc_a).await.unwrap().is_none());

        client.add_ip_block(owned_block("b1", "10.0.0.0/29", &svc_a, false));
        let found = registry.find_one_active(&svc_a).await.unwrap().unwrap();
        assert_eq!(found.id, "b1");

        client.add_ip_block(owned_block("b2", "10.0.0.8/29", &svc_a, false));
        let err = registry.find_one_active(&svc_a).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_tags_block() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");

        let block = registry.create("ASH", &svc_a).await.unwrap();
        assert_eq!(block.cidr_block_size, "/29");
        assert_eq!(block.description.as_deref(), Some(BLOCK_DESCRIPTION));
        assert_eq!(block.tag_value("usage"), Some("cloud-provider-phoenixnap-auto"));
        assert_eq!(block.tag_value("cluster"), Some(TEST_CLUSTER));
        assert_eq!(block.tag_value("service"), Some("ns1.svc-a"));
        assert_eq!(client.call_count(MockOperation::CreateIpBlock), 1);
        assert_eq!(client.call_count(MockOperation::PutIpBlockTags), 1);
    }

    #[tokio::test]
    async fn test_create_tag_failure_leaves_orphan() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");
        client.fail_next(MockOperation::PutIpBlockTags);

        assert!(registry.create("ASH", &svc_a).await.is_err());

        assert!(registry.find_one_active(&svc_a).await.unwrap().is_none());
        let orphans = registry.find_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert!(orphans[0].tags.is_empty());
    }

    #[tokio::test]
    async fn test_mark_deleted_keeps_tags_and_is_idempotent() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");
        client.add_ip_block(owned_block("b1", "10.0.0.0/29", &svc_a, false));
        let block = client.ip_block("b1").unwrap();

        let marked = registry.mark_deleted(&block).await.unwrap();
        assert!(marked.has_tag(DELETED_TAG));
        assert_eq!(marked.tag_value("service"), Some("ns1.svc-a"));
        assert_eq!(marked.tags.len(), 4);
        assert!(
            chrono::DateTime::parse_from_rfc3339(marked.tag_value(DELETED_TAG).unwrap()).is_ok()
        );

        client.reset_calls();
        registry.mark_deleted(&marked).await.unwrap();
        assert_eq!(client.write_count(), 0);

        // Staged blocks are no longer active
        assert!(registry.find_one_active(&svc_a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_and_delete() {
        let (client, registry) = setup();
        let svc_a = ServiceRef::new("ns1", "svc-a");
        client.add_ip_block(owned_block("b1", "10.0.0.0/29", &svc_a, true));

        let block = registry.refresh("b1").await.unwrap().unwrap();
        registry.delete(&block).await.unwrap();

        assert!(registry.refresh("b1").await.unwrap().is_none());
        assert!(matches!(
            registry.delete(&block).await,
            Err(ControllerError::Pnap(_))
        ));
    }
}
