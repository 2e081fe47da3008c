//! Integration tests for the phoenixNAP client
//!
//! These tests talk to the real API and create billable resources.
//! Set PNAP_CLIENT_ID, PNAP_CLIENT_SECRET and PNAP_LOCATION to run them.

use pnap_client::{ClientCredentials, IpBlockCreate, PnapClient, PnapClientTrait};

fn client_from_env() -> PnapClient {
    let id = std::env::var("PNAP_CLIENT_ID").expect("PNAP_CLIENT_ID environment variable must be set");
    let secret = std::env::var("PNAP_CLIENT_SECRET")
        .expect("PNAP_CLIENT_SECRET environment variable must be set");
    let url = std::env::var("PNAP_BASE_URL")
        .unwrap_or_else(|_| "https://api.phoenixnap.com".to_string());

    PnapClient::new(url, ClientCredentials::new(id, secret)).expect("Failed to create client")
}

#[tokio::test]
#[ignore] // Requires phoenixNAP credentials
async fn test_validate_credentials() {
    let client = client_from_env();
    client
        .validate_credentials()
        .await
        .expect("Credentials were rejected");
}

#[tokio::test]
#[ignore]
async fn test_list_tags() {
    let client = client_from_env();
    let tags = client.list_tags().await.expect("Failed to list tags");
    println!("Found {} tags", tags.len());
}

#[tokio::test]
#[ignore]
async fn test_list_ip_blocks_by_tag() {
    let client = client_from_env();
    let blocks = client
        .list_ip_blocks(&[("usage", "cloud-provider-phoenixnap-auto")])
        .await
        .expect("Failed to list IP blocks");
    println!("Found {} controller-owned IP blocks", blocks.len());
}

#[tokio::test]
#[ignore]
async fn test_create_and_delete_ip_block() {
    let client = client_from_env();
    let location = std::env::var("PNAP_LOCATION").unwrap_or_else(|_| "PHX".to_string());

    let block = client
        .create_ip_block(IpBlockCreate::new(
            location,
            "/29",
            Some("pnap-client integration test".to_string()),
        ))
        .await
        .expect("Failed to create IP block");
    println!("Created IP block {} ({})", block.id, block.cidr);

    let fetched = client
        .get_ip_block(&block.id)
        .await
        .expect("Failed to fetch IP block");
    assert_eq!(fetched.cidr, block.cidr);

    client
        .delete_ip_block(&block.id)
        .await
        .expect("Failed to delete IP block");
}
