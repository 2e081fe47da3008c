//! phoenixNAP API client
//!
//! Implements the REST calls used for IP block lifecycle management:
//! `/tag-manager/v1/tags`, `/ips/v1/ip-blocks` and
//! `/networks/v1/public-networks/{id}/ip-blocks`.

use crate::auth::{ClientCredentials, TokenSource};
use crate::common::HttpClient;
use crate::error::PnapError;
use crate::models::*;
use crate::pnap_trait::PnapClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.phoenixnap.com";

const USER_AGENT: &str = concat!("pnap-lb/", env!("CARGO_PKG_VERSION"));

/// phoenixNAP API client
#[derive(Debug)]
pub struct PnapClient {
    http: HttpClient,
}

impl PnapClient {
    /// Create a new phoenixNAP client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.phoenixnap.com")
    /// * `credentials` - OAuth2 client credentials used to obtain bearer tokens
    pub fn new(base_url: String, credentials: ClientCredentials) -> Result<Self, PnapError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(PnapError::Http)?;

        let tokens = TokenSource::new(client.clone(), credentials);
        Ok(Self {
            http: HttpClient::new(client, base_url, tokens),
        })
    }

    /// Obtain a token to verify the credentials before any other call.
    ///
    /// # Returns
    /// * `Ok(())` - Credentials were accepted by the token endpoint
    /// * `Err(PnapError)` - Credentials are invalid or the endpoint is unreachable
    pub async fn validate_credentials(&self) -> Result<(), PnapError> {
        debug!(
            "Validating phoenixNAP credentials for client {}",
            self.http.tokens().client_id()
        );
        self.http.tokens().access_token().await?;
        debug!("Credentials validated successfully");
        Ok(())
    }

    /// Build the `?tag=name.value&tag=...` query for tag filters
    fn tag_query(tags: &[(&str, &str)]) -> String {
        if tags.is_empty() {
            return String::new();
        }
        let params: Vec<String> = tags
            .iter()
            .map(|(name, value)| {
                format!("tag={}", urlencoding::encode(&format!("{}.{}", name, value)))
            })
            .collect();
        format!("?{}", params.join("&"))
    }
}

#[async_trait::async_trait]
impl PnapClientTrait for PnapClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, PnapError> {
        self.http.get("/tag-manager/v1/tags").await
    }

    async fn create_tag(&self, request: TagCreate) -> Result<Tag, PnapError> {
        let body = serde_json::to_value(&request)?;
        self.http.post("/tag-manager/v1/tags", &body).await
    }

    async fn list_ip_blocks(&self, tags: &[(&str, &str)]) -> Result<Vec<IpBlock>, PnapError> {
        let path = format!("/ips/v1/ip-blocks{}", Self::tag_query(tags));
        self.http.get(&path).await
    }

    async fn get_ip_block(&self, id: &str) -> Result<IpBlock, PnapError> {
        self.http
            .get(&format!("/ips/v1/ip-blocks/{}", urlencoding::encode(id)))
            .await
    }

    async fn create_ip_block(&self, request: IpBlockCreate) -> Result<IpBlock, PnapError> {
        let body = serde_json::to_value(&request)?;
        self.http.post("/ips/v1/ip-blocks", &body).await
    }

    async fn delete_ip_block(&self, id: &str) -> Result<DeleteIpBlockResult, PnapError> {
        let path = format!("/ips/v1/ip-blocks/{}", urlencoding::encode(id));
        self.http.delete(&path).await?;
        Ok(DeleteIpBlockResult {
            result: "IP Block has been deleted.".to_string(),
            ip_block_id: id.to_string(),
        })
    }

    async fn put_ip_block_tags(
        &self,
        id: &str,
        tags: Vec<TagAssignmentRequest>,
    ) -> Result<IpBlock, PnapError> {
        let path = format!("/ips/v1/ip-blocks/{}/tags", urlencoding::encode(id));
        let body = serde_json::to_value(&tags)?;
        self.http.put(&path, &body).await
    }

    async fn attach_ip_block(
        &self,
        network_id: &str,
        ip_block_id: &str,
    ) -> Result<PublicNetworkIpBlock, PnapError> {
        let path = format!(
            "/networks/v1/public-networks/{}/ip-blocks",
            urlencoding::encode(network_id)
        );
        let body = serde_json::to_value(PublicNetworkIpBlockCreate {
            id: ip_block_id.to_string(),
        })?;
        self.http.post(&path, &body).await
    }

    async fn detach_ip_block(&self, network_id: &str, ip_block_id: &str) -> Result<(), PnapError> {
        let path = format!(
            "/networks/v1/public-networks/{}/ip-blocks/{}",
            urlencoding::encode(network_id),
            urlencoding::encode(ip_block_id)
        );
        self.http.delete(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_query_encodes_each_pair() {
        assert_eq!(PnapClient::tag_query(&[]), "");
        assert_eq!(
            PnapClient::tag_query(&[("usage", "auto"), ("service", "ns1.svc a")]),
            "?tag=usage.auto&tag=service.ns1.svc%20a"
        );
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = PnapClient::new(
            "https://api.phoenixnap.com/".to_string(),
            ClientCredentials::new("id", "secret"),
        )
        .unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }
}
