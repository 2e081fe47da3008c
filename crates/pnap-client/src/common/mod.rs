//! Common utilities for the phoenixNAP API client
//!
//! Provides the authenticated request helpers used by every API group.

use crate::auth::TokenSource;
use crate::error::PnapError;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client wrapper with bearer authentication
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    tokens: TokenSource,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, tokens: TokenSource) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Get authorization header value
    pub async fn auth_header(&self) -> Result<String, PnapError> {
        Ok(format!("Bearer {}", self.tokens.access_token().await?))
    }

    /// Get the token source
    pub fn tokens(&self) -> &TokenSource {
        &self.tokens
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PnapError> {
        let response = request
            .header("Authorization", self.auth_header().await?)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(PnapError::Http)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Token revoked or expired early; the next call fetches a new one.
            self.tokens.invalidate().await;
        }
        Ok(response)
    }

    async fn check(
        method: &Method,
        path: &str,
        response: Response,
    ) -> Result<Response, PnapError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => {
                PnapError::NotFound(format!("Resource not found: {} - {}", path, body))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PnapError::Authentication(
                format!("{} {} rejected: {} - {}", method, path, status, body),
            ),
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                PnapError::InvalidRequest(format!(
                    "{} {} failed: {} - {}",
                    method, path, status, body
                ))
            }
            _ => PnapError::Api(format!("{} {} failed: {} - {}", method, path, status, body)),
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, PnapError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            PnapError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, PnapError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self.send(self.client.get(&url)).await?;
        let response = Self::check(&Method::GET, path, response).await?;
        Self::decode(response).await
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PnapError> {
        let url = self.build_url(path);
        debug!("POST {} with body: {}", url, body);

        let response = self.send(self.client.post(&url).json(body)).await?;
        let response = Self::check(&Method::POST, path, response).await?;
        Self::decode(response).await
    }

    /// Make a PUT request
    pub async fn put<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PnapError> {
        let url = self.build_url(path);
        debug!("PUT {} with body: {}", url, body);

        let response = self.send(self.client.put(&url).json(body)).await?;
        let response = Self::check(&Method::PUT, path, response).await?;
        Self::decode(response).await
    }

    /// Make a DELETE request, discarding any response body
    pub async fn delete(&self, path: &str) -> Result<(), PnapError> {
        let url = self.build_url(path);
        debug!("DELETE {}", url);

        let response = self.send(self.client.delete(&url)).await?;
        Self::check(&Method::DELETE, path, response).await?;
        Ok(())
    }
}
