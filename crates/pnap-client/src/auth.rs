//! OAuth2 client-credentials authentication
//!
//! phoenixNAP issues short-lived bearer tokens from its Keycloak realm. The
//! token is cached and refreshed shortly before it expires so that every API
//! call does not pay for a token round trip.

use crate::error::PnapError;
use crate::models::TokenResponse;
use reqwest::Client;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Default token endpoint of the phoenixNAP BMC realm
pub const DEFAULT_TOKEN_URL: &str =
    "https://auth.phoenixnap.com/auth/realms/BMC/protocol/openid-connect/token";

/// Scopes needed for tags, IP blocks and networks
pub const DEFAULT_SCOPES: &str = "bmc bmc.read tags tags.read";

/// Tokens are refreshed this long before their reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// OAuth2 client credentials
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub scopes: String,
}

impl ClientCredentials {
    /// Credentials against the default token endpoint and scopes
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
        }
    }

    /// Override the token endpoint
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"********")
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Fetches and caches bearer tokens
pub struct TokenSource {
    client: Client,
    credentials: ClientCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenSource {
    pub fn new(client: Client, credentials: ClientCredentials) -> Self {
        Self {
            client,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Client id these tokens are issued for
    pub fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    /// Return a valid access token, fetching a new one when needed
    pub async fn access_token(&self) -> Result<String, PnapError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drop the cached token so the next call fetches a fresh one
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn fetch(&self) -> Result<CachedToken, PnapError> {
        debug!("Requesting access token from {}", self.credentials.token_url);

        let response = self
            .client
            .post(&self.credentials.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.credentials.scopes.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(PnapError::Authentication(format!(
                "token request rejected: {} - {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PnapError::Api(format!(
                "token request failed: {} - {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}
