//! phoenixNAP Bare Metal Cloud API Client
//!
//! A Rust client library for the parts of the phoenixNAP REST API that a
//! load balancer controller needs: the tag manager, IP blocks and public
//! networks.
//!
//! # Example
//!
//! ```no_run
//! use pnap_client::{ClientCredentials, IpBlockCreate, PnapClient, PnapClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = PnapClient::new(
//!     "https://api.phoenixnap.com".to_string(),
//!     ClientCredentials::new("client-id", "client-secret"),
//! )?;
//!
//! // Blocks created by this controller for one cluster
//! let blocks = client
//!     .list_ip_blocks(&[("usage", "cloud-provider-phoenixnap-auto"), ("cluster", "c1")])
//!     .await?;
//!
//! // Reserve a new /29
//! let block = client
//!     .create_ip_block(IpBlockCreate::new("ASH", "/29", Some("example".to_string())))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Tag Manager**: list and create tag definitions
//! - **IP Blocks**: list by tag, create, delete, replace tag assignments
//! - **Public Networks**: attach and detach IP blocks
//! - **OAuth2**: client-credentials tokens, cached until shortly before expiry

pub mod auth;
pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod pnap_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use auth::{ClientCredentials, TokenSource};
pub use client::{DEFAULT_BASE_URL, PnapClient};
pub use common::HttpClient;
pub use error::PnapError;
pub use models::*;
pub use pnap_trait::PnapClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockOperation, MockPnapClient};
