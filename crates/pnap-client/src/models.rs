//! phoenixNAP API models
//!
//! These models match the JSON bodies of the tag manager (`/tag-manager/v1`),
//! IP (`/ips/v1`) and networks (`/networks/v1`) APIs. Field names on the wire
//! are camelCase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag definition from the tag manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_billing_tag: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Request body for creating a tag definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_billing_tag: bool,
}

impl TagCreate {
    /// A non-billing tag definition
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
            is_billing_tag: false,
        }
    }
}

/// Tag assignment as returned on a resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TagAssignment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub is_billing_tag: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Tag assignment as sent when replacing a resource's tags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagAssignmentRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TagAssignmentRequest {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl From<&TagAssignment> for TagAssignmentRequest {
    fn from(tag: &TagAssignment) -> Self {
        Self {
            name: tag.name.clone(),
            value: tag.value.clone(),
        }
    }
}

/// IP block lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IpBlockStatus {
    #[serde(rename = "creating")]
    Creating,
    #[serde(rename = "assigning")]
    Assigning,
    #[serde(rename = "error assigning")]
    ErrorAssigning,
    #[serde(rename = "assigned")]
    Assigned,
    #[serde(rename = "unassigning")]
    Unassigning,
    #[serde(rename = "error unassigning")]
    ErrorUnassigning,
    #[serde(rename = "unassigned")]
    Unassigned,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for IpBlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpBlockStatus::Creating => "creating",
            IpBlockStatus::Assigning => "assigning",
            IpBlockStatus::ErrorAssigning => "error assigning",
            IpBlockStatus::Assigned => "assigned",
            IpBlockStatus::Unassigning => "unassigning",
            IpBlockStatus::ErrorUnassigning => "error unassigning",
            IpBlockStatus::Unassigned => "unassigned",
            IpBlockStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// IP block model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpBlock {
    pub id: String,
    pub location: String,
    /// e.g. "/29"
    pub cidr_block_size: String,
    /// e.g. "198.51.100.8/29"
    pub cidr: String,
    #[serde(default)]
    pub ip_version: Option<String>,
    pub status: IpBlockStatus,
    #[serde(default)]
    pub assigned_resource_id: Option<String>,
    #[serde(default)]
    pub assigned_resource_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagAssignment>,
    #[serde(default)]
    pub is_bring_your_own: bool,
    #[serde(default)]
    pub created_on: Option<String>,
}

impl IpBlock {
    /// Value of the named tag, if assigned
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.value.as_deref())
    }

    /// Whether a tag with this name is assigned, with or without a value
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }
}

/// Request body for reserving an IP block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpBlockCreate {
    pub location: String,
    pub cidr_block_size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagAssignmentRequest>,
}

impl IpBlockCreate {
    pub fn new(
        location: impl Into<String>,
        cidr_block_size: impl Into<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            location: location.into(),
            cidr_block_size: cidr_block_size.into(),
            description,
            tags: Vec::new(),
        }
    }
}

/// Result of deleting an IP block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteIpBlockResult {
    pub result: String,
    pub ip_block_id: String,
}

/// Request body for attaching an IP block to a public network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicNetworkIpBlockCreate {
    pub id: String,
}

/// IP block as seen from a public network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicNetworkIpBlock {
    pub id: String,
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub used_ips_count: Option<String>,
}

/// OAuth2 token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}
