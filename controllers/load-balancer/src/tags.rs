//! Tag vocabulary and the tag store adapter.
//!
//! phoenixNAP only accepts a tag assignment on a block when a tag definition
//! with that name already exists. The controller uses four names as a ledger
//! for block ownership; they are declared once at startup.

use pnap_client::{PnapClientTrait, PnapError, TagCreate};
use std::collections::HashSet;
use tracing::{debug, info};

/// Marks a block as owned by this controller
pub const USAGE_TAG: &str = "usage";
/// Value of [`USAGE_TAG`] on every controller-owned block
pub const USAGE_VALUE: &str = "cloud-provider-phoenixnap-auto";
/// Cluster identity (kube-system namespace UID)
pub const CLUSTER_TAG: &str = "cluster";
/// Owning service as `<namespace>.<name>`
pub const SERVICE_TAG: &str = "service";
/// Staged for deletion; value is the RFC 3339 time of staging
pub const DELETED_TAG: &str = "deleted";

/// Every tag name the controller writes
pub const VOCABULARY: [&str; 4] = [USAGE_TAG, CLUSTER_TAG, SERVICE_TAG, DELETED_TAG];

const TAG_DESCRIPTION: &str = "Managed by the phoenixNAP load balancer controller";

/// Declare any tag names from `names` that do not exist yet.
///
/// Idempotent. Not atomic: names created before a failure stay created, and
/// the next call skips them.
///
/// # Returns
/// The names that were created by this call.
pub async fn ensure_tags(
    client: &dyn PnapClientTrait,
    names: &[&str],
) -> Result<Vec<String>, PnapError> {
    let existing: HashSet<String> = client
        .list_tags()
        .await?
        .into_iter()
        .map(|tag| tag.name)
        .collect();

    let mut created: Vec<String> = Vec::new();
    for name in names {
        if existing.contains(*name) || created.iter().any(|c| c == name) {
            debug!("Tag {} already defined", name);
            continue;
        }

        client
            .create_tag(TagCreate::new(*name, Some(TAG_DESCRIPTION.to_string())))
            .await?;
        info!("Created tag definition {}", name);
        created.push((*name).to_string());
    }

    Ok(created)
}
