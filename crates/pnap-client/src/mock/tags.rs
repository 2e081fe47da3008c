//! Tag manager operations for MockPnapClient

use super::{MockOperation, MockPnapClient, lock};
use crate::error::PnapError;
use crate::models::*;

pub(crate) fn new_tag(name: &str, description: Option<String>) -> Tag {
    Tag {
        id: format!("tag-{}", name),
        name: name.to_string(),
        values: Vec::new(),
        description,
        is_billing_tag: false,
        created_by: Some("USER".to_string()),
    }
}

pub async fn list_tags(client: &MockPnapClient) -> Result<Vec<Tag>, PnapError> {
    client.begin(MockOperation::ListTags)?;
    let mut tags: Vec<Tag> = lock(&client.tags).values().cloned().collect();
    tags.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tags)
}

pub async fn create_tag(client: &MockPnapClient, request: TagCreate) -> Result<Tag, PnapError> {
    client.begin(MockOperation::CreateTag)?;

    let mut tags = lock(&client.tags);
    if tags.contains_key(&request.name) {
        return Err(PnapError::InvalidRequest(format!(
            "Tag with name {} already exists",
            request.name
        )));
    }

    let mut tag = new_tag(&request.name, request.description);
    tag.is_billing_tag = request.is_billing_tag;
    tags.insert(tag.name.clone(), tag.clone());
    Ok(tag)
}

/// Reject tag assignments whose name has no definition
pub(crate) fn validate_assignments(
    client: &MockPnapClient,
    requests: &[TagAssignmentRequest],
) -> Result<(), PnapError> {
    let tags = lock(&client.tags);
    match requests.iter().find(|r| !tags.contains_key(&r.name)) {
        Some(missing) => Err(PnapError::InvalidRequest(format!(
            "Tag {} does not exist",
            missing.name
        ))),
        None => Ok(()),
    }
}

/// Materialize assignment requests as they would come back from the API
pub(crate) fn to_assignments(
    client: &MockPnapClient,
    requests: Vec<TagAssignmentRequest>,
) -> Vec<TagAssignment> {
    let tags = lock(&client.tags);
    requests
        .into_iter()
        .map(|r| TagAssignment {
            id: tags
                .get(&r.name)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| format!("tag-{}", r.name)),
            name: r.name,
            value: r.value,
            is_billing_tag: false,
            created_by: Some("USER".to_string()),
        })
        .collect()
}
