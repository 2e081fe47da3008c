//! Node filtering and provider-id handling.
//!
//! A label selector narrows the nodes handed to the announcer. The syntax is
//! the Kubernetes one: comma-separated requirements of the form `k=v`,
//! `k==v`, `k!=v`, `k`, `!k`, `k in (a,b)` and `k notin (a,b)`.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Provider-id scheme of phoenixNAP nodes
pub const PROVIDER_SCHEME: &str = "phoenixnap://";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Exists(String),
    NotExists(String),
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::NotExists(key) => !labels.contains_key(key),
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            // Kubernetes semantics: a missing key satisfies != and notin
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
        }
    }
}

/// Parsed node label selector; the empty selector matches every node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
    source: String,
}

impl LabelSelector {
    /// Selector that matches everything
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("<all nodes>")
        } else {
            f.write_str(&self.source)
        }
    }
}

fn invalid(selector: &str, reason: &str) -> ControllerError {
    ControllerError::InvalidConfig(format!("invalid node selector {:?}: {}", selector, reason))
}

fn parse_key(selector: &str, key: &str) -> Result<String, ControllerError> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(invalid(selector, &format!("bad label key {:?}", key)));
    }
    Ok(key.to_string())
}

fn parse_values(selector: &str, list: &str) -> Result<BTreeSet<String>, ControllerError> {
    let inner = list
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| invalid(selector, "value list must be in parentheses"))?;
    Ok(inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect())
}

/// Split on commas that are not inside a `( ... )` value list
fn split_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}

fn parse_term(selector: &str, term: &str) -> Result<Requirement, ControllerError> {
    if let Some((key, values)) = term.split_once(" notin ") {
        return Ok(Requirement::NotIn(
            parse_key(selector, key)?,
            parse_values(selector, values)?,
        ));
    }
    if let Some((key, values)) = term.split_once(" in ") {
        return Ok(Requirement::In(
            parse_key(selector, key)?,
            parse_values(selector, values)?,
        ));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(
            parse_key(selector, key)?,
            value.trim().to_string(),
        ));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(
            parse_key(selector, key)?,
            value.trim().to_string(),
        ));
    }
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(parse_key(selector, key)?));
    }
    Ok(Requirement::Exists(parse_key(selector, term)?))
}

impl FromStr for LabelSelector {
    type Err = ControllerError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_terms(trimmed)
            .into_iter()
            .map(str::trim)
            .map(|term| {
                if term.is_empty() {
                    Err(invalid(trimmed, "empty requirement"))
                } else {
                    parse_term(trimmed, term)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            requirements,
            source: trimmed.to_string(),
        })
    }
}

/// Nodes whose labels match the selector
pub fn filter_nodes(nodes: &[Node], selector: &LabelSelector) -> Vec<Node> {
    nodes
        .iter()
        .filter(|node| selector.matches(node.labels()))
        .cloned()
        .collect()
}

/// `spec.providerID` when set and non-empty
pub fn provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()
        .and_then(|spec| spec.provider_id.as_deref())
        .filter(|id| !id.is_empty())
}

/// phoenixNAP server id from a provider id (`phoenixnap://<id>` or bare `<id>`)
pub fn server_id_from_provider_id(provider_id: &str) -> Result<String, ControllerError> {
    let id = provider_id
        .strip_prefix(PROVIDER_SCHEME)
        .unwrap_or(provider_id);
    if id.is_empty() || id.contains("://") || id.contains('/') {
        return Err(ControllerError::Validation(format!(
            "unexpected provider id format {:?}, expected {}<server-id>",
            provider_id, PROVIDER_SCHEME
        )));
    }
    Ok(id.to_string())
}

/// Server ids of all nodes; fails on the first node without a usable provider id
pub fn server_ids(nodes: &[Node]) -> Result<Vec<String>, ControllerError> {
    nodes
        .iter()
        .map(|node| {
            let provider_id = provider_id(node).ok_or_else(|| {
                ControllerError::Validation(format!(
                    "node {} has no provider id",
                    node.name_any()
                ))
            })?;
            server_id_from_provider_id(provider_id)
        })
        .collect()
}

/// Server ids of the nodes that have a usable provider id
///
/// Nodes still joining the cluster have no provider id yet; they are skipped.
pub fn known_server_ids(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|node| {
            let Some(provider_id) = provider_id(node) else {
                debug!("Skipping node {} without provider id", node.name_any());
                return None;
            };
            match server_id_from_provider_id(provider_id) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!("Skipping node {}: {}", node.name_any(), e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_node;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector: LabelSelector = "".parse().unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn test_equality_requirements() {
        let selector: LabelSelector = "role=lb, zone==a, tier!=db".parse().unwrap();
        assert!(selector.matches(&labels(&[("role", "lb"), ("zone", "a")])));
        assert!(!selector.matches(&labels(&[("role", "lb"), ("zone", "a"), ("tier", "db")])));
        assert!(!selector.matches(&labels(&[("role", "web"), ("zone", "a")])));
    }

    #[test]
    fn test_existence_requirements() {
        let selector: LabelSelector = "lb-capable,!node-role.kubernetes.io/control-plane"
            .parse()
            .unwrap();
        assert!(selector.matches(&labels(&[("lb-capable", "")])));
        assert!(!selector.matches(&labels(&[
            ("lb-capable", "true"),
            ("node-role.kubernetes.io/control-plane", "")
        ])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_set_requirements() {
        let selector: LabelSelector = "zone in (a, b),env notin (dev)".parse().unwrap();
        assert!(selector.matches(&labels(&[("zone", "b"), ("env", "prod")])));
        assert!(selector.matches(&labels(&[("zone", "a")])));
        assert!(!selector.matches(&labels(&[("zone", "c")])));
        assert!(!selector.matches(&labels(&[("zone", "a"), ("env", "dev")])));
    }

    #[test]
    fn test_invalid_selectors() {
        assert!("a=b,,c".parse::<LabelSelector>().is_err());
        assert!("zone in a,b".parse::<LabelSelector>().is_err());
        assert!("bad key=x".parse::<LabelSelector>().is_err());
        assert!("=x".parse::<LabelSelector>().is_err());
    }

    #[test]
    fn test_filter_nodes() {
        let nodes = vec![
            create_test_node("n1", Some("phoenixnap://s1"), &[("role", "lb")]),
            create_test_node("n2", Some("phoenixnap://s2"), &[("role", "web")]),
        ];
        let selector: LabelSelector = "role=lb".parse().unwrap();
        let filtered = filter_nodes(&nodes, &selector);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name_any(), "n1");
        assert_eq!(filter_nodes(&nodes, &LabelSelector::everything()).len(), 2);
    }

    #[test]
    fn test_server_id_from_provider_id() {
        assert_eq!(server_id_from_provider_id("phoenixnap://abc123").unwrap(), "abc123");
        assert_eq!(server_id_from_provider_id("abc123").unwrap(), "abc123");
        assert!(server_id_from_provider_id("phoenixnap://").is_err());
        assert!(server_id_from_provider_id("aws:///us-east-1/i-1").is_err());
    }

    #[test]
    fn test_server_ids_requires_provider_id() {
        let nodes = vec![
            create_test_node("n1", Some("phoenixnap://s1"), &[]),
            create_test_node("n2", None, &[]),
        ];
        let err = server_ids(&nodes).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(msg) if msg.contains("n2")));
        assert_eq!(server_ids(&nodes[..1]).unwrap(), vec!["s1"]);
    }

    #[test]
    fn test_known_server_ids_skips_unusable_nodes() {
        let nodes = vec![
            create_test_node("n1", Some("phoenixnap://s1"), &[]),
            create_test_node("n2", None, &[]),
            create_test_node("n3", Some("aws:///us-east-1/i-1"), &[]),
            create_test_node("n4", Some("s4"), &[]),
        ];
        assert_eq!(known_server_ids(&nodes), vec!["s1", "s4"]);
    }
}
