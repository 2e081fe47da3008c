//! Controller configuration.
//!
//! Loaded once at startup from an optional JSON file (path in
//! `PNAP_CLOUD_CONFIG`), with environment variables taking precedence over
//! the file.

use crate::announcer::BackendSetting;
use crate::error::ControllerError;
use crate::nodes::LabelSelector;
use pnap_client::ClientCredentials;
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Env var holding the path of the JSON config file
pub const CONFIG_PATH_ENV: &str = "PNAP_CLOUD_CONFIG";

pub const DEFAULT_LOCATION_ANNOTATION: &str = "phoenixnap.com/ip-location";
pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Config file contents, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(rename = "tokenURL")]
    pub token_url: Option<String>,
    #[serde(rename = "loadbalancer")]
    pub load_balancer: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "annotationIPLocation")]
    pub annotation_ip_location: Option<String>,
    #[serde(rename = "serviceNodeSelector")]
    pub service_node_selector: Option<String>,
    #[serde(rename = "gcIntervalSeconds")]
    pub gc_interval_seconds: Option<u64>,
    #[serde(rename = "metricsAddr")]
    pub metrics_addr: Option<String>,
}

impl RawConfig {
    pub fn from_json(json: &str) -> Result<Self, ControllerError> {
        serde_json::from_str(json)
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid config file: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

/// Effective controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: ClientCredentials,
    /// API base URL; the client default when unset
    pub base_url: Option<String>,
    /// `None` disables load balancing
    pub load_balancer: Option<BackendSetting>,
    pub location: String,
    pub location_annotation: String,
    pub node_selector: LabelSelector,
    pub gc_interval: Duration,
    pub metrics_addr: SocketAddr,
    /// Namespace to watch; all namespaces when unset
    pub watch_namespace: Option<String>,
}

/// Non-empty, trimmed value
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load from `PNAP_CLOUD_CONFIG` (if set) and the process environment
    pub fn load() -> Result<Self, ControllerError> {
        let raw = match non_empty(env::var(CONFIG_PATH_ENV).ok()) {
            Some(path) => RawConfig::from_file(Path::new(&path))?,
            None => RawConfig::default(),
        };
        Self::from_sources(raw, |name| env::var(name).ok())
    }

    /// Merge file values with overrides looked up through `env`
    pub fn from_sources<F>(raw: RawConfig, env: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |name: &str, file: Option<String>| non_empty(env(name)).or(non_empty(file));

        let client_id = pick("PNAP_CLIENT_ID", raw.client_id).ok_or_else(|| {
            ControllerError::InvalidConfig("clientID / PNAP_CLIENT_ID is required".to_string())
        })?;
        let client_secret = pick("PNAP_CLIENT_SECRET", raw.client_secret).ok_or_else(|| {
            ControllerError::InvalidConfig(
                "clientSecret / PNAP_CLIENT_SECRET is required".to_string(),
            )
        })?;
        let mut credentials = ClientCredentials::new(client_id, client_secret);
        if let Some(token_url) = pick("PNAP_TOKEN_URL", raw.token_url) {
            credentials = credentials.with_token_url(token_url);
        }

        let load_balancer = pick("PNAP_LOAD_BALANCER", raw.load_balancer)
            .map(|setting| setting.parse::<BackendSetting>())
            .transpose()?;

        let location = pick("PNAP_LOCATION", raw.location).unwrap_or_default();
        if load_balancer.is_some() && location.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "location / PNAP_LOCATION is required when load balancing is enabled".to_string(),
            ));
        }

        let node_selector = match pick("PNAP_SERVICE_NODE_SELECTOR", raw.service_node_selector) {
            Some(selector) => selector.parse()?,
            None => LabelSelector::everything(),
        };

        let gc_interval_seconds = match non_empty(env("PNAP_GC_INTERVAL_SECONDS")) {
            Some(value) => value.parse::<u64>().map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "PNAP_GC_INTERVAL_SECONDS {:?} is not a number of seconds: {}",
                    value, e
                ))
            })?,
            None => raw.gc_interval_seconds.unwrap_or(DEFAULT_GC_INTERVAL_SECONDS),
        };
        if gc_interval_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "GC interval must be at least one second".to_string(),
            ));
        }

        let metrics_addr = pick("PNAP_METRICS_ADDR", raw.metrics_addr)
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "metrics address {:?} is not host:port: {}",
                metrics_addr, e
            ))
        })?;

        Ok(Self {
            credentials,
            base_url: pick("PNAP_BASE_URL", raw.base_url),
            load_balancer,
            location,
            location_annotation: pick("PNAP_ANNOTATION_IP_LOCATION", raw.annotation_ip_location)
                .unwrap_or_else(|| DEFAULT_LOCATION_ANNOTATION.to_string()),
            node_selector,
            gc_interval: Duration::from_secs(gc_interval_seconds),
            metrics_addr,
            watch_namespace: non_empty(env("WATCH_NAMESPACE")),
        })
    }

    /// Log the effective configuration; the client secret is never printed
    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Client ID: {}", self.credentials.client_id);
        info!("  Client secret: ********");
        info!(
            "  API base URL: {}",
            self.base_url.as_deref().unwrap_or(pnap_client::DEFAULT_BASE_URL)
        );
        info!("  Token URL: {}", self.credentials.token_url);
        match &self.load_balancer {
            Some(setting) => info!("  Load balancer: {}", setting),
            None => info!("  Load balancer: disabled"),
        }
        info!("  Location: {}", self.location);
        info!("  Location annotation: {}", self.location_annotation);
        if self.node_selector.is_empty() {
            info!("  Node selector: all nodes");
        } else {
            info!("  Node selector: {}", self.node_selector);
        }
        info!("  GC interval: {:?}", self.gc_interval);
        info!("  Metrics address: {}", self.metrics_addr);
        info!(
            "  Namespace: {}",
            self.watch_namespace.as_deref().unwrap_or("all namespaces")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announcer::BackendKind;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const FILE: &str = r#"{
        "clientID": "file-id",
        "clientSecret": "file-secret",
        "loadbalancer": "pnap-l2://net-1",
        "location": "PHX",
        "serviceNodeSelector": "role=lb",
        "gcIntervalSeconds": 30
    }"#;

    #[test]
    fn test_file_values() {
        let raw = RawConfig::from_json(FILE).unwrap();
        let config = Config::from_sources(raw, env_of(&[])).unwrap();

        assert_eq!(config.credentials.client_id, "file-id");
        let setting = config.load_balancer.unwrap();
        assert_eq!(setting.kind, BackendKind::L2);
        assert_eq!(setting.network_id, "net-1");
        assert_eq!(config.location, "PHX");
        assert_eq!(config.location_annotation, DEFAULT_LOCATION_ANNOTATION);
        assert_eq!(config.node_selector.to_string(), "role=lb");
        assert_eq!(config.gc_interval, Duration::from_secs(30));
        assert_eq!(config.metrics_addr.port(), 8080);
        assert!(config.base_url.is_none());
        assert!(config.watch_namespace.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let raw = RawConfig::from_json(FILE).unwrap();
        let config = Config::from_sources(
            raw,
            env_of(&[
                ("PNAP_CLIENT_ID", "env-id"),
                ("PNAP_LOCATION", "ASH"),
                ("PNAP_LOAD_BALANCER", "empty://net-2"),
                ("PNAP_GC_INTERVAL_SECONDS", "15"),
                ("PNAP_METRICS_ADDR", "127.0.0.1:9090"),
                ("WATCH_NAMESPACE", "lb"),
            ]),
        )
        .unwrap();

        assert_eq!(config.credentials.client_id, "env-id");
        assert_eq!(config.location, "ASH");
        assert_eq!(config.load_balancer.unwrap().kind, BackendKind::Empty);
        assert_eq!(config.gc_interval, Duration::from_secs(15));
        assert_eq!(config.metrics_addr.port(), 9090);
        assert_eq!(config.watch_namespace.as_deref(), Some("lb"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = Config::from_sources(RawConfig::default(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        let err = Config::from_sources(
            RawConfig::default(),
            env_of(&[("PNAP_CLIENT_ID", "id"), ("PNAP_CLIENT_SECRET", "  ")]),
        )
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[test]
    fn test_location_required_when_enabled() {
        let creds = [
            ("PNAP_CLIENT_ID", "id"),
            ("PNAP_CLIENT_SECRET", "secret"),
            ("PNAP_LOAD_BALANCER", "pnap-l2://net-1"),
        ];
        let err = Config::from_sources(RawConfig::default(), env_of(&creds)).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));

        // Disabled load balancing needs no location
        let config = Config::from_sources(
            RawConfig::default(),
            env_of(&[("PNAP_CLIENT_ID", "id"), ("PNAP_CLIENT_SECRET", "secret")]),
        )
        .unwrap();
        assert!(config.load_balancer.is_none());
    }

    #[test]
    fn test_invalid_values() {
        let base = [
            ("PNAP_CLIENT_ID", "id"),
            ("PNAP_CLIENT_SECRET", "secret"),
            ("PNAP_LOCATION", "ASH"),
        ];
        for (name, value) in [
            ("PNAP_LOAD_BALANCER", "metallb://net-1"),
            ("PNAP_LOAD_BALANCER", "pnap-l2://"),
            ("PNAP_SERVICE_NODE_SELECTOR", "role in lb"),
            ("PNAP_GC_INTERVAL_SECONDS", "soon"),
            ("PNAP_GC_INTERVAL_SECONDS", "0"),
            ("PNAP_METRICS_ADDR", "localhost"),
        ] {
            let mut vars = base.to_vec();
            vars.push((name, value));
            let err = Config::from_sources(RawConfig::default(), env_of(&vars)).unwrap_err();
            assert!(
                matches!(err, ControllerError::InvalidConfig(_)),
                "{}={}",
                name,
                value
            );
        }
    }

    #[test]
    fn test_invalid_file() {
        assert!(matches!(
            RawConfig::from_json("{not json"),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
