//! Announcer backends.
//!
//! An announcer makes an assigned service IP reachable on the network. The
//! backend is chosen by the scheme of the `loadbalancer` setting,
//! `scheme://<network-id>[/path]`:
//!
//! - `empty` - no announcement; the IP is only reserved and attached
//! - `pnap-l2` - layer-2 announcement on the public network named by the host

mod empty;
mod l2;

pub use empty::EmptyAnnouncer;
pub use l2::{AnnouncedService, L2Announcer};

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use std::fmt;
use std::str::FromStr;

/// Announcer backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Empty,
    L2,
}

impl BackendKind {
    pub fn scheme(self) -> &'static str {
        match self {
            BackendKind::Empty => "empty",
            BackendKind::L2 => "pnap-l2",
        }
    }
}

/// Parsed `loadbalancer` setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSetting {
    pub kind: BackendKind,
    /// Public network the service blocks are attached to
    pub network_id: String,
    pub path: String,
}

impl fmt::Display for BackendSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.kind.scheme(), self.network_id, self.path)
    }
}

impl FromStr for BackendSetting {
    type Err = ControllerError;

    fn from_str(setting: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = setting.trim().split_once("://").ok_or_else(|| {
            ControllerError::InvalidConfig(format!(
                "load balancer setting {:?} is not of the form scheme://network-id",
                setting
            ))
        })?;

        let kind = match scheme {
            "empty" => BackendKind::Empty,
            "pnap-l2" => BackendKind::L2,
            other => {
                return Err(ControllerError::InvalidConfig(format!(
                    "unknown load balancer scheme {:?}, expected \"empty\" or \"pnap-l2\"",
                    other
                )));
            }
        };

        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(ControllerError::InvalidConfig(format!(
                "load balancer setting {:?} has no network id",
                setting
            )));
        }

        Ok(Self {
            kind,
            network_id: host.to_string(),
            path: path.to_string(),
        })
    }
}

/// Announcer backend, selected once at startup
#[derive(Debug)]
pub enum Announcer {
    Empty(EmptyAnnouncer),
    L2(L2Announcer),
}

impl Announcer {
    pub fn from_setting(setting: &BackendSetting) -> Self {
        match setting.kind {
            BackendKind::Empty => Announcer::Empty(EmptyAnnouncer),
            BackendKind::L2 => Announcer::L2(L2Announcer::new(setting.network_id.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Announcer::Empty(_) => BackendKind::Empty.scheme(),
            Announcer::L2(_) => BackendKind::L2.scheme(),
        }
    }

    /// Start announcing `ip` for a service on the given nodes
    pub fn add_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        match self {
            Announcer::Empty(a) => a.add_service(namespace, name, ip, nodes),
            Announcer::L2(a) => a.add_service(namespace, name, ip, nodes),
        }
    }

    /// Replace the node set a service is announced from
    pub fn update_service(
        &self,
        namespace: &str,
        name: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        match self {
            Announcer::Empty(a) => a.update_service(namespace, name, nodes),
            Announcer::L2(a) => a.update_service(namespace, name, nodes),
        }
    }

    /// Stop announcing a service
    pub fn remove_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
    ) -> Result<(), ControllerError> {
        match self {
            Announcer::Empty(a) => a.remove_service(namespace, name, ip),
            Announcer::L2(a) => a.remove_service(namespace, name, ip),
        }
    }

    /// Whether the backend knows the service's IP
    ///
    /// Layer-2 state is in memory, so after a restart bound services must be
    /// announced again. The empty backend keeps nothing to restore.
    pub fn is_announced(&self, namespace: &str, name: &str) -> bool {
        match self {
            Announcer::Empty(_) => true,
            Announcer::L2(a) => a
                .announced(namespace, name)
                .is_some_and(|service| service.ip.is_some()),
        }
    }

    /// Current announcement of a service (layer-2 backend only)
    pub fn announced(&self, namespace: &str, name: &str) -> Option<AnnouncedService> {
        match self {
            Announcer::Empty(_) => None,
            Announcer::L2(a) => a.announced(namespace, name),
        }
    }
}
