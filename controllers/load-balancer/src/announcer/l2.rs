//! Layer-2 announcer.
//!
//! Blocks attached to a phoenixNAP public network are routed to that network's
//! VLAN; a node on the VLAN answers ARP for the service IP. This backend keeps
//! the desired announcement per service (IP and the servers allowed to answer)
//! for the node-side agent to act on.

use crate::error::ControllerError;
use crate::nodes::{known_server_ids, server_ids};
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Desired announcement of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncedService {
    /// Unknown when only an update was seen since startup
    pub ip: Option<String>,
    pub servers: Vec<String>,
}

#[derive(Debug)]
pub struct L2Announcer {
    network_id: String,
    services: Mutex<BTreeMap<String, AnnouncedService>>,
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

impl L2Announcer {
    pub fn new(network_id: String) -> Self {
        Self {
            network_id,
            services: Mutex::new(BTreeMap::new()),
        }
    }

    /// Nodes without a provider id are left out until an update names them
    pub(crate) fn add_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        let servers = known_server_ids(nodes);
        info!(
            "Announcing {} for {}/{} on network {} from {} server(s)",
            ip,
            namespace,
            name,
            self.network_id,
            servers.len()
        );

        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key(namespace, name),
                AnnouncedService {
                    ip: Some(ip.to_string()),
                    servers,
                },
            );
        Ok(())
    }

    pub(crate) fn update_service(
        &self,
        namespace: &str,
        name: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        let servers = server_ids(nodes)?;
        let mut services = self.services.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = services
            .entry(key(namespace, name))
            .or_insert_with(|| AnnouncedService {
                ip: None,
                servers: Vec::new(),
            });

        if entry.servers != servers {
            debug!(
                "Updating servers for {}/{}: {:?} -> {:?}",
                namespace, name, entry.servers, servers
            );
            entry.servers = servers;
        }
        Ok(())
    }

    pub(crate) fn remove_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
    ) -> Result<(), ControllerError> {
        let removed = self
            .services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(namespace, name));
        if removed.is_some() {
            info!("Stopped announcing {} for {}/{}", ip, namespace, name);
        }
        Ok(())
    }

    pub(crate) fn announced(&self, namespace: &str, name: &str) -> Option<AnnouncedService> {
        self.services
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(namespace, name))
            .cloned()
    }
}
