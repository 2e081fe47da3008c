//! No-op announcer.
//!
//! Selected with the `empty` scheme when the attached block is routed without
//! any node-side announcement.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;
use tracing::debug;

/// Announcer that does nothing; the IP is reserved and attached only
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyAnnouncer;

impl EmptyAnnouncer {
    pub(crate) fn add_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        debug!(
            "empty announcer: add {}/{} ip={} nodes={}",
            namespace,
            name,
            ip,
            nodes.len()
        );
        Ok(())
    }

    pub(crate) fn update_service(
        &self,
        namespace: &str,
        name: &str,
        nodes: &[Node],
    ) -> Result<(), ControllerError> {
        debug!("empty announcer: update {}/{} nodes={}", namespace, name, nodes.len());
        Ok(())
    }

    pub(crate) fn remove_service(
        &self,
        namespace: &str,
        name: &str,
        ip: &str,
    ) -> Result<(), ControllerError> {
        debug!("empty announcer: remove {}/{} ip={}", namespace, name, ip);
        Ok(())
    }
}
