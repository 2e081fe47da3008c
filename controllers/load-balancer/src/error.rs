//! Controller-specific error types.
//!
//! This module defines error types specific to the load balancer controller
//! that are not covered by upstream library errors.

use kube::Error as KubeError;
use pnap_client::PnapError;
use thiserror::Error;

/// Errors that can occur in the load balancer controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// phoenixNAP API error
    #[error("phoenixNAP error: {0}")]
    Pnap(#[from] PnapError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Observed state does not satisfy what the operation requires
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Remote state contradicts itself or this controller; never auto-resolved
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe/metrics server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControllerError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Kube(_) => "kube",
            ControllerError::Pnap(_) => "pnap",
            ControllerError::InvalidConfig(_) => "config",
            ControllerError::Validation(_) => "validation",
            ControllerError::Conflict(_) => "conflict",
            ControllerError::Watch(_) => "watch",
            ControllerError::Io(_) => "io",
            ControllerError::Metrics(_) => "metrics",
            ControllerError::Serialization(_) => "serialization",
        }
    }

    /// Whether a later retry may succeed without any change
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_) => true,
            ControllerError::Pnap(e) => e.is_transient(),
            _ => false,
        }
    }
}
