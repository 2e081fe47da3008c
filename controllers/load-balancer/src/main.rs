//! phoenixNAP Load Balancer Controller
//!
//! Gives Kubernetes `LoadBalancer` services a public IP on phoenixNAP Bare
//! Metal Cloud:
//! - Reserves one `/29` IP block per service, owned through provider tags
//! - Attaches the block to a public network and records the service IP
//! - Hands the IP and node set to an announcer backend
//! - Garbage-collects blocks of deleted services in the background

mod announcer;
mod backoff;
mod config;
mod controller;
mod error;
mod gc;
mod ip_blocks;
mod metrics;
mod network;
mod nodes;
mod reconciler;
mod service;
mod tags;
mod watcher;

#[cfg(test)]
mod ip_blocks_test;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's TLS stack needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting phoenixNAP Load Balancer Controller");

    let config = Config::load()?;
    config.log_summary();

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
