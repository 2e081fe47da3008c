//! Garbage collector for IP blocks staged for deletion.
//!
//! Runs on a fixed timer, independent of service reconciles. Each sweep
//! moves every marked block one step towards removal:
//!
//! - attached: detach from its public network
//! - `unassigning`: wait for the next sweep
//! - `unassigned`: delete
//!
//! A failure on one block is logged and retried on the next sweep.

use crate::error::ControllerError;
use crate::ip_blocks::{BlockFilter, IpBlockRegistry};
use crate::metrics::Metrics;
use crate::network::{Attachment, NetworkAttachment, attachment_of};
use pnap_client::{IpBlock, IpBlockStatus};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep, by block id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub detached: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.detached.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
    }
}

/// What a sweep did with one block
enum Step {
    Deleted,
    Detached,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct GarbageCollector {
    registry: IpBlockRegistry,
    network: NetworkAttachment,
    /// Network to detach from when a block records none
    default_network: String,
    interval: Duration,
    metrics: Metrics,
}

impl GarbageCollector {
    pub fn new(
        registry: IpBlockRegistry,
        network: NetworkAttachment,
        default_network: String,
        interval: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            network,
            default_network,
            interval,
            metrics,
        }
    }

    /// Run one pass over all blocks carrying the delete marker
    ///
    /// Only a failure to list the candidates fails the sweep.
    pub async fn sweep(&self) -> Result<SweepReport, ControllerError> {
        let candidates = self.registry.find(None, BlockFilter::Deleted).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            match self.collect(&candidate).await {
                Ok(Some(Step::Deleted)) => report.deleted.push(candidate.id),
                Ok(Some(Step::Detached)) => report.detached.push(candidate.id),
                Ok(Some(Step::Skipped)) => report.skipped.push(candidate.id),
                Ok(None) => debug!("IP block {} vanished before collection", candidate.id),
                Err(e) => {
                    error!("Failed to collect IP block {}: {}", candidate.id, e);
                    report.failed.push(candidate.id);
                }
            }
        }

        match self.registry.find_orphans().await {
            Ok(orphans) => {
                for orphan in orphans {
                    warn!(
                        "IP block {} ({}, {}) carries no tags and cannot be attributed to a cluster; remove it manually",
                        orphan.id, orphan.cidr, orphan.location
                    );
                }
            }
            Err(e) => warn!("Failed to scan for orphaned IP blocks: {}", e),
        }

        self.metrics.record_gc("deleted", report.deleted.len());
        self.metrics.record_gc("detached", report.detached.len());
        self.metrics.record_gc("skipped", report.skipped.len());
        self.metrics.record_gc("failed", report.failed.len());

        if !report.is_empty() {
            info!(
                "GC sweep: {} deleted, {} detached, {} skipped, {} failed",
                report.deleted.len(),
                report.detached.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }
        Ok(report)
    }

    /// Advance one marked block, deciding on its current status
    async fn collect(&self, candidate: &IpBlock) -> Result<Option<Step>, ControllerError> {
        let Some(block) = self.registry.refresh(&candidate.id).await? else {
            return Ok(None);
        };

        match block.status {
            IpBlockStatus::Unassigned => {
                self.registry.delete(&block).await?;
                Ok(Some(Step::Deleted))
            }
            IpBlockStatus::Unassigning => {
                debug!("IP block {} is still unassigning", block.id);
                Ok(Some(Step::Skipped))
            }
            _ => {
                let network_id = match attachment_of(&block) {
                    Attachment::PublicNetwork(id) => id.to_string(),
                    Attachment::Other {
                        resource_type,
                        resource_id,
                    } => {
                        warn!(
                            "IP block {} is assigned to {} {}, not a public network; leaving it",
                            block.id, resource_type, resource_id
                        );
                        return Ok(Some(Step::Skipped));
                    }
                    Attachment::Unattached => self.default_network.clone(),
                };
                self.network.detach(&block, &network_id).await?;
                Ok(Some(Step::Detached))
            }
        }
    }

    /// Sweep on the configured interval until the handle is stopped
    pub fn start(self) -> GcHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        info!("Starting IP block garbage collector (interval {:?})", self.interval);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!("GC sweep failed: {}", e);
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("IP block garbage collector stopped");
        });

        GcHandle { stop_tx, task }
    }
}

/// Running garbage collector
#[derive(Debug)]
pub struct GcHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GcHandle {
    /// Stop after the sweep in progress, if any, and wait for the task
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Garbage collector task failed: {}", e);
        }
    }
}
