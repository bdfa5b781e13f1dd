//! Background diff generation.
//!
//! Committing a zip release queues a [`DiffJob`]. The worker builds diff
//! archives against earlier releases and merges them into the release once
//! done; update checks served in the meantime simply return full packages.

use pushgrid_diff::PackageDiffer;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::LedgerResult;
use crate::ledger::Ledger;

/// A committed release awaiting diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffJob {
    pub deployment_id: String,
    pub label: String,
    pub package_hash: String,
}

#[derive(Clone)]
pub struct DiffWorker {
    ledger: Ledger,
    differ: PackageDiffer,
}

impl DiffWorker {
    pub fn new(ledger: Ledger, differ: PackageDiffer) -> Self {
        Self { ledger, differ }
    }

    /// Process jobs until the queue closes or shutdown is signalled, then
    /// wait for jobs already in flight.
    pub async fn run(
        self,
        mut jobs: mpsc::UnboundedReceiver<DiffJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("diff worker started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        if let Err(e) = worker.handle(&job).await {
                            warn!(
                                deployment = %job.deployment_id,
                                label = %job.label,
                                error = %e,
                                "diff job failed"
                            );
                        }
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "diff task panicked");
                    }
                }
                _ = shutdown.changed() => {
                    info!("diff worker shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "diff task panicked");
            }
        }
        info!("diff worker stopped");
    }

    /// Generate and attach diffs for one release. Returns how many diffs
    /// were produced.
    pub async fn handle(&self, job: &DiffJob) -> LedgerResult<usize> {
        let history = self.ledger.history(&job.deployment_id)?;
        let Some(release) = history
            .iter()
            .rev()
            .find(|r| r.label == job.label && r.package_hash == job.package_hash)
        else {
            debug!(label = %job.label, "release no longer in history, skipping diff");
            return Ok(0);
        };

        let diffs = self.differ.generate_diff_map(&history, release).await?;
        let count = diffs.len();
        if count > 0 {
            self.ledger
                .attach_diffs(&job.deployment_id, &job.label, &job.package_hash, diffs)
                .await?;
        }
        debug!(label = %job.label, diffs = count, "diff job finished");
        Ok(count)
    }
}
