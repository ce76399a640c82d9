//! In-memory job registry with a retention window.
//!
//! Entries are refreshed when a job finishes, so the retention window runs
//! from completion. A deduplicated job is shared by every requester that was
//! handed its id; it is evicted once the last of them collects or discards it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use moka::future::{Cache as MokaCache, CacheBuilder as MokaCacheBuilder};
use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{ConversionError, ConversionResult};
use crate::core::job::{ConversionJob, ConversionMetadata, JobSnapshot, JobStatus};
use crate::core::progress::ProgressEvent;

/// Finished audio plus its description.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub metadata: ConversionMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job is still {0}")]
    NotReady(JobStatus),

    #[error("Job failed without producing audio: {0}")]
    NoArtifact(String),
}

/// What a cancel request did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAction {
    /// The run was stopped
    Cancelled,
    /// A finished job was dropped
    Discarded,
    /// Other requesters still hold the job, so it was left alone
    Released,
}

struct JobRecord {
    snapshot: JobSnapshot,
    artifact: Option<Artifact>,
    /// Requesters that were handed this job id and have not let go of it
    holders: usize,
}

struct JobEntry {
    record: RwLock<JobRecord>,
    progress: watch::Receiver<ProgressEvent>,
    cancel: CancellationToken,
}

impl JobEntry {
    fn snapshot(&self) -> JobSnapshot {
        let mut snapshot = self.record.read().snapshot.clone();
        if !snapshot.status.is_terminal() {
            let live = *self.progress.borrow();
            // Terminal states are only reported once the artifact is recorded
            snapshot.status = match live.status {
                JobStatus::Pending => snapshot.status,
                status if status.is_terminal() => JobStatus::Running,
                status => status,
            };
            snapshot.chunks_completed = live.chunks_completed;
            if live.chunks_total > 0 {
                snapshot.chunks_total = live.chunks_total;
            }
        }
        snapshot
    }
}

#[derive(Clone)]
pub struct JobStore {
    jobs: MokaCache<Uuid, Arc<JobEntry>>,
    fingerprints: MokaCache<u128, Uuid>,
}

impl JobStore {
    pub fn new(retention: Duration, max_jobs: u64) -> Self {
        let jobs = MokaCacheBuilder::new(max_jobs)
            .time_to_live(retention)
            .build();
        let fingerprints = MokaCacheBuilder::new(max_jobs)
            .time_to_live(retention)
            .build();
        Self { jobs, fingerprints }
    }

    /// Register a job that is about to run.
    pub async fn insert(
        &self,
        job: &ConversionJob,
        progress: watch::Receiver<ProgressEvent>,
        cancel: CancellationToken,
    ) {
        let entry = Arc::new(JobEntry {
            record: RwLock::new(JobRecord {
                snapshot: job.snapshot(),
                artifact: None,
                holders: 1,
            }),
            progress,
            cancel,
        });
        self.jobs.insert(job.id, entry).await;
        self.fingerprints.insert(job.fingerprint, job.id).await;
        debug!(job_id = %job.id, "Job registered");
    }

    /// Record the terminal state of a job and its artifact, if any.
    pub async fn complete(&self, job: &ConversionJob, result: ConversionResult<Artifact>) {
        let Some(entry) = self.jobs.get(&job.id).await else {
            debug!(job_id = %job.id, "Finished job no longer tracked");
            return;
        };

        {
            let mut record = entry.record.write();
            let mut snapshot = job.snapshot();
            match result {
                Ok(artifact) => record.artifact = Some(artifact),
                Err(e) => {
                    if !snapshot.status.is_terminal() {
                        snapshot.status = JobStatus::Failed;
                        snapshot.updated_at = OffsetDateTime::now_utc();
                    }
                    snapshot.error = Some(e.to_string());
                }
            }
            record.snapshot = snapshot;
        }

        // Re-insert so the retention window starts now
        self.jobs.insert(job.id, entry).await;
        self.fingerprints.insert(job.fingerprint, job.id).await;
    }

    pub async fn snapshot(&self, id: Uuid) -> ConversionResult<JobSnapshot> {
        self.jobs
            .get(&id)
            .await
            .map(|entry| entry.snapshot())
            .ok_or(ConversionError::JobNotFound(id))
    }

    /// Hand the latest job for the same content to another requester.
    ///
    /// Failed jobs are never shared. The caller becomes a holder of the job.
    pub async fn claim_by_fingerprint(&self, fingerprint: u128) -> Option<JobSnapshot> {
        let id = self.fingerprints.get(&fingerprint).await?;
        let entry = self.jobs.get(&id).await?;
        let snapshot = entry.snapshot();
        if snapshot.status == JobStatus::Failed {
            return None;
        }
        entry.record.write().holders += 1;
        Some(snapshot)
    }

    /// Hand out the artifact of a finished job.
    ///
    /// The job is evicted once the last holder has collected it.
    pub async fn collect(&self, id: Uuid) -> Result<Artifact, CollectError> {
        let entry = self.jobs.get(&id).await.ok_or(CollectError::NotFound(id))?;

        let current = entry.snapshot();
        if !current.status.is_terminal() {
            return Err(CollectError::NotReady(current.status));
        }

        let (artifact, last) = {
            let mut record = entry.record.write();
            let status = record.snapshot.status;
            let Some(artifact) = record.artifact.clone() else {
                return Err(CollectError::NoArtifact(
                    record
                        .snapshot
                        .error
                        .clone()
                        .unwrap_or_else(|| status.to_string()),
                ));
            };
            record.holders = record.holders.saturating_sub(1);
            let last = record.holders == 0;
            if last {
                record.artifact = None;
            }
            (artifact, last)
        };

        if last {
            self.evict(id, &current.fingerprint).await;
        }
        info!(job_id = %id, bytes = artifact.bytes.len(), evicted = last, "Artifact collected");
        Ok(artifact)
    }

    /// Cancel a running job, or discard a finished one.
    ///
    /// While other holders remain the caller only gives up its own claim.
    pub async fn cancel(&self, id: Uuid) -> ConversionResult<(JobSnapshot, CancelAction)> {
        let entry = self
            .jobs
            .get(&id)
            .await
            .ok_or(ConversionError::JobNotFound(id))?;
        let snapshot = entry.snapshot();

        let last = {
            let mut record = entry.record.write();
            record.holders = record.holders.saturating_sub(1);
            record.holders == 0
        };

        let action = if !last {
            info!(job_id = %id, "Job released by one requester");
            CancelAction::Released
        } else if snapshot.status.is_terminal() {
            self.evict(id, &snapshot.fingerprint).await;
            info!(job_id = %id, "Finished job discarded");
            CancelAction::Discarded
        } else {
            entry.cancel.cancel();
            info!(job_id = %id, "Job cancellation requested");
            CancelAction::Cancelled
        };
        Ok((snapshot, action))
    }

    async fn evict(&self, id: Uuid, fingerprint_hex: &str) {
        self.jobs.invalidate(&id).await;
        if let Ok(fingerprint) = u128::from_str_radix(fingerprint_hex, 16)
            && self.fingerprints.get(&fingerprint).await == Some(id)
        {
            self.fingerprints.invalidate(&fingerprint).await;
        }
    }
}
