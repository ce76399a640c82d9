//! Conversion orchestration.
//!
//! A job is chunked, then a fixed pool of workers pulls chunks from a shared
//! queue and sends results to a single collector. The collector restores
//! chunk order with a reorder buffer, streams the ready prefix into the
//! assembler and publishes progress after every result.
//!
//! Two cancellation tokens are involved. The caller's token cancels the job
//! from outside. A child token stops dispatch when the job decides its own
//! outcome (a fail-fast failure or an expired deadline). Neither aborts a
//! provider call that is already in flight.

use std::collections::{BTreeMap, VecDeque};
use std::io::{Seek, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::assembler::Assembler;
use crate::core::chunker::{TextChunk, chunk_text};
use crate::core::error::{ConversionError, ConversionResult};
use crate::core::job::{
    ChunkOutcome, ChunkResult, ConversionDefaults, ConversionJob, ConversionMetadata,
    ConvertRequest, FailurePolicy, JobStatus,
};
use crate::core::progress::{ProgressEvent, ProgressSink};
use crate::core::retry::{ResilientClient, RetryPolicy};
use crate::core::tts::{ProviderConfig, SpeechSynthesizer};

pub struct Orchestrator {
    defaults: ConversionDefaults,
    retry_policy: Arc<RetryPolicy>,
}

impl Orchestrator {
    pub fn new(defaults: ConversionDefaults, retry_policy: RetryPolicy) -> Self {
        Self {
            defaults,
            retry_policy: Arc::new(retry_policy),
        }
    }

    pub fn defaults(&self) -> &ConversionDefaults {
        &self.defaults
    }

    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry_policy
    }

    /// Validate a request against the configured defaults.
    pub fn create_job(
        &self,
        request: ConvertRequest,
        provider: ProviderConfig,
    ) -> ConversionResult<ConversionJob> {
        ConversionJob::new(request, provider, &self.defaults)
    }

    /// Split the job's text and record the chunk count on the job.
    pub fn plan(&self, job: &mut ConversionJob) -> ConversionResult<Vec<TextChunk>> {
        let chunks = chunk_text(&job.text, job.chunk_size_limit)?;
        job.chunks_total = chunks.len();
        Ok(chunks)
    }

    /// Plan and execute a job in one call.
    pub async fn run<W>(
        &self,
        job: &mut ConversionJob,
        provider: Arc<dyn SpeechSynthesizer>,
        sink: W,
        progress: &ProgressSink,
        cancel: CancellationToken,
    ) -> ConversionResult<ConversionMetadata>
    where
        W: Write + Seek + Send,
    {
        let chunks = match self.plan(job) {
            Ok(chunks) => chunks,
            Err(e) => {
                self.fail(job, progress, 0).await;
                return Err(e);
            }
        };
        self.execute(job, chunks, provider, sink, progress, cancel)
            .await
    }

    /// Drive a planned job to a terminal state, writing audio into `sink`.
    ///
    /// On success the job is `Completed` or `PartiallyFailed` and the sink
    /// holds the artifact. On error the job is `Failed` and the sink content
    /// must be discarded.
    pub async fn execute<W>(
        &self,
        job: &mut ConversionJob,
        chunks: Vec<TextChunk>,
        provider: Arc<dyn SpeechSynthesizer>,
        sink: W,
        progress: &ProgressSink,
        cancel: CancellationToken,
    ) -> ConversionResult<ConversionMetadata>
    where
        W: Write + Seek + Send,
    {
        let total = chunks.len();
        let format = provider.output_format();
        job.chunks_total = total;

        if total == 0 {
            job.set_status(JobStatus::Completed);
            progress
                .emit(event(job, 0, JobStatus::Completed))
                .await;
            info!(job_id = %job.id, "Nothing to synthesize, job completed");
            return Ok(ConversionMetadata {
                total_duration_ms: 0,
                chunk_count: 0,
                failed_chunk_indices: Vec::new(),
                failures: Vec::new(),
                gaps: Vec::new(),
                format,
                mime_type: format.mime_type(),
            });
        }

        let mut assembler = match Assembler::new(format, job.gap_policy, sink) {
            Ok(assembler) => assembler,
            Err(e) => {
                self.fail(job, progress, 0).await;
                return Err(e);
            }
        };

        job.set_status(JobStatus::Running);
        progress.emit(event(job, 0, JobStatus::Running)).await;

        // Workers beyond what the backend serves at once would only queue
        let worker_count = provider
            .max_concurrency()
            .map_or(job.worker_pool_size, |limit| job.worker_pool_size.min(limit))
            .clamp(1, total);
        info!(
            job_id = %job.id,
            provider = provider.name(),
            chunks = total,
            workers = worker_count,
            policy = ?job.failure_policy,
            "Starting conversion"
        );

        let stop = cancel.child_token();
        let fail_fast = job.failure_policy == FailurePolicy::FailFast;
        let queue = Arc::new(Mutex::new(VecDeque::from(chunks)));
        let client = ResilientClient::new(provider, self.retry_policy.clone());
        let (tx, mut rx) = mpsc::channel::<ChunkResult>(worker_count * 2);

        for worker in 0..worker_count {
            let span = info_span!("worker", job_id = %job.id, worker);
            tokio::spawn(
                worker_loop(
                    queue.clone(),
                    client.clone(),
                    tx.clone(),
                    stop.clone(),
                    fail_fast,
                )
                .instrument(span),
            );
        }
        drop(tx);

        let deadline = job.deadline;
        let timer = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        let mut reorder: BTreeMap<usize, ChunkResult> = BTreeMap::new();
        let mut next_index = 0;
        let mut completed = 0;

        let collected: ConversionResult<()> = loop {
            let received = tokio::select! {
                biased;
                result = rx.recv() => result,
                _ = cancel.cancelled() => break Err(ConversionError::Cancelled),
                _ = &mut timer => {
                    break Err(ConversionError::Timeout(deadline.map_or(0, |d| d.as_secs())));
                }
            };

            let Some(result) = received else {
                break Ok(());
            };
            completed += 1;

            if fail_fast && let Some(failure) = result.failure() {
                reorder.insert(result.index, result);
                break Err(ConversionError::ChunkFailed {
                    index: failure.index,
                    kind: failure.kind,
                    message: failure.message,
                });
            }

            reorder.insert(result.index, result);
            if let Err(e) = flush_ready(&mut reorder, &mut next_index, &mut assembler, job) {
                break Err(e);
            }

            progress
                .emit(event(job, completed, JobStatus::Running))
                .await;
        };

        if let Err(e) = collected {
            // In-flight calls finish on their own; their results are dropped with `rx`
            stop.cancel();
            job.results.extend(reorder.into_values().map(release_audio));
            job.results.sort_by_key(|r| r.index);
            warn!(job_id = %job.id, error = %e, completed, "Conversion failed");
            self.fail(job, progress, completed).await;
            return Err(e);
        }

        if next_index != total {
            let err = ConversionError::AssemblyError(format!(
                "missing results: {next_index} of {total} chunks resolved"
            ));
            self.fail(job, progress, completed).await;
            return Err(err);
        }

        let assembly = match assembler.finish() {
            Ok(assembly) => assembly,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Assembly failed");
                self.fail(job, progress, completed).await;
                return Err(e);
            }
        };

        let failures = job.failures();
        let status = if failures.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyFailed
        };
        job.set_status(status);
        progress.emit(event(job, completed, status)).await;

        info!(
            job_id = %job.id,
            status = %status,
            segments = assembly.segment_count,
            failed = failures.len(),
            duration_ms = assembly.duration_ms,
            "Conversion finished"
        );

        Ok(ConversionMetadata {
            total_duration_ms: assembly.duration_ms,
            chunk_count: total,
            failed_chunk_indices: job.failed_chunk_indices(),
            failures,
            gaps: assembly.gaps,
            format,
            mime_type: format.mime_type(),
        })
    }

    async fn fail(&self, job: &mut ConversionJob, progress: &ProgressSink, completed: usize) {
        job.set_status(JobStatus::Failed);
        progress
            .emit(event(job, completed, JobStatus::Failed))
            .await;
    }
}

fn event(job: &ConversionJob, completed: usize, status: JobStatus) -> ProgressEvent {
    ProgressEvent {
        job_id: job.id,
        chunks_completed: completed,
        chunks_total: job.chunks_total,
        status,
    }
}

async fn worker_loop(
    queue: Arc<Mutex<VecDeque<TextChunk>>>,
    client: ResilientClient,
    tx: mpsc::Sender<ChunkResult>,
    stop: CancellationToken,
    fail_fast: bool,
) {
    loop {
        let chunk = {
            let mut queue = queue.lock();
            if stop.is_cancelled() {
                break;
            }
            queue.pop_front()
        };
        let Some(chunk) = chunk else {
            break;
        };

        debug!(chunk = chunk.index, "Dispatching chunk");
        let result = client.synthesize_chunk(&chunk, &stop).await;

        if fail_fast && result.is_failure() {
            stop.cancel();
        }
        if tx.send(result).await.is_err() {
            break;
        }
    }
}

/// Move the contiguous ready prefix of `reorder` into the assembler.
fn flush_ready<W: Write + Seek>(
    reorder: &mut BTreeMap<usize, ChunkResult>,
    next_index: &mut usize,
    assembler: &mut Assembler<W>,
    job: &mut ConversionJob,
) -> ConversionResult<()> {
    while let Some(result) = reorder.remove(next_index) {
        match &result.outcome {
            ChunkOutcome::Success { audio, .. } => assembler.push_segment(audio)?,
            ChunkOutcome::Failure { .. } => assembler.push_gap(result.index)?,
        }
        job.results.push(release_audio(result));
        *next_index += 1;
    }
    Ok(())
}

/// Keep the result record but drop the audio bytes, which now live in the sink.
fn release_audio(mut result: ChunkResult) -> ChunkResult {
    if let ChunkOutcome::Success { audio, .. } = &mut result.outcome {
        audio.data.clear();
    }
    result
}
