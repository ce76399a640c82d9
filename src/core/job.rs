//! Job, request and result types shared across the pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use crate::core::assembler::{GapMarker, GapPolicy};
use crate::core::error::{ConversionError, ConversionResult};
use crate::core::tts::{AudioFormat, AudioSegment, ErrorKind, ProviderConfig};

/// Largest worker pool a single job may request.
pub const MAX_WORKER_POOL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    PartiallyFailed,
}

impl JobStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::PartiallyFailed)
    }

    /// Terminal states that come with an artifact.
    #[inline]
    pub fn has_artifact(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially_failed",
        };
        f.write_str(s)
    }
}

/// What happens to the rest of the job when a chunk fails for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel outstanding work and fail the job
    #[default]
    FailFast,
    /// Run every chunk and assemble whatever succeeded
    BestEffort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Success {
        audio: AudioSegment,
        attempts: u32,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        attempts: u32,
    },
}

/// Final result for one dispatched chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub index: usize,
    pub outcome: ChunkOutcome,
}

impl ChunkResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Failure { .. })
    }

    pub fn attempts(&self) -> u32 {
        match &self.outcome {
            ChunkOutcome::Success { attempts, .. } | ChunkOutcome::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn failure(&self) -> Option<ChunkFailure> {
        match &self.outcome {
            ChunkOutcome::Failure {
                kind,
                message,
                attempts,
            } => Some(ChunkFailure {
                index: self.index,
                kind: *kind,
                attempts: *attempts,
                message: message.clone(),
            }),
            ChunkOutcome::Success { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub attempts: u32,
    pub message: String,
}

/// Body of a conversion request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvertRequest {
    pub text: String,
    /// Server defaults apply when absent
    pub provider: Option<ProviderConfig>,
    pub chunk_size_limit: Option<usize>,
    pub failure_policy: FailurePolicy,
    pub gap_policy: GapPolicy,
    pub worker_pool_size: Option<usize>,
    pub job_timeout_secs: Option<u64>,
}

/// Server-wide values used when a request leaves a setting out.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionDefaults {
    pub chunk_size_limit: usize,
    pub worker_pool_size: usize,
    pub max_text_chars: usize,
    pub job_timeout: Option<Duration>,
    /// Capacity of the push progress channel
    pub progress_buffer: usize,
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            chunk_size_limit: 4000,
            worker_pool_size: 4,
            max_text_chars: 1_000_000,
            job_timeout: None,
            progress_buffer: 64,
        }
    }
}

/// A single long-form conversion, owned by the orchestrator while it runs.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: Uuid,
    pub text: Arc<str>,
    pub provider: Arc<ProviderConfig>,
    pub chunk_size_limit: usize,
    pub failure_policy: FailurePolicy,
    pub gap_policy: GapPolicy,
    pub worker_pool_size: usize,
    pub deadline: Option<Duration>,
    pub status: JobStatus,
    /// Ordered by chunk index
    pub results: Vec<ChunkResult>,
    pub chunks_total: usize,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub fingerprint: u128,
}

impl ConversionJob {
    /// Validate a request and resolve it against server defaults.
    ///
    /// `provider` must already carry resolved voice, format and credentials.
    pub fn new(
        request: ConvertRequest,
        provider: ProviderConfig,
        defaults: &ConversionDefaults,
    ) -> ConversionResult<Self> {
        let char_count = request.text.chars().count();
        if char_count > defaults.max_text_chars {
            return Err(ConversionError::InputError(format!(
                "Text is too long: {char_count} characters (maximum {})",
                defaults.max_text_chars
            )));
        }

        let chunk_size_limit = request
            .chunk_size_limit
            .unwrap_or(defaults.chunk_size_limit);
        if chunk_size_limit == 0 {
            return Err(ConversionError::InputError(
                "chunk_size_limit must be greater than 0".to_string(),
            ));
        }

        let worker_pool_size = request
            .worker_pool_size
            .unwrap_or(defaults.worker_pool_size);
        if worker_pool_size == 0 || worker_pool_size > MAX_WORKER_POOL_SIZE {
            return Err(ConversionError::InputError(format!(
                "worker_pool_size must be between 1 and {MAX_WORKER_POOL_SIZE}"
            )));
        }

        let deadline = match request.job_timeout_secs {
            Some(0) => {
                return Err(ConversionError::InputError(
                    "job_timeout_secs must be greater than 0".to_string(),
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.job_timeout,
        };

        let format = provider.output_format.unwrap_or_default();
        request.gap_policy.validate(format)?;

        let fingerprint = fingerprint(
            &request.text,
            &provider,
            chunk_size_limit,
            request.failure_policy,
            request.gap_policy,
        );
        let now = OffsetDateTime::now_utc();

        Ok(Self {
            id: Uuid::new_v4(),
            text: Arc::from(request.text),
            provider: Arc::new(provider),
            chunk_size_limit,
            failure_policy: request.failure_policy,
            gap_policy: request.gap_policy,
            worker_pool_size,
            deadline,
            status: JobStatus::Pending,
            results: Vec::new(),
            chunks_total: 0,
            created_at: now,
            updated_at: now,
            fingerprint,
        })
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn failed_chunk_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.index)
            .collect()
    }

    pub fn failures(&self) -> Vec<ChunkFailure> {
        self.results.iter().filter_map(ChunkResult::failure).collect()
    }

    pub fn fingerprint_hex(&self) -> String {
        format!("{:032x}", self.fingerprint)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            status: self.status,
            chunks_completed: self.results.len(),
            chunks_total: self.chunks_total,
            failed_chunk_indices: self.failed_chunk_indices(),
            failures: self.failures(),
            error: None,
            fingerprint: self.fingerprint_hex(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Content hash over everything that shapes the artifact: text, voice
/// selection, chunk limit, failure policy and gap policy.
pub fn fingerprint(
    text: &str,
    provider: &ProviderConfig,
    chunk_size_limit: usize,
    failure_policy: FailurePolicy,
    gap_policy: GapPolicy,
) -> u128 {
    let mut s = String::with_capacity(text.len() + 64);
    s.push_str(provider.kind.as_str());
    s.push('|');
    s.push_str(provider.voice.as_deref().unwrap_or(""));
    s.push('|');
    s.push_str(provider.model.as_deref().unwrap_or(""));
    s.push('|');
    s.push_str(provider.output_format.unwrap_or_default().as_str());
    s.push('|');
    if let Some(speed) = provider.speed {
        s.push_str(&format!("{speed:.3}"));
    }
    s.push('|');
    s.push_str(&chunk_size_limit.to_string());
    s.push('|');
    s.push_str(match failure_policy {
        FailurePolicy::FailFast => "fail_fast",
        FailurePolicy::BestEffort => "best_effort",
    });
    s.push('|');
    match gap_policy {
        GapPolicy::Skip => s.push_str("skip"),
        GapPolicy::Silence { duration_ms } => s.push_str(&format!("silence:{duration_ms}")),
    }
    s.push('|');
    s.push_str(text);
    xxh3_128(s.as_bytes())
}

/// Point-in-time view of a job, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub failed_chunk_indices: Vec<usize>,
    pub failures: Vec<ChunkFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fingerprint: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl JobSnapshot {
    pub fn progress_percentage(&self) -> f64 {
        if self.chunks_total == 0 {
            return 100.0;
        }
        self.chunks_completed as f64 / self.chunks_total as f64 * 100.0
    }
}

/// Description of an assembled artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionMetadata {
    pub total_duration_ms: u64,
    pub chunk_count: usize,
    pub failed_chunk_indices: Vec<usize>,
    pub failures: Vec<ChunkFailure>,
    pub gaps: Vec<GapMarker>,
    pub format: AudioFormat,
    pub mime_type: &'static str,
}
