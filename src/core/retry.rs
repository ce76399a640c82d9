//! Per-chunk retry with exponential backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::core::chunker::TextChunk;
use crate::core::job::{ChunkOutcome, ChunkResult};
use crate::core::tts::{AudioSegment, ErrorKind, ProviderError, SpeechSynthesizer};

/// Rough narration speed used to estimate the length of compressed audio.
const ESTIMATED_CHARS_PER_SECOND: u64 = 15;

/// Retry and timeout settings for provider calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random, 0.0 disables jitter
    pub jitter: f64,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: 0.25,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 for the first retry).
    ///
    /// `salt` decorrelates jitter between callers retrying at the same
    /// instant; the chunk index is a good choice. The result never exceeds
    /// `max_delay`.
    pub fn delay_for(&self, retry: u32, salt: u64) -> Duration {
        let base = self.base_delay.as_millis() as f64;
        let cap = self.max_delay.as_millis() as f64;
        // Exponential backoff: base * multiplier^(retry-1)
        let delay = base * self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let delay = delay.min(cap);

        let delay = if self.jitter > 0.0 {
            (delay + jitter_unit(salt) * delay * self.jitter).clamp(0.0, cap)
        } else {
            delay
        };

        Duration::from_millis(delay as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, kind: ErrorKind, attempts: u32) -> bool {
        kind.is_retryable() && attempts < self.max_attempts
    }
}

static JITTER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Pseudo-random value in `[-1, 1)`, distinct per call even within one instant.
fn jitter_unit(salt: u64) -> f64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() as u64;
    let sequence = JITTER_SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let mut input = [0u8; 16];
    input[..8].copy_from_slice(&salt.to_le_bytes());
    input[8..].copy_from_slice(&sequence.to_le_bytes());
    let hash = xxh3_64_with_seed(&input, nanos);

    // Top 53 bits give a uniform f64 in [0, 1)
    let unit = (hash >> 11) as f64 / (1u64 << 53) as f64;
    unit * 2.0 - 1.0
}

/// Result of one provider attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(AudioSegment),
    Transient(ProviderError),
    Permanent(ProviderError),
}

impl From<Result<AudioSegment, ProviderError>> for AttemptOutcome {
    fn from(result: Result<AudioSegment, ProviderError>) -> Self {
        match result {
            Ok(audio) => Self::Success(audio),
            Err(err) if err.kind.is_retryable() => Self::Transient(err),
            Err(err) => Self::Permanent(err),
        }
    }
}

/// Wraps a provider with per-attempt timeouts and retries.
#[derive(Clone)]
pub struct ResilientClient {
    provider: Arc<dyn SpeechSynthesizer>,
    policy: Arc<RetryPolicy>,
}

impl ResilientClient {
    pub fn new(provider: Arc<dyn SpeechSynthesizer>, policy: Arc<RetryPolicy>) -> Self {
        Self { provider, policy }
    }

    pub fn provider(&self) -> &Arc<dyn SpeechSynthesizer> {
        &self.provider
    }

    async fn attempt(&self, text: &str) -> AttemptOutcome {
        match tokio::time::timeout(self.policy.attempt_timeout, self.provider.synthesize(text)).await
        {
            Ok(result) => result.into(),
            Err(_) => AttemptOutcome::Transient(ProviderError::transient(format!(
                "attempt timed out after {}ms",
                self.policy.attempt_timeout.as_millis()
            ))),
        }
    }

    /// Synthesize one chunk, retrying transient failures.
    ///
    /// Never fails: every error ends up in the returned [`ChunkResult`].
    /// Cancellation is observed only between attempts.
    pub async fn synthesize_chunk(
        &self,
        chunk: &TextChunk,
        cancel: &CancellationToken,
    ) -> ChunkResult {
        if chunk.is_blank() {
            return ChunkResult {
                index: chunk.index,
                outcome: ChunkOutcome::Success {
                    audio: AudioSegment::empty(
                        self.provider.output_format(),
                        self.provider.sample_rate(),
                    ),
                    attempts: 0,
                },
            };
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.attempt(&chunk.text).await {
                AttemptOutcome::Success(mut audio) => {
                    if audio.duration_ms.is_none() {
                        audio.duration_ms = Some(estimate_duration_ms(&chunk.text));
                    }
                    debug!(chunk = chunk.index, attempt = attempts, "Chunk synthesized");
                    return ChunkResult {
                        index: chunk.index,
                        outcome: ChunkOutcome::Success { audio, attempts },
                    };
                }
                AttemptOutcome::Transient(err) | AttemptOutcome::Permanent(err) => err,
            };

            if !self.policy.should_retry(err.kind, attempts) {
                warn!(
                    chunk = chunk.index,
                    attempt = attempts,
                    kind = %err.kind,
                    error = %err.message,
                    "Chunk failed"
                );
                return failure(chunk.index, err, attempts);
            }

            let delay = self.policy.delay_for(attempts, chunk.index as u64);
            debug!(
                chunk = chunk.index,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err.message,
                "Retrying chunk after transient error"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    debug!(chunk = chunk.index, "Retry abandoned, job cancelled");
                    return failure(chunk.index, err, attempts);
                }
            }
        }
    }
}

fn failure(index: usize, err: ProviderError, attempts: u32) -> ChunkResult {
    ChunkResult {
        index,
        outcome: ChunkOutcome::Failure {
            kind: err.kind,
            message: err.message,
            attempts,
        },
    }
}

pub fn estimate_duration_ms(text: &str) -> u64 {
    text.chars().count() as u64 * 1000 / ESTIMATED_CHARS_PER_SECOND
}
