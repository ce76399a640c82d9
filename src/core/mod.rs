pub mod assembler;
pub mod chunker;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod service;
pub mod store;
pub mod tts;

// Re-export commonly used types for convenience
pub use assembler::{Assembler, AssemblyMetadata, GapMarker, GapPolicy};
pub use chunker::{TextChunk, chunk_text};
pub use error::{ConversionError, ConversionResult};
pub use job::{
    ChunkFailure, ChunkOutcome, ChunkResult, ConversionDefaults, ConversionJob,
    ConversionMetadata, ConvertRequest, FailurePolicy, JobSnapshot, JobStatus,
};
pub use orchestrator::Orchestrator;
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSink, progress_channel};
pub use retry::{AttemptOutcome, ResilientClient, RetryPolicy};
pub use service::{ConversionService, ProviderDefaults};
pub use store::{Artifact, CancelAction, CollectError, JobStore};

pub use tts::{
    AudioFormat, AudioSegment, ErrorKind, ProviderConfig, ProviderError, ProviderKind,
    ProviderResources, SpeechSynthesizer, TtsProvider, create_tts_provider,
};
