use uuid::Uuid;

use crate::core::tts::ErrorKind;

pub type ConversionResult<T> = Result<T, ConversionError>;

/// Job-level failures of the conversion pipeline.
///
/// Per-chunk provider errors never surface here directly; they are absorbed
/// into chunk results and only become a `ChunkFailed` when they decide the
/// outcome of a fail-fast job.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid input: {0}")]
    InputError(String),

    #[error("Provider not configured: {0}")]
    Configuration(String),

    #[error("Assembly failed: {0}")]
    AssemblyError(String),

    #[error("Chunk {index} failed ({kind}): {message}")]
    ChunkFailed {
        index: usize,
        kind: ErrorKind,
        message: String,
    },

    #[error("Job exceeded its deadline of {0}s")]
    Timeout(u64),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for ConversionError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::AssemblyError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_failed_display() {
        let err = ConversionError::ChunkFailed {
            index: 3,
            kind: ErrorKind::Permanent,
            message: "Invalid API key".to_string(),
        };
        assert_eq!(err.to_string(), "Chunk 3 failed (permanent): Invalid API key");
    }

    #[test]
    fn test_hound_format_error_is_assembly_error() {
        let err: ConversionError = hound::Error::FormatError("no RIFF tag found").into();
        assert!(matches!(err, ConversionError::AssemblyError(_)));
    }
}
