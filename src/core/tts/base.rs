use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Output container/codec produced by a provider and written by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    /// Raw 16-bit mono little-endian samples
    Pcm,
}

impl AudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    #[inline]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/ogg",
            Self::Aac => "audio/aac",
            Self::Flac => "audio/flac",
            Self::Wav => "audio/wav",
            Self::Pcm => "audio/pcm",
        }
    }

    /// File extension used by the CLI when no output name is given.
    #[inline]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Opus => "ogg",
            other => other.as_str(),
        }
    }

    /// Whether silence can be synthesized by writing zero samples.
    #[inline]
    pub fn supports_silence(&self) -> bool {
        matches!(self, Self::Wav | Self::Pcm)
    }

    pub fn all() -> &'static [AudioFormat] {
        &[
            Self::Mp3,
            Self::Opus,
            Self::Aac,
            Self::Flac,
            Self::Wav,
            Self::Pcm,
        ]
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" | "mpeg" => Ok(Self::Mp3),
            "opus" | "ogg" => Ok(Self::Opus),
            "aac" => Ok(Self::Aac),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            "pcm" | "linear16" | "raw" => Ok(Self::Pcm),
            other => Err(format!("unsupported audio format: {other}")),
        }
    }
}

/// One unit of synthesized audio, as returned by a provider for a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub data: Bytes,
    pub format: AudioFormat,
    pub sample_rate: u32,
    /// Measured for WAV/PCM, `None` for compressed formats until estimated
    pub duration_ms: Option<u64>,
}

impl AudioSegment {
    /// Build a segment and measure its duration when the format allows it.
    pub fn new(data: impl Into<Bytes>, format: AudioFormat, sample_rate: u32) -> Self {
        let data = data.into();
        let duration_ms = measure_duration_ms(&data, format, sample_rate);
        Self {
            data,
            format,
            sample_rate,
            duration_ms,
        }
    }

    /// Placeholder for chunks that carry no speakable text.
    pub fn empty(format: AudioFormat, sample_rate: u32) -> Self {
        Self {
            data: Bytes::new(),
            format,
            sample_rate,
            duration_ms: Some(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn measure_duration_ms(data: &[u8], format: AudioFormat, sample_rate: u32) -> Option<u64> {
    match format {
        AudioFormat::Pcm if sample_rate > 0 => {
            Some((data.len() as u64 / 2) * 1000 / sample_rate as u64)
        }
        AudioFormat::Wav => {
            let reader = hound::WavReader::new(Cursor::new(data)).ok()?;
            let spec = reader.spec();
            if spec.sample_rate == 0 {
                return None;
            }
            Some(reader.duration() as u64 * 1000 / spec.sample_rate as u64)
        }
        _ => None,
    }
}

/// Classification of a provider failure, used to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limits, 5xx responses, timeouts, busy engines
    Transient,
    /// Authentication, unknown model, missing model file
    Permanent,
    /// The request content itself was rejected
    InvalidInput,
}

impl ErrorKind {
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::InvalidInput => "invalid_input",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }
}

/// Credential wrapper that never prints its contents and is wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Built-in backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    #[serde(alias = "open_ai")]
    OpenAI,
    #[serde(alias = "piper")]
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAI),
            "local" | "piper" => Ok(Self::Local),
            other => Err(format!(
                "unsupported TTS provider: {other}. Supported providers: openai, local"
            )),
        }
    }
}

/// Voice and backend selection for one job.
///
/// Optional fields are filled from server defaults before the job starts.
/// `endpoint` and `credentials` are never taken from a request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(alias = "provider")]
    pub kind: ProviderKind,
    pub voice: Option<String>,
    pub model: Option<String>,
    #[serde(alias = "format")]
    pub output_format: Option<AudioFormat>,
    pub speed: Option<f32>,
    #[serde(skip)]
    pub endpoint: Option<String>,
    #[serde(skip)]
    pub credentials: Option<SecretString>,
}

/// Capability seam between the pipeline and a concrete TTS backend.
///
/// One call turns one chunk of text into one audio segment. Implementations
/// classify their failures so the caller can decide whether to retry.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioSegment, ProviderError>;

    /// Format of every segment this provider returns.
    fn output_format(&self) -> AudioFormat;

    /// Native sample rate of returned audio.
    fn sample_rate(&self) -> u32;

    fn name(&self) -> &'static str;

    /// Upper bound on calls the backend serves at once, if it has one.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({ "provider": self.name() })
    }
}
