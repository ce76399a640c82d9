mod base;
pub mod local;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use base::{
    AudioFormat, AudioSegment, ErrorKind, ProviderConfig, ProviderError, ProviderKind,
    SecretString, SpeechSynthesizer,
};
pub use local::{LocalEngine, LocalEngineConfig, LocalTTS};
pub use openai::{OPENAI_TTS_URL, OpenAITTS, OpenAITTSModel, OpenAIVoice};

use crate::core::error::{ConversionError, ConversionResult};

/// Long-lived handles shared by every provider instance.
#[derive(Clone)]
pub struct ProviderResources {
    /// Pooled client reused by all HTTP providers
    pub http: reqwest::Client,
    pub local: Arc<LocalEngine>,
}

impl ProviderResources {
    pub fn new(local: LocalEngineConfig) -> ConversionResult<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConversionError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            local: LocalEngine::new(local),
        })
    }
}

/// Built-in backends behind the [`SpeechSynthesizer`] seam.
pub enum TtsProvider {
    OpenAI(OpenAITTS),
    Local(LocalTTS),
}

#[async_trait]
impl SpeechSynthesizer for TtsProvider {
    async fn synthesize(&self, text: &str) -> Result<AudioSegment, ProviderError> {
        match self {
            Self::OpenAI(p) => p.synthesize(text).await,
            Self::Local(p) => p.synthesize(text).await,
        }
    }

    fn output_format(&self) -> AudioFormat {
        match self {
            Self::OpenAI(p) => p.output_format(),
            Self::Local(p) => p.output_format(),
        }
    }

    fn sample_rate(&self) -> u32 {
        match self {
            Self::OpenAI(p) => p.sample_rate(),
            Self::Local(p) => p.sample_rate(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::OpenAI(p) => p.name(),
            Self::Local(p) => p.name(),
        }
    }

    fn max_concurrency(&self) -> Option<usize> {
        match self {
            Self::OpenAI(p) => p.max_concurrency(),
            Self::Local(p) => p.max_concurrency(),
        }
    }

    fn get_provider_info(&self) -> serde_json::Value {
        match self {
            Self::OpenAI(p) => p.get_provider_info(),
            Self::Local(p) => p.get_provider_info(),
        }
    }
}

/// Factory function to create a TTS provider.
///
/// Validation of voice, model and format happens here, so an invalid
/// configuration fails before any chunk is dispatched.
///
/// # Supported Providers
///
/// - `openai` - OpenAI TTS API (tts-1, tts-1-hd, gpt-4o-mini-tts)
/// - `local` - Piper engine running as a subprocess
pub fn create_tts_provider(
    config: &ProviderConfig,
    resources: &ProviderResources,
) -> ConversionResult<TtsProvider> {
    match config.kind {
        ProviderKind::OpenAI => Ok(TtsProvider::OpenAI(OpenAITTS::new(
            config,
            resources.http.clone(),
        )?)),
        ProviderKind::Local => Ok(TtsProvider::Local(LocalTTS::new(
            config,
            resources.local.clone(),
        )?)),
    }
}
