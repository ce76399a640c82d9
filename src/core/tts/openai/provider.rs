//! OpenAI TTS provider implementation.
//!
//! # API Reference
//!
//! - Endpoint: `POST https://api.openai.com/v1/audio/speech`
//! - Models: tts-1, tts-1-hd, gpt-4o-mini-tts
//! - Voices: alloy, ash, ballad, coral, echo, fable, onyx, nova, sage, shimmer, verse
//! - Output: mp3, opus, aac, flac, wav, pcm (24kHz)
//! - Speed: 0.25 to 4.0

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use super::config::{OPENAI_SAMPLE_RATE, OpenAITTSModel, OpenAIVoice};
use crate::core::error::{ConversionError, ConversionResult};
use crate::core::tts::base::{
    AudioFormat, AudioSegment, ProviderConfig, ProviderError, SecretString, SpeechSynthesizer,
};

/// OpenAI TTS API endpoint
pub const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

/// OpenAI-specific TTS request builder
#[derive(Clone)]
struct OpenAIRequestBuilder {
    api_key: SecretString,
    endpoint: String,
    model: OpenAITTSModel,
    voice: OpenAIVoice,
    response_format: AudioFormat,
    /// Speaking speed (0.25 to 4.0)
    speed: f32,
}

impl OpenAIRequestBuilder {
    fn build_http_request(&self, client: &reqwest::Client, text: &str) -> reqwest::RequestBuilder {
        let mut body = json!({
            "model": self.model.as_str(),
            "input": text,
            "voice": self.voice.as_str(),
            "response_format": self.response_format.as_str(),
        });

        // Add speed if not default (1.0)
        if (self.speed - 1.0).abs() > 0.001 {
            body["speed"] = json!(self.speed);
        }

        client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&body)
    }
}

/// Map a non-success response to a classified provider error.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    let message = if detail.is_empty() {
        format!("OpenAI API returned {status}")
    } else {
        format!("OpenAI API returned {status}: {detail}")
    };

    match status.as_u16() {
        429 | 500..=599 => ProviderError::transient(message),
        401 | 403 | 404 => ProviderError::permanent(message),
        400 | 422 => ProviderError::invalid_input(message),
        _ => ProviderError::permanent(message),
    }
}

/// Pull `error.message` out of an OpenAI error body.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_builder() {
        ProviderError::permanent(format!("Invalid OpenAI request: {err}"))
    } else if err.is_timeout() {
        ProviderError::transient(format!("OpenAI request timed out: {err}"))
    } else {
        ProviderError::transient(format!("OpenAI request failed: {err}"))
    }
}

/// OpenAI TTS provider using the Audio Speech API.
///
/// Voice, model and format are validated when the provider is built, so a
/// job with an unknown voice never reaches the network.
pub struct OpenAITTS {
    client: reqwest::Client,
    request_builder: OpenAIRequestBuilder,
}

impl OpenAITTS {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> ConversionResult<Self> {
        let model = match config.model.as_deref() {
            None | Some("") => OpenAITTSModel::default(),
            Some(m) => m.parse().map_err(ConversionError::InputError)?,
        };

        let voice = match config.voice.as_deref() {
            None | Some("") => OpenAIVoice::default(),
            Some(v) => v.parse().map_err(ConversionError::InputError)?,
        };

        let api_key = match &config.credentials {
            Some(key) if !key.is_empty() => key.clone(),
            _ => {
                return Err(ConversionError::Configuration(
                    "OpenAI API key is not configured".to_string(),
                ));
            }
        };

        let speed = config.speed.unwrap_or(1.0).clamp(0.25, 4.0);

        let request_builder = OpenAIRequestBuilder {
            api_key,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| OPENAI_TTS_URL.to_string()),
            model,
            voice,
            response_format: config.output_format.unwrap_or_default(),
            speed,
        };

        Ok(Self {
            client,
            request_builder,
        })
    }

    pub fn model(&self) -> OpenAITTSModel {
        self.request_builder.model
    }

    pub fn voice(&self) -> OpenAIVoice {
        self.request_builder.voice
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAITTS {
    async fn synthesize(&self, text: &str) -> Result<AudioSegment, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::invalid_input("Text cannot be empty"));
        }

        let response = self
            .request_builder
            .build_http_request(&self.client, text)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            warn!(status = status.as_u16(), kind = %err.kind, "OpenAI TTS request failed");
            return Err(err);
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ProviderError::transient(format!("Failed to read OpenAI audio: {e}")))?;

        if audio.is_empty() {
            return Err(ProviderError::transient("OpenAI returned an empty audio body"));
        }

        debug!(bytes = audio.len(), chars = text.chars().count(), "OpenAI chunk synthesized");

        Ok(AudioSegment::new(
            audio,
            self.request_builder.response_format,
            OPENAI_SAMPLE_RATE,
        ))
    }

    fn output_format(&self) -> AudioFormat {
        self.request_builder.response_format
    }

    fn sample_rate(&self) -> u32 {
        OPENAI_SAMPLE_RATE
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn get_provider_info(&self) -> serde_json::Value {
        json!({
            "provider": "openai",
            "api_type": "HTTP REST",
            "supported_formats": AudioFormat::all().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "default_sample_rate": OPENAI_SAMPLE_RATE,
            "supported_models": OpenAITTSModel::all().iter().map(|m| m.as_str()).collect::<Vec<_>>(),
            "supported_voices": OpenAIVoice::all().iter().map(|v| v.as_str()).collect::<Vec<_>>(),
            "speed_range": {
                "min": 0.25,
                "max": 4.0,
                "default": 1.0
            },
            "documentation": "https://platform.openai.com/docs/api-reference/audio/createSpeech",
        })
    }
}
