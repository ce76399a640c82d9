//! OpenAI TTS provider module.
//!
//! Text-to-speech over OpenAI's Audio Speech API. One HTTP request per chunk;
//! the response body is the encoded audio for that chunk.
//!
//! # Supported Models
//!
//! - `tts-1` - Standard quality, lower latency
//! - `tts-1-hd` - High definition quality, higher latency
//! - `gpt-4o-mini-tts` - Latest model with improved quality
//!
//! # Audio Formats
//!
//! mp3, opus, aac, flac, wav, pcm (24kHz 16-bit mono little-endian)

mod config;
mod provider;

pub use config::{OPENAI_SAMPLE_RATE, OpenAITTSModel, OpenAIVoice};
pub use provider::{OPENAI_TTS_URL, OpenAITTS};
