//! Local TTS through the Piper engine.
//!
//! Voices are Piper model names resolved to `<model_dir>/<voice>.onnx`.
//! Output is WAV (default) or raw PCM at the engine's sample rate.

mod config;
mod provider;

pub use config::{
    DEFAULT_LOCAL_ALIAS, DEFAULT_LOCAL_ENGINE_SLOTS, DEFAULT_LOCAL_VOICE, DEFAULT_PIPER_BINARY,
    DEFAULT_PIPER_SAMPLE_RATE, LocalEngine, LocalEngineConfig,
};
pub use provider::LocalTTS;
