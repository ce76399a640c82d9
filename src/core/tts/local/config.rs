use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::core::error::{ConversionError, ConversionResult};

pub const DEFAULT_PIPER_BINARY: &str = "piper";
/// Native rate of the common Piper "medium" voices
pub const DEFAULT_PIPER_SAMPLE_RATE: u32 = 22_050;
pub const DEFAULT_LOCAL_VOICE: &str = "en_US-lessac-medium";
pub const DEFAULT_LOCAL_ENGINE_SLOTS: usize = 2;

/// Alias accepted for "whatever local voice the server is configured with".
pub const DEFAULT_LOCAL_ALIAS: &str = "default_local";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalEngineConfig {
    pub binary: PathBuf,
    /// Directory holding `<voice>.onnx` Piper models
    pub model_dir: Option<PathBuf>,
    /// Maximum concurrent Piper processes across all jobs
    pub slots: usize,
    pub sample_rate: u32,
    pub default_voice: String,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_PIPER_BINARY),
            model_dir: None,
            slots: DEFAULT_LOCAL_ENGINE_SLOTS,
            sample_rate: DEFAULT_PIPER_SAMPLE_RATE,
            default_voice: DEFAULT_LOCAL_VOICE.to_string(),
        }
    }
}

/// Process-wide handle to the local Piper engine.
///
/// The slot semaphore is shared by every job, so the configured slot count
/// bounds the number of live Piper processes on the host.
#[derive(Debug)]
pub struct LocalEngine {
    config: LocalEngineConfig,
    pub(super) slots: Arc<Semaphore>,
}

impl LocalEngine {
    pub fn new(config: LocalEngineConfig) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.slots.max(1)));
        Arc::new(Self { config, slots })
    }

    pub fn config(&self) -> &LocalEngineConfig {
        &self.config
    }

    pub fn binary(&self) -> &Path {
        &self.config.binary
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Resolve a voice name to its model file under the model directory.
    pub fn resolve_model(&self, voice: Option<&str>) -> ConversionResult<(String, PathBuf)> {
        let voice = match voice {
            None | Some("") | Some(DEFAULT_LOCAL_ALIAS) => self.config.default_voice.as_str(),
            Some(v) => v,
        };

        let valid = !voice.contains("..")
            && voice
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ConversionError::InputError(format!(
                "invalid local voice name: {voice}"
            )));
        }

        let Some(model_dir) = &self.config.model_dir else {
            return Err(ConversionError::Configuration(
                "PIPER_MODEL_DIR is not configured".to_string(),
            ));
        };

        let file = if voice.ends_with(".onnx") {
            voice.to_string()
        } else {
            format!("{voice}.onnx")
        };

        Ok((voice.trim_end_matches(".onnx").to_string(), model_dir.join(file)))
    }

    /// Voices installed in the model directory, sorted by name.
    pub async fn list_voices(&self) -> Vec<String> {
        let Some(model_dir) = &self.config.model_dir else {
            return Vec::new();
        };

        let mut voices = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(model_dir).await else {
            return voices;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "onnx")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                voices.push(stem.to_string());
            }
        }

        voices.sort();
        voices
    }
}
