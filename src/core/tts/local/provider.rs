//! Local Piper engine provider.
//!
//! Each chunk runs one `piper` process: text goes in on stdin and raw 16-bit
//! mono samples come back on stdout. WAV output is produced by wrapping those
//! samples in a RIFF header.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::config::LocalEngine;
use crate::core::error::{ConversionError, ConversionResult};
use crate::core::tts::base::{
    AudioFormat, AudioSegment, ProviderConfig, ProviderError, SpeechSynthesizer,
};

const STDERR_TAIL_CHARS: usize = 200;

pub struct LocalTTS {
    engine: Arc<LocalEngine>,
    voice: String,
    model_path: PathBuf,
    format: AudioFormat,
    /// Piper's inverse speed factor
    length_scale: Option<f32>,
}

impl LocalTTS {
    pub fn new(config: &ProviderConfig, engine: Arc<LocalEngine>) -> ConversionResult<Self> {
        let format = config.output_format.unwrap_or(AudioFormat::Wav);
        if !matches!(format, AudioFormat::Wav | AudioFormat::Pcm) {
            return Err(ConversionError::InputError(format!(
                "local engine supports only wav or pcm output, got {format}"
            )));
        }

        let (voice, model_path) = engine.resolve_model(config.voice.as_deref())?;

        let length_scale = config
            .speed
            .filter(|s| (s - 1.0).abs() > 0.001)
            .map(|s| 1.0 / s.clamp(0.25, 4.0));

        Ok(Self {
            engine,
            voice,
            model_path,
            format,
            length_scale,
        })
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(self.engine.binary());
        cmd.arg("--model").arg(&self.model_path).arg("--output_raw");
        if let Some(scale) = self.length_scale {
            cmd.arg("--length_scale").arg(format!("{scale:.3}"));
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn wrap_wav(&self, pcm: &[u8]) -> Result<Vec<u8>, ProviderError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.engine.config().sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
        let to_err = |e: hound::Error| ProviderError::transient(format!("WAV encoding failed: {e}"));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(to_err)?;
            for pair in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(to_err)?;
            }
            writer.finalize().map_err(to_err)?;
        }
        Ok(cursor.into_inner())
    }
}

fn tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    trimmed
        .chars()
        .skip(count.saturating_sub(STDERR_TAIL_CHARS))
        .collect()
}

#[async_trait]
impl SpeechSynthesizer for LocalTTS {
    async fn synthesize(&self, text: &str) -> Result<AudioSegment, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::invalid_input("Text cannot be empty"));
        }

        // Queue for a slot; the attempt timeout bounds the wait
        let _permit = self
            .engine
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::transient("Local TTS engine shut down"))?;

        if !tokio::fs::try_exists(&self.model_path).await.unwrap_or(false) {
            return Err(ProviderError::permanent(format!(
                "Piper model not found: {}",
                self.model_path.display()
            )));
        }

        let mut child = self.command().spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ProviderError::permanent(format!(
                    "Cannot run Piper binary {}: {e}",
                    self.engine.binary().display()
                ))
            }
            _ => ProviderError::transient(format!("Failed to spawn Piper: {e}")),
        })?;

        let stdin = child.stdin.take();
        let input = format!("{}\n", text.trim_end());
        let write = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()).await,
                None => Ok(()),
            }
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output =
            output.map_err(|e| ProviderError::transient(format!("Piper process failed: {e}")))?;

        if !output.status.success() {
            let stderr = tail(&output.stderr);
            warn!(voice = %self.voice, status = %output.status, stderr = %stderr, "Piper exited with failure");
            return Err(ProviderError::transient(format!(
                "Piper exited with {}: {stderr}",
                output.status
            )));
        }

        if let Err(e) = written {
            return Err(ProviderError::transient(format!(
                "Failed to write text to Piper: {e}"
            )));
        }

        if output.stdout.is_empty() {
            return Err(ProviderError::transient("Piper produced no audio"));
        }

        debug!(voice = %self.voice, bytes = output.stdout.len(), "Piper chunk synthesized");

        let sample_rate = self.engine.config().sample_rate;
        let data = match self.format {
            AudioFormat::Wav => self.wrap_wav(&output.stdout)?,
            _ => output.stdout,
        };

        Ok(AudioSegment::new(data, self.format, sample_rate))
    }

    fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn sample_rate(&self) -> u32 {
        self.engine.config().sample_rate
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(self.engine.config().slots.max(1))
    }

    fn get_provider_info(&self) -> serde_json::Value {
        serde_json::json!({
            "provider": "local",
            "engine": "piper",
            "voice": self.voice,
            "supported_formats": ["wav", "pcm"],
            "default_sample_rate": self.engine.config().sample_rate,
        })
    }
}
