//! Ordered audio assembly.
//!
//! Segments arrive in chunk order and are written straight to the sink:
//!
//! - WAV: samples are decoded with `hound` and re-encoded into one stream.
//!   The first segment fixes the output spec.
//! - PCM: raw bytes are appended.
//! - MP3, Opus, AAC, FLAC: encoded frames are appended as-is.
//!
//! Failed chunks leave a gap. The gap is always recorded as a marker and can
//! optionally be filled with silence for sample-based formats.

use std::io::{Cursor, Seek, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{ConversionError, ConversionResult};
use crate::core::tts::{AudioFormat, AudioSegment};

/// How a failed chunk is represented in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GapPolicy {
    /// Write nothing, only record a marker
    #[default]
    Skip,
    /// Write `duration_ms` of silence (WAV and PCM only)
    Silence { duration_ms: u64 },
}

impl GapPolicy {
    pub fn validate(&self, format: AudioFormat) -> ConversionResult<()> {
        match self {
            Self::Silence { .. } if !format.supports_silence() => {
                Err(ConversionError::InputError(format!(
                    "silence gaps require wav or pcm output, got {format}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Position of a missing chunk in the assembled audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapMarker {
    pub index: usize,
    /// Audio time at which the chunk would have started
    pub offset_ms: u64,
    /// Silence written in its place
    pub silence_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyMetadata {
    pub format: AudioFormat,
    pub segment_count: usize,
    pub duration_ms: u64,
    pub gaps: Vec<GapMarker>,
}

enum Output<W: Write + Seek> {
    Unstarted(W),
    Raw(W),
    Wav(hound::WavWriter<W>),
}

/// Streaming writer for the final artifact.
pub struct Assembler<W: Write + Seek> {
    format: AudioFormat,
    gap_policy: GapPolicy,
    /// `None` after a write failed part-way
    output: Option<Output<W>>,
    segment_count: usize,
    duration_ms: u64,
    gaps: Vec<GapMarker>,
    /// Silence requested before the first segment fixed the sample layout
    pending_silence_ms: u64,
    pcm_sample_rate: Option<u32>,
}

impl<W: Write + Seek> Assembler<W> {
    pub fn new(format: AudioFormat, gap_policy: GapPolicy, sink: W) -> ConversionResult<Self> {
        gap_policy.validate(format)?;
        Ok(Self {
            format,
            gap_policy,
            output: Some(Output::Unstarted(sink)),
            segment_count: 0,
            duration_ms: 0,
            gaps: Vec::new(),
            pending_silence_ms: 0,
            pcm_sample_rate: None,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Append the audio for the next chunk in order.
    pub fn push_segment(&mut self, segment: &AudioSegment) -> ConversionResult<()> {
        if segment.is_empty() {
            return Ok(());
        }
        if segment.format != self.format {
            return Err(ConversionError::AssemblyError(format!(
                "segment format {} does not match output format {}",
                segment.format, self.format
            )));
        }

        let format = self.format;
        let output = self.take_output()?;
        let (output, duration_ms) = match format {
            AudioFormat::Wav => self.write_wav(output, segment)?,
            AudioFormat::Pcm => {
                let mut sink = self.start_raw(output, Some(segment.sample_rate))?;
                sink.write_all(&segment.data)?;
                let samples = segment.data.len() as u64 / 2;
                (
                    Output::Raw(sink),
                    samples * 1000 / segment.sample_rate.max(1) as u64,
                )
            }
            _ => {
                let mut sink = self.start_raw(output, None)?;
                sink.write_all(&segment.data)?;
                (Output::Raw(sink), segment.duration_ms.unwrap_or(0))
            }
        };

        self.output = Some(output);
        self.segment_count += 1;
        self.duration_ms += duration_ms;
        Ok(())
    }

    /// Record a missing chunk and fill it according to the gap policy.
    pub fn push_gap(&mut self, index: usize) -> ConversionResult<()> {
        let silence_ms = match self.gap_policy {
            GapPolicy::Skip => 0,
            GapPolicy::Silence { duration_ms } => duration_ms,
        };

        self.gaps.push(GapMarker {
            index,
            offset_ms: self.duration_ms,
            silence_ms,
        });

        if silence_ms == 0 {
            return Ok(());
        }

        let output = self.take_output()?;
        let output = match output {
            Output::Unstarted(sink) => {
                self.pending_silence_ms += silence_ms;
                Output::Unstarted(sink)
            }
            Output::Raw(mut sink) => {
                let rate = self.pcm_sample_rate.unwrap_or(0);
                write_pcm_silence(&mut sink, rate, silence_ms)?;
                Output::Raw(sink)
            }
            Output::Wav(mut writer) => {
                write_wav_silence(&mut writer, silence_ms)?;
                Output::Wav(writer)
            }
        };

        self.output = Some(output);
        self.duration_ms += silence_ms;
        debug!(chunk = index, silence_ms, "Gap filled with silence");
        Ok(())
    }

    /// Complete the artifact. Fails when nothing was assembled.
    pub fn finish(mut self) -> ConversionResult<AssemblyMetadata> {
        if self.segment_count == 0 {
            return Err(ConversionError::AssemblyError(
                "no audio segments to assemble".to_string(),
            ));
        }

        match self.take_output()? {
            Output::Wav(writer) => writer.finalize()?,
            Output::Raw(mut sink) | Output::Unstarted(mut sink) => sink.flush()?,
        }

        Ok(AssemblyMetadata {
            format: self.format,
            segment_count: self.segment_count,
            duration_ms: self.duration_ms,
            gaps: self.gaps,
        })
    }

    fn take_output(&mut self) -> ConversionResult<Output<W>> {
        self.output.take().ok_or_else(|| {
            ConversionError::AssemblyError("assembler unusable after a failed write".to_string())
        })
    }

    fn start_raw(&mut self, output: Output<W>, sample_rate: Option<u32>) -> ConversionResult<W> {
        match output {
            Output::Raw(sink) => Ok(sink),
            Output::Unstarted(mut sink) => {
                if let Some(rate) = sample_rate {
                    self.pcm_sample_rate = Some(rate);
                    if self.pending_silence_ms > 0 {
                        write_pcm_silence(&mut sink, rate, self.pending_silence_ms)?;
                    }
                }
                Ok(sink)
            }
            Output::Wav(_) => Err(ConversionError::AssemblyError(
                "raw write into a WAV stream".to_string(),
            )),
        }
    }

    fn write_wav(
        &mut self,
        output: Output<W>,
        segment: &AudioSegment,
    ) -> ConversionResult<(Output<W>, u64)> {
        let mut reader = hound::WavReader::new(Cursor::new(&segment.data[..]))?;
        let spec = reader.spec();

        let mut writer = match output {
            Output::Wav(writer) => {
                if writer.spec() != spec {
                    return Err(ConversionError::AssemblyError(format!(
                        "WAV spec mismatch: stream is {:?}, segment is {spec:?}",
                        writer.spec()
                    )));
                }
                writer
            }
            Output::Unstarted(sink) => {
                let mut writer = hound::WavWriter::new(sink, spec)?;
                if self.pending_silence_ms > 0 {
                    write_wav_silence(&mut writer, self.pending_silence_ms)?;
                }
                writer
            }
            Output::Raw(_) => {
                return Err(ConversionError::AssemblyError(
                    "WAV write into a raw stream".to_string(),
                ));
            }
        };

        let frames = reader.duration() as u64;
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    writer.write_sample(sample?)?;
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample?)?;
                }
            }
        }

        let duration_ms = frames * 1000 / spec.sample_rate.max(1) as u64;
        Ok((Output::Wav(writer), duration_ms))
    }
}

fn write_pcm_silence<W: Write>(sink: &mut W, sample_rate: u32, ms: u64) -> ConversionResult<()> {
    let samples = sample_rate as u64 * ms / 1000;
    let zeros = [0u8; 4096];
    let mut remaining = samples * 2;
    while remaining > 0 {
        let n = remaining.min(zeros.len() as u64) as usize;
        sink.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

fn write_wav_silence<W: Write + Seek>(
    writer: &mut hound::WavWriter<W>,
    ms: u64,
) -> ConversionResult<()> {
    let spec = writer.spec();
    let samples = spec.sample_rate as u64 * ms / 1000 * spec.channels as u64;
    for _ in 0..samples {
        match spec.sample_format {
            hound::SampleFormat::Int => writer.write_sample(0i32)?,
            hound::SampleFormat::Float => writer.write_sample(0.0f32)?,
        }
    }
    Ok(())
}
