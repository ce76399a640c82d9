//! Background conversion service used by the HTTP layer.
//!
//! `submit` validates a request, registers the job in the [`JobStore`] and
//! runs it on a spawned task. Callers poll the store for progress and collect
//! the artifact once the job is terminal.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::core::error::{ConversionError, ConversionResult};
use crate::core::job::{ConvertRequest, JobSnapshot};
use crate::core::orchestrator::Orchestrator;
use crate::core::progress::ProgressSink;
use crate::core::store::{Artifact, CancelAction, CollectError, JobStore};
use crate::core::tts::{
    AudioFormat, OpenAITTSModel, OpenAIVoice, ProviderConfig, ProviderKind, ProviderResources,
    SecretString, SpeechSynthesizer, create_tts_provider,
};

/// Server-side provider settings merged into every request.
#[derive(Debug, Clone, Default)]
pub struct ProviderDefaults {
    pub kind: ProviderKind,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub format: AudioFormat,
    pub openai_api_key: Option<SecretString>,
    pub openai_endpoint: Option<String>,
}

impl ProviderDefaults {
    /// Fill the gaps of a requested provider selection.
    ///
    /// Default voice and model only apply to the default provider kind, since
    /// voice names are not portable between backends.
    pub fn resolve(&self, requested: Option<ProviderConfig>) -> ProviderConfig {
        let mut config = requested.unwrap_or_else(|| ProviderConfig {
            kind: self.kind,
            ..Default::default()
        });

        if config.kind == self.kind {
            if config.voice.is_none() {
                config.voice = self.voice.clone();
            }
            if config.model.is_none() {
                config.model = self.model.clone();
            }
        }

        if config.output_format.is_none() {
            config.output_format = Some(match config.kind {
                ProviderKind::Local if self.format.supports_silence() => self.format,
                ProviderKind::Local => AudioFormat::Wav,
                ProviderKind::OpenAI if self.kind == ProviderKind::OpenAI => self.format,
                ProviderKind::OpenAI => AudioFormat::Mp3,
            });
        }

        match config.kind {
            ProviderKind::OpenAI => {
                config.credentials = self.openai_api_key.clone();
                config.endpoint = self.openai_endpoint.clone();
            }
            ProviderKind::Local => {
                config.credentials = None;
                config.endpoint = None;
            }
        }
        config
    }
}

#[derive(Clone)]
pub struct ConversionService {
    orchestrator: Arc<Orchestrator>,
    store: JobStore,
    resources: ProviderResources,
    provider_defaults: Arc<ProviderDefaults>,
    deduplicate: bool,
}

impl ConversionService {
    pub fn new(
        orchestrator: Orchestrator,
        store: JobStore,
        resources: ProviderResources,
        provider_defaults: ProviderDefaults,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            resources,
            provider_defaults: Arc::new(provider_defaults),
            deduplicate: true,
        }
    }

    /// Whether a repeated identical request returns the retained job.
    pub fn with_deduplication(mut self, enabled: bool) -> Self {
        self.deduplicate = enabled;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn provider_defaults(&self) -> &ProviderDefaults {
        &self.provider_defaults
    }

    /// Build the provider a request would run against.
    pub fn build_provider(
        &self,
        config: &ProviderConfig,
    ) -> ConversionResult<Arc<dyn SpeechSynthesizer>> {
        Ok(Arc::new(create_tts_provider(config, &self.resources)?))
    }

    /// Validate a request and start converting it in the background.
    ///
    /// Returns the job snapshot right after planning. A request identical to
    /// a job that is still retained and has not failed returns that job, and
    /// the caller shares it with the original requester.
    pub async fn submit(&self, mut request: ConvertRequest) -> ConversionResult<JobSnapshot> {
        if request.text.trim().is_empty() {
            return Err(ConversionError::InputError(
                "Text cannot be empty".to_string(),
            ));
        }

        let provider = self.provider_defaults.resolve(request.provider.take());
        let mut job = self.orchestrator.create_job(request, provider)?;

        if self.deduplicate
            && let Some(existing) = self.store.claim_by_fingerprint(job.fingerprint).await
        {
            info!(job_id = %existing.job_id, "Reusing job with identical content");
            return Ok(existing);
        }

        let synthesizer = self.build_provider(&job.provider)?;
        let chunks = self.orchestrator.plan(&mut job)?;

        let sink = ProgressSink::snapshot_only(job.id);
        let cancel = CancellationToken::new();
        self.store
            .insert(&job, sink.subscribe(), cancel.clone())
            .await;
        let snapshot = job.snapshot();

        info!(
            job_id = %job.id,
            provider = synthesizer.name(),
            chunks = job.chunks_total,
            "Conversion job accepted"
        );

        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();
        let span = info_span!("conversion", job_id = %job.id);
        tokio::spawn(
            async move {
                let mut buffer = Cursor::new(Vec::new());
                let outcome = orchestrator
                    .execute(&mut job, chunks, synthesizer, &mut buffer, &sink, cancel)
                    .await;
                let result = outcome.map(|metadata| Artifact {
                    bytes: Bytes::from(buffer.into_inner()),
                    metadata,
                });
                store.complete(&job, result).await;
            }
            .instrument(span),
        );

        Ok(snapshot)
    }

    pub async fn snapshot(&self, id: Uuid) -> ConversionResult<JobSnapshot> {
        self.store.snapshot(id).await
    }

    pub async fn collect(&self, id: Uuid) -> Result<Artifact, CollectError> {
        self.store.collect(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> ConversionResult<(JobSnapshot, CancelAction)> {
        self.store.cancel(id).await
    }

    /// Voices, models and formats offered by each backend.
    pub async fn provider_catalog(&self) -> serde_json::Value {
        let engine = &self.resources.local;
        let local_voices = engine.list_voices().await;

        json!({
            "default_provider": self.provider_defaults.kind,
            "providers": [
                {
                    "provider": ProviderKind::OpenAI,
                    "configured": self.provider_defaults.openai_api_key.as_ref().is_some_and(|k| !k.is_empty()),
                    "voices": OpenAIVoice::all().iter().map(OpenAIVoice::as_str).collect::<Vec<_>>(),
                    "models": OpenAITTSModel::all().iter().map(OpenAITTSModel::as_str).collect::<Vec<_>>(),
                    "formats": AudioFormat::all().iter().map(AudioFormat::as_str).collect::<Vec<_>>(),
                },
                {
                    "provider": ProviderKind::Local,
                    "configured": engine.config().model_dir.is_some(),
                    "default_voice": engine.config().default_voice,
                    "voices": local_voices,
                    "formats": [AudioFormat::Wav.as_str(), AudioFormat::Pcm.as_str()],
                    "slots": engine.config().slots,
                },
            ],
        })
    }
}
