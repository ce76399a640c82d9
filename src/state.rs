use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::error::ConversionResult;
use crate::core::orchestrator::Orchestrator;
use crate::core::service::ConversionService;
use crate::core::store::JobStore;
use crate::core::tts::ProviderResources;

/// Application state shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    pub service: ConversionService,
}

impl AppState {
    pub fn new(config: ServerConfig) -> ConversionResult<Arc<Self>> {
        let resources = ProviderResources::new(config.local_engine_config())?;
        let orchestrator = Orchestrator::new(config.conversion_defaults(), config.retry_policy());
        let store = JobStore::new(config.job_retention(), config.max_jobs);
        let service = ConversionService::new(
            orchestrator,
            store,
            resources,
            config.provider_defaults(),
        )
        .with_deduplication(config.deduplicate_jobs);

        info!(
            default_provider = %config.default_provider,
            chunk_size = config.chunk_size,
            workers = config.worker_pool_size,
            retention_secs = config.job_retention_secs,
            openai_configured = config.openai_api_key.is_some(),
            "Application state initialized"
        );

        Ok(Arc::new(Self { config, service }))
    }
}
