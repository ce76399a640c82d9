use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::http::{HeaderValue, header};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use narrator_gateway::config::{LogFormat, ServerConfig};
use narrator_gateway::core::{
    AudioFormat, ConvertRequest, FailurePolicy, Orchestrator, ProviderConfig, ProviderKind,
    ProviderResources, SpeechSynthesizer, create_tts_provider, progress_channel,
};
use narrator_gateway::{routes, state::AppState};

/// Narrator Gateway - Long-form text-to-speech conversion server
#[derive(Parser, Debug)]
#[command(name = "narrator-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve,

    /// Convert one text file to audio and exit
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// UTF-8 text file to narrate
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Destination audio file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: PathBuf,

    /// Backend: openai or local
    #[arg(long)]
    provider: Option<ProviderKind>,

    #[arg(long)]
    voice: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// mp3, opus, aac, flac, wav or pcm
    #[arg(long)]
    format: Option<AudioFormat>,

    #[arg(long)]
    speed: Option<f32>,

    /// Maximum characters per chunk
    #[arg(long = "chunk-size")]
    chunk_size: Option<usize>,

    /// Keep going when a chunk fails and assemble what succeeded
    #[arg(long = "best-effort")]
    best_effort: bool,

    /// Concurrent provider calls
    #[arg(long)]
    workers: Option<usize>,

    /// Deadline for the whole conversion in seconds
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,
}

impl ConvertArgs {
    fn provider_config(&self, default_kind: ProviderKind) -> Option<ProviderConfig> {
        let overridden = self.provider.is_some()
            || self.voice.is_some()
            || self.model.is_some()
            || self.format.is_some()
            || self.speed.is_some();

        overridden.then(|| ProviderConfig {
            kind: self.provider.unwrap_or(default_kind),
            voice: self.voice.clone(),
            model: self.model.clone(),
            output_format: self.format,
            speed: self.speed,
            ..Default::default()
        })
    }
}

fn init_tracing(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive().unwrap_or("info")));

    // stderr keeps stdout free for command output
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = &cli.config {
        eprintln!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    init_tracing(&config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Convert(args) => convert(config, args).await,
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.address();
    info!("Starting server on {address}");

    let app_state = AppState::new(config)?;

    let app = routes::api::create_api_router()
        .with_state(app_state)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ));

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(&socket_addr).await?;
    info!("Server listening on http://{}", socket_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}

async fn convert(config: ServerConfig, args: ConvertArgs) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    if text.trim().is_empty() {
        anyhow::bail!("Text cannot be empty: {}", args.input.display());
    }

    let provider_defaults = config.provider_defaults();
    let provider = provider_defaults.resolve(args.provider_config(provider_defaults.kind));

    let orchestrator = Orchestrator::new(config.conversion_defaults(), config.retry_policy());
    let resources = ProviderResources::new(config.local_engine_config())?;

    let request = ConvertRequest {
        text,
        provider: None,
        chunk_size_limit: args.chunk_size,
        failure_policy: if args.best_effort {
            FailurePolicy::BestEffort
        } else {
            FailurePolicy::FailFast
        },
        worker_pool_size: args.workers,
        job_timeout_secs: args.timeout_secs,
        ..Default::default()
    };
    let mut job = orchestrator.create_job(request, provider)?;
    let synthesizer: Arc<dyn SpeechSynthesizer> =
        Arc::new(create_tts_provider(&job.provider, &resources)?);

    let file = std::fs::File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let (sink, mut receiver) = progress_channel(job.id, orchestrator.defaults().progress_buffer);
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            eprintln!(
                "[{:>5.1}%] {}/{} chunks ({})",
                event.percentage(),
                event.chunks_completed,
                event.chunks_total,
                event.status
            );
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = orchestrator
        .run(&mut job, synthesizer, BufWriter::new(file), &sink, cancel)
        .await;
    drop(sink);
    let _ = printer.await;

    let metadata = match result {
        Ok(metadata) => metadata,
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(&args.output) {
                warn!("Failed to remove partial output: {remove_err}");
            }
            return Err(e.into());
        }
    };

    for failure in &metadata.failures {
        warn!(
            chunk = failure.index,
            attempts = failure.attempts,
            kind = %failure.kind,
            "Chunk skipped: {}",
            failure.message
        );
    }

    eprintln!(
        "Wrote {} ({} chunks, {} failed, ~{:.1}s, {})",
        args.output.display(),
        metadata.chunk_count,
        metadata.failed_chunk_indices.len(),
        metadata.total_duration_ms as f64 / 1000.0,
        job.status
    );

    Ok(())
}
