use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use tfc_secrets::api::{self, AppState};
use tfc_secrets::config::{self, LogFormat};
use tfc_secrets::rotation::RotationScheduler;
use tfc_secrets::store::{FileStorage, InMemoryStorage, Storage, ROLE_PREFIX};
use tfc_secrets::tfc::HttpClientFactory;
use tfc_secrets::Backend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(cfg.log_format)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::RotateRoot) => {
            let backend = build_backend(&cfg).await?;
            backend.rotate_root().await.context("root rotation failed")?;
            println!("Management token rotated.");
            Ok(())
        }
        Some(cli::Commands::Roles { command: cli::RoleCommands::List }) => {
            let storage = open_storage(&cfg).await?;
            let names = storage.list(ROLE_PREFIX).await?;
            if names.is_empty() {
                println!("No roles configured.");
            }
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Console logging, plus OTLP export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "tfc-secrets"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tfc_secrets=debug,tower_http=debug".into()),
        ))
        .with((format == LogFormat::Text).then(|| tracing_subscriber::fmt::layer()))
        .with((format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json()))
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn open_storage(cfg: &config::Config) -> anyhow::Result<Arc<dyn Storage>> {
    match &cfg.storage_dir {
        Some(dir) => {
            let storage = FileStorage::open(dir.clone())
                .await
                .with_context(|| format!("failed to open storage at {}", dir.display()))?;
            tracing::info!(root = %dir.display(), "using file storage");
            Ok(Arc::new(storage))
        }
        None => {
            tracing::warn!("TFC_SECRETS_STORAGE_DIR is not set; using in-memory storage, state is lost on exit");
            Ok(Arc::new(InMemoryStorage::new()))
        }
    }
}

async fn build_backend(cfg: &config::Config) -> anyhow::Result<Backend> {
    let storage = open_storage(cfg).await?;
    let factory = Arc::new(HttpClientFactory::new(cfg.request_timeout));
    Ok(Backend::new(storage, factory))
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let mut backend = build_backend(&cfg).await?;

    let ticks = if cfg.scheduler_enabled {
        let (scheduler, ticks) = RotationScheduler::new();
        backend = backend.with_rotation_manager(Arc::new(scheduler));
        Some(ticks)
    } else {
        tracing::info!("built-in rotation scheduler disabled");
        None
    };

    match backend.restore_rotation_job().await {
        Ok(true) => tracing::info!("stored rotation policy registered"),
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "stored rotation policy could not be registered"),
    }

    let state = Arc::new(AppState { backend });

    if let Some(ticks) = ticks {
        spawn_rotation_worker(state.clone(), ticks);
        tracing::info!("Rotation worker started");
    }

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("tfc-secrets listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Performs a root rotation for every scheduler tick.
fn spawn_rotation_worker(state: Arc<AppState>, mut ticks: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(path) = ticks.recv().await {
            tracing::info!(path = %path, "scheduled root rotation starting");
            if let Err(e) = state.backend.rotate_root().await {
                tracing::error!(path = %path, error = %e, "scheduled root rotation failed");
            }
        }
    });
}
