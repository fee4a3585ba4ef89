use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig, StoreBackend, StoreConfig};
use crate::error::ServerError;
use storage_file::{FileStore, FileStoreConfig};
use storage_memory::MemoryStore;
use telemetry_api::{CursorCodec, TelemetryStore};
use telemetry_engine::TelemetryService;

/// How long in-flight requests get to finish after Ctrl+C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("apollo-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Store ---
    let store = build_store(&config.store)?;
    store.init().await?;
    tracing::info!(
        backend = ?config.store.backend,
        read_your_writes = store.read_your_writes(),
        "store ready"
    );

    // --- Service ---
    let secret = cursor_secret(args.cursor_secret, config.cursor.secret);
    let service = Arc::new(TelemetryService::new(
        store.clone(),
        CursorCodec::new(secret.as_bytes()),
        config.query.settings(),
    )?);

    // --- API server ---
    let token = CancellationToken::new();
    let api_token = token.clone();
    let bind = config.bind.clone();
    let api_port = config.api_port;
    let max_body_bytes = config.max_body_bytes;
    let mut api_handle = tokio::spawn(async move {
        telemetry_api_server::run(&bind, api_port, service, max_body_bytes, api_token).await
    });
    tracing::info!(bind = %config.bind, port = config.api_port, "server ready");

    // --- Wait for Ctrl+C, or for the API to die on its own ---
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            None
        }
        res = &mut api_handle => Some(res),
    };

    token.cancel();

    let api_result = match early_exit {
        Some(res) => api_outcome(res),
        None => match tokio::time::timeout(SHUTDOWN_GRACE, &mut api_handle).await {
            Ok(res) => api_outcome(res),
            Err(_) => {
                tracing::warn!(grace_ms = SHUTDOWN_GRACE.as_millis() as u64, "api did not drain in time, aborting");
                api_handle.abort();
                Ok(())
            }
        },
    };

    // Buffered backends lose pending rows unless flushed here.
    if let Err(e) = store.flush().await {
        tracing::error!(error = %e, "store flush error");
    }

    tracing::info!("shutdown complete");
    api_result
}

fn api_outcome(res: Result<Result<(), String>, tokio::task::JoinError>) -> Result<(), ServerError> {
    match res {
        Ok(inner) => inner.map_err(ServerError::Api),
        Err(e) => Err(ServerError::Api(format!("api task: {e}"))),
    }
}

fn build_store(config: &StoreConfig) -> Result<Arc<dyn TelemetryStore>, ServerError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            let file_config: FileStoreConfig = config.backend_config()?;
            tracing::info!(
                data_dir = %file_config.data_dir.display(),
                buffer_records = file_config.buffer_records,
                "file store"
            );
            Ok(Arc::new(FileStore::new(file_config)))
        }
    }
}

/// CLI/env first, then the config file, then a throwaway per-process
/// secret (cursors then stop working across restarts and replicas).
fn cursor_secret(cli: Option<String>, file: Option<String>) -> String {
    let configured = |s: &String| !s.is_empty();
    match cli.filter(configured).or(file.filter(configured)) {
        Some(secret) => secret,
        None => {
            tracing::warn!("no cursor secret configured; page cursors are valid for this process only");
            format!("{}{}", uuid::Uuid::new_v4(), uuid::Uuid::new_v4())
        }
    }
}
