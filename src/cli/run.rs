use crate::config::settings::{normalize_encoding, normalize_queue_size, normalize_time_zone};
use crate::config::{load_config, stream_settings, Config};
use crate::pipeline::batch::BatchLimits;
use crate::pipeline::channel::{create_channel, ExitSignal};
use crate::pipeline::publisher::Publisher;
use crate::pipeline::worker::Worker;
use crate::service::{DryRunService, HttpLogsClient, LogsService, ServiceError};
use crate::source::event::EventContext;
use crate::source::stdin::StdinReader;
use crate::source::timestamp::DateTimeParser;
use crate::storage::{DuckDbStore, KeyValueStore, MemoryStore, StorageError, PUSH_STATE_TABLE, STREAM_STATE_TABLE};
use crate::stream::{StateTables, Stream, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Request timeout of the ingestion client.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(30);
/// Queue size between the standard input reader and its publisher.
pub const STDIN_QUEUE_SIZE: usize = 10000;
const STDIN_STREAM_KEY: &str = "stdin";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("no endpoint configured, set general.endpoint or pass --endpoint")]
    MissingEndpoint,
}

/// Options of standard-input mode.
#[derive(Debug, Clone)]
pub struct StdinOptions {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub buffer_duration: i64,
    pub datetime_format: Option<String>,
    pub time_zone: Option<String>,
    pub encoding: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub dry_run: bool,
}

pub async fn push_files(
    config_path: Option<PathBuf>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logpush/config.yml");
            eprintln!("  /etc/logpush/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logpush config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_watcher(&config_path, dry_run).await.map_err(|e| e.into())
}

fn build_service(
    endpoint: Option<&str>,
    api_key: Option<String>,
    dry_run: bool,
) -> Result<Arc<dyn LogsService>, RunError> {
    if dry_run {
        info!("Dry run, events are printed instead of published");
        return Ok(Arc::new(DryRunService::stdout()));
    }
    let endpoint = endpoint.ok_or(RunError::MissingEndpoint)?;
    info!(endpoint, "Using ingestion endpoint");
    Ok(Arc::new(HttpLogsClient::new(endpoint, api_key, SERVICE_TIMEOUT)?))
}

async fn open_state(config: &Config, dry_run: bool) -> Result<Vec<StateTables>, RunError> {
    let count = config.streams.len();
    if dry_run {
        // Keep the state file untouched.
        return Ok((0..count)
            .map(|_| StateTables {
                push_state: Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
                stream_state: Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>,
            })
            .collect());
    }

    let state_file = &config.general.state_file;
    if let Some(parent) = state_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = %state_file.display(), "Opening state database");
    let store = DuckDbStore::open(state_file)?;

    let mut tables = Vec::with_capacity(count);
    for _ in 0..count {
        tables.push(StateTables {
            push_state: Arc::new(store.table(PUSH_STATE_TABLE).await?),
            stream_state: Arc::new(store.table(STREAM_STATE_TABLE).await?),
        });
    }
    Ok(tables)
}

async fn run_watcher(config_path: &Path, dry_run: bool) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let settings = stream_settings(&config)?;
    let queue_size = normalize_queue_size(config.general.queue_size.as_ref());

    let service = build_service(
        config.general.endpoint.as_deref(),
        config.general.api_key.clone(),
        dry_run,
    )?;
    let tables = open_state(&config, dry_run).await?;

    let stop = CancellationToken::new();
    let mut watcher = Watcher::new(stop.clone());
    for (settings, tables) in settings.into_iter().zip(tables) {
        let stream = Stream::new(settings, service.clone(), tables, stop.clone(), queue_size)
            .with_dry_run(dry_run);
        watcher.register(stream);
    }

    let handle = tokio::spawn(watcher.run());
    info!("Watcher started, press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
    stop.cancel();

    handle.await?;
    info!("Shutdown complete");
    Ok(())
}

pub async fn push_stdin(options: StdinOptions) -> Result<(), Box<dyn std::error::Error>> {
    run_stdin(options).await.map_err(|e| e.into())
}

async fn run_stdin(options: StdinOptions) -> Result<(), RunError> {
    let service = build_service(options.endpoint.as_deref(), options.api_key.clone(), options.dry_run)?;

    let time_zone = normalize_time_zone(STDIN_STREAM_KEY, options.time_zone.as_deref());
    let parser = match options.datetime_format.as_deref() {
        Some(format) => match DateTimeParser::new(format, time_zone) {
            Ok(parser) => Some(Arc::new(parser)),
            Err(e) => {
                warn!(datetime_format = format, error = %e, "Invalid datetime_format, events will use the current time");
                None
            }
        },
        None => None,
    };
    let context = EventContext {
        encoding: normalize_encoding(STDIN_STREAM_KEY, options.encoding.as_deref()),
        parser,
    };

    let stop = CancellationToken::new();
    let group_stop = CancellationToken::new();
    let signal = ExitSignal::new(stop.clone(), group_stop.clone());
    let (tx, rx) = create_channel(STDIN_QUEUE_SIZE);

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let reader = Worker::spawn(
        "reader:stdin",
        group_stop.clone(),
        StdinReader::new(input, context, tx, signal.clone()).run(),
    );
    let publisher = Publisher::new(
        service,
        options.log_group_name.clone(),
        options.log_stream_name.clone(),
        signal,
    );
    let publisher = Worker::spawn(
        "publisher:stdin",
        group_stop.clone(),
        publisher.run_event_publisher(rx, options.buffer_duration, BatchLimits::default()),
    );

    info!(
        log_group = %options.log_group_name,
        log_stream = %options.log_stream_name,
        "Reading standard input"
    );

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            stop.cancel();
        }
        _ = stop.cancelled() => {}
        _ = group_stop.cancelled() => {
            stop.cancel();
        }
    }

    reader.join().await;
    publisher.join().await;
    info!("Shutdown complete");
    Ok(())
}
