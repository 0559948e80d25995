//! Logging setup.
//!
//! Installs a `tracing` subscriber that writes to stderr so stdout stays
//! clean for command output, plus an optional append-only log file from
//! `[logging].file`. `RUST_LOG` takes precedence over the configured level.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;
use crate::error::{SyncError, SyncResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the global tracing subscriber.
///
/// Fails if the filter or the log file is invalid, or if a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> SyncResult<()> {
    subscriber(config)?
        .try_init()
        .map_err(|e| SyncError::Config(format!("Failed to init logging: {}", e)))
}

/// Build the subscriber without installing it.
pub fn subscriber(config: &LoggingConfig) -> SyncResult<impl Subscriber + Send + Sync + 'static> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(directive) if !directive.is_empty() => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(&config.level),
    }
    .map_err(|e| SyncError::Config(format!("Invalid log filter: {}", e)))?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(std::env::var_os("NO_COLOR").is_none());
    if config.json {
        layers.push(Box::new(stderr.json()));
    } else {
        layers.push(Box::new(stderr));
    }

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SyncError::io(path, e))?;
        let sink = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_target(true)
            .with_ansi(false);
        if config.json {
            layers.push(Box::new(sink.json()));
        } else {
            layers.push(Box::new(sink));
        }
    }

    Ok(tracing_subscriber::registry().with(layers).with(env_filter))
}
