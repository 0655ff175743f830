//! `tracing` subscriber setup.
//!
//! Events go to stderr (human-readable or JSON lines). When a log directory
//! is configured they are also written as JSON to a daily-rolling file
//! through a non-blocking writer; keep the returned guard alive until exit
//! or buffered lines are lost.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingSection;

pub const DEFAULT_FILTER: &str = "shipyard=info,tower_http=info";
pub const VERBOSE_FILTER: &str = "shipyard=debug,tower_http=debug";

/// File name prefix for rolled log files.
pub const LOG_FILE_NAME: &str = "shipyard.log";

/// `RUST_LOG` if set, otherwise the default (or verbose) directives.
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    })
}

/// Install the global subscriber.
pub fn init(config: &LoggingSection, verbose: bool) -> Result<Option<WorkerGuard>> {
    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match config.dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = file_writer(dir)?;
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn file_writer(dir: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for directives in [DEFAULT_FILTER, VERBOSE_FILTER] {
            assert!(EnvFilter::try_new(directives).is_ok(), "{}", directives);
        }
    }

    #[test]
    fn test_file_writer_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs/nested");
        let (_writer, _guard) = file_writer(&dir).unwrap();
        assert!(dir.is_dir());
    }
}
