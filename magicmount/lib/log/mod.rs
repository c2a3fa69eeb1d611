//! Logging setup for a merge run.
//!
//! Logging is off unless a [`LogTarget`] asks for it. When it is on, the default filter is
//! `debug`, which records every node the merge engine visits; `RUST_LOG` overrides it.

use std::path::Path;

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

use crate::{config::LogTarget, MagicMountError, MagicMountResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "debug";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Installs the global tracing subscriber for `target`.
///
/// For [`LogTarget::File`] the returned guard owns the background writer; keep it alive until the
/// run is over or buffered lines are lost.
pub fn init_logging(target: &LogTarget) -> MagicMountResult<Option<WorkerGuard>> {
    match target {
        LogTarget::None => Ok(None),
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init()
                .map_err(|e| MagicMountError::LogSetup(e.to_string()))?;

            Ok(None)
        }
        LogTarget::File(path) => {
            let (directory, file_name) = split_log_path(path)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy())
                .build(directory)
                .map_err(|e| MagicMountError::LogSetup(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .try_init()
                .map_err(|e| MagicMountError::LogSetup(e.to_string()))?;

            Ok(Some(guard))
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Splits a log file path into the directory to write in and the file name.
fn split_log_path(path: &Path) -> MagicMountResult<(&Path, &Path)> {
    let file_name = path.file_name().ok_or_else(|| {
        MagicMountError::LogSetup(format!("log path {:?} has no file name", path))
    })?;

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    Ok((directory, Path::new(file_name)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
