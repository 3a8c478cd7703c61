// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Rotation policy for the optional log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
}

/// Log sink configuration, fully enumerated
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "showpull=debug"
    pub level: Option<String>,
    pub format: LogFormat,
    /// Log to this file instead of stderr
    pub file: Option<PathBuf>,
    pub rotation: LogRotation,
}

/// Install the global tracing subscriber.
///
/// Returns a guard that must be held for the lifetime of the process
/// when logging to a file; dropping it flushes and stops the writer.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = match &config.level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log filter '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("showpull=info")),
    };

    match &config.file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = match config.rotation {
                LogRotation::Never => tracing_appender::rolling::never(directory, file_name),
                LogRotation::Daily => tracing_appender::rolling::daily(directory, file_name),
                LogRotation::Hourly => tracing_appender::rolling::hourly(directory, file_name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install(filter, config.format, writer, false)?;
            Ok(Some(guard))
        }
        None => {
            install(filter, config.format, std::io::stderr, true)?;
            Ok(None)
        }
    }
}

fn install<W>(filter: EnvFilter, format: LogFormat, writer: W, ansi: bool) -> Result<()>
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(base)
            .try_init()
            .context("tracing subscriber already installed")?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(base.json())
            .try_init()
            .context("tracing subscriber already installed")?,
    }
    Ok(())
}
