//! ---
//! prc_section: "01-core-functionality"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shared primitives and utilities for the precreator runtime."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "PRECREATOR_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

// Dropping a guard stops its writer thread, so they live for the process.
static WRITER_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global tracing subscriber.
///
/// The filter comes from `PRECREATOR_LOG`, then `RUST_LOG`, then `info`.
/// Stdout always receives events in the configured format; when
/// `directory` is set a daily rolling JSON file `<service_name>.log` is kept
/// there as well. A subscriber installed earlier is left in place.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let mut guards = vec![stdout_guard];

    let file = match config.directory.as_deref() {
        Some(directory) => {
            let (writer, guard) = daily_file(directory, service_name)?;
            guards.push(guard);
            Some(writer)
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer(config.format, stdout))
        .with(file.map(file_layer))
        .try_init()
        .is_ok();
    if !installed {
        return Ok(());
    }
    let _ = WRITER_GUARDS.set(guards);

    info!(
        service = %service_name,
        format = ?config.format,
        log_dir = ?config.directory,
        "tracing initialised"
    );
    Ok(())
}

fn env_filter() -> EnvFilter {
    let directive = std::env::var(LOG_ENV).or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV));
    match directive {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("ignoring invalid log directive '{directive}' ({err})");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        Err(_) => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

fn daily_file(directory: &Path, service_name: &str) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let appender = rolling::daily(directory, format!("{service_name}.log"));
    Ok(tracing_appender::non_blocking(appender))
}

fn stdout_layer<S>(format: LogFormat, writer: NonBlocking) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.compact().boxed(),
    }
}

fn file_layer<S>(writer: NonBlocking) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_ansi(false)
        .with_writer(writer)
        .boxed()
}
