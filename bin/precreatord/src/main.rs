//! ---
//! prc_section: "05-daemon"
//! prc_subsection: "binary"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Binary entrypoint for the precreator daemon."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use precreator_common::config::AppConfig;
use precreator_common::logging::init_tracing;
use precreator_common::time::wall_clock_now;
use precreator_meta::InMemoryMetaStore;
use precreator_metrics::{new_registry, spawn_http_server, PrecreatorMetrics};
use precreator_service::PrecreationService;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Shard group precreation daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "SECS", help = "Override the precreation check interval")]
    check_interval: Option<u64>,

    #[arg(long, value_name = "SECS", help = "Override the precreation advance period")]
    advance_period: Option<u64>,

    #[arg(long, help = "Run a single precreation pass and exit")]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/precreator.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(secs) = cli.check_interval {
        config.precreator.check_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = cli.advance_period {
        config.precreator.advance_period = Duration::from_secs(secs);
    }
    config.validate()?;
    if cli.once {
        config.logging.directory = None;
    }

    init_tracing("precreatord", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    let store = Arc::new(
        InMemoryMetaStore::from_config(&config.databases)
            .context("failed to seed metadata catalog")?,
    );
    seed_current_groups(&store, &config)?;

    let registry = new_registry();
    let metrics = PrecreatorMetrics::new(registry.clone())?;
    let service = PrecreationService::new(config.precreator, Arc::clone(&store))?
        .with_metrics(metrics);

    if cli.once {
        if run_single_pass(&service).await? {
            log_catalog(&store, &config);
        }
        return Ok(());
    }

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    service.open().await?;
    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    service.close().await;
    store.close();
    log_catalog(&store, &config);

    if let Some(server) = metrics_server {
        if let Err(err) = server.shutdown().await {
            warn!(error = %err, "metrics server shutdown failed");
        }
    }
    Ok(())
}

/// Run one precreation pass unless the service is disabled. Returns whether
/// the pass ran.
async fn run_single_pass(service: &PrecreationService) -> Result<bool> {
    if !service.config().enabled {
        info!("shard precreation is disabled; skipping single pass");
        return Ok(false);
    }
    service.precreate(wall_clock_now()).await?;
    Ok(true)
}

/// Create the shard group covering "now" for every configured retention policy,
/// standing in for the first write that would normally create it.
fn seed_current_groups(store: &InMemoryMetaStore, config: &AppConfig) -> Result<()> {
    let now = wall_clock_now();
    for (database, db) in &config.databases {
        for policy in db.retention_policies.keys() {
            let group = store.create_shard_group(database, policy, now)?;
            info!(
                database = %database,
                retention_policy = %policy,
                shard_group = group.id,
                start = %group.start_time,
                end = %group.end_time,
                "seeded current shard group"
            );
        }
    }
    Ok(())
}

fn log_catalog(store: &InMemoryMetaStore, config: &AppConfig) {
    for (database, db) in &config.databases {
        for policy in db.retention_policies.keys() {
            match store.shard_groups(database, policy) {
                Ok(groups) => info!(
                    database = %database,
                    retention_policy = %policy,
                    shard_groups = groups.len(),
                    latest_end = ?groups.last().map(|g| g.end_time),
                    "shard group catalog"
                ),
                Err(err) => warn!(database = %database, retention_policy = %policy, error = %err, "unable to read catalog"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precreator_common::config::PrecreatorConfig;

    fn store_and_service(enabled: bool) -> (Arc<InMemoryMetaStore>, PrecreationService) {
        let store = Arc::new(InMemoryMetaStore::new());
        store.create_database("db0").unwrap();
        store
            .create_retention_policy("db0", "rp0", Duration::from_secs(3600))
            .unwrap();
        store
            .create_shard_group("db0", "rp0", wall_clock_now())
            .unwrap();

        let mut config = PrecreatorConfig::new(Duration::from_secs(60), Duration::from_secs(7200));
        config.enabled = enabled;
        let service = PrecreationService::new(config, Arc::clone(&store)).unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn single_pass_precreates_when_enabled() {
        let (store, service) = store_and_service(true);
        assert!(run_single_pass(&service).await.unwrap());
        assert_eq!(store.shard_groups("db0", "rp0").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn single_pass_is_skipped_when_disabled() {
        let (store, service) = store_and_service(false);
        assert!(!run_single_pass(&service).await.unwrap());
        assert_eq!(store.shard_groups("db0", "rp0").unwrap().len(), 1);
    }
}
