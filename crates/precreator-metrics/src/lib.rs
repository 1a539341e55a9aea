//! ---
//! prc_section: "03-observability"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Metrics collection and export utilities."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address the exporter is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the precreation service.
#[derive(Clone)]
pub struct PrecreatorMetrics {
    ticks_total: IntCounter,
    failures_total: IntCounter,
    precreate_seconds: Histogram,
    running: IntGauge,
}

impl PrecreatorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "precreator_ticks_total",
            "Total number of shard group precreation attempts",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let failures_total = IntCounter::with_opts(Opts::new(
            "precreator_failures_total",
            "Total number of precreation attempts rejected by the metadata store",
        ))?;
        registry.register(Box::new(failures_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let precreate_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "precreator_precreate_duration_seconds",
                "Time spent waiting on the metadata store per precreation attempt",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(precreate_seconds.clone()))?;

        let running = IntGauge::with_opts(Opts::new(
            "precreator_running",
            "Indicator (0/1) whether the precreation loop is running",
        ))?;
        registry.register(Box::new(running.clone()))?;

        Ok(Self {
            ticks_total,
            failures_total,
            precreate_seconds,
            running,
        })
    }

    /// Record one precreation attempt and how long the metadata call took.
    pub fn observe_attempt(&self, elapsed: Duration, succeeded: bool) {
        self.ticks_total.inc();
        self.precreate_seconds.observe(elapsed.as_secs_f64());
        if !succeeded {
            self.failures_total.inc();
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.set(if running { 1 } else { 0 });
    }

    pub fn ticks(&self) -> u64 {
        self.ticks_total.get()
    }

    pub fn failures(&self) -> u64 {
        self.failures_total.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.get() == 1
    }
}

impl std::fmt::Debug for PrecreatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecreatorMetrics")
            .field("ticks", &self.ticks())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn attempts_and_failures_are_counted() {
        let metrics = PrecreatorMetrics::new(new_registry()).unwrap();
        metrics.observe_attempt(Duration::from_millis(3), true);
        metrics.observe_attempt(Duration::from_millis(5), false);
        assert_eq!(metrics.ticks(), 2);
        assert_eq!(metrics.failures(), 1);

        metrics.set_running(true);
        assert!(metrics.is_running());
        metrics.set_running(false);
        assert!(!metrics.is_running());
    }

    #[test]
    fn registering_twice_on_one_registry_fails() {
        let registry = new_registry();
        PrecreatorMetrics::new(registry.clone()).unwrap();
        assert!(PrecreatorMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registered_families() {
        let registry = new_registry();
        let metrics = PrecreatorMetrics::new(registry.clone()).unwrap();
        metrics.observe_attempt(Duration::from_millis(1), true);

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();

        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("precreator_ticks_total 1"));
        server.shutdown().await.unwrap();
    }
}
