//! ---
//! prc_section: "04-precreation"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shard group precreation scheduling."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use precreator_common::config::PrecreatorConfig;
use precreator_common::time::{advance, Clock, SystemClock};
use precreator_meta::MetadataClient;
use precreator_metrics::PrecreatorMetrics;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{LifecycleError, PrecreatorError, Result};

/// Tick handler shared between the service handle and its loop task.
struct Precreator {
    advance_period: Duration,
    client: Arc<dyn MetadataClient>,
    // Set at most once; the loop task observes it through the shared `Arc`.
    metrics: OnceCell<PrecreatorMetrics>,
    // Held for the duration of one precreation call.
    tick_guard: AsyncMutex<()>,
}

impl Precreator {
    async fn precreate(&self, now: DateTime<Utc>) -> Result<()> {
        let _tick = self.tick_guard.lock().await;
        let cutoff = advance(now, self.advance_period);
        debug!(%now, %cutoff, "checking for shard groups to precreate");

        let started = Instant::now();
        let result = self.client.precreate_shard_groups(now, cutoff).await;
        if let Some(metrics) = self.metrics.get() {
            metrics.observe_attempt(started.elapsed(), result.is_ok());
        }
        result.map_err(PrecreatorError::from)
    }
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum Lifecycle {
    Stopped,
    Running(RunningLoop),
}

/// Periodically asks the metadata store to create shard groups ahead of time.
///
/// Every `check_interval` the service computes `cutoff = now + advance_period`
/// and calls [`MetadataClient::precreate_shard_groups`]. A failed attempt is
/// logged and retried on the next tick. Ticks never overlap.
pub struct PrecreationService {
    config: PrecreatorConfig,
    precreator: Arc<Precreator>,
    clock: Arc<dyn Clock>,
    lifecycle: AsyncMutex<Lifecycle>,
}

impl PrecreationService {
    /// Build a stopped service bound to `client`.
    pub fn new<C: MetadataClient>(config: PrecreatorConfig, client: C) -> Result<Self> {
        config
            .validate()
            .map_err(|err| PrecreatorError::Config(err.to_string()))?;
        Ok(Self {
            config,
            precreator: Arc::new(Precreator {
                advance_period: config.advance_period,
                client: Arc::new(client),
                metrics: OnceCell::new(),
                tick_guard: AsyncMutex::new(()),
            }),
            clock: Arc::new(SystemClock),
            lifecycle: AsyncMutex::new(Lifecycle::Stopped),
        })
    }

    /// Attach Prometheus instrumentation.
    ///
    /// Only the first set of metrics is kept. Attaching to a running service
    /// takes effect from the next tick.
    pub fn with_metrics(mut self, metrics: PrecreatorMetrics) -> Self {
        if self.precreator.metrics.set(metrics).is_err() {
            warn!("precreation metrics already attached; ignoring replacement");
        }
        if let (Lifecycle::Running(_), Some(metrics)) =
            (self.lifecycle.get_mut(), self.precreator.metrics.get())
        {
            metrics.set_running(true);
        }
        self
    }

    /// Replace the wall clock used by the timer loop.
    pub fn with_clock<K: Clock>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Configuration the service was built with.
    pub fn config(&self) -> &PrecreatorConfig {
        &self.config
    }

    /// Whether the timer loop is currently running.
    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    /// Start the timer loop.
    ///
    /// The first precreation runs one `check_interval` after this call. When the
    /// configuration is disabled the call succeeds without spawning anything.
    pub async fn open(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(LifecycleError::AlreadyRunning.into());
        }
        if !self.config.enabled {
            info!("shard precreation is disabled");
            return Ok(());
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run_loop(
            Arc::clone(&self.precreator),
            Arc::clone(&self.clock),
            self.config.check_interval,
            shutdown_rx,
        ));
        *lifecycle = Lifecycle::Running(RunningLoop { shutdown, task });
        if let Some(metrics) = self.precreator.metrics.get() {
            metrics.set_running(true);
        }
        info!(
            check_interval_s = self.config.check_interval.as_secs(),
            advance_period_s = self.config.advance_period.as_secs(),
            "starting shard precreation service"
        );
        Ok(())
    }

    /// Stop the timer loop and wait for it to exit.
    ///
    /// A precreation call in progress is allowed to finish. Calling this on a
    /// stopped service is a no-op.
    pub async fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running(running) = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        else {
            return;
        };
        info!("stopping shard precreation service");
        let _ = running.shutdown.send(true);
        if let Err(err) = running.task.await {
            error!(error = %err, "precreation loop join error");
        }
        if let Some(metrics) = self.precreator.metrics.get() {
            metrics.set_running(false);
        }
        debug!("shard precreation service stopped");
    }

    /// Run one precreation pass for `now`.
    ///
    /// This is the tick handler the timer loop uses; it waits for any tick
    /// already in progress.
    pub async fn precreate(&self, now: DateTime<Utc>) -> Result<()> {
        self.precreator.precreate(now).await
    }
}

impl std::fmt::Debug for PrecreationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecreationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn run_loop(
    precreator: Arc<Precreator>,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = tokio::time::Instant::now() + check_interval;
    let mut ticker = interval_at(start, check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("precreation shutdown signal received");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = precreator.precreate(clock.now()).await {
                    warn!(error = %err, "failed to precreate shards");
                }
            }
        }
    }
    debug!("precreation loop exited");
}
