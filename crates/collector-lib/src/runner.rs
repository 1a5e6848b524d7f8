//! Drives the selected collectors until the duration budget runs out or the
//! process is interrupted
//!
//! Every collector gets its own worker task that spawns polls on the
//! collector's interval. Results flow back on one bounded channel; failed
//! polls are forwarded, without ever blocking, to the device-info monitor so
//! it can refresh its record.

use crate::callbacks::Callback;
use crate::collectors::{CollectionConstructor, Collector, CollectorKind, PollResult};
use crate::error::{CollectorError, Result};
use crate::status::{StatusRegistry, CONSECUTIVE_ERROR_THRESHOLD};
use crate::utils::WaitGroupCount;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polls of one collector allowed in flight before the worker waits
pub const MAX_IN_FLIGHT_POLLS: i64 = 3;

/// Capacity of the result and errored-poll channels
pub const RESULT_CHANNEL_SIZE: usize = 10;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long non-announcers are polled
    pub duration: Duration,
    pub max_in_flight: i64,
    pub consecutive_error_threshold: u32,
}

impl RunnerConfig {
    pub fn new(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(CollectorError::MissingInput(
                "duration must be a positive time value".to_string(),
            ));
        }
        Ok(Self {
            duration,
            max_in_flight: MAX_IN_FLIGHT_POLLS,
            consecutive_error_threshold: CONSECUTIVE_ERROR_THRESHOLD,
        })
    }
}

pub struct CollectorRunner {
    config: RunnerConfig,
    callback: Arc<dyn Callback>,
    collectors: Vec<Arc<dyn Collector>>,
    status: Arc<StatusRegistry>,
    errored_tx: Option<mpsc::Sender<PollResult>>,
}

impl CollectorRunner {
    pub fn new(config: RunnerConfig, callback: Arc<dyn Callback>) -> Self {
        let status = Arc::new(StatusRegistry::new(config.consecutive_error_threshold));
        Self {
            config,
            callback,
            collectors: Vec::new(),
            status,
            errored_tx: None,
        }
    }

    pub fn status(&self) -> Arc<StatusRegistry> {
        self.status.clone()
    }

    /// Build each selected collector.
    ///
    /// A collector whose requirements are not met is skipped with a warning;
    /// any other construction error aborts the run.
    pub async fn initialise(
        &mut self,
        kinds: &[CollectorKind],
        constructor: &mut CollectionConstructor,
    ) -> Result<()> {
        constructor.errored_polls = Some(self.errored_polls());

        for kind in kinds {
            debug!(collector = %kind, "Building collector");
            match kind.build(constructor).await {
                Ok(collector) => self.add(Arc::from(collector)),
                Err(e) if e.is_requirements_not_met() => {
                    warn!(collector = %kind, reason = %e, "Requirements not met, skipping collector");
                }
                Err(e) => {
                    error!(collector = %kind, error = %e, "Failed to build collector");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Receiver of every failed poll; replaces any earlier receiver
    pub fn errored_polls(&mut self) -> mpsc::Receiver<PollResult> {
        let (errored_tx, errored_rx) = mpsc::channel(RESULT_CHANNEL_SIZE);
        self.errored_tx = Some(errored_tx);
        errored_rx
    }

    /// Add an already built collector
    pub fn add(&mut self, collector: Arc<dyn Collector>) {
        self.status.register(collector.name());
        self.collectors.push(collector);
    }

    pub fn collector_names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Start every collector, dropping the ones that fail to start.
    ///
    /// A dropped collector is cleaned up first; its start may have left a
    /// debug pod behind.
    async fn start(&mut self) {
        let mut started = Vec::with_capacity(self.collectors.len());
        for collector in self.collectors.drain(..) {
            match collector.start().await {
                Ok(()) => {
                    info!(
                        collector = collector.name(),
                        interval_ms = collector.poll_interval().as_millis() as u64,
                        announcer = collector.is_announcer(),
                        "Started collector"
                    );
                    started.push(collector);
                }
                Err(e) => {
                    error!(collector = collector.name(), error = %e, "Failed to start collector");
                    if let Err(e) = collector.cleanup().await {
                        warn!(collector = collector.name(), error = %e, "Cleanup after failed start failed");
                    }
                }
            }
        }
        self.collectors = started;
    }

    /// Poll until `shutdown` is cancelled or the duration budget elapses, then
    /// drain every in-flight poll and clean up.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        self.start().await;
        if self.collectors.is_empty() {
            warn!("No collectors to run");
        }

        let non_announcer_quit = shutdown.child_token();
        let announcer_quit = shutdown.child_token();
        let collectors_wg = Arc::new(WaitGroupCount::new());
        let announcers_wg = Arc::new(WaitGroupCount::new());
        let (results_tx, mut results_rx) = mpsc::channel::<PollResult>(RESULT_CHANNEL_SIZE);

        for collector in &self.collectors {
            let (quit, wg) = if collector.is_announcer() {
                (announcer_quit.child_token(), announcers_wg.clone())
            } else {
                (non_announcer_quit.child_token(), collectors_wg.clone())
            };
            wg.add(1);
            let worker = run_worker(
                collector.clone(),
                results_tx.clone(),
                quit,
                self.config.max_in_flight,
            );
            tokio::spawn(async move {
                worker.await;
                wg.done();
            });
        }
        // workers and their polls hold the remaining senders
        drop(results_tx);

        let duration = self.config.duration;
        let budget = non_announcer_quit.clone();
        let budget_timer = tokio::spawn(async move {
            tokio::select! {
                _ = budget.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    info!(duration_secs = duration.as_secs(), "Collection duration reached");
                    budget.cancel();
                }
            }
        });

        // announcers only report alongside something else
        let remaining = collectors_wg.clone();
        let stop_announcers = announcer_quit.clone();
        tokio::spawn(async move {
            remaining.wait().await;
            debug!("Only announcers remain, stopping them");
            stop_announcers.cancel();
        });

        while let Some(result) = results_rx.recv().await {
            self.handle_result(result);
        }
        collectors_wg.wait().await;
        announcers_wg.wait().await;
        budget_timer.abort();
        info!("All collectors stopped");

        self.cleanup().await
    }

    fn handle_result(&self, result: PollResult) {
        if let Some(streak) = self.status.record(&result) {
            warn!(
                collector = %result.collector_name,
                consecutive_failures = streak,
                "Collector keeps failing"
            );
        }
        if result.is_ok() {
            return;
        }
        for e in &result.errors {
            if matches!(e, CollectorError::PodNotFound { .. }) {
                info!(collector = %result.collector_name, error = %e, "Target pod was replaced, context refreshed");
            } else {
                warn!(collector = %result.collector_name, error = %e, "Poll failed");
            }
        }
        let Some(errored_tx) = &self.errored_tx else {
            return;
        };
        match errored_tx.try_send(result) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                debug!(collector = %dropped.collector_name, "Errored poll channel full, dropping result");
            }
            // nothing is monitoring failed polls
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn cleanup(&self) -> Result<()> {
        for collector in &self.collectors {
            debug!(collector = collector.name(), "Cleaning up collector");
            if let Err(e) = collector.cleanup().await {
                error!(collector = collector.name(), error = %e, "Collector cleanup failed");
            }
        }
        for (name, status) in self.status.snapshot() {
            info!(
                collector = %name,
                polls = status.polls,
                failures = status.failures,
                "Collector summary"
            );
        }
        self.callback.cleanup()
    }
}

/// Spawn a poll whenever one is due, keeping at most `max_in_flight` running
async fn run_worker(
    collector: Arc<dyn Collector>,
    results: mpsc::Sender<PollResult>,
    quit: CancellationToken,
    max_in_flight: i64,
) {
    let in_flight = Arc::new(WaitGroupCount::new());
    let mut last_poll: Option<Instant> = None;

    while !quit.is_cancelled() {
        if in_flight.count() >= max_in_flight {
            debug!(collector = collector.name(), "Too many polls in flight, waiting");
            in_flight.wait().await;
            continue;
        }

        let interval = collector.poll_interval();
        let elapsed = last_poll.map(|at| at.elapsed());
        match elapsed {
            Some(elapsed) if elapsed < interval => {
                tokio::select! {
                    _ = quit.cancelled() => break,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            }
            _ => {
                // the spawn time is recorded, so slow polls do not stretch the interval
                last_poll = Some(Instant::now());
                in_flight.add(1);
                let collector = collector.clone();
                let results = results.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    let result = collector.poll().await;
                    if results.send(result).await.is_err() {
                        debug!(collector = collector.name(), "Result channel closed");
                    }
                    in_flight.done();
                });
            }
        }
    }

    debug!(collector = collector.name(), in_flight = in_flight.count(), "Stopping collector");
    in_flight.wait().await;
}

/// Cancel `token` on SIGINT or SIGTERM
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = interrupt => info!("Received interrupt, stopping collectors"),
            _ = terminate => info!("Received terminate, stopping collectors"),
        }
        token.cancel();
    });
}
