//! Periodic collectors and the shared machinery they are driven by
//!
//! Every collector exposes the same capability set through [`Collector`]:
//! it is started once, polled on its own interval by the runner, and
//! cleaned up after every poll has drained. Records are handed to the
//! shared [`Callback`]; failures travel back on the [`PollResult`].

pub mod contexts;
mod devinfo;
mod dpll;
mod gnss;
mod logs;
mod pmc;
mod registry;

#[cfg(test)]
mod tests;

pub use devinfo::{DevInfoCollector, DEVINFO_COLLECTOR_NAME, DEVICE_INFO_DATATYPE};
pub use dpll::{
    new_dpll_collector, DpllFsCollector, DpllNetlinkCollector, DPLL_COLLECTOR_NAME,
    DPLL_FS_COLLECTOR_NAME, DPLL_FS_DATATYPE, DPLL_NETLINK_COLLECTOR_NAME, DPLL_NETLINK_DATATYPE,
};
pub use gnss::{GnssCollector, GNSS_COLLECTOR_NAME, GNSS_DATATYPE};
pub use logs::{
    collect_window, KubeLogSource, LogSource, LogsCollector, FOLLOW_TIMEOUT_FACTOR,
    LINE_CHANNEL_SIZE, LOGS_COLLECTOR_NAME, LOGS_DATATYPE, LOG_POLL_INTERVAL, SLICE_CHANNEL_SIZE,
};
pub use pmc::{PmcCollector, PMC_COLLECTOR_NAME, PMC_DATATYPE};
pub use registry::{
    collectors_to_run, selector_names, CollectorKind, Inclusion, ALL_SELECTOR, DEFAULTS_SELECTOR,
};

use crate::callbacks::Callback;
use crate::clients::Clientset;
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome of a single poll
#[derive(Debug)]
pub struct PollResult {
    /// Registry name of the collector that ran the poll
    pub collector_name: String,
    /// Every failure the poll hit; empty when it succeeded
    pub errors: Vec<CollectorError>,
}

impl PollResult {
    pub fn new(collector_name: impl Into<String>) -> Self {
        Self {
            collector_name: collector_name.into(),
            errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: CollectorError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A poll interval that can be stretched and restored at runtime
#[derive(Debug)]
pub struct LockedInterval {
    base: Duration,
    current: RwLock<Duration>,
}

impl LockedInterval {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: RwLock::new(base),
        }
    }

    pub fn interval(&self) -> Duration {
        match self.current.read() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Multiply the current interval by `factor`, saturating at `Duration::MAX`.
    ///
    /// NaN and negative factors are ignored.
    pub fn scale(&self, factor: f64) {
        if factor.is_nan() || factor < 0.0 {
            return;
        }
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = Duration::try_from_secs_f64(current.as_secs_f64() * factor).unwrap_or(Duration::MAX);
    }

    /// Return to the construction-time interval
    pub fn reset(&self) {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = self.base;
    }
}

/// State every collector carries
pub struct CollectorBase {
    callback: Arc<dyn Callback>,
    interval: LockedInterval,
    announcer: bool,
    running: AtomicBool,
}

impl std::fmt::Debug for CollectorBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorBase")
            .field("interval", &self.interval)
            .field("announcer", &self.announcer)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CollectorBase {
    pub fn new(callback: Arc<dyn Callback>, interval: Duration, announcer: bool) -> Self {
        Self {
            callback,
            interval: LockedInterval::new(interval),
            announcer,
            running: AtomicBool::new(false),
        }
    }

    pub fn callback(&self) -> &dyn Callback {
        self.callback.as_ref()
    }

    pub fn interval(&self) -> &LockedInterval {
        &self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

/// A source of periodic records
#[async_trait]
pub trait Collector: Send + Sync {
    /// Registry name, also used as the record's collector label
    fn name(&self) -> &'static str;

    fn base(&self) -> &CollectorBase;

    /// Prepare the collector; called once before the first poll
    async fn start(&self) -> Result<()> {
        self.base().set_running(true);
        Ok(())
    }

    /// Collect one sample and hand it to the callback
    async fn poll(&self) -> PollResult;

    /// Release resources; called after every poll has finished
    async fn cleanup(&self) -> Result<()> {
        self.base().set_running(false);
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.base().interval().interval()
    }

    fn is_announcer(&self) -> bool {
        self.base().announcer
    }

    fn scale_poll_interval(&self, factor: f64) {
        self.base().interval().scale(factor);
    }

    fn reset_poll_interval(&self) {
        self.base().interval().reset();
    }
}

/// Everything a collector may need at construction
pub struct CollectionConstructor {
    /// Sink every collector writes its records to
    pub callback: Arc<dyn Callback>,
    /// Shared cluster access
    pub clientset: Arc<Clientset>,
    /// Failed polls forwarded by the runner; taken by the device-info collector
    pub errored_polls: Option<mpsc::Receiver<PollResult>>,
    /// NIC port the PTP daemon runs on, e.g. `ens7f0`
    pub ptp_interface: String,
    /// Restrict pod lookups to this node
    pub node_name: Option<String>,
    /// Base poll interval for the non-announcer collectors
    pub poll_interval: Duration,
    /// How often the device-info record is re-emitted
    pub dev_info_announce_interval: Duration,
    /// File the Logs collector appends to; required when Logs is selected
    pub logs_output_file: Option<PathBuf>,
    /// Write each log line with its original timestamp
    pub include_log_timestamps: bool,
    /// Directory for generation dump files
    pub temp_dir: PathBuf,
    /// Leave generation dumps in place after shutdown
    pub keep_debug_files: bool,
}

impl CollectionConstructor {
    /// The PTP interface, rejecting an empty name
    pub fn ptp_interface(&self) -> Result<&str> {
        if self.ptp_interface.is_empty() {
            return Err(CollectorError::MissingInput(
                "a PTP interface name is required".to_string(),
            ));
        }
        Ok(&self.ptp_interface)
    }
}

/// Shared body of the single-record collectors: emit `record` or report why not
pub(crate) fn emit<R: crate::callbacks::Reportable>(
    base: &CollectorBase,
    collector: &str,
    datatype: &str,
    fetched: Result<R>,
) -> PollResult {
    let result = PollResult::new(collector);
    // the original error is kept so the runner can tell a vanished pod apart
    let fetched = fetched.map_err(|e| {
        debug!(collector, datatype, error = %e, "Failed to fetch");
        e
    });
    match fetched.and_then(|record| base.callback().call(&record, collector, datatype)) {
        Ok(()) => result,
        Err(e) => result.with_error(e),
    }
}

#[cfg(test)]
mod interval_tests {
    use super::*;

    #[test]
    fn test_scale_then_reset_restores_base() {
        let interval = LockedInterval::new(Duration::from_secs(2));
        interval.scale(2.0);
        assert_eq!(interval.interval(), Duration::from_secs(4));
        interval.scale(0.25);
        assert_eq!(interval.interval(), Duration::from_secs(1));
        interval.reset();
        assert_eq!(interval.interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_scale_saturates_instead_of_overflowing() {
        let interval = LockedInterval::new(Duration::from_secs(1));
        interval.scale(f64::INFINITY);
        assert_eq!(interval.interval(), Duration::MAX);

        interval.reset();
        interval.scale(1e30);
        assert_eq!(interval.interval(), Duration::MAX);

        interval.reset();
        interval.scale(f64::NAN);
        interval.scale(-2.0);
        assert_eq!(interval.interval(), Duration::from_secs(1));
    }
}
