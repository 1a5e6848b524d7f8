//! Announces the NIC's identity, driver and firmware
//!
//! The record rarely changes, so it is fetched once and re-emitted on every
//! poll. A background monitor watches the runner's failed polls; any failure
//! marks the stored record stale and the next poll fetches it again.

use super::contexts::ptp_daemon_context;
use super::{emit, CollectionConstructor, Collector, CollectorBase, PollResult};
use crate::callbacks::Callback;
use crate::clients::ExecContext;
use crate::devices::{build_device_info_fetcher, get_device_info, DeviceInfo};
use crate::error::{CollectorError, Result};
use crate::fetcher::Fetcher;
use crate::validations::{DeviceDetails, DeviceDriver, DeviceFirmware, Outcome, Validation};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEVINFO_COLLECTOR_NAME: &str = "DevInfo";
pub const DEVICE_INFO_DATATYPE: &str = "device-info";

pub struct DevInfoCollector {
    base: CollectorBase,
    ctx: Arc<dyn ExecContext>,
    fetcher: Fetcher,
    stored: RwLock<DeviceInfo>,
    /// Single-slot gate: set by the monitor, cleared by the poll that refetches
    requires_fetch: Arc<AtomicBool>,
    errored_polls: Mutex<Option<mpsc::Receiver<PollResult>>>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl DevInfoCollector {
    pub async fn new(constructor: &mut CollectionConstructor) -> Result<Self> {
        let interface = constructor.ptp_interface()?.to_string();
        let ctx = ptp_daemon_context(
            constructor.clientset.clone(),
            constructor.node_name.as_deref(),
        )
        .await?;
        Self::with_context(
            Arc::new(ctx),
            constructor.callback.clone(),
            &interface,
            constructor.dev_info_announce_interval,
            constructor.errored_polls.take(),
        )
        .await
    }

    /// Fetch the first record and check the card is usable.
    ///
    /// When the card fails a check the record is still emitted once so the
    /// output shows what was found, then construction fails.
    pub(crate) async fn with_context(
        ctx: Arc<dyn ExecContext>,
        callback: Arc<dyn Callback>,
        interface: &str,
        interval: Duration,
        errored_polls: Option<mpsc::Receiver<PollResult>>,
    ) -> Result<Self> {
        let fetcher = build_device_info_fetcher(interface)?;
        let info = get_device_info(&fetcher, ctx.as_ref()).await?;

        let checks: [Box<dyn Validation>; 3] = [
            Box::new(DeviceDetails::new(&info)),
            Box::new(DeviceDriver::new(&info)),
            Box::new(DeviceFirmware::new(&info)),
        ];
        let mut failures = Vec::new();
        for check in &checks {
            match check.outcome() {
                Outcome::Success => {}
                Outcome::EnvironmentFailure(reason) => failures.push(reason),
                Outcome::Unknown(reason) => {
                    warn!(check = check.description(), reason = %reason, "Could not verify the card")
                }
            }
        }
        if !failures.is_empty() {
            callback.call(&info, DEVINFO_COLLECTOR_NAME, DEVICE_INFO_DATATYPE)?;
            return Err(CollectorError::composite_invalid_env(&failures));
        }

        Ok(Self {
            base: CollectorBase::new(callback, interval, true),
            ctx,
            fetcher,
            stored: RwLock::new(info),
            requires_fetch: Arc::new(AtomicBool::new(false)),
            errored_polls: Mutex::new(errored_polls),
            cancel: CancellationToken::new(),
            monitor: Mutex::new(None),
        })
    }

    async fn current(&self) -> Result<DeviceInfo> {
        if !self.requires_fetch.swap(false, Ordering::SeqCst) {
            return Ok(self.stored.read().await.clone());
        }
        debug!("Refetching device info");
        match get_device_info(&self.fetcher, self.ctx.as_ref()).await {
            Ok(info) => {
                *self.stored.write().await = info.clone();
                Ok(info)
            }
            Err(e) => {
                self.requires_fetch.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// Turn failed polls into a refetch request without ever blocking the sender
async fn monitor_errors(
    mut errored_polls: mpsc::Receiver<PollResult>,
    requires_fetch: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = errored_polls.recv() => match received {
                Some(result) => {
                    if !requires_fetch.swap(true, Ordering::SeqCst) {
                        debug!(
                            collector = %result.collector_name,
                            errors = result.errors.len(),
                            "Poll failed, device info marked stale"
                        );
                    }
                }
                None => break,
            },
        }
    }
    debug!("Device info error monitor stopped");
}

#[async_trait]
impl Collector for DevInfoCollector {
    fn name(&self) -> &'static str {
        DEVINFO_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn start(&self) -> Result<()> {
        self.base.set_running(true);
        if let Some(errored_polls) = self.errored_polls.lock().await.take() {
            let handle = tokio::spawn(monitor_errors(
                errored_polls,
                self.requires_fetch.clone(),
                self.cancel.clone(),
            ));
            *self.monitor.lock().await = Some(handle);
        }
        let context = self.ctx.describe().await;
        info!(context = %context, "Started device info collector");
        Ok(())
    }

    async fn poll(&self) -> PollResult {
        let fetched = self.current().await;
        emit(&self.base, DEVINFO_COLLECTOR_NAME, DEVICE_INFO_DATATYPE, fetched)
    }

    async fn cleanup(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.monitor.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Device info error monitor panicked");
            }
        }
        self.base.set_running(false);
        Ok(())
    }
}
