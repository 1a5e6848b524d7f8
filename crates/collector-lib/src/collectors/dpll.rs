//! DPLL state, read from sysfs on older drivers or over netlink otherwise

use super::contexts::{netlink_context, ptp_daemon_context};
use super::{emit, CollectionConstructor, Collector, CollectorBase, PollResult};
use crate::callbacks::Callback;
use crate::clients::{DebugPodContext, ExecContext};
use crate::devices::{
    build_dpll_fs_fetcher, build_netlink_device_fetcher, get_dpll_fs_info, get_netlink_dpll_info,
    get_netlink_parameters, is_dpll_fs_present, NetlinkParameters,
};
use crate::error::{CollectorError, Result};
use crate::fetcher::Fetcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry name of the dispatcher
pub const DPLL_COLLECTOR_NAME: &str = "DPLL";
pub const DPLL_FS_COLLECTOR_NAME: &str = "DPLL-Filesystem";
pub const DPLL_FS_DATATYPE: &str = "dpll-info-fs";
pub const DPLL_NETLINK_COLLECTOR_NAME: &str = "DPLL-Netlink";
pub const DPLL_NETLINK_DATATYPE: &str = "dpll-info-nl";

/// Pick the sysfs collector when the driver exposes the DPLL files, netlink otherwise
pub async fn new_dpll_collector(constructor: &CollectionConstructor) -> Result<Box<dyn Collector>> {
    let interface = constructor.ptp_interface()?;
    let ctx = ptp_daemon_context(constructor.clientset.clone(), constructor.node_name.as_deref()).await?;
    if is_dpll_fs_present(&ctx, interface).await? {
        info!(interface, "DPLL sysfs entries found, reading the DPLL from the filesystem");
        let collector = DpllFsCollector::with_context(
            Arc::new(ctx),
            constructor.callback.clone(),
            interface,
            constructor.poll_interval,
        )?;
        return Ok(Box::new(collector));
    }

    info!(interface, "No DPLL sysfs entries, reading the DPLL over netlink");
    Ok(Box::new(DpllNetlinkCollector::new(constructor).await?))
}

pub struct DpllFsCollector {
    base: CollectorBase,
    ctx: Arc<dyn ExecContext>,
    fetcher: Fetcher,
}

impl DpllFsCollector {
    pub(crate) fn with_context(
        ctx: Arc<dyn ExecContext>,
        callback: Arc<dyn Callback>,
        interface: &str,
        interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base: CollectorBase::new(callback, interval, false),
            ctx,
            fetcher: build_dpll_fs_fetcher(interface)?,
        })
    }
}

#[async_trait]
impl Collector for DpllFsCollector {
    fn name(&self) -> &'static str {
        DPLL_FS_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn poll(&self) -> PollResult {
        let fetched = get_dpll_fs_info(&self.fetcher, self.ctx.as_ref()).await;
        emit(&self.base, DPLL_FS_COLLECTOR_NAME, DPLL_FS_DATATYPE, fetched)
    }
}

/// What start learns about the DPLL, needed by every poll
struct NetlinkState {
    params: NetlinkParameters,
    fetcher: Fetcher,
}

pub struct DpllNetlinkCollector {
    base: CollectorBase,
    interface: String,
    ctx: Arc<dyn ExecContext>,
    /// Present when the collector owns the debug pod it runs in
    pod: Option<Arc<DebugPodContext>>,
    state: RwLock<Option<NetlinkState>>,
}

impl DpllNetlinkCollector {
    pub async fn new(constructor: &CollectionConstructor) -> Result<Self> {
        let interface = constructor.ptp_interface()?.to_string();
        let pod = Arc::new(
            netlink_context(constructor.clientset.clone(), constructor.node_name.as_deref()).await?,
        );
        Ok(Self {
            base: CollectorBase::new(constructor.callback.clone(), constructor.poll_interval, false),
            interface,
            ctx: pod.clone(),
            pod: Some(pod),
            state: RwLock::new(None),
        })
    }

    pub(crate) fn with_context(
        ctx: Arc<dyn ExecContext>,
        callback: Arc<dyn Callback>,
        interface: &str,
        interval: Duration,
    ) -> Self {
        Self {
            base: CollectorBase::new(callback, interval, false),
            interface: interface.to_string(),
            ctx,
            pod: None,
            state: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Collector for DpllNetlinkCollector {
    fn name(&self) -> &'static str {
        DPLL_NETLINK_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn start(&self) -> Result<()> {
        if let Some(pod) = &self.pod {
            pod.create_and_wait().await?;
        }
        let params = get_netlink_parameters(self.ctx.as_ref(), &self.interface).await?;
        debug!(
            clock_id = params.clock_id,
            pin = ?params.offset_pin,
            "Resolved netlink DPLL parameters"
        );
        let fetcher = build_netlink_device_fetcher(&params)?;
        *self.state.write().await = Some(NetlinkState { params, fetcher });
        self.base.set_running(true);
        Ok(())
    }

    async fn poll(&self) -> PollResult {
        let state = self.state.read().await;
        let fetched = match state.as_ref() {
            Some(state) => get_netlink_dpll_info(&state.fetcher, self.ctx.as_ref(), &state.params).await,
            None => Err(CollectorError::RequirementsNotMet(
                "netlink DPLL collector was polled before it started".to_string(),
            )),
        };
        emit(&self.base, DPLL_NETLINK_COLLECTOR_NAME, DPLL_NETLINK_DATATYPE, fetched)
    }

    async fn cleanup(&self) -> Result<()> {
        self.base.set_running(false);
        if let Some(pod) = &self.pod {
            pod.delete_and_wait().await?;
        }
        Ok(())
    }
}
