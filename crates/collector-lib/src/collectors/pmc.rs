//! Grandmaster settings reported by ptp4l through `pmc`

use super::contexts::ptp_daemon_context;
use super::{emit, CollectionConstructor, Collector, CollectorBase, PollResult};
use crate::callbacks::Callback;
use crate::clients::ExecContext;
use crate::devices::get_pmc_info;
use crate::devices::pmc::build_pmc_fetcher;
use crate::error::Result;
use crate::fetcher::Fetcher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const PMC_COLLECTOR_NAME: &str = "PMC";
pub const PMC_DATATYPE: &str = "pmc-info";

pub struct PmcCollector {
    base: CollectorBase,
    ctx: Arc<dyn ExecContext>,
    fetcher: Fetcher,
}

impl PmcCollector {
    pub async fn new(constructor: &CollectionConstructor) -> Result<Self> {
        let ctx = ptp_daemon_context(constructor.clientset.clone(), constructor.node_name.as_deref()).await?;
        Self::with_context(Arc::new(ctx), constructor.callback.clone(), constructor.poll_interval)
    }

    pub(crate) fn with_context(
        ctx: Arc<dyn ExecContext>,
        callback: Arc<dyn Callback>,
        interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base: CollectorBase::new(callback, interval, false),
            ctx,
            fetcher: build_pmc_fetcher()?,
        })
    }
}

#[async_trait]
impl Collector for PmcCollector {
    fn name(&self) -> &'static str {
        PMC_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    async fn poll(&self) -> PollResult {
        let fetched = get_pmc_info(&self.fetcher, self.ctx.as_ref()).await;
        emit(&self.base, PMC_COLLECTOR_NAME, PMC_DATATYPE, fetched)
    }
}
