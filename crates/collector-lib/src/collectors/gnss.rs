//! GNSS receiver status from `ubxtool`

use super::contexts::gnss_context;
use super::{CollectionConstructor, Collector, CollectorBase, PollResult};
use crate::callbacks::Callback;
use crate::clients::ExecContext;
use crate::devices::get_gnss_details;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const GNSS_COLLECTOR_NAME: &str = "GNSS";
pub const GNSS_DATATYPE: &str = "gpsNav";

pub struct GnssCollector {
    base: CollectorBase,
    ctx: Arc<dyn ExecContext>,
}

impl GnssCollector {
    pub async fn new(constructor: &CollectionConstructor) -> Result<Self> {
        let ctx = gnss_context(constructor.clientset.clone(), constructor.node_name.as_deref()).await?;
        Ok(Self::with_context(
            Arc::new(ctx),
            constructor.callback.clone(),
            constructor.poll_interval,
        ))
    }

    pub(crate) fn with_context(
        ctx: Arc<dyn ExecContext>,
        callback: Arc<dyn Callback>,
        interval: Duration,
    ) -> Self {
        Self {
            base: CollectorBase::new(callback, interval, false),
            ctx,
        }
    }
}

#[async_trait]
impl Collector for GnssCollector {
    fn name(&self) -> &'static str {
        GNSS_COLLECTOR_NAME
    }

    fn base(&self) -> &CollectorBase {
        &self.base
    }

    /// Sections that did parse are still emitted when others fail
    async fn poll(&self) -> PollResult {
        let result = PollResult::new(GNSS_COLLECTOR_NAME);
        let (details, partial) = match get_gnss_details(self.ctx.as_ref()).await {
            Ok(fetched) => fetched,
            Err(e) => return result.with_error(e),
        };

        let mut result = match self.base.callback().call(&details, GNSS_COLLECTOR_NAME, GNSS_DATATYPE) {
            Ok(()) => result,
            Err(e) => result.with_error(e),
        };
        if let Some(e) = partial {
            debug!(error = %e, "Some GNSS sections failed to parse");
            result = result.with_error(e);
        }
        result
    }
}
