//! Environment verification: gather every check, then report them in order
//!
//! Gathering never fails outright. When the data behind a check cannot be
//! fetched the check is replaced by an [`Unavailable`] stand-in so the
//! report still lists it, as unknown.

use crate::callbacks::{AnalyserRecord, Callback, Reportable};
use crate::clients::{Clientset, ExecContext};
use crate::collectors::contexts::{gnss_context, ptp_daemon_context};
use crate::devices::{
    build_device_info_fetcher, get_device_info, get_gnss_details, get_gnss_versions, DeviceInfo,
    GnssDetails, GnssVersions,
};
use crate::error::{composite_message, CollectorError, ExitCode, Result};
use crate::validations::{
    cluster_version_check, gnss_firmware_check, gnss_protocol_check, gpsd_version_check,
    operator_version_check, DeviceDetails, DeviceDriver, DeviceFirmware, GnssAntennaStatus,
    GnssDevices, GnssModule, GnssReceivingData, GrandMasterProfiles, Outcome, Unavailable,
    Validation,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Collector label and datatype of emitted check results
pub const VERIFY_COLLECTOR_NAME: &str = "EnvCheck";
pub const ENV_CHECK_DATATYPE: &str = "env-check";

/// Attempts at reading the antenna status; the first sample after start is
/// often not initialised yet
pub const ANTENNA_ATTEMPTS: usize = 3;
pub const ANTENNA_RETRY_DELAY: Duration = Duration::from_secs(1);

const UNKNOWNS_PREFIX: &str = "The following error occurred when trying to gather environment data for the following validations";
pub const INCOMPLETE_MESSAGE: &str =
    "Some checks did not complete, it is likely something is not correct in the environment";
pub const NO_ISSUES_MESSAGE: &str = "No issues found.";

type Checks = Vec<Box<dyn Validation>>;

fn unavailable(checks: Checks, error: &CollectorError) -> Checks {
    checks
        .iter()
        .map(|check| Box::new(Unavailable::replacing(check.as_ref(), error)) as Box<dyn Validation>)
        .collect()
}

fn device_checks_for(info: &DeviceInfo) -> Checks {
    vec![
        Box::new(DeviceDetails::new(info)),
        Box::new(DeviceDriver::new(info)),
        Box::new(DeviceFirmware::new(info)),
    ]
}

fn gnss_version_checks_for(versions: &GnssVersions) -> Checks {
    vec![
        Box::new(gpsd_version_check(versions)),
        Box::new(GnssModule::new(versions)),
        Box::new(gnss_firmware_check(versions)),
        Box::new(gnss_protocol_check(versions)),
        Box::new(GnssDevices::new(versions)),
    ]
}

fn gnss_status_checks_for(details: &GnssDetails) -> Checks {
    vec![
        Box::new(GnssAntennaStatus::new(details)),
        Box::new(GnssReceivingData::new(details)),
    ]
}

/// NIC model, driver and firmware
pub async fn device_checks(ctx: &dyn ExecContext, interface: &str) -> Checks {
    let fetched = match build_device_info_fetcher(interface) {
        Ok(fetcher) => get_device_info(&fetcher, ctx).await,
        Err(e) => Err(e),
    };
    match fetched {
        Ok(info) => device_checks_for(&info),
        Err(e) => unavailable(device_checks_for(&DeviceInfo::default()), &e),
    }
}

/// gpsd, receiver module, firmware and protocol versions and the GNSS devices
pub async fn gnss_version_checks(ctx: &dyn ExecContext) -> Checks {
    match get_gnss_versions(ctx).await {
        Ok(versions) => gnss_version_checks_for(&versions),
        Err(e) => unavailable(gnss_version_checks_for(&GnssVersions::default()), &e),
    }
}

/// Antenna connection and fix, retrying while no antenna reports connected
pub async fn gnss_status_checks(ctx: &dyn ExecContext, retry_delay: Duration) -> Checks {
    let mut last = Err(CollectorError::parse("GNSS status was never read"));
    for attempt in 1..=ANTENNA_ATTEMPTS {
        last = get_gnss_details(ctx).await.map(|(details, _)| details);
        let connected = last
            .as_ref()
            .map(|details| GnssAntennaStatus::new(details).outcome() == Outcome::Success)
            .unwrap_or(false);
        if connected {
            break;
        }
        if attempt < ANTENNA_ATTEMPTS {
            debug!(attempt, "GNSS antenna not reported connected, retrying");
            tokio::time::sleep(retry_delay).await;
        }
    }
    match last {
        Ok(details) => gnss_status_checks_for(&details),
        Err(e) => unavailable(gnss_status_checks_for(&GnssDetails::default()), &e),
    }
}

/// Every check against the cluster, the NIC and the GNSS receiver
pub async fn gather_checks(
    clientset: Arc<Clientset>,
    interface: &str,
    node_name: Option<&str>,
) -> Checks {
    let mut checks: Checks = vec![
        Box::new(cluster_version_check(&clientset).await),
        Box::new(operator_version_check(&clientset).await),
        Box::new(GrandMasterProfiles::fetch(&clientset).await),
    ];

    match ptp_daemon_context(clientset.clone(), node_name).await {
        Ok(ctx) => checks.extend(device_checks(&ctx, interface).await),
        Err(e) => checks.extend(unavailable(device_checks_for(&DeviceInfo::default()), &e)),
    }

    match gnss_context(clientset, node_name).await {
        Ok(ctx) => {
            checks.extend(gnss_version_checks(&ctx).await);
            checks.extend(gnss_status_checks(&ctx, ANTENNA_RETRY_DELAY).await);
        }
        Err(e) => {
            checks.extend(unavailable(gnss_version_checks_for(&GnssVersions::default()), &e));
            checks.extend(unavailable(gnss_status_checks_for(&GnssDetails::default()), &e));
        }
    }
    checks
}

/// One evaluated check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub id: String,
    pub description: String,
    pub order: u32,
    pub outcome: Outcome,
    pub data: serde_json::Value,
}

impl CheckResult {
    pub fn evaluate(check: &dyn Validation) -> Self {
        Self {
            id: check.id(),
            description: check.description().to_string(),
            order: check.order(),
            outcome: check.outcome(),
            data: check.data(),
        }
    }

    fn analysis(&self) -> serde_json::Value {
        let (result, reason) = match &self.outcome {
            Outcome::Success => (json!(true), String::new()),
            Outcome::EnvironmentFailure(reason) => (json!(false), reason.clone()),
            Outcome::Unknown(reason) => (json!("error"), reason.clone()),
        };
        json!({
            "id": self.id,
            "result": result,
            "reason": reason,
            "analysis": self.data,
        })
    }
}

impl Reportable for CheckResult {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(self.analysis())
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        Ok(vec![AnalyserRecord::new("environment-check", self.analysis())])
    }
}

/// Results of every check, in report order
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub results: Vec<CheckResult>,
}

impl Report {
    pub fn new(checks: &[Box<dyn Validation>]) -> Self {
        let mut results: Vec<CheckResult> = checks
            .iter()
            .map(|check| CheckResult::evaluate(check.as_ref()))
            .collect();
        results.sort_by_key(|r| r.order);
        Self { results }
    }

    fn reasons<F>(&self, select: F) -> Vec<String>
    where
        F: Fn(&Outcome) -> Option<&String>,
    {
        self.results
            .iter()
            .filter_map(|r| select(&r.outcome).map(|reason| format!("{}: {}", r.description, reason)))
            .collect()
    }

    /// `<description>: <reason>` for each environment failure
    pub fn failures(&self) -> Vec<String> {
        self.reasons(|outcome| match outcome {
            Outcome::EnvironmentFailure(reason) => Some(reason),
            _ => None,
        })
    }

    /// `<description>: <reason>` for each check that could not be evaluated
    pub fn unknowns(&self) -> Vec<String> {
        self.reasons(|outcome| match outcome {
            Outcome::Unknown(reason) => Some(reason),
            _ => None,
        })
    }

    /// The gathering errors as one block, when there were any
    pub fn unknowns_message(&self) -> Option<String> {
        let unknowns = self.unknowns();
        (!unknowns.is_empty()).then(|| composite_message(UNKNOWNS_PREFIX, &unknowns))
    }

    /// Composite `InvalidEnv` listing every failure
    pub fn check(&self) -> Result<()> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(());
        }
        Err(CollectorError::composite_invalid_env(&failures))
    }

    /// Closing line for text output when nothing failed
    pub fn summary(&self) -> &'static str {
        if self.unknowns().is_empty() {
            NO_ISSUES_MESSAGE
        } else {
            INCOMPLETE_MESSAGE
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.failures().is_empty() {
            ExitCode::Success
        } else {
            ExitCode::InvalidEnv
        }
    }

    /// Hand every result to `callback`, in order
    pub fn emit(&self, callback: &dyn Callback) -> Result<()> {
        for result in &self.results {
            callback.call(result, VERIFY_COLLECTOR_NAME, ENV_CHECK_DATATYPE)?;
        }
        info!(checks = self.results.len(), "Emitted environment checks");
        Ok(())
    }
}
