//! DPLL state exposed through sysfs by older `ice` drivers

use super::{date_command, sysfs_device_path, DATE_KEY};
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::ExecContext;
use crate::error::{CollectorError, Result};
use crate::fetcher::{fetcher_from, FetchedValues, Fetcher, Unmarshal, Value};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// sysfs reports the phase offset in units of 10 ps
const UNIT_CONVERSION_FACTOR: f64 = 100.0;

const EEC_STATE_FILE: &str = "dpll_0_state";
const PPS_STATE_FILE: &str = "dpll_1_state";
const PPS_OFFSET_FILE: &str = "dpll_1_offset";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DpllFsInfo {
    pub timestamp: String,
    #[serde(rename = "eecstate")]
    pub eec_state: String,
    #[serde(rename = "state")]
    pub pps_state: String,
    #[serde(rename = "terror")]
    pub pps_offset: f64,
}

impl Unmarshal for DpllFsInfo {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign(DATE_KEY, &mut self.timestamp)?;
        values.assign(EEC_STATE_FILE, &mut self.eec_state)?;
        values.assign(PPS_STATE_FILE, &mut self.pps_state)?;
        values.assign(PPS_OFFSET_FILE, &mut self.pps_offset)?;
        Ok(())
    }
}

impl Reportable for DpllFsInfo {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        Ok(vec![AnalyserRecord::new(
            "dpll/time-error",
            json!({
                "timestamp": self.timestamp,
                "eecstate": self.eec_state,
                "state": self.pps_state,
                "terror": self.pps_offset / UNIT_CONVERSION_FACTOR,
            }),
        )])
    }
}

fn post_process(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>> {
    let offset = raw.get(PPS_OFFSET_FILE).map(String::as_str).unwrap_or_default();
    let offset: f64 = offset.parse().map_err(|e| {
        CollectorError::parse(format!("failed converting {} {:?} to a float: {}", PPS_OFFSET_FILE, offset, e))
    })?;
    Ok(HashMap::from([(PPS_OFFSET_FILE.to_string(), Value::Float(offset))]))
}

pub fn build_dpll_fs_fetcher(interface: &str) -> Result<Fetcher> {
    let commands: Vec<(&str, String)> = [EEC_STATE_FILE, PPS_STATE_FILE, PPS_OFFSET_FILE]
        .into_iter()
        .map(|file| (file, format!("cat {}", sysfs_device_path(interface, file))))
        .collect();
    let args: Vec<(&str, &str, bool)> = commands
        .iter()
        .map(|(key, shell)| (*key, shell.as_str(), true))
        .collect();

    let mut fetcher = fetcher_from(vec![date_command()?], &args)?;
    fetcher.set_post_processor(Arc::new(post_process));
    Ok(fetcher)
}

pub async fn get_dpll_fs_info(fetcher: &Fetcher, ctx: &dyn ExecContext) -> Result<DpllFsInfo> {
    fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch DPLL info from sysfs");
        e
    })
}

/// Whether all three DPLL files exist under the interface's device directory
pub async fn is_dpll_fs_present(ctx: &dyn ExecContext, interface: &str) -> Result<bool> {
    let fetcher = fetcher_from(
        vec![],
        &[("paths", format!("ls -1 {}", sysfs_device_path(interface, "")).as_str(), true)],
    )?;
    let values = fetcher.fetch_values(ctx).await?;
    let mut listing = String::new();
    values.assign("paths", &mut listing)?;

    let entries: Vec<&str> = listing.lines().map(str::trim).collect();
    let present = [EEC_STATE_FILE, PPS_STATE_FILE, PPS_OFFSET_FILE]
        .iter()
        .all(|expected| entries.contains(expected));
    debug!(interface, present, "Checked for DPLL sysfs entries");
    Ok(present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockExec;
    use crate::devices::testdata::{DPLL_FS_LISTING, DPLL_FS_OUTPUT};

    #[tokio::test]
    async fn test_dpll_fs_parse() {
        let fetcher = build_dpll_fs_fetcher("ens7f0").unwrap();
        let ctx = MockExec::new().respond("dpll_1_offset", DPLL_FS_OUTPUT);
        let info = get_dpll_fs_info(&fetcher, &ctx).await.unwrap();
        assert_eq!(info.timestamp, "2023-06-16T11:49:47.0584Z");
        assert_eq!(info.eec_state, "2");
        assert_eq!(info.pps_state, "3");
        assert_eq!(info.pps_offset, -25.0);

        let records = info.analyser_format().unwrap();
        assert_eq!(records[0].id, "dpll/time-error");
        assert_eq!(records[0].data["terror"], -0.25);
        assert_eq!(records[0].data["state"], "3");
    }

    #[tokio::test]
    async fn test_dpll_fs_bad_offset() {
        let fetcher = build_dpll_fs_fetcher("ens7f0").unwrap();
        let output = DPLL_FS_OUTPUT.replace("-25", "n/a");
        let ctx = MockExec::new().respond("dpll_1_offset", &output);
        let err = get_dpll_fs_info(&fetcher, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("dpll_1_offset"));
    }

    #[tokio::test]
    async fn test_dpll_fs_presence() {
        let ctx = MockExec::new().respond("ls -1 /sys/class/net/ens7f0/device/", DPLL_FS_LISTING);
        assert!(is_dpll_fs_present(&ctx, "ens7f0").await.unwrap());

        let ctx = MockExec::new().respond(
            "ls -1",
            &DPLL_FS_LISTING.replace("dpll_1_offset\n", ""),
        );
        assert!(!is_dpll_fs_present(&ctx, "ens7f0").await.unwrap());
    }
}
