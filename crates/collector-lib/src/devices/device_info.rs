//! NIC identity and versions
//!
//! ```text
//! driver: ice
//! version: 1.11.20.7
//! firmware-version: 4.20 0x8001778b 1.3346.0
//! expansion-rom-version:
//! bus-info: 0000:86:00.0
//! ```

use super::{date_command, sysfs_device_path, DATE_KEY};
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::{Command, ExecContext};
use crate::error::{CollectorError, Result};
use crate::fetcher::{fetcher_from, FetchedValues, Fetcher, Unmarshal, Value};
use crate::utils::format_rfc3339_nano;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static ETHTOOL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"version: (.*)\nfirmware-version: (.*)\n").unwrap());

/// Identity of the NIC backing the PTP interface
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "date")]
    pub timestamp: String,
    #[serde(rename = "vendorId")]
    pub vendor_id: String,
    #[serde(rename = "deviceInfo")]
    pub device_id: String,
    #[serde(rename = "GNSSDev")]
    pub gnss_dev: String,
    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "driverVersion")]
    pub driver_version: String,
    /// Time between the node's `date` reading and its arrival here, in nanoseconds
    #[serde(rename = "timeOffset")]
    pub time_offset_ns: i64,
}

impl Unmarshal for DeviceInfo {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign(DATE_KEY, &mut self.timestamp)?;
        values.assign("vendorID", &mut self.vendor_id)?;
        values.assign("devID", &mut self.device_id)?;
        values.assign("gnss", &mut self.gnss_dev)?;
        values.assign("firmwareVersion", &mut self.firmware_version)?;
        values.assign("driverVersion", &mut self.driver_version)?;
        values.assign("timeOffset", &mut self.time_offset_ns)?;
        Ok(())
    }
}

impl DeviceInfo {
    /// Emission time shifted by the offset measured at fetch
    fn node_now(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::nanoseconds(self.time_offset_ns)
    }
}

impl Reportable for DeviceInfo {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        Ok(vec![AnalyserRecord::new(
            "devInfo",
            json!({
                "timestamp": format_rfc3339_nano(&self.node_now()),
                "fetched_timestamp": self.timestamp,
                "vendorID": self.vendor_id,
                "devID": self.device_id,
                "gnss": self.gnss_dev,
                "firmwareVersion": self.firmware_version,
                "driverVersion": self.driver_version,
            }),
        )])
    }
}

fn process_gnss_path(value: &str) -> Result<String> {
    Ok(format!("/dev/{}", value.trim()))
}

fn extract_time_offset(raw: &HashMap<String, String>) -> Result<i64> {
    let fetched = raw.get(DATE_KEY).map(String::as_str).unwrap_or_default();
    let timestamp = DateTime::parse_from_rfc3339(fetched)
        .map_err(|e| CollectorError::parse(format!("failed to parse timestamp {}: {}", fetched, e)))?
        .with_timezone(&Utc);
    let offset = Utc::now() - timestamp;
    Ok(offset.num_nanoseconds().unwrap_or(i64::MAX))
}

fn extract_ethtool_versions(raw: &HashMap<String, String>) -> Result<(String, String)> {
    let output = raw.get("ethtoolOut").map(String::as_str).unwrap_or_default();
    // ethtool output is trimmed, so the firmware line may have lost its newline
    let terminated = format!("{}\n", output);
    let caps = ETHTOOL_REGEX
        .captures(&terminated)
        .ok_or_else(|| CollectorError::parse(format!("failed to extract ethtoolOut from {}", output)))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

fn post_process(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>> {
    let offset = extract_time_offset(raw)?;
    let (driver, firmware) = extract_ethtool_versions(raw)?;
    Ok(HashMap::from([
        ("timeOffset".to_string(), Value::Int(offset)),
        ("driverVersion".to_string(), Value::Str(driver)),
        ("firmwareVersion".to_string(), Value::Str(firmware)),
    ]))
}

/// Fetcher for [`DeviceInfo`] on `interface`
pub fn build_device_info_fetcher(interface: &str) -> Result<Fetcher> {
    let gnss = Command::new(
        "gnss",
        format!("ls {}", sysfs_device_path(interface, "gnss/")),
    )?
    .with_processor(process_gnss_path);

    let mut fetcher = fetcher_from(
        vec![date_command()?, gnss],
        &[
            ("devID", format!("cat {}", sysfs_device_path(interface, "device")).as_str(), true),
            ("vendorID", format!("cat {}", sysfs_device_path(interface, "vendor")).as_str(), true),
            ("ethtoolOut", format!("ethtool -i {}", interface).as_str(), true),
        ],
    )?;
    fetcher.set_post_processor(Arc::new(post_process));
    Ok(fetcher)
}

pub async fn get_device_info(fetcher: &Fetcher, ctx: &dyn ExecContext) -> Result<DeviceInfo> {
    fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch device info");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockExec;
    use crate::devices::testdata::DEVICE_INFO_OUTPUT;

    #[tokio::test]
    async fn test_device_info_parse() {
        let fetcher = build_device_info_fetcher("ens7f0").unwrap();
        let ctx = MockExec::new().respond("ethtool -i ens7f0", DEVICE_INFO_OUTPUT);
        let info = get_device_info(&fetcher, &ctx).await.unwrap();

        assert_eq!(info.timestamp, "2023-06-16T11:49:47.0584Z");
        assert_eq!(info.device_id, "0x1593");
        assert_eq!(info.vendor_id, "0x8086");
        assert_eq!(info.gnss_dev, "/dev/gnss0");
        assert_eq!(info.firmware_version, "4.20 0x8001778b 1.3346.0");
        assert_eq!(info.driver_version, "1.11.20.7");
        assert!(info.time_offset_ns > 0);
    }

    #[test]
    fn test_device_info_commands() {
        let fetcher = build_device_info_fetcher("ens7f0").unwrap();
        let script = fetcher.group().script();
        assert!(script.contains("ls /sys/class/net/ens7f0/device/gnss/"));
        assert!(script.contains("cat /sys/class/net/ens7f0/device/device"));
        assert!(script.contains("cat /sys/class/net/ens7f0/device/vendor"));
        assert!(script.contains("date +%s.%N"));
    }

    #[tokio::test]
    async fn test_device_info_bad_ethtool_output() {
        let fetcher = build_device_info_fetcher("ens7f0").unwrap();
        let output = DEVICE_INFO_OUTPUT.replace("firmware-version", "fw");
        let ctx = MockExec::new().respond("ethtool", &output);
        let err = get_device_info(&fetcher, &ctx).await.unwrap_err();
        assert!(err.to_string().contains("failed to extract ethtoolOut"));
    }

    #[test]
    fn test_device_info_analyser_format() {
        let info = DeviceInfo {
            timestamp: "2023-06-16T11:49:47.0584Z".into(),
            vendor_id: "0x8086".into(),
            device_id: "0x1593".into(),
            gnss_dev: "/dev/gnss0".into(),
            firmware_version: "4.20".into(),
            driver_version: "1.11.20.7".into(),
            time_offset_ns: 0,
        };
        let records = info.analyser_format().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "devInfo");
        assert_eq!(records[0].data["fetched_timestamp"], "2023-06-16T11:49:47.0584Z");
        assert_eq!(records[0].data["devID"], "0x1593");
        assert_eq!(records[0].data["gnss"], "/dev/gnss0");
        assert!(records[0].data["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
