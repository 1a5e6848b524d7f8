//! Versions of the GNSS receiver firmware and the gpsd tooling

use super::TIMESTAMP_PATTERN;
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::ExecContext;
use crate::error::{CollectorError, Result};
use crate::fetcher::{fetcher_from, FetchedValues, Fetcher, Unmarshal, Value};
use crate::utils::{format_rfc3339_nano, parse_timestamp};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const MON_VER_KEY: &str = "UBXMonVer";
const UBX_VERSION_KEY: &str = "UBXVersion";
const GPSD_VERSION_KEY: &str = "GPSDVersion";
const GNSS_DEVICES_KEY: &str = "GNSSDevices";

static MON_VER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}\nUBX-MON-VER:\n\s+swVersion (.*)\n\s+hwVersion (.*)\n\s+((?:extension .*(?:\n\s+)?)+)",
        TIMESTAMP_PATTERN
    ))
    .unwrap()
});
static FW_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"extension FWVER=(.*)").unwrap());
static PROTO_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"extension PROTVER=(.*)").unwrap());
static MODULE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"extension MOD=(.*)").unwrap());
static UBX_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ubxtool: Version (.*)").unwrap());
static GPSD_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gpsd: (.* \(revision .*\))").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GnssVersions {
    pub timestamp: String,
    pub firmware_version: String,
    pub protocol_version: String,
    pub module: String,
    pub ubx_version: String,
    pub gpsd_version: String,
    pub gnss_devices: Vec<String>,
}

impl Unmarshal for GnssVersions {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign("timestamp", &mut self.timestamp)?;
        values.assign("firmwareVersion", &mut self.firmware_version)?;
        values.assign("protocolVersion", &mut self.protocol_version)?;
        values.assign("module", &mut self.module)?;
        values.assign(UBX_VERSION_KEY, &mut self.ubx_version)?;
        values.assign(GPSD_VERSION_KEY, &mut self.gpsd_version)?;
        values.assign(GNSS_DEVICES_KEY, &mut self.gnss_devices)?;
        Ok(())
    }
}

impl Reportable for GnssVersions {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        Ok(vec![AnalyserRecord::new("gnss/versions", self.payload()?)])
    }
}

fn first_capture(input: &str, regex: &Regex, name: &str) -> Result<String> {
    regex
        .captures(input)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| CollectorError::parse(format!("unable to parse version from {} in {}", name, input)))
}

fn process_mon_ver(output: &str, processed: &mut HashMap<String, Value>) -> Result<()> {
    let caps = MON_VER_REGEX
        .captures(output)
        .ok_or_else(|| CollectorError::parse(format!("unable to parse UBX MON Version from {}", output)))?;

    let timestamp = parse_timestamp(&caps[1])
        .map_err(|e| CollectorError::parse(format!("failed to parse versionTimestamp {}", e)))?;
    processed.insert("timestamp".into(), Value::Str(format_rfc3339_nano(&timestamp)));

    let extensions = &caps[4];
    for (key, regex) in [
        ("firmwareVersion", &*FW_VERSION_REGEX),
        ("protocolVersion", &*PROTO_VERSION_REGEX),
        ("module", &*MODULE_REGEX),
    ] {
        let value = first_capture(extensions, regex, "extension")?;
        processed.insert(key.into(), Value::Str(value.trim().to_string()));
    }
    Ok(())
}

fn post_process(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>> {
    let get = |key: &str| raw.get(key).map(String::as_str).unwrap_or_default();
    let mut processed = HashMap::new();

    process_mon_ver(get(MON_VER_KEY), &mut processed)?;

    let ubx = first_capture(get(UBX_VERSION_KEY), &UBX_VERSION_REGEX, "ubxtools version")?;
    processed.insert(UBX_VERSION_KEY.into(), Value::Str(ubx));

    let gpsd = first_capture(get(GPSD_VERSION_KEY), &GPSD_VERSION_REGEX, "gpsd version")?;
    processed.insert(GPSD_VERSION_KEY.into(), Value::Str(gpsd));

    let devices: Vec<String> = get(GNSS_DEVICES_KEY)
        .lines()
        .map(str::trim)
        .filter(|dev| !dev.is_empty())
        .map(|dev| format!("/dev/{}", dev))
        .collect();
    processed.insert(GNSS_DEVICES_KEY.into(), Value::List(devices));
    Ok(processed)
}

pub fn build_gnss_version_fetcher() -> Result<Fetcher> {
    let mut fetcher = fetcher_from(
        vec![],
        &[
            (MON_VER_KEY, "ubxtool -t -p MON-VER -P 29.20", true),
            (UBX_VERSION_KEY, "ubxtool -V", true),
            (GPSD_VERSION_KEY, "gpsd --version", true),
            // grep leaves an empty result rather than an error when nothing matches
            (GNSS_DEVICES_KEY, "ls -1 /dev | grep gnss", true),
        ],
    )?;
    fetcher.set_post_processor(Arc::new(post_process));
    Ok(fetcher)
}

pub async fn get_gnss_versions(ctx: &dyn ExecContext) -> Result<GnssVersions> {
    let fetcher = build_gnss_version_fetcher()?;
    fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch GNSS versions");
        e
    })
}
