//! DPLL state and phase offsets read over the kernel's DPLL netlink family
//!
//! Newer `ice` drivers only expose the DPLL through netlink. The queries go
//! through the kernel's `ynl` CLI inside a privileged debug pod and identify
//! the NIC by the clock ID derived from its PCI serial number.

use super::{date_command, DATE_KEY};
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::ExecContext;
use crate::error::{CollectorError, Result};
use crate::fetcher::{fetcher_from, FetchedValues, Fetcher, Unmarshal, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const YNL_CLI: &str = "/linux/tools/net/ynl/cli.py --spec /linux/Documentation/netlink/specs/dpll.yaml";
const JSON_ENCODER: &str = "python3 /root/custom_scripts/json_encoder.py";

pub const ONE_PPS_LABEL: &str = "GNSS-1PPS";
pub const SMA1_LABEL: &str = "SMA1";

const INPUT_DIRECTION: &str = "input";
const CONNECTED_STATE: &str = "connected";
const UNKNOWN_STATE: i64 = -1;
const PHASE_OFFSET_DIVIDER: i64 = 1000;

const CLOCK_SERIAL_KEY: &str = "dpll-netlink-clock-serial-number";
const PINS_KEY: &str = "dpll-netlink-pins";
const DEVICE_KEY: &str = "dpll-netlink-device";
const OFFSET_KEY: &str = "dpll-netlink-offset";

/// Integer code for a netlink `lock-status`
pub fn lock_status_code(status: &str) -> Option<i64> {
    match status {
        "unknown" => Some(-1),
        "invalid" => Some(0),
        "freerun" => Some(1),
        "locked" => Some(2),
        "locked-ho-acq" => Some(3),
        "holdover" => Some(4),
        _ => None,
    }
}

/// Scale a netlink phase offset for the analysers, keeping three decimals.
///
/// The first division truncates toward zero rather than rounding.
pub fn convert_phase_offset(offset: i64) -> f64 {
    (offset / PHASE_OFFSET_DIVIDER) as f64 / 1000.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetlinkDeviceEntry {
    #[serde(default)]
    pub lock_status: String,
    #[serde(default)]
    pub module_name: String,
    #[serde(rename = "type", default)]
    pub clock_type: String,
    pub clock_id: u64,
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetlinkParentDevice {
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub state: String,
    pub parent_id: i64,
    #[serde(default)]
    pub phase_offset: i64,
    #[serde(default)]
    pub prio: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetlinkPin {
    #[serde(rename = "board-label", default)]
    pub label: String,
    #[serde(default)]
    pub clock_id: u64,
    pub id: i64,
    #[serde(rename = "parent-device", default)]
    pub parent_devices: Vec<NetlinkParentDevice>,
}

/// Pick the pin whose phase offsets describe the GNSS input: the 1PPS pin
/// when it is connected to every parent, otherwise SMA1 when it is an
/// input connected to every parent.
pub fn select_pin(pins: &[NetlinkPin], clock_id: u64) -> Option<&NetlinkPin> {
    let mut one_pps = None;
    let mut sma1 = None;
    for pin in pins.iter().filter(|p| p.clock_id == clock_id) {
        match pin.label.as_str() {
            ONE_PPS_LABEL => one_pps = Some(pin),
            SMA1_LABEL => sma1 = Some(pin),
            _ => {}
        }
    }

    if let Some(pin) = one_pps {
        if pin.parent_devices.iter().all(|p| p.state == CONNECTED_STATE) {
            return Some(pin);
        }
    }
    if let Some(pin) = sma1 {
        if pin
            .parent_devices
            .iter()
            .all(|p| p.direction == INPUT_DIRECTION && p.state == CONNECTED_STATE)
        {
            return Some(pin);
        }
    }
    None
}

/// Identity of the NIC's DPLL, gathered once when the collector starts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetlinkParameters {
    pub timestamp: String,
    #[serde(rename = "clockId")]
    pub clock_id: u64,
    #[serde(rename = "offsetPin")]
    pub offset_pin: Option<i64>,
    #[serde(rename = "pinType")]
    pub pin_label: String,
}

impl Unmarshal for NetlinkParameters {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign(DATE_KEY, &mut self.timestamp)?;
        values.assign("clockID", &mut self.clock_id)?;
        values.assign("pinType", &mut self.pin_label)?;
        if values.get("offsetPin").is_some() {
            let mut pin = 0i64;
            values.assign("offsetPin", &mut pin)?;
            self.offset_pin = Some(pin);
        }
        Ok(())
    }
}

fn post_process_parameters(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>> {
    let serial = raw.get(CLOCK_SERIAL_KEY).map(String::as_str).unwrap_or_default();
    let clock_id = u64::from_str_radix(serial.trim(), 16).map_err(|e| {
        CollectorError::parse(format!("failed to parse clock id from {:?}: {}", serial, e))
    })?;

    let mut processed = HashMap::from([("clockID".to_string(), Value::UInt(clock_id))]);

    let pins_json = raw.get(PINS_KEY).map(String::as_str).unwrap_or_default();
    let pins: Vec<NetlinkPin> = serde_json::from_str(pins_json)
        .map_err(|e| CollectorError::parse(format!("failed to unmarshal netlink pins: {}", e)))?;
    match select_pin(&pins, clock_id) {
        Some(pin) => {
            processed.insert("offsetPin".to_string(), Value::Int(pin.id));
            processed.insert("pinType".to_string(), Value::Str(pin.label.clone()));
        }
        None => warn!(clock_id, "Failed to determine the phase offset pin"),
    }
    Ok(processed)
}

/// Read the clock ID and choose the offset pin for `interface`
pub async fn get_netlink_parameters(
    ctx: &dyn ExecContext,
    interface: &str,
) -> Result<NetlinkParameters> {
    let serial_command = format!(
        "export IFNAME={}; export BUSID=$(readlink /sys/class/net/$IFNAME/device | xargs basename | cut -d ':' -f 2,3); \
echo $(lspci -v | grep $BUSID -A 20 |grep 'Serial Number' | awk '{{print $NF}}' | tr -d '-')",
        interface
    );
    let pins_command = format!("{} --dump pin-get | {}", YNL_CLI, JSON_ENCODER);
    let mut fetcher = fetcher_from(
        vec![date_command()?],
        &[
            (CLOCK_SERIAL_KEY, serial_command.as_str(), true),
            (PINS_KEY, pins_command.as_str(), true),
        ],
    )?;
    fetcher.set_post_processor(Arc::new(post_process_parameters));
    fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch netlink parameters");
        e
    })
}

/// One netlink sample of the DPLL
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetlinkDpllInfo {
    pub timestamp: String,
    #[serde(skip)]
    pub pin_label: String,
    #[serde(rename = "eecstate")]
    pub eec_state: i64,
    #[serde(rename = "state")]
    pub pps_state: i64,
    #[serde(rename = "terror", skip_serializing_if = "Option::is_none")]
    pub pps_offset: Option<i64>,
    #[serde(rename = "eecterror", skip_serializing_if = "Option::is_none")]
    pub eec_offset: Option<i64>,
}

impl Unmarshal for NetlinkDpllInfo {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign(DATE_KEY, &mut self.timestamp)?;
        values.assign("eec", &mut self.eec_state)?;
        values.assign("pps", &mut self.pps_state)?;
        for (key, field) in [
            ("pps_offset", &mut self.pps_offset),
            ("eec_offset", &mut self.eec_offset),
        ] {
            if values.get(key).is_some() {
                let mut offset = 0i64;
                values.assign(key, &mut offset)?;
                *field = Some(offset);
            }
        }
        Ok(())
    }
}

impl NetlinkDpllInfo {
    /// Analyser subtype for the pin the offsets were read from
    pub fn subtype(&self) -> &'static str {
        match self.pin_label.as_str() {
            ONE_PPS_LABEL => "dpll",
            SMA1_LABEL => "dpll-sma1",
            _ => "unknown",
        }
    }
}

impl Reportable for NetlinkDpllInfo {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        let mut records = vec![AnalyserRecord::new(
            "dpll/states",
            json!({
                "timestamp": self.timestamp,
                "eecstate": self.eec_state,
                "state": self.pps_state,
            }),
        )];
        if !self.pin_label.is_empty() {
            records.push(AnalyserRecord::new(
                format!("{}/time-error", self.subtype()),
                json!({
                    "timestamp": self.timestamp,
                    "eecstate": self.eec_state,
                    "state": self.pps_state,
                    "terror": convert_phase_offset(self.pps_offset.unwrap_or_default()),
                    "eecterror": convert_phase_offset(self.eec_offset.unwrap_or_default()),
                }),
            ));
        }
        Ok(records)
    }
}

fn build_device_post_processor(clock_id: u64) -> impl Fn(&HashMap<String, String>) -> Result<HashMap<String, Value>> {
    move |raw: &HashMap<String, String>| {
        let mut processed = HashMap::new();

        let devices_json = raw.get(DEVICE_KEY).map(String::as_str).unwrap_or_default();
        let entries: Vec<NetlinkDeviceEntry> = serde_json::from_str(devices_json).map_err(|e| {
            CollectorError::parse(format!("failed to unmarshal netlink device output: {}", e))
        })?;
        for entry in entries.iter().filter(|e| e.clock_id == clock_id) {
            let state = lock_status_code(&entry.lock_status).unwrap_or_else(|| {
                warn!(status = %entry.lock_status, "Unknown DPLL lock status");
                UNKNOWN_STATE
            });
            processed.insert(entry.clock_type.clone(), Value::Int(state));
        }

        if let Some(pin_json) = raw.get(OFFSET_KEY) {
            match serde_json::from_str::<NetlinkPin>(pin_json) {
                Ok(pin) => {
                    for parent in &pin.parent_devices {
                        let key = if parent.parent_id % 2 == 0 {
                            "eec_offset"
                        } else {
                            "pps_offset"
                        };
                        processed.insert(key.to_string(), Value::Int(parent.phase_offset));
                    }
                }
                Err(e) => warn!(error = %e, "Failed to unmarshal netlink pin output"),
            }
        }
        Ok(processed)
    }
}

/// Fetcher sampling the DPLL states and, when a pin was chosen, its offsets
pub fn build_netlink_device_fetcher(params: &NetlinkParameters) -> Result<Fetcher> {
    let device_command = format!("{} --dump device-get | {}", YNL_CLI, JSON_ENCODER);
    let mut commands: Vec<(&str, String)> = vec![(DEVICE_KEY, device_command)];
    if let Some(pin) = params.offset_pin {
        commands.push((
            OFFSET_KEY,
            format!("{} --do pin-get --json '{{\"id\": {}}}' | {}", YNL_CLI, pin, JSON_ENCODER),
        ));
    }
    let args: Vec<(&str, &str, bool)> = commands
        .iter()
        .map(|(key, shell)| (*key, shell.as_str(), true))
        .collect();

    let mut fetcher = fetcher_from(vec![date_command()?], &args)?;
    fetcher.set_post_processor(Arc::new(build_device_post_processor(params.clock_id)));
    Ok(fetcher)
}

pub async fn get_netlink_dpll_info(
    fetcher: &Fetcher,
    ctx: &dyn ExecContext,
    params: &NetlinkParameters,
) -> Result<NetlinkDpllInfo> {
    let mut info: NetlinkDpllInfo = fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch DPLL info via netlink");
        e
    })?;
    info.pin_label = params.pin_label.clone();
    Ok(info)
}
