//! `detect`: list the PTP interfaces configured on the node

use anyhow::{Context, Result};
use collector_lib::collectors::contexts::ptp_daemon_context;
use collector_lib::detect::{detect_interfaces, ClockType, DetectedInterface};
use collector_lib::error::ExitCode;
use serde::Serialize;
use tabled::Tabled;

use super::connect;
use crate::config::CollectorSettings;
use crate::output::{color_bool, print_table};
use crate::ClockTypeArg;

#[derive(Tabled, Serialize)]
struct InterfaceRow {
    #[tabled(rename = "Interface")]
    name: String,
    #[tabled(rename = "PTP Device")]
    ptp_dev: String,
    #[tabled(rename = "Primary")]
    primary: String,
}

impl From<&DetectedInterface> for InterfaceRow {
    fn from(iface: &DetectedInterface) -> Self {
        Self {
            name: iface.name.clone(),
            ptp_dev: iface.ptp_clock_device_path.clone(),
            primary: color_bool(iface.primary),
        }
    }
}

impl From<ClockTypeArg> for ClockType {
    fn from(arg: ClockTypeArg) -> Self {
        match arg {
            ClockTypeArg::Gm => ClockType::Gm,
            ClockTypeArg::Bc => ClockType::Bc,
        }
    }
}

pub async fn run(settings: &CollectorSettings, clock_type: ClockTypeArg, json: bool) -> Result<ExitCode> {
    let clientset = connect(settings).await?;
    let ctx = ptp_daemon_context(clientset, settings.node_name()).await?;
    let interfaces = detect_interfaces(&ctx, clock_type.into())
        .await
        .context("Failed to detect PTP interfaces")?;

    if json {
        // the detected structs serialise with the field names scripts expect
        println!("{}", serde_json::to_string_pretty(&interfaces)?);
    } else {
        let rows: Vec<InterfaceRow> = interfaces.iter().map(InterfaceRow::from).collect();
        print_table(&rows, false)?;
    }
    Ok(ExitCode::Success)
}
