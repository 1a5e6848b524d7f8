//! Find the PTP interfaces a node is configured with
//!
//! The daemon renders one config per profile under `/var/run/`. Grand
//! masters are described by `ts2phc.<n>.config`, boundary clocks by
//! `ptp4l.<n>.config`; each non-global section names an interface.

use crate::clients::ExecContext;
use crate::error::{composite_message, CollectorError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const RUN_DIR: &str = "/var/run/";
const SKIPPED_SECTIONS: [&str; 2] = ["global", "nmea"];
const PTP_CLOCK_PREFIX: &str = "PTP Hardware Clock:";

static TS2PHC_NOT_MASTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ts2phc.master\s+0").unwrap());
static PTP4L_MASTER_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(masterOnly|serverOnly)\s+1").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClockType {
    /// Grand master, described by ts2phc configs
    #[default]
    Gm,
    /// Boundary clock, described by ptp4l configs
    Bc,
}

impl FromStr for ClockType {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GM" => Ok(ClockType::Gm),
            "BC" => Ok(ClockType::Bc),
            other => Err(CollectorError::MissingInput(format!(
                "unknown clock type {}, expected GM or BC",
                other
            ))),
        }
    }
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockType::Gm => f.write_str("GM"),
            ClockType::Bc => f.write_str("BC"),
        }
    }
}

/// Which daemon config family is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigKind {
    Ts2phc,
    Ptp4l,
}

impl ConfigKind {
    fn prefix(self) -> &'static str {
        match self {
            ConfigKind::Ts2phc => "ts2phc.",
            ConfigKind::Ptp4l => "ptp4l.",
        }
    }

    fn clears_primary(self, line: &str) -> bool {
        match self {
            ConfigKind::Ts2phc => TS2PHC_NOT_MASTER.is_match(line),
            ConfigKind::Ptp4l => PTP4L_MASTER_ONLY.is_match(line),
        }
    }

    /// Search order for a clock type; the second kind is the fallback
    fn order(clock_type: ClockType) -> [ConfigKind; 2] {
        match clock_type {
            ClockType::Gm => [ConfigKind::Ts2phc, ConfigKind::Ptp4l],
            ClockType::Bc => [ConfigKind::Ptp4l, ConfigKind::Ts2phc],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedInterface {
    pub name: String,
    #[serde(rename = "ptp_dev")]
    pub ptp_clock_device_path: String,
    pub primary: bool,
}

/// INI-style sections in file order, comments and blank lines dropped.
/// Lines before the first section are ignored.
pub fn parse_config(contents: &str) -> Vec<(String, Vec<String>)> {
    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            current = Some(match sections.iter().position(|(n, _)| n == name) {
                Some(index) => index,
                None => {
                    sections.push((name.to_string(), Vec::new()));
                    sections.len() - 1
                }
            });
            continue;
        }
        if let Some(index) = current {
            sections[index].1.push(line.to_string());
        }
    }
    sections
}

/// `/dev/ptpN` from `ethtool -T` output
pub fn parse_ptp_clock_device(ethtool_output: &str) -> Result<String> {
    ethtool_output
        .lines()
        .find_map(|line| {
            let (_, number) = line.split_once(PTP_CLOCK_PREFIX)?;
            let number = number.trim();
            (!number.is_empty()).then(|| format!("/dev/ptp{}", number))
        })
        .ok_or_else(|| CollectorError::parse("no PTP clock device found"))
}

/// Primary interfaces first, then by name, keeping the first interface
/// seen for each PTP device
pub fn sort_and_deduplicate(mut interfaces: Vec<DetectedInterface>) -> Vec<DetectedInterface> {
    interfaces.sort_by(|a, b| b.primary.cmp(&a.primary).then_with(|| a.name.cmp(&b.name)));
    let mut seen = HashSet::new();
    interfaces
        .into_iter()
        .filter(|iface| {
            let first = seen.insert(iface.ptp_clock_device_path.clone());
            if !first {
                info!(
                    interface = %iface.name,
                    device = %iface.ptp_clock_device_path,
                    "Deduplicating interface, PTP device already seen"
                );
            }
            first
        })
        .collect()
}

async fn ptp_clock_device(ctx: &dyn ExecContext, interface: &str) -> Result<String> {
    let output = ctx.exec(&["ethtool", "-T", interface], None).await?;
    parse_ptp_clock_device(&output.stdout)
}

async fn config_files(ctx: &dyn ExecContext, kind: ConfigKind) -> Result<Vec<String>> {
    let listing = ctx.exec(&["ls", RUN_DIR], None).await?;
    let files: Vec<String> = listing
        .stdout
        .split_whitespace()
        .filter(|f| f.starts_with(kind.prefix()) && f.ends_with(".config"))
        .map(str::to_string)
        .collect();
    match files.len() {
        0 => Err(CollectorError::RequirementsNotMet(format!(
            "failed to find {}config file",
            kind.prefix()
        ))),
        1 => Ok(files),
        _ => {
            warn!(files = ?files, "Multiple profiles found");
            Ok(files)
        }
    }
}

async fn interfaces_from_config(
    ctx: &dyn ExecContext,
    kind: ConfigKind,
    contents: &str,
) -> Vec<DetectedInterface> {
    let mut detected = Vec::new();
    for (section, lines) in parse_config(contents) {
        if SKIPPED_SECTIONS.contains(&section.as_str()) {
            continue;
        }
        let primary = !lines.iter().any(|line| kind.clears_primary(line));
        match ptp_clock_device(ctx, &section).await {
            Ok(device) => detected.push(DetectedInterface {
                name: section,
                ptp_clock_device_path: device,
                primary,
            }),
            Err(e) => warn!(interface = %section, error = %e, "Failed to get PTP clock device"),
        }
    }
    detected
}

async fn detect_with(ctx: &dyn ExecContext, kind: ConfigKind) -> Result<Vec<DetectedInterface>> {
    let mut detected = Vec::new();
    let mut errors = Vec::new();
    for file in config_files(ctx, kind).await? {
        let path = format!("{}{}", RUN_DIR, file);
        match ctx.exec(&["cat", &path], None).await {
            Ok(output) => detected.extend(interfaces_from_config(ctx, kind, &output.stdout).await),
            Err(e) => errors.push(format!("failed to read {}: {}", path, e)),
        }
    }
    if !errors.is_empty() {
        return Err(CollectorError::Remote(composite_message(
            "Failed to read PTP configs",
            &errors,
        )));
    }
    debug!(kind = ?kind, count = detected.len(), "Detected interfaces");
    Ok(sort_and_deduplicate(detected))
}

/// Interfaces configured in the PTP daemon, falling back to the other
/// config family when the preferred one is absent
pub async fn detect_interfaces(
    ctx: &dyn ExecContext,
    clock_type: ClockType,
) -> Result<Vec<DetectedInterface>> {
    let [preferred, fallback] = ConfigKind::order(clock_type);
    match detect_with(ctx, preferred).await {
        Ok(found) => Ok(found),
        Err(e) => {
            info!(clock_type = %clock_type, error = %e, "Falling back to {}config", fallback.prefix());
            detect_with(ctx, fallback).await
        }
    }
}
