//! Environment checks
//!
//! Each [`Validation`] carries the data it measured and decides whether the
//! environment is acceptable. A failure is reported as `InvalidEnv`; any
//! other error means the data could not be gathered and the outcome is
//! unknown rather than a failure.

mod cluster;
mod device;
mod gnss;

pub use cluster::{
    cluster_version_check, cluster_version_from, cluster_version_id, grand_master_from,
    operator_version_check, operator_version_from, operator_version_id, GrandMasterProfiles,
    PtpConfigProfile,
};
pub use device::{DeviceDetails, DeviceDriver, DeviceFirmware};
pub use gnss::{
    gnss_firmware_check, gnss_firmware_id, gnss_protocol_check, gnss_protocol_id,
    gpsd_version_check, gpsd_id, GnssAntennaStatus, GnssDevices, GnssModule, GnssReceivingData,
    GNSS_FIRMWARE_DESCRIPTION, GNSS_PROTOCOL_DESCRIPTION, GPSD_DESCRIPTION,
};

use crate::error::{CollectorError, Result};
use serde_json::json;

pub const TEST_ID_BASE: &str = "https://github.com/redhat-partner-solutions/vse-sync-test/tree/main/tests";

pub(crate) fn env_model_id(suffix: &str) -> String {
    format!("{}/environment/model{}", TEST_ID_BASE, suffix)
}

pub(crate) fn env_version_id(suffix: &str) -> String {
    format!("{}/environment/version{}", TEST_ID_BASE, suffix)
}

pub(crate) fn sync_env_id(suffix: &str) -> String {
    format!("{}/sync/G.8272/environment/status{}", TEST_ID_BASE, suffix)
}

/// Position of every check in the report
pub mod ordering {
    pub const CLUSTER_VERSION: u32 = 1;
    pub const PTP_OPERATOR_VERSION: u32 = 2;
    pub const GPSD_VERSION: u32 = 3;
    pub const DEVICE_DETAILS: u32 = 4;
    pub const DEVICE_DRIVER_VERSION: u32 = 5;
    pub const DEVICE_FIRMWARE: u32 = 6;
    pub const GNSS_MODULE: u32 = 7;
    pub const GNSS_VERSION: u32 = 8;
    pub const GNSS_PROTOCOL: u32 = 9;
    pub const HAS_GNSS_DEVICES: u32 = 10;
    pub const GNSS_CONNECTED_TO_ANTENNA: u32 = 11;
    pub const GNSS_RECEIVING_DATA: u32 = 12;
    pub const CONFIGURED_FOR_GRAND_MASTER: u32 = 13;
}

/// What a check concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The environment was measured and is wrong
    EnvironmentFailure(String),
    /// The data needed for the check could not be gathered
    Unknown(String),
}

/// One environment check
pub trait Validation: Send + Sync {
    fn id(&self) -> String;

    fn description(&self) -> &str;

    fn order(&self) -> u32;

    /// What was measured, reported alongside the outcome
    fn data(&self) -> serde_json::Value;

    /// `InvalidEnv` when the environment is wrong, any other error when unknown
    fn verify(&self) -> Result<()>;

    fn outcome(&self) -> Outcome {
        match self.verify() {
            Ok(()) => Outcome::Success,
            Err(CollectorError::InvalidEnv(message)) => Outcome::EnvironmentFailure(message),
            Err(e) => Outcome::Unknown(e.to_string()),
        }
    }
}

/// Stand-in for a check whose input could not be gathered
#[derive(Debug, Clone)]
pub struct Unavailable {
    pub id: String,
    pub description: String,
    pub order: u32,
    pub error: String,
}

impl Unavailable {
    pub fn new(id: String, description: impl Into<String>, order: u32, error: impl std::fmt::Display) -> Self {
        Self {
            id,
            description: description.into(),
            order,
            error: error.to_string(),
        }
    }

    /// Same id, description and order as `check`, failing with `error`
    pub fn replacing(check: &dyn Validation, error: impl std::fmt::Display) -> Self {
        Self::new(check.id(), check.description(), check.order(), error)
    }
}

impl Validation for Unavailable {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn data(&self) -> serde_json::Value {
        json!({ "fetchError": self.error })
    }

    fn verify(&self) -> Result<()> {
        Err(CollectorError::parse(&self.error))
    }
}

/// Parse a loosely formatted version the way the check thresholds are written.
///
/// Accepts an optional leading `v`, `_` in place of `-`, and missing minor
/// or patch components (`2.20` is `2.20.0`).
pub fn parse_version(raw: &str) -> Option<semver::Version> {
    let cleaned = raw.trim().trim_start_matches('v').replace('_', "-");
    let split_at = cleaned.find(|c: char| c == '-' || c == '+').unwrap_or(cleaned.len());
    let (core, suffix) = cleaned.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let numeric = |p: &&str| {
        !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) && !(p.len() > 1 && p.starts_with('0'))
    };
    if !parts.iter().all(numeric) {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    semver::Version::parse(&format!("{}{}", padded, suffix)).ok()
}

/// Compare `version` against `minimum`
pub fn check_minimum_version(version: &str, minimum: &str) -> Result<()> {
    let parsed = parse_version(version)
        .ok_or_else(|| CollectorError::parse(format!("could not parse version v{}", version)))?;
    let min = parse_version(minimum)
        .ok_or_else(|| CollectorError::parse(format!("could not parse version v{}", minimum)))?;
    if parsed < min {
        return Err(CollectorError::InvalidEnv(format!(
            "unexpected version: {} < {}",
            version, minimum
        )));
    }
    Ok(())
}

/// A version that must meet a minimum
#[derive(Debug, Clone)]
pub struct VersionCheck {
    pub id: String,
    pub description: &'static str,
    pub order: u32,
    /// The version as reported
    pub version: String,
    /// The part of the reported version that is compared
    pub check_version: String,
    pub min_version: &'static str,
    /// Set when the version could not be fetched or is not comparable
    pub fetch_error: Option<String>,
}

impl VersionCheck {
    pub fn new(
        id: String,
        description: &'static str,
        order: u32,
        version: impl Into<String>,
        min_version: &'static str,
    ) -> Self {
        let version = version.into();
        Self {
            id,
            description,
            order,
            check_version: version.clone(),
            version,
            min_version,
            fetch_error: None,
        }
    }

    pub fn with_check_version(mut self, check_version: impl Into<String>) -> Self {
        self.check_version = check_version.into();
        self
    }

    pub fn with_fetch_error(mut self, error: impl std::fmt::Display) -> Self {
        self.fetch_error = Some(error.to_string());
        self
    }
}

impl Validation for VersionCheck {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn description(&self) -> &str {
        self.description
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn data(&self) -> serde_json::Value {
        match &self.fetch_error {
            Some(error) => json!({ "fetchError": error, "version": self.version }),
            None => json!({ "version": self.version, "expected": self.min_version }),
        }
    }

    fn verify(&self) -> Result<()> {
        if let Some(error) = &self.fetch_error {
            return Err(CollectorError::parse(error));
        }
        check_minimum_version(&self.check_version, self.min_version)
    }
}
