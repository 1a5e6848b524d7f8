//! Checks on the GNSS receiver and the tooling talking to it

use super::{env_model_id, env_version_id, ordering, sync_env_id, Validation, VersionCheck};
use crate::devices::{GnssAntennaDetails, GnssDetails, GnssNavStatus, GnssVersions};
use crate::error::{CollectorError, Result};
use serde_json::json;

const MIN_GNSS_FIRMWARE_VERSION: &str = "2.20";
const MIN_GNSS_PROTOCOL_VERSION: &str = "29.20";
const MIN_GPSD_VERSION: &str = "3.25";
const EXPECTED_MODULE: &str = "ZED-F9T";
const ANTENNA_CONNECTED: i64 = 2;

pub const GNSS_FIRMWARE_DESCRIPTION: &str = "GNSS Version is valid";
pub const GNSS_PROTOCOL_DESCRIPTION: &str = "GNSS protocol version is valid";
pub const GPSD_DESCRIPTION: &str = "GPSD Version is valid";

/// `FWVER=TIM 2.20` is compared on `2.20`
pub fn gnss_firmware_check(versions: &GnssVersions) -> VersionCheck {
    let second = versions
        .firmware_version
        .split(' ')
        .nth(1)
        .unwrap_or_default()
        .to_string();
    VersionCheck::new(
        gnss_firmware_id(),
        GNSS_FIRMWARE_DESCRIPTION,
        ordering::GNSS_VERSION,
        versions.firmware_version.clone(),
        MIN_GNSS_FIRMWARE_VERSION,
    )
    .with_check_version(second)
}

pub fn gnss_firmware_id() -> String {
    env_version_id("/gnss-firmware/")
}

pub fn gnss_protocol_check(versions: &GnssVersions) -> VersionCheck {
    VersionCheck::new(
        gnss_protocol_id(),
        GNSS_PROTOCOL_DESCRIPTION,
        ordering::GNSS_PROTOCOL,
        versions.protocol_version.clone(),
        MIN_GNSS_PROTOCOL_VERSION,
    )
}

pub fn gnss_protocol_id() -> String {
    env_version_id("/gnss-protocol/")
}

/// `3.25.1~dev (revision ...)` is compared on `3.25.1-dev`
pub fn gpsd_version_check(versions: &GnssVersions) -> VersionCheck {
    let first = versions
        .gpsd_version
        .split(' ')
        .next()
        .unwrap_or_default()
        .replace('~', "-");
    VersionCheck::new(
        gpsd_id(),
        GPSD_DESCRIPTION,
        ordering::GPSD_VERSION,
        versions.gpsd_version.clone(),
        MIN_GPSD_VERSION,
    )
    .with_check_version(first)
}

pub fn gpsd_id() -> String {
    env_version_id("/gpsd/")
}

/// The receiver must be a u-blox ZED-F9T
#[derive(Debug, Clone)]
pub struct GnssModule {
    pub module: String,
}

impl GnssModule {
    pub fn new(versions: &GnssVersions) -> Self {
        Self {
            module: versions.module.clone(),
        }
    }

    pub fn static_id() -> String {
        env_model_id("/gnss/")
    }
}

impl Validation for GnssModule {
    fn id(&self) -> String {
        Self::static_id()
    }

    fn description(&self) -> &str {
        "GNSS module is valid"
    }

    fn order(&self) -> u32 {
        ordering::GNSS_MODULE
    }

    fn data(&self) -> serde_json::Value {
        json!({ "module": self.module })
    }

    fn verify(&self) -> Result<()> {
        if self.module != EXPECTED_MODULE {
            return Err(CollectorError::InvalidEnv(format!(
                "reported gnss module is not {}",
                EXPECTED_MODULE
            )));
        }
        Ok(())
    }
}

/// At least one `/dev/gnss*` device must exist
#[derive(Debug, Clone)]
pub struct GnssDevices {
    pub paths: Vec<String>,
}

impl GnssDevices {
    pub fn new(versions: &GnssVersions) -> Self {
        Self {
            paths: versions.gnss_devices.clone(),
        }
    }

    pub fn static_id() -> String {
        sync_env_id("/gnss/device-detected/wpc/")
    }
}

impl Validation for GnssDevices {
    fn id(&self) -> String {
        Self::static_id()
    }

    fn description(&self) -> &str {
        "Has GNSS Devices"
    }

    fn order(&self) -> u32 {
        ordering::HAS_GNSS_DEVICES
    }

    fn data(&self) -> serde_json::Value {
        json!({ "paths": self.paths })
    }

    fn verify(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(CollectorError::InvalidEnv("no gnss devices found".to_string()));
        }
        Ok(())
    }
}

/// Some antenna block must report a connected antenna
#[derive(Debug, Clone)]
pub struct GnssAntennaStatus {
    pub blocks: Vec<GnssAntennaDetails>,
}

impl GnssAntennaStatus {
    pub fn new(details: &GnssDetails) -> Self {
        Self {
            blocks: details.antenna_details.clone(),
        }
    }

    pub fn static_id() -> String {
        sync_env_id("/gnss/antenna-connected/wpc/")
    }
}

impl Validation for GnssAntennaStatus {
    fn id(&self) -> String {
        Self::static_id()
    }

    fn description(&self) -> &str {
        "GNSS Module is connected to an antenna"
    }

    fn order(&self) -> u32 {
        ordering::GNSS_CONNECTED_TO_ANTENNA
    }

    fn data(&self) -> serde_json::Value {
        json!({ "blocks": self.blocks })
    }

    fn verify(&self) -> Result<()> {
        if self.blocks.iter().any(|b| b.status == ANTENNA_CONNECTED) {
            return Ok(());
        }
        Err(CollectorError::InvalidEnv("no GNSS antenna connected".to_string()))
    }
}

/// The receiver must have a fix
#[derive(Debug, Clone)]
pub struct GnssReceivingData {
    pub status: Option<GnssNavStatus>,
}

impl GnssReceivingData {
    pub fn new(details: &GnssDetails) -> Self {
        Self {
            status: details.nav_status.clone(),
        }
    }

    pub fn static_id() -> String {
        sync_env_id("/gnss/gpsfix-valid/wpc/")
    }
}

impl Validation for GnssReceivingData {
    fn id(&self) -> String {
        Self::static_id()
    }

    fn description(&self) -> &str {
        "GNSS Module receiving data"
    }

    fn order(&self) -> u32 {
        ordering::GNSS_RECEIVING_DATA
    }

    fn data(&self) -> serde_json::Value {
        json!({ "status": self.status })
    }

    fn verify(&self) -> Result<()> {
        match &self.status {
            None => Err(CollectorError::parse("no NAV-STATUS section was reported")),
            Some(status) if status.gps_fix <= 0 => Err(CollectorError::InvalidEnv(
                "GNSS module is not receiving data".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validations::Outcome;

    fn versions() -> GnssVersions {
        GnssVersions {
            firmware_version: "TIM 2.20".into(),
            protocol_version: "29.20".into(),
            module: "ZED-F9T".into(),
            gpsd_version: "3.25.1~dev (revision release-3.25-109-g1a04cfab8)".into(),
            gnss_devices: vec!["/dev/gnss0".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_versions_meet_minimums() {
        let v = versions();
        assert_eq!(gnss_firmware_check(&v).outcome(), Outcome::Success);
        assert_eq!(gnss_protocol_check(&v).outcome(), Outcome::Success);
        assert_eq!(gpsd_version_check(&v).outcome(), Outcome::Success);
        assert_eq!(GnssModule::new(&v).outcome(), Outcome::Success);
        assert_eq!(GnssDevices::new(&v).outcome(), Outcome::Success);
    }

    #[test]
    fn test_old_gpsd_fails() {
        let v = GnssVersions {
            gpsd_version: "3.24 (revision 3.24)".into(),
            ..versions()
        };
        assert_eq!(
            gpsd_version_check(&v).outcome(),
            Outcome::EnvironmentFailure("unexpected version: 3.24 < 3.25".into())
        );
    }

    #[test]
    fn test_wrong_module_and_no_devices() {
        let v = GnssVersions {
            module: "NEO-M8T".into(),
            gnss_devices: vec![],
            ..versions()
        };
        assert_eq!(
            GnssModule::new(&v).outcome(),
            Outcome::EnvironmentFailure("reported gnss module is not ZED-F9T".into())
        );
        assert_eq!(
            GnssDevices::new(&v).outcome(),
            Outcome::EnvironmentFailure("no gnss devices found".into())
        );
    }

    #[test]
    fn test_antenna_and_fix() {
        let mut details = GnssDetails {
            nav_status: Some(GnssNavStatus {
                gps_fix: 3,
                ..Default::default()
            }),
            antenna_details: vec![
                GnssAntennaDetails {
                    block_id: 0,
                    status: 4,
                    ..Default::default()
                },
                GnssAntennaDetails {
                    block_id: 1,
                    status: 2,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(GnssAntennaStatus::new(&details).outcome(), Outcome::Success);
        assert_eq!(GnssReceivingData::new(&details).outcome(), Outcome::Success);

        details.antenna_details.retain(|b| b.status != 2);
        details.nav_status = Some(GnssNavStatus::default());
        assert!(matches!(GnssAntennaStatus::new(&details).outcome(), Outcome::EnvironmentFailure(_)));
        assert_eq!(
            GnssReceivingData::new(&details).outcome(),
            Outcome::EnvironmentFailure("GNSS module is not receiving data".into())
        );
    }
}
