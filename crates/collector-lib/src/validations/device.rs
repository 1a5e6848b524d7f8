//! Checks on the NIC backing the PTP interface

use super::{check_minimum_version, env_model_id, env_version_id, ordering, parse_version, Validation, VersionCheck};
use crate::devices::DeviceInfo;
use crate::error::{CollectorError, Result};
use serde_json::json;

const VENDOR_INTEL: &str = "0x8086";
const E810_WESTPORT_CHANNEL: &str = "0x1593";
const E810_LOGAN_BEACH: &str = "0x1592";

const MIN_DRIVER_VERSION: &str = "1.11.0";
const MIN_FIRMWARE_VERSION: &str = "4.20";

/// Dots in an out-of-tree `ice` driver version such as `1.11.20.7`
const OUT_OF_TREE_DRIVER_DOTS: usize = 3;

/// The card must be an Intel E810
#[derive(Debug, Clone)]
pub struct DeviceDetails {
    pub vendor_id: String,
    pub device_id: String,
}

impl DeviceDetails {
    pub fn new(info: &DeviceInfo) -> Self {
        Self {
            vendor_id: info.vendor_id.clone(),
            device_id: info.device_id.clone(),
        }
    }
}

impl Validation for DeviceDetails {
    fn id(&self) -> String {
        env_model_id("/nic/")
    }

    fn description(&self) -> &str {
        "Card is valid NIC"
    }

    fn order(&self) -> u32 {
        ordering::DEVICE_DETAILS
    }

    fn data(&self) -> serde_json::Value {
        json!({ "vendorId": self.vendor_id, "deviceId": self.device_id })
    }

    fn verify(&self) -> Result<()> {
        let is_e810 = self.device_id == E810_WESTPORT_CHANNEL || self.device_id == E810_LOGAN_BEACH;
        if self.vendor_id != VENDOR_INTEL || !is_e810 {
            return Err(CollectorError::InvalidEnv(
                "NIC device is not based on E810".to_string(),
            ));
        }
        Ok(())
    }
}

/// The `ice` driver must be recent enough
#[derive(Debug, Clone)]
pub struct DeviceDriver {
    check: VersionCheck,
}

impl DeviceDriver {
    pub fn new(info: &DeviceInfo) -> Self {
        let reported = info.driver_version.clone();
        let check_version = reported.trim_end_matches('.').to_string();
        let mut check = VersionCheck::new(
            env_version_id("/ice-driver/"),
            "Card driver is valid",
            ordering::DEVICE_DRIVER_VERSION,
            reported.clone(),
            MIN_DRIVER_VERSION,
        )
        .with_check_version(check_version.clone());

        if parse_version(&check_version).is_none()
            && reported.matches('.').count() == OUT_OF_TREE_DRIVER_DOTS
        {
            check = check.with_fetch_error(format!(
                "unable to parse device driver version ({}), likely an out of tree driver",
                reported
            ));
        }
        Self { check }
    }
}

impl Validation for DeviceDriver {
    fn id(&self) -> String {
        self.check.id()
    }

    fn description(&self) -> &str {
        self.check.description()
    }

    fn order(&self) -> u32 {
        self.check.order()
    }

    fn data(&self) -> serde_json::Value {
        self.check.data()
    }

    fn verify(&self) -> Result<()> {
        self.check.verify()
    }
}

/// The NIC firmware must be recent enough; only the first token is compared
#[derive(Debug, Clone)]
pub struct DeviceFirmware {
    check: VersionCheck,
}

impl DeviceFirmware {
    pub fn new(info: &DeviceInfo) -> Self {
        let first = info.firmware_version.split(' ').next().unwrap_or_default().to_string();
        Self {
            check: VersionCheck::new(
                env_version_id("/nic-firmware/"),
                "Card firmware is valid",
                ordering::DEVICE_FIRMWARE,
                info.firmware_version.clone(),
                MIN_FIRMWARE_VERSION,
            )
            .with_check_version(first),
        }
    }
}

impl Validation for DeviceFirmware {
    fn id(&self) -> String {
        self.check.id()
    }

    fn description(&self) -> &str {
        self.check.description()
    }

    fn order(&self) -> u32 {
        self.check.order()
    }

    fn data(&self) -> serde_json::Value {
        self.check.data()
    }

    fn verify(&self) -> Result<()> {
        check_minimum_version(&self.check.check_version, MIN_FIRMWARE_VERSION).map_err(|e| match e {
            CollectorError::InvalidEnv(_) => CollectorError::InvalidEnv(format!(
                "invalid firmware version: {} < {}",
                self.check.check_version, MIN_FIRMWARE_VERSION
            )),
            other => other,
        })
    }
}
