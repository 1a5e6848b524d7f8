//! Probes for the NIC, its DPLL, the GNSS receiver and the PTP stack
//!
//! Each submodule owns one record type together with the fetcher that
//! produces it and the parsing of the tool output behind it.

pub mod device_info;
pub mod dpll_fs;
pub mod dpll_netlink;
pub mod gnss;
pub mod gnss_version;
pub mod pmc;

#[cfg(test)]
pub(crate) mod testdata;

pub use device_info::{build_device_info_fetcher, get_device_info, DeviceInfo};
pub use dpll_fs::{build_dpll_fs_fetcher, get_dpll_fs_info, is_dpll_fs_present, DpllFsInfo};
pub use dpll_netlink::{
    build_netlink_device_fetcher, get_netlink_dpll_info, get_netlink_parameters, NetlinkDpllInfo,
    NetlinkParameters,
};
pub use gnss::{get_gnss_details, GnssAntennaDetails, GnssDetails, GnssNavClock, GnssNavStatus};
pub use gnss_version::{get_gnss_versions, GnssVersions};
pub use pmc::{get_pmc_info, PmcInfo};

use crate::clients::Command;
use crate::error::Result;
use crate::utils::format_timestamp_as_rfc3339_nano;

/// Leading `<seconds>.<fraction>` printed by `ubxtool -t`
pub(crate) const TIMESTAMP_PATTERN: &str = r"(\d+.\d+)";

/// Key used by every `date` probe
pub const DATE_KEY: &str = "date";

/// `date +%s.%N`, reformatted as RFC 3339
pub fn date_command() -> Result<Command> {
    Ok(Command::new(DATE_KEY, "date +%s.%N")?.with_processor(format_timestamp_as_rfc3339_nano))
}

fn sysfs_device_path(interface: &str, file: &str) -> String {
    format!("/sys/class/net/{}/device/{}", interface, file)
}
