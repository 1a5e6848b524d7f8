//! GNSS receiver status read through `ubxtool`
//!
//! One exec returns three independently parsed sections:
//!
//! ```text
//! 1686916187.0584
//! UBX-NAV-STATUS:
//!   iTOW 474605000 gpsFix 3 flags 0xdd fixStat 0x0 flags2 0x8
//!   ttff 25030, msss 4294967295
//!
//! 1686916187.0586
//! UBX-NAV-CLOCK:
//!   iTOW 474605000 clkB -61594 clkD -56 tAcc 5 fAcc 164
//!
//! 1686916187.0590
//! UBX-MON-RF:
//!  version 0 nBlocks 2 reserved1 0 0
//!    blockId 0 flags x0 antStatus 2 antPower 1 postStatus 0 reserved2 0 0 0 0
//!     noisePerMS 90 agcCnt 4914 jamInd 14 ofsI 15 magI 147 ofsQ 25 magQ 148
//!     reserved3 0 0 0
//! ```
//!
//! A section that fails to parse does not discard the others; the caller
//! gets whatever was recovered together with the accumulated errors.

use super::TIMESTAMP_PATTERN;
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::ExecContext;
use crate::error::{composite_message, CollectorError, Result};
use crate::fetcher::{fetcher_from, Fetcher};
use crate::utils::{format_rfc3339_nano, parse_timestamp};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::sync::LazyLock;
use tracing::debug;

const GNSS_KEY: &str = "GNSS";
const UBX_COMMAND: &str = "ubxtool -t -p NAV-STATUS -p NAV-CLOCK -p MON-RF -P 29.20";

static NAV_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}\nUBX-NAV-STATUS:\n\s+iTOW (\d+) gpsFix (\d) flags (.*) fixStat (.*) flags2\s(.*)\n\s+ttff\s(\d+), msss (\d+)\n\n",
        TIMESTAMP_PATTERN
    ))
    .unwrap()
});

static NAV_CLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}\nUBX-NAV-CLOCK:\n\s+iTOW (\d+) clkB (-?\d+) clkD (-?\d+) tAcc (\d+) fAcc (\d+)",
        TIMESTAMP_PATTERN
    ))
    .unwrap()
});

static MON_RF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}\nUBX-MON-RF:\n\s+version \d nBlocks (\d) reserved1 \d \d\n(?s:([^UBX]*))",
        TIMESTAMP_PATTERN
    ))
    .unwrap()
});

static ANTENNA_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\s+blockId (\d) flags \w+ antStatus (\d) antPower (\d+) postStatus \d reserved2 \d \d \d \d\n",
        r"\s+noisePerMS \d+ agcCnt \d+ jamInd \d+ ofsI -?\d+ magI \d+ ofsQ -?\d+ magQ \d+\n",
        r"\s+reserved3 \d \d \d\n?",
    ))
    .unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GnssNavStatus {
    pub timestamp: String,
    pub flags: String,
    #[serde(rename = "GPSFix")]
    pub gps_fix: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GnssNavClock {
    pub timestamp: String,
    pub time_acc: i64,
    pub freq_acc: i64,
}

/// State of one RF block as reported by MON-RF
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GnssAntennaDetails {
    pub timestamp: String,
    pub block_id: i64,
    pub status: i64,
    pub power: i64,
}

/// Everything recovered from one `ubxtool` run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GnssDetails {
    pub nav_status: Option<GnssNavStatus>,
    pub nav_clock: Option<GnssNavClock>,
    pub antenna_details: Vec<GnssAntennaDetails>,
}

impl GnssDetails {
    pub fn is_empty(&self) -> bool {
        self.nav_status.is_none() && self.nav_clock.is_none() && self.antenna_details.is_empty()
    }
}

impl Reportable for GnssDetails {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        let mut records = Vec::with_capacity(self.antenna_details.len() + 1);
        if self.nav_status.is_some() || self.nav_clock.is_some() {
            let clock = self.nav_clock.clone().unwrap_or_default();
            let status = self.nav_status.clone().unwrap_or_default();
            records.push(AnalyserRecord::new(
                "gnss/time-error",
                json!({
                    "timestamp": clock.timestamp,
                    "terror": clock.time_acc,
                    "ferror": clock.freq_acc,
                    "state": status.gps_fix,
                    "flags": status.flags,
                }),
            ));
        }
        for antenna in &self.antenna_details {
            records.push(AnalyserRecord::new("gnss/rf-mon", serde_json::to_value(antenna)?));
        }
        Ok(records)
    }
}

fn rfc3339_timestamp(raw: &str, field: &str) -> Result<String> {
    let parsed = parse_timestamp(raw)
        .map_err(|e| CollectorError::parse(format!("failed to parse {} {}", field, e)))?;
    Ok(format_rfc3339_nano(&parsed))
}

fn parse_int(raw: &str, field: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| CollectorError::parse(format!("failed to convert {} into an int for {}", raw, field)))
}

fn parse_nav_status(output: &str) -> Result<GnssNavStatus> {
    let caps = NAV_STATUS_REGEX
        .captures(output)
        .ok_or_else(|| CollectorError::parse(format!("unable to parse UBX Nav Status from {}", output)))?;
    Ok(GnssNavStatus {
        timestamp: rfc3339_timestamp(&caps[1], "navStatusTimestamp")?,
        gps_fix: parse_int(&caps[3], "gpsFix")?,
        flags: caps[4].to_string(),
    })
}

fn parse_nav_clock(output: &str) -> Result<GnssNavClock> {
    let caps = NAV_CLOCK_REGEX
        .captures(output)
        .ok_or_else(|| CollectorError::parse(format!("unable to parse UBX Nav Clock from {}", output)))?;
    Ok(GnssNavClock {
        timestamp: rfc3339_timestamp(&caps[1], "navClockTimestamp")?,
        time_acc: parse_int(&caps[5], "timeAcc")?,
        freq_acc: parse_int(&caps[6], "freqAcc")?,
    })
}

fn parse_mon_rf(output: &str) -> Result<Vec<GnssAntennaDetails>> {
    let caps = MON_RF_REGEX
        .captures(output)
        .ok_or_else(|| CollectorError::parse(format!("failed to match UBX MON in {}", output)))?;
    let timestamp = rfc3339_timestamp(&caps[1], "monTimestamp")?;
    let blocks = parse_int(&caps[2], "nBlocks")?;

    ANTENNA_BLOCK_REGEX
        .captures_iter(&caps[3])
        .take(usize::try_from(blocks).unwrap_or_default())
        .map(|block| {
            Ok(GnssAntennaDetails {
                timestamp: timestamp.clone(),
                block_id: parse_int(&block[1], "blockId")?,
                status: parse_int(&block[2], "antStatus")?,
                power: parse_int(&block[3], "antPower")?,
            })
        })
        .collect()
}

/// Parse all three sections, returning what was recovered and what failed
pub fn parse_ubx(output: &str) -> (GnssDetails, Vec<CollectorError>) {
    let mut details = GnssDetails::default();
    let mut errors = Vec::new();

    match parse_nav_status(output) {
        Ok(status) => details.nav_status = Some(status),
        Err(e) => {
            debug!(error = %e, "Failed to parse NAV-STATUS");
            errors.push(e);
        }
    }
    match parse_nav_clock(output) {
        Ok(clock) => details.nav_clock = Some(clock),
        Err(e) => {
            debug!(error = %e, "Failed to parse NAV-CLOCK");
            errors.push(e);
        }
    }
    match parse_mon_rf(output) {
        Ok(antennas) => details.antenna_details = antennas,
        Err(e) => {
            debug!(error = %e, "Failed to parse MON-RF");
            errors.push(e);
        }
    }
    (details, errors)
}

pub fn build_gnss_fetcher() -> Result<Fetcher> {
    fetcher_from(vec![], &[(GNSS_KEY, UBX_COMMAND, true)])
}

/// Run `ubxtool` and parse its output
///
/// Fails outright when the exec fails or no section parses. When only some
/// sections fail, the recovered details come back with a composite error.
pub async fn get_gnss_details(
    ctx: &dyn ExecContext,
) -> Result<(GnssDetails, Option<CollectorError>)> {
    let fetcher = build_gnss_fetcher()?;
    let values = fetcher.fetch_values(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch GNSS details");
        e
    })?;
    let mut output = String::new();
    values.assign(GNSS_KEY, &mut output)?;

    let (details, errors) = parse_ubx(&output);
    if errors.is_empty() {
        return Ok((details, None));
    }

    let composite = CollectorError::Parse(composite_message(
        "the following errors occurred fetching the GNSS values",
        &errors,
    ));
    if errors.len() == 3 {
        return Err(composite);
    }
    Ok((details, Some(composite)))
}
