//! Grandmaster settings queried from `ptp4l` through `pmc`
//!
//! ```text
//! sending: GET GRANDMASTER_SETTINGS_NP
//!     507c6f.fffe.30fbe8-0 seq 0 RESPONSE MANAGEMENT GRANDMASTER_SETTINGS_NP
//!         clockClass              248
//!         clockAccuracy           0xfe
//!         offsetScaledLogVariance 0xffff
//!         currentUtcOffset        37
//!         ...
//!         timeSource              0xa0
//! ```

use super::{date_command, DATE_KEY};
use crate::callbacks::{AnalyserRecord, Reportable};
use crate::clients::ExecContext;
use crate::error::{CollectorError, Result};
use crate::fetcher::{fetcher_from, FetchedValues, Fetcher, Unmarshal, Value};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const PMC_KEY: &str = "PMC";
const PMC_COMMAND: &str = "pmc -u -f /var/run/ptp4l.0.config  'GET GRANDMASTER_SETTINGS_NP'";

static PMC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\sclockClass\s+(\d+)",
        r"\s*clockAccuracy\s+(.+)\n",
        r"\s*offsetScaledLogVariance\s+(.+)\n",
        r"\s*currentUtcOffset\s+(\d+)\n",
        r"\s*leap61\s+(\d+)\n",
        r"\s*leap59\s+(\d+)\n",
        r"\s*currentUtcOffsetValid\s+(\d+)\n",
        r"\s*ptpTimescale\s+(\d+)\n",
        r"\s*timeTraceable\s+(\d+)\n",
        r"\s*frequencyTraceable\s+(\d+)\n",
        r"\s*timeSource\s+(.+)",
    ))
    .unwrap()
});

/// Capture group of every integer field
const INT_FIELDS: [(&str, usize); 8] = [
    ("clockClass", 1),
    ("currentUtcOffset", 4),
    ("leap61", 5),
    ("leap59", 6),
    ("currentUtcOffsetValid", 7),
    ("ptpTimescale", 8),
    ("timeTraceable", 9),
    ("frequencyTraceable", 10),
];

/// Capture group of every field kept as text
const STR_FIELDS: [(&str, usize); 3] = [
    ("clockAccuracy", 2),
    ("offsetScaledLogVariance", 3),
    ("timeSource", 11),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PmcInfo {
    pub timestamp: String,
    pub time_source: String,
    pub clock_accuracy: String,
    pub offset_scaled_log_variance: String,
    /// Downstream parsers expect this one field in snake case
    #[serde(rename = "clock_class")]
    pub clock_class: i64,
    pub current_utc_offset: i64,
    pub leap61: i64,
    pub leap59: i64,
    pub current_utc_offset_valid: i64,
    pub ptp_timescale: i64,
    pub time_traceable: i64,
    pub frequency_traceable: i64,
}

impl Unmarshal for PmcInfo {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()> {
        values.assign(DATE_KEY, &mut self.timestamp)?;
        values.assign("timeSource", &mut self.time_source)?;
        values.assign("clockAccuracy", &mut self.clock_accuracy)?;
        values.assign("offsetScaledLogVariance", &mut self.offset_scaled_log_variance)?;
        values.assign("clockClass", &mut self.clock_class)?;
        values.assign("currentUtcOffset", &mut self.current_utc_offset)?;
        values.assign("leap61", &mut self.leap61)?;
        values.assign("leap59", &mut self.leap59)?;
        values.assign("currentUtcOffsetValid", &mut self.current_utc_offset_valid)?;
        values.assign("ptpTimescale", &mut self.ptp_timescale)?;
        values.assign("timeTraceable", &mut self.time_traceable)?;
        values.assign("frequencyTraceable", &mut self.frequency_traceable)?;
        Ok(())
    }
}

impl Reportable for PmcInfo {
    fn payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
        Ok(vec![AnalyserRecord::new("phc/gm-settings", self.payload()?)])
    }
}

fn post_process(raw: &HashMap<String, String>) -> Result<HashMap<String, Value>> {
    let output = raw.get(PMC_KEY).map(String::as_str).unwrap_or_default();
    let caps = PMC_REGEX
        .captures(output)
        .ok_or_else(|| CollectorError::parse(format!("unable to parse pmc output: {}", output)))?;

    let mut processed = HashMap::with_capacity(INT_FIELDS.len() + STR_FIELDS.len());
    for (key, group) in INT_FIELDS {
        let value: i64 = caps[group]
            .parse()
            .map_err(|_| CollectorError::parse(format!("failed to convert {} into an int", &caps[group])))?;
        processed.insert(key.to_string(), Value::Int(value));
    }
    for (key, group) in STR_FIELDS {
        processed.insert(key.to_string(), Value::Str(caps[group].trim().to_string()));
    }
    Ok(processed)
}

pub fn build_pmc_fetcher() -> Result<Fetcher> {
    let mut fetcher = fetcher_from(vec![date_command()?], &[(PMC_KEY, PMC_COMMAND, true)])?;
    fetcher.set_post_processor(Arc::new(post_process));
    Ok(fetcher)
}

pub async fn get_pmc_info(fetcher: &Fetcher, ctx: &dyn ExecContext) -> Result<PmcInfo> {
    fetcher.fetch(ctx).await.map_err(|e| {
        debug!(error = %e, "Failed to fetch grandmaster settings");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mock::MockExec;
    use crate::devices::testdata::PMC_OUTPUT;

    #[tokio::test]
    async fn test_pmc_parse() {
        let fetcher = build_pmc_fetcher().unwrap();
        let ctx = MockExec::new().respond("GRANDMASTER_SETTINGS_NP", PMC_OUTPUT);
        let info = get_pmc_info(&fetcher, &ctx).await.unwrap();

        assert_eq!(
            info,
            PmcInfo {
                timestamp: "2023-06-16T11:49:47.0584Z".into(),
                time_source: "0xa0".into(),
                clock_accuracy: "0xfe".into(),
                offset_scaled_log_variance: "0xffff".into(),
                clock_class: 248,
                current_utc_offset: 37,
                leap61: 0,
                leap59: 0,
                current_utc_offset_valid: 0,
                ptp_timescale: 1,
                time_traceable: 0,
                frequency_traceable: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_pmc_analyser_format() {
        let fetcher = build_pmc_fetcher().unwrap();
        let ctx = MockExec::new().respond("pmc -u", PMC_OUTPUT);
        let info = get_pmc_info(&fetcher, &ctx).await.unwrap();

        let records = info.analyser_format().unwrap();
        assert_eq!(records[0].id, "phc/gm-settings");
        assert_eq!(records[0].data["clock_class"], 248);
        assert_eq!(records[0].data["timeSource"], "0xa0");
        assert_eq!(records[0].data["currentUtcOffset"], 37);
    }

    #[tokio::test]
    async fn test_pmc_unparseable() {
        let fetcher = build_pmc_fetcher().unwrap();
        let output = PMC_OUTPUT.replace("leap59", "leapXX");
        let ctx = MockExec::new().respond("pmc -u", &output);
        let err = get_pmc_info(&fetcher, &ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("unable to parse pmc output"));
    }
}
