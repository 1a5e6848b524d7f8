//! Small shared helpers: counted wait groups, timestamp handling,
//! duration parsing and temp file removal.

use crate::error::{CollectorError, Result};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error};

/// A wait group that exposes how many members are outstanding.
///
/// The scheduler needs to ask "is anything still in flight?" without
/// blocking, which a plain join handle set cannot answer cheaply.
#[derive(Debug, Default)]
pub struct WaitGroupCount {
    count: AtomicI64,
    notify: Notify,
}

impl WaitGroupCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, delta: i64) {
        let now = self.count.fetch_add(delta, Ordering::SeqCst) + delta;
        if now <= 0 {
            self.notify.notify_waiters();
        }
    }

    pub fn done(&self) {
        self.add(-1);
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolve once the count has dropped to zero
    pub async fn wait(&self) {
        loop {
            // Register interest before checking so a concurrent `done` is not missed
            let notified = self.notify.notified();
            if self.count() <= 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Parse `<seconds>.<fraction>` since the epoch into a UTC time
pub fn parse_timestamp(timestamp: &str) -> Result<DateTime<Utc>> {
    let timestamp = timestamp.trim();
    let (secs_part, frac_part) = match timestamp.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (timestamp, ""),
    };
    let secs: i64 = secs_part
        .parse()
        .map_err(|e| CollectorError::parse(format!("failed to parse timestamp {}: {}", timestamp, e)))?;

    let nanos = if frac_part.is_empty() {
        0
    } else {
        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(CollectorError::parse(format!(
                "failed to parse timestamp {}: invalid fraction",
                timestamp
            )));
        }
        let mut digits: String = frac_part.chars().take(9).collect();
        while digits.len() < 9 {
            digits.push('0');
        }
        digits
            .parse::<u32>()
            .map_err(|e| CollectorError::parse(format!("failed to parse timestamp {}: {}", timestamp, e)))?
    };

    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| CollectorError::parse(format!("timestamp {} out of range", timestamp)))
}

/// Format a time as RFC 3339 with as many fractional digits as needed
/// (trailing zeros trimmed, no fraction when whole seconds).
pub fn format_rfc3339_nano(time: &DateTime<Utc>) -> String {
    let base = time.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = time.nanosecond() % 1_000_000_000;
    if nanos == 0 {
        return format!("{}Z", base);
    }
    let fraction = format!("{:09}", nanos);
    format!("{}.{}Z", base, fraction.trim_end_matches('0'))
}

/// Output processor turning `date +%s.%N` output into RFC 3339
pub fn format_timestamp_as_rfc3339_nano(value: &str) -> Result<String> {
    let timestamp = parse_timestamp(value)?;
    Ok(format_rfc3339_nano(&timestamp))
}

/// Parse a duration string of the form `1h30m`, `1000s`, `1.5m`, `250ms`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CollectorError::parse("empty duration"));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.starts_with('-') {
        return Err(CollectorError::parse(format!("negative duration {}", input)));
    }

    let mut total = 0f64;
    let mut rest = input.trim_start_matches('+');
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(CollectorError::parse(format!("invalid duration {}", input)));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| CollectorError::parse(format!("invalid duration {}", input)))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => {
                return Err(CollectorError::parse(format!(
                    "missing unit in duration {}",
                    input
                )))
            }
            unit => {
                return Err(CollectorError::parse(format!(
                    "unknown unit {} in duration {}",
                    unit, input
                )))
            }
        };
        total += value * seconds_per_unit;
        rest = &rest[unit_len..];
    }

    Ok(Duration::from_secs_f64(total))
}

/// Remove generated files from `dir`, then the directory itself if it is empty
pub fn remove_temp_files(dir: &Path, filenames: &[String]) {
    for name in filenames {
        let path = Path::new(name);
        let path = if path.starts_with(dir) {
            path.to_path_buf()
        } else {
            dir.join(path)
        };
        debug!(path = %path.display(), "Removing temp file");
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(path = %path.display(), error = %e, "Failed to remove temp file");
            }
        }
    }
    if let Err(e) = std::fs::remove_dir(dir) {
        // other files may legitimately remain
        if !matches!(
            e.kind(),
            std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
        ) {
            debug!(path = %dir.display(), error = %e, "Failed to remove temp dir");
        }
    }
}
