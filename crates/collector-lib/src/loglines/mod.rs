//! Log line model and the deduplication machinery used by the log follower
//!
//! Lines arrive in overlapping windows. Each window is tagged with the
//! generation current when it was read, grouped into a [`LineSlice`], and
//! stitched against neighbouring windows by [`Generations`]. A final
//! per-line [`SeenLines`] gate guarantees a `(timestamp, content)` pair is
//! written at most once.

mod dedup;
mod generations;
mod seen;

#[cfg(test)]
mod tests;

pub use dedup::{combine, dedup_ab, dedup_line_slices, write_overlap};
pub use generations::{GenerationDumper, Generations};
pub use seen::SeenLines;

use crate::error::{CollectorError, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// Number of generations the slice store keeps before flushing
pub const SLICE_KEEP_GENERATIONS: u32 = 5;

/// Number of generations the per-line gate remembers
pub const SEEN_KEEP_GENERATIONS: u32 = 10;

/// One log line split into its timestamp and content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedLine {
    pub timestamp: DateTime<Utc>,
    /// The line as received, trailing whitespace removed
    pub full: String,
    /// Everything after the timestamp
    pub content: String,
    pub generation: u32,
}

/// Lines are shared between slices while they are being stitched
pub type Line = Arc<ProcessedLine>;

/// Split `<RFC3339 timestamp> <content>` into a [`ProcessedLine`]
pub fn process_line(line: &str, generation: u32) -> Result<ProcessedLine> {
    let (timestamp, content) = line
        .split_once(' ')
        .ok_or_else(|| CollectorError::parse(format!("failed to split line {}", line)))?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|_| {
            CollectorError::parse(format!("failed to process timestamp from line: '{}'", line))
        })?
        .with_timezone(&Utc);

    Ok(ProcessedLine {
        timestamp,
        full: line.trim_end().to_string(),
        content: content.trim_end().to_string(),
        generation,
    })
}

/// A point in time plus a counter bumped each time the point advances
#[derive(Debug)]
pub struct GenerationalLockedTime {
    inner: RwLock<(DateTime<Utc>, u32)>,
}

impl GenerationalLockedTime {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            inner: RwLock::new((initial, 0)),
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.inner.read().map(|g| g.0).unwrap_or_else(|p| p.into_inner().0)
    }

    pub fn generation(&self) -> u32 {
        self.inner.read().map(|g| g.1).unwrap_or_else(|p| p.into_inner().1)
    }

    /// Advance to `update` if it is later than the current time
    pub fn update(&self, update: DateTime<Utc>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if update > guard.0 {
            guard.0 = update;
            guard.1 = guard.1.wrapping_add(1);
        }
    }
}

/// A contiguous run of lines read in one polling window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSlice {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub lines: Vec<Line>,
    pub generation: u32,
}

impl LineSlice {
    pub fn new(lines: Vec<Line>, generation: u32) -> Self {
        Self {
            start: lines.first().map(|l| l.timestamp),
            end: lines.last().map(|l| l.timestamp),
            lines,
            generation,
        }
    }

    pub fn empty(generation: u32) -> Self {
        Self {
            generation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
