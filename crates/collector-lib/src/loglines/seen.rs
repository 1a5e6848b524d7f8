//! Per-line novelty gate keyed by timestamp

use super::{ProcessedLine, SEEN_KEEP_GENERATIONS};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Remembers which `(timestamp, content)` pairs were already written.
///
/// Memory is bounded by forgetting timestamps older than the earliest line
/// of the generation [`SEEN_KEEP_GENERATIONS`] behind the newest one.
#[derive(Debug, Default)]
pub struct SeenLines {
    lines: HashMap<DateTime<Utc>, Vec<String>>,
    generations: BTreeMap<u32, DateTime<Utc>>,
    last_pruned_at: Option<u32>,
}

impl SeenLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `line`, returning false when it was already seen
    pub fn observe(&mut self, line: &ProcessedLine) -> bool {
        self.generations
            .entry(line.generation)
            .and_modify(|earliest| {
                if line.timestamp < *earliest {
                    *earliest = line.timestamp;
                }
            })
            .or_insert(line.timestamp);

        let contents = self.lines.entry(line.timestamp).or_default();
        let novel = if contents.iter().any(|c| c == &line.content) {
            false
        } else {
            contents.push(line.content.clone());
            true
        };

        self.prune();
        novel
    }

    pub fn len(&self) -> usize {
        self.lines.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn prune(&mut self) {
        let (Some(&oldest), Some(&latest)) = (
            self.generations.keys().next(),
            self.generations.keys().next_back(),
        ) else {
            return;
        };
        if latest.saturating_sub(oldest) < SEEN_KEEP_GENERATIONS {
            return;
        }
        if self.last_pruned_at == Some(latest) {
            return;
        }
        self.last_pruned_at = Some(latest);

        let cutoff_gen = latest - SEEN_KEEP_GENERATIONS;
        let Some(cutoff) = self
            .generations
            .range(cutoff_gen..)
            .next()
            .map(|(_, earliest)| *earliest)
        else {
            return;
        };

        let before = self.lines.len();
        self.lines.retain(|timestamp, _| *timestamp >= cutoff);
        self.generations.retain(|generation, _| *generation > cutoff_gen);
        debug!(
            cutoff_generation = cutoff_gen,
            removed = before - self.lines.len(),
            "Pruned seen log lines"
        );
    }
}
