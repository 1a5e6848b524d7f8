//! Per-generation slice store and its on-disk dump

use super::dedup::{combine, dedup_generation, dedup_line_slices, write_overlap};
use super::{LineSlice, SLICE_KEEP_GENERATIONS};
use crate::utils::remove_temp_files;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const DUMP_CHANNEL_SIZE: usize = 100;

struct Dump {
    slice: LineSlice,
    number_in_generation: usize,
}

/// Writes every received slice to `<dir>/generation-<gen>-<n>.log` on a
/// background task
#[derive(Debug)]
pub struct GenerationDumper {
    dir: Option<PathBuf>,
    keep_files: bool,
    sender: Option<mpsc::Sender<Dump>>,
    handle: Option<JoinHandle<Vec<String>>>,
}

impl GenerationDumper {
    pub fn new(dir: impl Into<PathBuf>, keep_files: bool) -> Self {
        Self {
            dir: Some(dir.into()),
            keep_files,
            sender: None,
            handle: None,
        }
    }

    /// A dumper that discards everything
    pub fn disabled() -> Self {
        Self {
            dir: None,
            keep_files: false,
            sender: None,
            handle: None,
        }
    }

    pub fn start(&mut self) {
        let Some(dir) = self.dir.clone() else {
            return;
        };
        if self.sender.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::channel::<Dump>(DUMP_CHANNEL_SIZE);
        self.sender = Some(tx);
        self.handle = Some(tokio::spawn(async move {
            let mut filenames = Vec::new();
            // Runs until every sender is dropped, which also drains the queue
            while let Some(dump) = rx.recv().await {
                let path = dir.join(format!(
                    "generation-{}-{}.log",
                    dump.slice.generation, dump.number_in_generation
                ));
                filenames.push(path.display().to_string());
                let written = tokio::task::spawn_blocking(move || {
                    write_overlap(&dump.slice.lines, &path).map_err(|e| (path, e))
                })
                .await;
                match written {
                    Ok(Ok(())) => {}
                    Ok(Err((path, e))) => {
                        error!(path = %path.display(), error = %e, "Failed to write generation dump file")
                    }
                    Err(e) => error!(error = %e, "Generation dump task failed"),
                }
            }
            filenames
        }));
    }

    async fn dump(&self, slice: &LineSlice, number_in_generation: usize) {
        let Some(sender) = &self.sender else {
            return;
        };
        let dump = Dump {
            slice: slice.clone(),
            number_in_generation,
        };
        if sender.send(dump).await.is_err() {
            error!(generation = slice.generation, "Generation dumper has stopped");
        }
    }

    /// Finish writing queued dumps, then remove them unless asked to keep them
    pub async fn stop(&mut self) {
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        debug!("Waiting for generation dumping to complete");
        let filenames = match handle.await {
            Ok(filenames) => filenames,
            Err(e) => {
                error!(error = %e, "Generation dumper panicked");
                return;
            }
        };
        if self.keep_files {
            info!(files = filenames.len(), "Keeping generation dump files");
            return;
        }
        if let Some(dir) = &self.dir {
            debug!("Removing generation dump files");
            remove_temp_files(dir, &filenames);
        }
    }
}

/// Slices grouped by the generation they were read in
#[derive(Debug)]
pub struct Generations {
    store: HashMap<u32, Vec<LineSlice>>,
    dumper: GenerationDumper,
    latest: u32,
    oldest: u32,
}

impl Generations {
    pub fn new(dumper: GenerationDumper) -> Self {
        Self {
            store: HashMap::new(),
            dumper,
            latest: 0,
            oldest: 0,
        }
    }

    pub fn dumper_mut(&mut self) -> &mut GenerationDumper {
        &mut self.dumper
    }

    pub fn latest(&self) -> u32 {
        self.latest
    }

    pub fn oldest(&self) -> u32 {
        self.oldest
    }

    pub async fn add(&mut self, slice: LineSlice) {
        let generation = slice.generation;
        let slices = self.store.entry(generation).or_default();
        let number_in_generation = slices.len();
        self.dumper.dump(&slice, number_in_generation).await;
        slices.push(slice);

        if self.latest < generation {
            self.latest = generation;
            debug!(
                latest = self.latest,
                should_flush = self.should_flush(),
                "Latest log generation updated"
            );
        }
    }

    pub fn should_flush(&self) -> bool {
        self.latest.saturating_sub(self.oldest) > SLICE_KEEP_GENERATIONS
            && self.store.len() > SLICE_KEEP_GENERATIONS as usize
    }

    fn remove_older_than(&mut self, keep: u32) {
        debug!(keep, "Removing older log generations");
        self.store.retain(|generation, _| *generation >= keep);
        self.oldest = keep;
    }

    /// Stitch the oldest generations together.
    ///
    /// The newest flushed generation stays in the store so the next flush
    /// can be compared against it.
    pub fn flush(&mut self) -> LineSlice {
        let last_gen = self.oldest.saturating_add(SLICE_KEEP_GENERATIONS);
        debug!(last_gen, "Flushing log generations");

        let keys: Vec<u32> = self
            .store
            .keys()
            .copied()
            .filter(|generation| *generation <= last_gen)
            .collect();
        let to_flush: Vec<Vec<LineSlice>> = keys
            .into_iter()
            .filter_map(|generation| self.store.remove(&generation))
            .collect();

        let (result, last_slice) = flush_generations(to_flush);
        self.remove_older_than(last_slice.generation);
        self.store.insert(last_slice.generation, vec![last_slice]);
        result
    }

    /// Stitch everything left, including the retained newest slice
    pub fn flush_all(&mut self) -> LineSlice {
        debug!("Flushing all log generations");
        let to_flush: Vec<Vec<LineSlice>> = self.store.drain().map(|(_, slices)| slices).collect();
        if to_flush.is_empty() {
            return LineSlice::default();
        }
        let (result, last_slice) = flush_generations(to_flush);
        LineSlice::new(combine(&result.lines, &last_slice.lines), last_slice.generation)
    }
}

fn flush_generations(mut generations: Vec<Vec<LineSlice>>) -> (LineSlice, LineSlice) {
    generations.retain(|slices| !slices.is_empty());
    generations.sort_by_key(|slices| slices[0].generation);
    let deduped: Vec<LineSlice> = generations.into_iter().map(dedup_generation).collect();
    dedup_line_slices(deduped)
}
