//! Overlapping log windows stitched back into the original log

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use collector_lib::loglines::{process_line, GenerationDumper, Generations, Line, LineSlice, SeenLines};
use std::sync::Arc;
use tempfile::TempDir;

const TOTAL_LINES: usize = 400;
const WINDOW: usize = 30;
const STEP: usize = 20;

fn fixture() -> Vec<String> {
    let start: DateTime<Utc> = Utc.with_ymd_and_hms(2023, 6, 16, 11, 49, 0).unwrap();
    (0..TOTAL_LINES)
        .map(|i| {
            // pairs of lines share a timestamp, as ptp4l and phc2sys often do
            let at = start + Duration::milliseconds((i / 2) as i64 * 125);
            format!(
                "{} ptp4l[{}.{}]: [ptp4l.0.config] master offset {} s2 freq -1000 path delay 500",
                at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                1000 + i / 2,
                i % 2,
                i as i64 - 200
            )
        })
        .collect()
}

/// Cut the fixture into overlapping windows, one generation each
fn windows(raw: &[String]) -> Vec<LineSlice> {
    (0..raw.len())
        .step_by(STEP)
        .enumerate()
        .map(|(generation, start)| {
            let end = (start + WINDOW).min(raw.len());
            let lines: Vec<Line> = raw[start..end]
                .iter()
                .map(|l| Arc::new(process_line(l, generation as u32).unwrap()))
                .collect();
            LineSlice::new(lines, generation as u32)
        })
        .collect()
}

#[tokio::test]
async fn test_overlapping_windows_written_once_in_order() {
    let dir = TempDir::new().unwrap();
    let raw = fixture();

    let mut dumper = GenerationDumper::new(dir.path(), false);
    dumper.start();
    let mut generations = Generations::new(dumper);
    let mut stitched: Vec<Line> = Vec::new();
    for slice in windows(&raw) {
        generations.add(slice).await;
        if generations.should_flush() {
            stitched.extend(generations.flush().lines);
        }
    }
    stitched.extend(generations.flush_all().lines);
    generations.dumper_mut().stop().await;

    let mut seen = SeenLines::new();
    let written: Vec<String> = stitched
        .iter()
        .filter(|line| seen.observe(line))
        .map(|line| line.full.clone())
        .collect();

    assert_eq!(written, raw);
    // the emptied dump directory is removed along with the dumps
    let leftovers = std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_dump_files_kept_on_request() {
    let dir = TempDir::new().unwrap();
    let raw = fixture();

    let mut dumper = GenerationDumper::new(dir.path(), true);
    dumper.start();
    let mut generations = Generations::new(dumper);
    let slices = windows(&raw[..WINDOW + STEP]);
    let count = slices.len();
    for slice in slices {
        generations.add(slice).await;
    }
    generations.flush_all();
    generations.dumper_mut().stop().await;

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), count);
    assert_eq!(names[0], "generation-0-0.log");

    let first = std::fs::read_to_string(dir.path().join("generation-0-0.log")).unwrap();
    assert_eq!(first.lines().count(), WINDOW);
    assert_eq!(first.lines().next(), Some(raw[0].as_str()));
}
