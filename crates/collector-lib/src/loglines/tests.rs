use super::*;
use chrono::{Duration, TimeZone};
use tempfile::TempDir;

fn make_line(index: i64, generation: u32) -> Line {
    let timestamp = Utc.timestamp_opt(1_686_916_187, 0).unwrap() + Duration::milliseconds(index * 10);
    let raw = format!(
        "{} ts2phc[{}]: [ts2phc.0.config] ens7f0 offset {} s2 freq -3",
        timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        index,
        index % 7
    );
    Arc::new(process_line(&raw, generation).unwrap())
}

fn make_lines(range: std::ops::RangeInclusive<i64>, generation: u32) -> Vec<Line> {
    range.map(|i| make_line(i, generation)).collect()
}

fn texts(lines: &[Line]) -> Vec<String> {
    lines.iter().map(|l| l.full.clone()).collect()
}

#[test]
fn test_process_line_splits_timestamp() {
    let line = process_line("2023-06-16T11:49:47.0584Z ptp4l[1]: port 1: MASTER  \n", 3).unwrap();
    assert_eq!(line.content, "ptp4l[1]: port 1: MASTER");
    assert_eq!(line.full, "2023-06-16T11:49:47.0584Z ptp4l[1]: port 1: MASTER");
    assert_eq!(line.generation, 3);
    assert_eq!(line.timestamp.timestamp(), 1686916187);
}

#[test]
fn test_process_line_rejects_malformed() {
    assert!(process_line("no-space-here", 0).is_err());
    assert!(process_line("yesterday something happened", 0).is_err());
}

#[test]
fn test_generational_time_only_advances() {
    let start = Utc.timestamp_opt(1_686_916_187, 0).unwrap();
    let time = GenerationalLockedTime::new(start);
    assert_eq!(time.generation(), 0);

    time.update(start - Duration::seconds(1));
    assert_eq!(time.generation(), 0);
    assert_eq!(time.time(), start);

    time.update(start + Duration::seconds(2));
    assert_eq!(time.generation(), 1);
    assert_eq!(time.time(), start + Duration::seconds(2));
}

#[test]
fn test_dedup_ab_simple_overlap() {
    let a = make_lines(1..=10, 0);
    let b = make_lines(6..=15, 1);
    let (head, tail) = dedup_ab(&a, &b);
    assert_eq!(texts(&head), texts(&make_lines(1..=5, 0)));
    assert_eq!(texts(&combine(&head, &tail)), texts(&make_lines(1..=15, 0)));
}

#[test]
fn test_dedup_ab_no_overlap() {
    let a = make_lines(1..=5, 0);
    let b = make_lines(20..=25, 1);
    let (head, tail) = dedup_ab(&a, &b);
    assert_eq!(texts(&head), texts(&a));
    assert_eq!(texts(&tail), texts(&b));
}

#[test]
fn test_dedup_ab_newer_window_inside_older() {
    let a = make_lines(1..=20, 0);
    let b = make_lines(5..=10, 1);
    let (head, tail) = dedup_ab(&a, &b);
    assert_eq!(texts(&combine(&head, &tail)), texts(&a));
}

#[test]
fn test_dedup_ab_repairs_line_missing_from_newer() {
    let a = make_lines(1..=10, 0);
    let mut b = make_lines(4..=14, 1);
    // the newer window dropped line 6
    b.remove(2);
    let (head, tail) = dedup_ab(&a, &b);
    assert_eq!(texts(&combine(&head, &tail)), texts(&make_lines(1..=14, 0)));
}

#[test]
fn test_dedup_ab_repairs_line_missing_from_older() {
    let mut a = make_lines(1..=10, 0);
    // the older window dropped line 7
    a.remove(6);
    let b = make_lines(4..=14, 1);
    let (head, tail) = dedup_ab(&a, &b);
    assert_eq!(texts(&combine(&head, &tail)), texts(&make_lines(1..=14, 0)));
}

#[test]
fn test_dedup_ab_first_line_missing_but_last_present() {
    let a = make_lines(1..=10, 0);
    let mut b = make_lines(0..=14, 1);
    // b starts with a line a never saw
    b[0] = make_line(-50, 1);
    let (head, tail) = dedup_ab(&a, &b);
    let combined = texts(&combine(&head, &tail));
    for expected in texts(&make_lines(1..=14, 0)) {
        assert_eq!(combined.iter().filter(|l| **l == expected).count(), 1);
    }
}

#[test]
fn test_dedup_line_slices_folds_older_windows() {
    let slices = vec![
        LineSlice::new(make_lines(11..=30, 2), 2),
        LineSlice::new(make_lines(1..=12, 0), 0),
        LineSlice::new(make_lines(5..=20, 1), 1),
    ];
    let (older, newest) = dedup_line_slices(slices);
    assert_eq!(newest.generation, 2);
    assert_eq!(texts(&newest.lines), texts(&make_lines(11..=30, 2)));
    assert_eq!(texts(&older.lines), texts(&make_lines(1..=10, 0)));
}

#[test]
fn test_dedup_line_slices_edge_sizes() {
    let (older, newest) = dedup_line_slices(vec![]);
    assert!(older.is_empty() && newest.is_empty());

    let only = LineSlice::new(make_lines(1..=3, 4), 4);
    let (older, newest) = dedup_line_slices(vec![only.clone()]);
    assert!(older.is_empty());
    assert_eq!(newest, only);
}

#[tokio::test]
async fn test_two_overlapping_windows_flush_to_single_sequence() {
    let mut generations = Generations::new(GenerationDumper::disabled());
    generations
        .add(LineSlice::new(make_lines(1..=200, 0), 0))
        .await;
    generations
        .add(LineSlice::new(make_lines(100..=300, 1), 1))
        .await;
    assert!(!generations.should_flush());

    let all = generations.flush_all();
    assert_eq!(texts(&all.lines), texts(&make_lines(1..=300, 0)));
}

#[tokio::test]
async fn test_flush_keeps_newest_generation_for_comparison() {
    let mut generations = Generations::new(GenerationDumper::disabled());
    for generation in 0..=6u32 {
        let start = i64::from(generation) * 10 + 1;
        generations
            .add(LineSlice::new(make_lines(start..=start + 14, generation), generation))
            .await;
    }
    assert!(generations.should_flush());

    let flushed = generations.flush();
    assert_eq!(texts(&flushed.lines), texts(&make_lines(1..=50, 0)));
    assert_eq!(generations.oldest(), 5);
    assert!(!generations.should_flush());

    let rest = generations.flush_all();
    assert_eq!(texts(&rest.lines), texts(&make_lines(51..=75, 0)));
}

#[tokio::test]
async fn test_dumper_writes_and_removes_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("dumps");
    std::fs::create_dir_all(&dir).unwrap();

    let mut dumper = GenerationDumper::new(&dir, false);
    dumper.start();
    let mut generations = Generations::new(dumper);
    generations.add(LineSlice::new(make_lines(1..=3, 0), 0)).await;
    generations.add(LineSlice::new(make_lines(2..=4, 0), 0)).await;
    generations.dumper_mut().stop().await;

    assert!(!dir.exists());
}

#[tokio::test]
async fn test_dumper_keeps_files_when_asked() {
    let temp = TempDir::new().unwrap();
    let mut dumper = GenerationDumper::new(temp.path(), true);
    dumper.start();
    let mut generations = Generations::new(dumper);
    generations.add(LineSlice::new(make_lines(1..=3, 7), 7)).await;
    generations.add(LineSlice::new(make_lines(2..=4, 7), 7)).await;
    generations.dumper_mut().stop().await;

    let second = std::fs::read_to_string(temp.path().join("generation-7-1.log")).unwrap();
    assert_eq!(second.lines().count(), 3);
    assert!(temp.path().join("generation-7-0.log").exists());
}
