//! Stitching of overlapping line windows
//!
//! Two windows A and B are expected to overlap: B starts somewhere inside A.
//! [`dedup_ab`] trims A down to the part B does not repeat. When the overlap
//! is damaged (lines missing on one side) the shorter side is patched with the
//! lines it lacks until both agree, then the trim is retried.

use super::{Line, LineSlice, ProcessedLine};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

fn find_line_index(needle: &ProcessedLine, haystack: &[Line]) -> Option<usize> {
    haystack.iter().position(|line| line.full == needle.full)
}

/// First position where `x` and `y` disagree, within their common length
fn find_first_issue_index(x: &[Line], y: &[Line]) -> Option<usize> {
    x.iter()
        .zip(y.iter())
        .position(|(a, b)| a.full != b.full)
}

/// First line of `a` that also appears in `b`, as (offset in a, index in b)
fn find_next_matching(a: &[Line], b: &[Line]) -> Option<(usize, usize)> {
    a.iter()
        .enumerate()
        .find_map(|(offset, line)| find_line_index(line, b).map(|index| (offset, index)))
}

fn splice(prefix: &[Line], inserted: &[Line], rest: &[Line]) -> Vec<Line> {
    let mut out = Vec::with_capacity(prefix.len() + inserted.len() + rest.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(inserted);
    out.extend_from_slice(rest);
    out
}

/// Insert whichever side's missing lines into the other at `issue`
fn fix_lines(x: Vec<Line>, y: Vec<Line>, issue: usize) -> (Vec<Line>, Vec<Line>, bool) {
    if x[issue].full == y[issue].full {
        return (x, y, false);
    }

    if find_line_index(&y[issue], &x[issue..]).is_none() {
        // y has lines x is missing
        if let Some((y_offset, x_index)) = find_next_matching(&y[issue..], &x[issue..]) {
            let new_x = splice(
                &x[..issue],
                &y[issue..issue + y_offset],
                &x[issue + x_index..],
            );
            return (new_x, y, true);
        }
        return (x, y, false);
    }

    if find_line_index(&x[issue], &y[issue..]).is_none() {
        // x has lines y is missing
        if let Some((x_offset, y_index)) = find_next_matching(&x[issue..], &y[issue..]) {
            let new_y = splice(
                &y[..issue],
                &x[issue..issue + x_offset],
                &y[issue + y_index..],
            );
            return (x, new_y, true);
        }
    }
    (x, y, false)
}

type Pair = (Vec<Line>, Vec<Line>);

fn process_overlap(x: &[Line], y: &[Line]) -> Result<Pair, Pair> {
    let mut new_x = x.to_vec();
    let mut new_y = y.to_vec();
    let mut issue = find_first_issue_index(&new_x, &new_y);
    if issue.is_none() {
        return Ok((new_x, new_y));
    }

    // Every successful fix inserts at least one line, so this bounds the repair
    let mut budget = x.len() + y.len() + 1;
    while let Some(index) = issue {
        let (fx, fy, changed) = fix_lines(new_x, new_y, index);
        new_x = fx;
        new_y = fy;
        issue = find_first_issue_index(&new_x, &new_y);
        budget = budget.saturating_sub(1);
        if issue.is_some() && (!changed || budget == 0) {
            return Err((new_x, new_y));
        }
    }
    Ok(dedup_ab(&new_x, &new_y))
}

fn handle_incomplete_overlap(a: &[Line], b: &[Line]) -> Pair {
    match process_overlap(a, b) {
        Ok(pair) => pair,
        Err((new_a, new_b)) => {
            let issue = find_first_issue_index(&new_a, &new_b).unwrap_or(0);
            warn!(
                issue_index = issue,
                "Failed to reconcile overlapping log windows, splitting at the first difference"
            );
            split_at_issue(&new_a[..issue], &new_b[issue..])
        }
    }
}

/// Dedup the two halves left after giving up on a repair
fn split_at_issue(a: &[Line], b: &[Line]) -> Pair {
    if a.is_empty() || b.is_empty() {
        return (a.to_vec(), b.to_vec());
    }
    match find_line_index(&b[0], a) {
        Some(index) if find_first_issue_index(&a[index..], b).is_none() => {
            trim_covered(a, b, index)
        }
        _ => (a.to_vec(), b.to_vec()),
    }
}

/// `b` matches `a` from `index` on: keep the head of `a` and whichever of
/// the two tails is longer
fn trim_covered(a: &[Line], b: &[Line], index: usize) -> Pair {
    if a.len() - index > b.len() {
        (a[..index].to_vec(), a[index..].to_vec())
    } else {
        (a[..index].to_vec(), b.to_vec())
    }
}

/// Remove from `a` the lines that `b` repeats.
///
/// Returns the part of `a` that precedes `b` and the (possibly patched)
/// `b`; concatenating the two yields the stitched sequence.
pub fn dedup_ab(a: &[Line], b: &[Line]) -> Pair {
    if a.is_empty() || b.is_empty() {
        return (a.to_vec(), b.to_vec());
    }

    match find_line_index(&b[0], a) {
        None => {
            debug!("First line of the newer window not found in the older one");
            if find_line_index(&a[a.len() - 1], b).is_none() {
                debug!("Last line of the older window not found either, assuming no overlap");
                return (a.to_vec(), b.to_vec());
            }
            handle_incomplete_overlap(a, b)
        }
        Some(index) => {
            if find_first_issue_index(&a[index..], b).is_some() {
                return handle_incomplete_overlap(a, b);
            }
            trim_covered(a, b, index)
        }
    }
}

pub fn combine(x: &[Line], y: &[Line]) -> Vec<Line> {
    let mut out = Vec::with_capacity(x.len() + y.len());
    out.extend_from_slice(x);
    out.extend_from_slice(y);
    out
}

/// Stitch a set of windows together.
///
/// Returns the deduplicated lines of all but the newest window, and the
/// newest window, which is kept apart for comparison with later windows.
pub fn dedup_line_slices(mut slices: Vec<LineSlice>) -> (LineSlice, LineSlice) {
    slices.sort_by(|x, y| x.start.cmp(&y.start).then(x.end.cmp(&y.end)));

    match slices.len() {
        0 => return (LineSlice::default(), LineSlice::default()),
        1 => {
            let only = slices.remove(0);
            return (LineSlice::default(), only);
        }
        _ => {}
    }

    let last = &slices[slices.len() - 1];
    let last_but_one = &slices[slices.len() - 2];
    let (deduped, last_lines) = dedup_ab(&last_but_one.lines, &last.lines);

    if slices.len() == 2 {
        return (
            LineSlice::new(deduped, last_but_one.generation),
            LineSlice::new(last_lines, last.generation),
        );
    }

    let mut result = deduped.clone();
    let mut reference = combine(&deduped, &last_lines);
    for slice in slices[..slices.len() - 2].iter().rev() {
        let (a_lines, b_lines) = dedup_ab(&slice.lines, &reference);
        result = combine(&a_lines, &result);
        reference = combine(&a_lines, &b_lines);
    }

    (
        LineSlice::new(result, last_but_one.generation),
        LineSlice::new(last_lines, last.generation),
    )
}

/// Write the full text of `lines` to `path`, one per line
pub fn write_overlap(lines: &[Line], path: &Path) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for line in lines {
        writer.write_all(line.full.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Collapse every slice read within one generation into a single slice
pub(crate) fn dedup_generation(slices: Vec<LineSlice>) -> LineSlice {
    let (older, newest) = dedup_line_slices(slices);
    LineSlice::new(combine(&older.lines, &newest.lines), newest.generation)
}
