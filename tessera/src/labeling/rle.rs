//! Run-length connected component labeling of bit masks (4-connectivity).
//!
//! - Rows are scanned a word at a time, skipping all-zero and all-one words
//! - Runs are merged with the overlapping runs of the previous row via union-find
//! - Large masks are split into horizontal strips labeled in parallel, then
//!   stitched along strip boundaries
//!
//! Both paths number components in raster order of their first pixel, so the
//! output does not depend on the thread count.

use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;

use super::union_find::UnionFind;

/// Pixel count below which sequential labeling is faster than parallel.
const PARALLEL_THRESHOLD: usize = 65_000;

/// Minimum rows per strip in parallel labeling to avoid excessive strip overhead.
const MIN_ROWS_PER_STRIP: usize = 64;

// ============================================================================
// Runs
// ============================================================================

/// A horizontal run of foreground pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    /// First x, inclusive.
    pub start: u32,
    /// Last x, exclusive.
    pub end: u32,
    pub label: u32,
}

impl Run {
    /// 4-connected runs in adjacent rows touch when their x ranges overlap.
    #[inline]
    fn overlaps(&self, other: &Run) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Appends the runs of row `y` of `mask` to `runs`, scanning whole words.
fn extract_runs(mask: &BitBuffer2, y: usize, runs: &mut Vec<Run>) {
    let width = mask.width() as u32;
    let mut in_run = false;
    let mut run_start = 0u32;

    for (word_idx, &word) in mask.row_words(y).iter().enumerate() {
        let base_x = (word_idx * 64) as u32;

        if word == 0 {
            if in_run {
                runs.push(Run {
                    start: run_start,
                    end: base_x,
                    label: 0,
                });
                in_run = false;
            }
            continue;
        }

        // Padding bits are always clear, so a full word lies inside the row.
        if word == !0u64 {
            if !in_run {
                run_start = base_x;
                in_run = true;
            }
            continue;
        }

        scan_mixed_word(word, base_x, width, &mut in_run, &mut run_start, runs);
    }

    if in_run {
        runs.push(Run {
            start: run_start,
            end: width,
            label: 0,
        });
    }
}

/// Finds run transitions inside a word holding both set and cleared bits.
#[inline]
fn scan_mixed_word(
    word: u64,
    base_x: u32,
    width: u32,
    in_run: &mut bool,
    run_start: &mut u32,
    runs: &mut Vec<Run>,
) {
    let word_end = (base_x + 64).min(width);
    let mut pos = base_x;

    while pos < word_end {
        let remaining = word >> (pos - base_x);

        if *in_run {
            let end = pos + (!remaining).trailing_zeros();
            if end >= word_end {
                break;
            }
            runs.push(Run {
                start: *run_start,
                end,
                label: 0,
            });
            *in_run = false;
            pos = end;
        } else {
            if remaining == 0 {
                break;
            }
            let start = pos + remaining.trailing_zeros();
            if start >= word_end {
                break;
            }
            *run_start = start;
            *in_run = true;
            pos = start;
        }
    }
}

/// Labels each run of `curr` from the overlapping runs of `prev`, merging
/// labels when a run bridges several. Runs without overlap open a new set.
#[inline]
fn merge_with_previous_row(curr: &mut [Run], prev: &[Run], uf: &mut UnionFind) {
    let mut prev_idx = 0;
    for run in curr.iter_mut() {
        while prev_idx < prev.len() && prev[prev_idx].end <= run.start {
            prev_idx += 1;
        }

        let mut assigned = None;
        let mut check = prev_idx;
        while check < prev.len() && prev[check].start < run.end {
            let above = prev[check].label;
            match assigned {
                Some(label) if label != above => {
                    uf.union(label, above);
                }
                None => assigned = Some(above),
                _ => {}
            }
            check += 1;
        }

        run.label = assigned.unwrap_or_else(|| uf.make_set());
    }
}

/// Calls `f(above, below)` for every overlapping pair between two sorted rows
/// of runs, in O(n + m).
fn for_each_overlap(above: &[Run], below: &[Run], mut f: impl FnMut(&Run, &Run)) {
    let mut a = 0;
    let mut b = 0;
    while a < above.len() && b < below.len() {
        if above[a].overlaps(&below[b]) {
            f(&above[a], &below[b]);
        }
        if above[a].end <= below[b].end {
            a += 1;
        } else {
            b += 1;
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Labels the 4-connected components of `mask` into `labels` (which must be
/// zeroed and of the same size). Returns the number of components.
pub fn label_mask(mask: &BitBuffer2, labels: &mut Buffer2<u32>) -> u32 {
    assert_eq!(mask.width(), labels.width(), "label buffer width mismatch");
    assert_eq!(mask.height(), labels.height(), "label buffer height mismatch");
    if mask.is_empty() {
        return 0;
    }

    if mask.len() < PARALLEL_THRESHOLD || mask.height() < 2 * MIN_ROWS_PER_STRIP {
        label_mask_sequential(mask, labels)
    } else {
        label_mask_parallel(mask, labels)
    }
}

// ============================================================================
// Sequential labeling (small masks)
// ============================================================================

pub(crate) fn label_mask_sequential(mask: &BitBuffer2, labels: &mut Buffer2<u32>) -> u32 {
    let strip = label_strip(mask, 0, mask.height());
    strip.write(labels.pixels_mut(), mask.width(), 0, &|local| local);
    strip.count
}

// ============================================================================
// Parallel labeling (large masks)
// ============================================================================

/// Runs of one horizontal strip with dense strip-local labels.
#[derive(Debug)]
struct StripLabels {
    y_start: usize,
    /// `(y, run)` in raster order.
    runs: Vec<(u32, Run)>,
    /// Number of components inside the strip.
    count: u32,
}

impl StripLabels {
    fn first_row(&self) -> Vec<Run> {
        let y = self.y_start as u32;
        self.runs
            .iter()
            .take_while(|(ry, _)| *ry == y)
            .map(|&(_, run)| run)
            .collect()
    }

    fn last_row(&self, y_end: usize) -> Vec<Run> {
        let y = (y_end - 1) as u32;
        let mut row: Vec<Run> = self
            .runs
            .iter()
            .rev()
            .take_while(|(ry, _)| *ry == y)
            .map(|&(_, run)| run)
            .collect();
        row.reverse();
        row
    }

    /// Writes the strip's runs into `rows`, which starts at row `row_offset`.
    fn write(
        &self,
        rows: &mut [u32],
        width: usize,
        row_offset: usize,
        map: &dyn Fn(u32) -> u32,
    ) {
        for &(y, run) in &self.runs {
            let row_start = (y as usize - row_offset) * width;
            let label = map(run.label);
            rows[row_start + run.start as usize..row_start + run.end as usize].fill(label);
        }
    }
}

/// Labels rows `y_start..y_end` in isolation.
fn label_strip(mask: &BitBuffer2, y_start: usize, y_end: usize) -> StripLabels {
    let width = mask.width();
    let mut uf = UnionFind::new();
    let mut runs: Vec<(u32, Run)> = Vec::new();
    let mut prev: Vec<Run> = Vec::with_capacity(width / 4);
    let mut curr: Vec<Run> = Vec::with_capacity(width / 4);

    for y in y_start..y_end {
        curr.clear();
        extract_runs(mask, y, &mut curr);
        if curr.is_empty() {
            prev.clear();
            continue;
        }

        merge_with_previous_row(&mut curr, &prev, &mut uf);
        runs.extend(curr.iter().map(|&run| (y as u32, run)));
        std::mem::swap(&mut prev, &mut curr);
    }

    let (dense, count) = uf.dense_map();
    for (_, run) in runs.iter_mut() {
        run.label = dense[run.label as usize];
    }

    StripLabels {
        y_start,
        runs,
        count,
    }
}

pub(crate) fn label_mask_parallel(mask: &BitBuffer2, labels: &mut Buffer2<u32>) -> u32 {
    let width = mask.width();
    let height = mask.height();

    let num_strips = (height / MIN_ROWS_PER_STRIP).clamp(1, rayon::current_num_threads());
    let rows_per_strip = height / num_strips;
    let bounds: Vec<(usize, usize)> = (0..num_strips)
        .map(|i| {
            let y_end = if i + 1 == num_strips {
                height
            } else {
                (i + 1) * rows_per_strip
            };
            (i * rows_per_strip, y_end)
        })
        .collect();

    // Phase 1: label each strip with its own local numbering.
    let strips: Vec<StripLabels> = bounds
        .par_iter()
        .map(|&(y_start, y_end)| label_strip(mask, y_start, y_end))
        .collect();

    // Phase 2: place strip labels in one id space, strip by strip.
    let mut offsets = Vec::with_capacity(num_strips);
    let mut total = 0u32;
    for strip in &strips {
        offsets.push(total);
        total += strip.count;
    }
    if total == 0 {
        return 0;
    }

    // Phase 3: merge components that continue across strip boundaries.
    let mut uf = UnionFind::with_len(total);
    for i in 1..num_strips {
        let above = strips[i - 1].last_row(bounds[i - 1].1);
        let below = strips[i].first_row();
        let (above_offset, below_offset) = (offsets[i - 1], offsets[i]);
        for_each_overlap(&above, &below, |a, b| {
            uf.union(a.label + above_offset, b.label + below_offset);
        });
    }
    let (dense, count) = uf.dense_map();

    // Phase 4: write final labels, one disjoint row block per strip.
    let mut blocks: Vec<&mut [u32]> = Vec::with_capacity(num_strips);
    let mut rest = labels.pixels_mut();
    for &(y_start, y_end) in &bounds {
        let rows = (y_end - y_start) * width;
        let (block, tail) = std::mem::take(&mut rest).split_at_mut(rows);
        blocks.push(block);
        rest = tail;
    }

    strips
        .par_iter()
        .zip(blocks.into_par_iter())
        .zip(offsets.par_iter())
        .for_each(|((strip, block), &offset)| {
            strip.write(block, width, strip.y_start, &|local| {
                dense[(local + offset) as usize]
            });
        });

    count
}
