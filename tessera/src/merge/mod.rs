//! Unifies labels of regions cut apart by chunk boundaries.
//!
//! After chunked labeling, a region crossing a chunk edge carries one label per
//! chunk it touches. Every pair of 4-adjacent foreground pixels straddling an
//! edge must end up with the same label, and that label is the smallest label
//! of the connected class.


use rayon::prelude::*;

use crate::budget::Chunk;
use crate::config::MergeStrategy;
use crate::labeling::{LabelImage, UnionFind};

/// A pair of 4-adjacent pixel indices on opposite sides of a chunk edge.
type BoundaryPair = (usize, usize);

/// Merges labels across the edges between `chunks`. A single chunk has no
/// internal edges and is left untouched. Returns the number of label merges.
pub fn merge_borders(
    labels: &mut LabelImage,
    chunks: &[Chunk],
    strategy: MergeStrategy,
) -> usize {
    if chunks.len() <= 1 {
        return 0;
    }
    let pairs = boundary_pairs(labels.width(), chunks);
    let merges = match strategy {
        MergeStrategy::DisjointSet => merge_disjoint_set(labels, &pairs),
        MergeStrategy::Rewrite => merge_rewrite(labels, &pairs),
    };
    tracing::debug!(
        chunks = chunks.len(),
        boundary_pairs = pairs.len(),
        merges,
        ?strategy,
        "Merged chunk borders"
    );
    merges
}

/// Pixel pairs across the left and top edge of every chunk not on the image
/// border. Each straddling pair appears exactly once.
fn boundary_pairs(width: usize, chunks: &[Chunk]) -> Vec<BoundaryPair> {
    let mut pairs = Vec::new();
    for chunk in chunks {
        if chunk.x_min > 0 {
            for y in chunk.y_min..chunk.y_max {
                let right = y * width + chunk.x_min;
                pairs.push((right - 1, right));
            }
        }
        if chunk.y_min > 0 {
            for x in chunk.x_min..chunk.x_max {
                let below = chunk.y_min * width + x;
                pairs.push((below - width, below));
            }
        }
    }
    pairs
}

/// Unions every mismatched boundary pair, then remaps the image in one
/// parallel pass.
fn merge_disjoint_set(labels: &mut LabelImage, pairs: &[BoundaryPair]) -> usize {
    let max_label = labels.max_label();
    let mut uf = UnionFind::with_len(max_label);
    let mut merges = 0;
    {
        let pixels = labels.labels().pixels();
        for &(a, b) in pairs {
            let (la, lb) = (pixels[a], pixels[b]);
            if la != 0 && lb != 0 && uf.union(la, lb) {
                merges += 1;
            }
        }
    }
    if merges == 0 {
        return 0;
    }

    let roots = uf.root_map();
    labels
        .labels_mut()
        .pixels_mut()
        .par_iter_mut()
        .for_each(|label| *label = roots[*label as usize]);
    merges
}

/// Repeats full passes over the boundary; each mismatch rewrites every pixel
/// of the larger label to the smaller one. Stops after a pass with no change.
fn merge_rewrite(labels: &mut LabelImage, pairs: &[BoundaryPair]) -> usize {
    let pixels = labels.labels_mut().pixels_mut();
    let mut merges = 0;
    loop {
        let mut changed = false;
        for &(a, b) in pairs {
            let (la, lb) = (pixels[a], pixels[b]);
            if la == 0 || lb == 0 || la == lb {
                continue;
            }
            let (smaller, larger) = if la < lb { (la, lb) } else { (lb, la) };
            pixels.par_iter_mut().for_each(|label| {
                if *label == larger {
                    *label = smaller;
                }
            });
            merges += 1;
            changed = true;
        }
        if !changed {
            return merges;
        }
    }
}
