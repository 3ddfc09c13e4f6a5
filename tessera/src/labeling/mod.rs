//! Connected component labeling of binary images, one memory-budgeted chunk at
//! a time.
//!
//! Each chunk is cut out with a cleared halo, labeled in isolation on the
//! device, and written back with a running [`GlobalLabelOffset`] added so that
//! label ranges from different chunks never collide. Regions cut by chunk
//! edges keep distinct labels until [`crate::merge`] unifies them.

mod rle;
mod union_find;


pub use rle::label_mask;
pub(crate) use union_find::UnionFind;

use std::ops::Index;

use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;

use crate::budget::{self, Chunk, HALO};
use crate::config::Config;
use crate::device::{ChunkLabels, Device};
use crate::error::{Error, Result};

// ============================================================================
// LabelImage
// ============================================================================

/// Per-pixel region ids. 0 is background; ids need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelImage {
    labels: Buffer2<u32>,
}

impl LabelImage {
    pub fn from_buffer(labels: Buffer2<u32>) -> Self {
        Self { labels }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.labels.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.labels.height()
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    #[inline]
    pub(crate) fn labels_mut(&mut self) -> &mut Buffer2<u32> {
        &mut self.labels
    }

    pub fn into_buffer(self) -> Buffer2<u32> {
        self.labels
    }

    /// Largest label present, 0 if the image is all background.
    pub fn max_label(&self) -> u32 {
        self.labels.par_iter().copied().max().unwrap_or(0)
    }

    /// Number of foreground pixels.
    pub fn count_nonzero(&self) -> usize {
        self.labels.par_iter().filter(|&&l| l != 0).count()
    }

    /// Mask of the pixels carrying `label`.
    pub fn mask_of(&self, label: u32) -> BitBuffer2 {
        BitBuffer2::par_from_fn(self.width(), self.height(), |x, y| {
            self.labels[(x, y)] == label
        })
    }
}

impl Index<(usize, usize)> for LabelImage {
    type Output = u32;

    #[inline]
    fn index(&self, pos: (usize, usize)) -> &Self::Output {
        &self.labels[pos]
    }
}

// ============================================================================
// GlobalLabelOffset
// ============================================================================

/// Base added to chunk-local labels. Grows by each chunk's maximum local label.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GlobalLabelOffset(u32);

impl GlobalLabelOffset {
    #[inline]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Maps a chunk-local label into the global range; background stays 0.
    #[inline]
    pub fn apply(&self, local: u32) -> u32 {
        if local == 0 {
            0
        } else {
            local + self.0
        }
    }

    #[inline]
    pub fn advance(&mut self, max_local_label: u32) {
        self.0 += max_local_label;
    }
}

// ============================================================================
// Chunked labeling
// ============================================================================

/// Rejects images that are empty or whose haloed size overflows 32-bit labels.
pub(crate) fn validate_shape(width: usize, height: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage { width, height });
    }
    let padded = (width as u64 + 2 * HALO as u64) * (height as u64 + 2 * HALO as u64);
    if padded > u32::MAX as u64 {
        return Err(Error::TooLarge {
            pixels: width as u64 * height as u64,
        });
    }
    Ok(())
}

/// Labels `image` chunk by chunk. Labels are unique per chunk-local region;
/// regions crossing chunk edges are not yet unified.
pub(crate) fn label_chunks(
    device: &mut dyn Device,
    config: &Config,
    image: &BitBuffer2,
) -> Result<(LabelImage, Vec<Chunk>)> {
    let (width, height) = (image.width(), image.height());
    validate_shape(width, height)?;

    let required = budget::labeling_estimate(width, height, config.safety_margin);
    let chunks = budget::plan(&*device, config, "labeling", required, 0, height, width)?;

    let mut labels = Buffer2::new_default(width, height);
    let mut offset = GlobalLabelOffset::default();

    for chunk in &chunks {
        let padded = image.crop_padded(
            chunk.x_min,
            chunk.y_min,
            chunk.width(),
            chunk.height(),
            HALO,
        );
        let local = device.label_chunk(&padded)?;
        write_chunk(&mut labels, chunk, &local, offset);

        tracing::debug!(
            chunk = chunk.index,
            x = chunk.x_min,
            y = chunk.y_min,
            width = chunk.width(),
            height = chunk.height(),
            max_local_label = local.max_label,
            offset = offset.value(),
            "Labeled chunk"
        );
        offset.advance(local.max_label);
    }

    Ok((LabelImage::from_buffer(labels), chunks))
}

/// Copies the interior of a haloed chunk result into the global label buffer.
fn write_chunk(
    labels: &mut Buffer2<u32>,
    chunk: &Chunk,
    local: &ChunkLabels,
    offset: GlobalLabelOffset,
) {
    debug_assert_eq!(local.labels.width(), chunk.padded_width());
    debug_assert_eq!(local.labels.height(), chunk.padded_height());

    for row in 0..chunk.height() {
        let src = &local.labels.row(row + HALO)[HALO..HALO + chunk.width()];
        let dst = &mut labels.row_mut(chunk.y_min + row)[chunk.x_min..chunk.x_max];
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = offset.apply(s);
        }
    }
}
