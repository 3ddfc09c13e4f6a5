//! Device memory budgeting and chunk partitioning.
//!
//! Every device pass works on one chunk of the image at a time. The chunk count
//! comes from comparing an upper-bound estimate of the pass's workspace with the
//! memory the device reports as free. Counts are powers of four so the chunk
//! grid stays square.

use crate::config::Config;
use crate::device::Device;
use crate::error::DeviceError;

#[cfg(test)]
mod tests;

/// Cleared border added around every chunk before labeling.
pub const HALO: usize = 1;

/// Labeling workspace per padded pixel: 1 byte of mask, two 4-byte label
/// buffers and 9 bytes of kernel scratch.
pub const LABELING_BYTES_PER_PIXEL: f64 = 18.0;

/// Label histogram workspace: one 4-byte label per pixel plus slack.
pub const HISTOGRAM_ELEMENT_SIZE: u64 = 4;
pub const HISTOGRAM_OVERHEAD: f64 = 1.1;

/// Upper bound on the device bytes needed to process `image_bytes` bytes of
/// one-byte-per-pixel raster with `element_size` bytes per element and
/// `overhead_factor` bytes of workspace per element byte.
///
/// The result is never below `image_bytes * element_size * overhead_factor`.
pub fn estimate(
    image_bytes: u64,
    element_size: u64,
    overhead_factor: f64,
    safety_margin: f64,
) -> u64 {
    debug_assert!(overhead_factor >= 0.0 && safety_margin >= 0.0);
    let base = image_bytes as f64 * element_size as f64 * overhead_factor;
    (base * (1.0 + safety_margin)).ceil() as u64
}

/// Workspace needed to label a `width` x `height` image, halo included.
pub fn labeling_estimate(width: usize, height: usize, safety_margin: f64) -> u64 {
    let padded = ((width + 2 * HALO) * (height + 2 * HALO)) as u64;
    estimate(padded, 1, LABELING_BYTES_PER_PIXEL, safety_margin)
}

/// Workspace needed to histogram the labels of a `width` x `height` image.
/// The bin array is not chunked and is accounted separately.
pub fn histogram_estimate(width: usize, height: usize, safety_margin: f64) -> u64 {
    estimate(
        (width * height) as u64,
        HISTOGRAM_ELEMENT_SIZE,
        HISTOGRAM_OVERHEAD,
        safety_margin,
    )
}

/// Number of chunks needed so that one chunk's share of `required_bytes`
/// fits in `free_bytes`: 1 when everything fits, otherwise the smallest power
/// of four that does.
pub fn decide(required_bytes: u64, free_bytes: u64) -> Result<usize, DeviceError> {
    if required_bytes <= free_bytes {
        return Ok(1);
    }
    let insufficient = || DeviceError::InsufficientMemory {
        required: required_bytes,
        free: free_bytes,
    };
    if free_bytes == 0 {
        return Err(insufficient());
    }

    let mut chunks: u64 = 4;
    while required_bytes.div_ceil(chunks) > free_bytes {
        chunks = chunks.checked_mul(4).ok_or_else(insufficient)?;
    }
    usize::try_from(chunks).map_err(|_| insufficient())
}

/// A rectangular region of the image. `x_max` and `y_max` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Row-major position in the chunk grid.
    pub index: usize,
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl Chunk {
    #[inline]
    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub fn padded_width(&self) -> usize {
        self.width() + 2 * HALO
    }

    #[inline]
    pub fn padded_height(&self) -> usize {
        self.height() + 2 * HALO
    }
}

/// Grid side length for `number_of_chunks`: `max(1, floor(sqrt(n)))`.
pub fn chunks_per_dim(number_of_chunks: usize) -> usize {
    let mut side = (number_of_chunks as f64).sqrt() as usize;
    while side * side > number_of_chunks {
        side -= 1;
    }
    while (side + 1) * (side + 1) <= number_of_chunks {
        side += 1;
    }
    side.max(1)
}

/// Splits a `rows` x `cols` image into a square grid of chunks in row-major
/// order. The last chunk of each row and column absorbs the remainder pixels.
///
/// The grid side is clamped to `min(rows, cols)` so that no chunk is empty.
pub fn partition(rows: usize, cols: usize, number_of_chunks: usize) -> Vec<Chunk> {
    if rows == 0 || cols == 0 {
        return Vec::new();
    }
    let per_dim = chunks_per_dim(number_of_chunks).min(rows).min(cols);
    let step_x = cols / per_dim;
    let step_y = rows / per_dim;

    let bounds = |i: usize, step: usize, extent: usize| {
        let end = if i + 1 == per_dim { extent } else { (i + 1) * step };
        (i * step, end)
    };

    (0..per_dim * per_dim)
        .map(|index| {
            let (x_min, x_max) = bounds(index % per_dim, step_x, cols);
            let (y_min, y_max) = bounds(index / per_dim, step_y, rows);
            Chunk {
                index,
                x_min,
                x_max,
                y_min,
                y_max,
            }
        })
        .collect()
}

/// Chooses the chunk grid for one pass.
///
/// `required_bytes` scales with the image and is split across chunks;
/// `fixed_bytes` is allocated in full for every chunk.
pub(crate) fn plan(
    device: &dyn Device,
    config: &Config,
    operation: &'static str,
    required_bytes: u64,
    fixed_bytes: u64,
    rows: usize,
    cols: usize,
) -> Result<Vec<Chunk>, DeviceError> {
    let chunk_count = match config.force_chunks {
        Some(forced) => {
            tracing::debug!(operation, chunks = forced, "Using forced chunk count");
            forced
        }
        None => {
            let free = match config.available_memory {
                Some(bytes) => bytes,
                None => device.memory_info()?.free,
            };
            if fixed_bytes >= free {
                return Err(DeviceError::InsufficientMemory {
                    required: fixed_bytes.saturating_add(required_bytes),
                    free,
                });
            }
            let chunks = decide(required_bytes, free - fixed_bytes)?;
            tracing::info!(
                operation,
                device = device.name(),
                required_bytes,
                fixed_bytes,
                free_bytes = free,
                chunks,
                "Planned chunk grid"
            );
            chunks
        }
    };

    let chunks = partition(rows, cols, chunk_count);
    let side = chunks_per_dim(chunk_count);
    if chunks.len() < side * side {
        tracing::warn!(
            operation,
            requested = chunk_count,
            actual = chunks.len(),
            rows,
            cols,
            "Chunk grid clamped to image size"
        );
    }
    Ok(chunks)
}
