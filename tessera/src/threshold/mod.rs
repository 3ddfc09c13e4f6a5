//! Adaptive intensity cutoff whose largest connected region covers a target
//! fraction of the eligible pixels.
//!
//! The search starts from the histogram bin that admits `headroom` times the
//! target pixel count, then bisects a bracket of bins below it: a region that
//! is too small lowers the cutoff, one that is too large raises it. The search
//! is fail-open: when it cannot converge it returns the last non-empty region,
//! or the whole eligible area if no region was ever found.


use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;

use crate::config::Config;
use crate::device::Device;
use crate::engine;
use crate::error::{Error, Result};
use crate::labeling::validate_shape;
use crate::region;

/// Result of [`crate::Engine::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Selected region.
    pub mask: BitBuffer2,
    /// Population of `mask`.
    pub size: usize,
    /// Histogram bin of the last evaluated cutoff.
    pub cutoff_bin: usize,
    /// Number of cutoffs evaluated.
    pub iterations: usize,
    /// True when `size` landed inside the tolerance band.
    pub converged: bool,
}

// ============================================================================
// Histogram and binarization
// ============================================================================

/// Bin of `value` over [0, 1]. Out-of-range values clamp to the end bins;
/// NaN has no bin.
#[inline]
fn bin_of(value: f32, num_bins: usize) -> Option<usize> {
    if value.is_nan() {
        return None;
    }
    let scaled = (value * num_bins as f32).floor();
    Some((scaled.max(0.0) as usize).min(num_bins - 1))
}

/// Intensity histogram of the pixels selected by `mask` (all pixels if None).
pub fn intensity_histogram(
    image: &Buffer2<f32>,
    mask: Option<&BitBuffer2>,
    num_bins: usize,
) -> Vec<u64> {
    (0..image.height())
        .into_par_iter()
        .fold(
            || vec![0u64; num_bins],
            |mut bins, y| {
                for (x, &value) in image.row(y).iter().enumerate() {
                    if mask.is_some_and(|m| !m.get_xy(x, y)) {
                        continue;
                    }
                    if let Some(bin) = bin_of(value, num_bins) {
                        bins[bin] += 1;
                    }
                }
                bins
            },
        )
        .reduce(
            || vec![0u64; num_bins],
            |mut acc, part| {
                acc.iter_mut().zip(&part).for_each(|(a, b)| *a += b);
                acc
            },
        )
}

/// Walks down from the top bin until the cumulative count reaches `target`.
/// Returns 0 if it never does.
pub fn initial_front_bin(histogram: &[u64], target: f64) -> usize {
    let mut cumulative = 0u64;
    for bin in (0..histogram.len()).rev() {
        cumulative += histogram[bin];
        if cumulative as f64 >= target {
            return bin;
        }
    }
    0
}

/// Pixels strictly above `cutoff` and selected by `mask`.
pub fn binarize(image: &Buffer2<f32>, mask: Option<&BitBuffer2>, cutoff: f32) -> BitBuffer2 {
    BitBuffer2::par_from_fn(image.width(), image.height(), |x, y| {
        image[(x, y)] > cutoff && mask.map_or(true, |m| m.get_xy(x, y))
    })
}

// ============================================================================
// Search
// ============================================================================

pub(crate) fn validate_inputs(
    image: &Buffer2<f32>,
    mask: Option<&BitBuffer2>,
    percent_pixels: f32,
) -> Result<()> {
    validate_shape(image.width(), image.height())?;
    if let Some(mask) = mask {
        if mask.width() != image.width() || mask.height() != image.height() {
            return Err(Error::DimensionMismatch {
                image: (image.width(), image.height()),
                mask: (mask.width(), mask.height()),
            });
        }
    }
    if !percent_pixels.is_finite() || percent_pixels <= 0.0 || percent_pixels > 100.0 {
        return Err(Error::InvalidPercent(percent_pixels));
    }
    Ok(())
}

pub(crate) fn search(
    device: &mut dyn Device,
    config: &Config,
    image: &Buffer2<f32>,
    mask: Option<&BitBuffer2>,
    percent_pixels: f32,
) -> Result<SearchOutcome> {
    validate_inputs(image, mask, percent_pixels)?;

    let num_bins = config.num_bins;
    let eligible = mask.map_or(image.len(), |m| m.count_ones());
    let target = percent_pixels as f64 / 100.0 * eligible as f64;
    let lower = target * (1.0 - config.tolerance as f64);
    let upper = target * (1.0 + config.tolerance as f64);

    let histogram = intensity_histogram(image, mask, num_bins);
    let mut front = initial_front_bin(&histogram, config.headroom as f64 * target);
    let mut bin_max = front;
    let mut bin_min = 0usize;
    let mut evaluated = vec![false; num_bins];
    let mut last_region: Option<(BitBuffer2, usize)> = None;
    let mut iterations = 0;

    tracing::debug!(eligible, target, front, "Starting threshold search");

    loop {
        iterations += 1;
        evaluated[front] = true;

        let cutoff = front as f32 / num_bins as f32;
        let foreground = binarize(image, mask, cutoff);
        let foreground_count = foreground.count_ones();

        let (size, region_mask) = if (foreground_count as f64) < lower {
            (foreground_count, None)
        } else {
            let labels = engine::connected_components(device, config, &foreground)?;
            let component = region::largest_component(device, config, &labels)?;
            (component.size, Some(component.mask))
        };

        tracing::debug!(
            iteration = iterations,
            front,
            bin_min,
            bin_max,
            foreground_count,
            size,
            "Evaluated cutoff"
        );

        if (size as f64) >= lower && (size as f64) <= upper {
            let mask = region_mask.unwrap_or_else(|| {
                BitBuffer2::new_default(image.width(), image.height())
            });
            tracing::info!(iterations, front, size, target, "Threshold search converged");
            return Ok(SearchOutcome {
                mask,
                size,
                cutoff_bin: front,
                iterations,
                converged: true,
            });
        }

        if let Some(region_mask) = region_mask.filter(|_| size > 0) {
            last_region = Some((region_mask, size));
        }

        if (size as f64) < lower {
            bin_max = front;
            front = front.saturating_sub(((bin_max - bin_min) / 2).max(1));
        } else {
            bin_min = front;
            front = (front + ((bin_max - bin_min) / 2).max(1)).min(num_bins - 1);
        }

        if bin_max <= bin_min || evaluated[front] || iterations >= config.max_iterations {
            break;
        }
    }

    let (mask, size) = match last_region {
        Some(region) => region,
        None => {
            let eligible_mask = match mask {
                Some(m) => m.clone(),
                None => BitBuffer2::new_filled(image.width(), image.height(), true),
            };
            (eligible_mask, eligible)
        }
    };
    tracing::warn!(
        iterations,
        front,
        size,
        target,
        "Threshold search did not converge, returning best available region"
    );
    Ok(SearchOutcome {
        mask,
        size,
        cutoff_bin: front,
        iterations,
        converged: false,
    })
}
