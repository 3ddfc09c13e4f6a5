//! Largest labeled region.
//!
//! Label frequencies are counted on the device one memory-budgeted chunk at a
//! time and summed on the host, so the result does not depend on the chunk grid.


use common::BitBuffer2;
use rayon::prelude::*;

use crate::budget;
use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::labeling::{validate_shape, LabelImage};

/// Bytes per device-side histogram bin.
const DEVICE_BIN_BYTES: u64 = 4;

/// The largest connected region of a [`LabelImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Pixels of the region.
    pub mask: BitBuffer2,
    /// Pixel count of the region; equals the population of `mask`.
    pub size: usize,
    /// Label of the region, 0 when the image has no foreground.
    pub label: u32,
}

impl Component {
    fn empty(width: usize, height: usize) -> Self {
        Self {
            mask: BitBuffer2::new_default(width, height),
            size: 0,
            label: 0,
        }
    }
}

/// Counts of each label `0..num_bins` over the whole image.
pub(crate) fn label_histogram(
    device: &mut dyn Device,
    config: &Config,
    labels: &LabelImage,
    num_bins: usize,
) -> Result<Vec<u64>> {
    let (width, height) = (labels.width(), labels.height());
    validate_shape(width, height)?;

    let required = budget::histogram_estimate(width, height, config.safety_margin);
    let fixed = num_bins as u64 * DEVICE_BIN_BYTES;
    let chunks = budget::plan(
        &*device,
        config,
        "label_histogram",
        required,
        fixed,
        height,
        width,
    )?;

    let mut bins = vec![0u64; num_bins];
    for chunk in &chunks {
        let block = labels
            .labels()
            .crop(chunk.x_min, chunk.y_min, chunk.width(), chunk.height());
        let partial = device.label_histogram(&block, num_bins)?;
        bins.par_iter_mut()
            .zip(partial.par_iter())
            .for_each(|(total, &count)| *total += count);
    }
    Ok(bins)
}

/// Finds the most populous label; ties go to the lower label.
pub(crate) fn largest_component(
    device: &mut dyn Device,
    config: &Config,
    labels: &LabelImage,
) -> Result<Component> {
    let (width, height) = (labels.width(), labels.height());
    validate_shape(width, height)?;

    let num_labels = labels.max_label();
    let component = match num_labels {
        0 => Component::empty(width, height),
        1 => {
            let mask = labels.mask_of(1);
            let size = mask.count_ones();
            Component {
                mask,
                size,
                label: 1,
            }
        }
        _ => {
            let bins = label_histogram(device, config, labels, num_labels as usize + 1)?;
            let (label, count) = argmax(&bins);
            let mask = labels.mask_of(label);
            debug_assert_eq!(mask.count_ones() as u64, count);
            Component {
                mask,
                size: count as usize,
                label,
            }
        }
    };

    tracing::debug!(
        num_labels,
        label = component.label,
        size = component.size,
        "Largest component"
    );
    Ok(component)
}

/// Index and count of the largest bin above 0. A strict comparison keeps the
/// first of equal maxima.
fn argmax(bins: &[u64]) -> (u32, u64) {
    let mut best = (0u32, 0u64);
    for (label, &count) in bins.iter().enumerate().skip(1) {
        if count > best.1 {
            best = (label as u32, count);
        }
    }
    best
}
