//! Public entry point tying device, budget and the labeling stages together.

use common::{BitBuffer2, Buffer2};

use crate::config::Config;
use crate::device::{self, Device};
use crate::error::{Error, Result};
use crate::labeling::{self, LabelImage};
use crate::merge;
use crate::region::{self, Component};
use crate::threshold::{self, SearchOutcome};

/// Labels a binary image chunk by chunk and unifies labels across chunk edges.
pub(crate) fn connected_components(
    device: &mut dyn Device,
    config: &Config,
    image: &BitBuffer2,
) -> Result<LabelImage> {
    let (mut labels, chunks) = labeling::label_chunks(device, config, image)?;
    merge::merge_borders(&mut labels, &chunks, config.merge_strategy);
    Ok(labels)
}

/// Connected component engine bound to one compute device.
///
/// Reuse one engine for repeated calls: device initialization is not free.
///
/// # Example
///
/// ```no_run
/// use tessera::{Buffer2, Config, Engine};
///
/// let image = Buffer2::new_filled(512, 512, 0.5f32);
/// let mut engine = Engine::new(Config::default())?;
/// let region = engine.largest_area_connected_components(&image, None, 20.0)?;
/// println!("{} pixels selected", region.count_ones());
/// # Ok::<(), tessera::Error>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    device: Box<dyn Device>,
    config: Config,
}

impl Engine {
    /// Creates an engine on the device selected by `config.backend`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate();
        let device = device::create(config.backend).map_err(|e| {
            tracing::error!("Failed to create compute device: {}", e);
            Error::from(e)
        })?;
        tracing::info!(device = device.name(), "Engine initialized");
        Ok(Self { device, config })
    }

    /// Creates an engine on a caller-provided device.
    pub fn with_device(device: Box<dyn Device>, config: Config) -> Self {
        config.validate();
        Self { device, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Labels the 4-connected foreground regions of `image`.
    ///
    /// Regions are labeled 1..; background is 0. Labels are unique per region
    /// but need not be contiguous when the image was split into chunks.
    pub fn connected_components(&mut self, image: &BitBuffer2) -> Result<LabelImage> {
        log_resource_error(connected_components(
            self.device.as_mut(),
            &self.config,
            image,
        ))
    }

    /// The most populous region of `labels`; ties resolve to the lower label.
    pub fn largest_component(&mut self, labels: &LabelImage) -> Result<Component> {
        log_resource_error(region::largest_component(
            self.device.as_mut(),
            &self.config,
            labels,
        ))
    }

    /// Per-label pixel counts for labels `0..num_bins`.
    pub fn label_histogram(&mut self, labels: &LabelImage, num_bins: usize) -> Result<Vec<u64>> {
        log_resource_error(region::label_histogram(
            self.device.as_mut(),
            &self.config,
            labels,
            num_bins,
        ))
    }

    /// Searches for an intensity cutoff whose largest connected region covers
    /// `percent_pixels` percent of the pixels selected by `mask`.
    pub fn search(
        &mut self,
        image: &Buffer2<f32>,
        mask: Option<&BitBuffer2>,
        percent_pixels: f32,
    ) -> Result<SearchOutcome> {
        log_resource_error(threshold::search(
            self.device.as_mut(),
            &self.config,
            image,
            mask,
            percent_pixels,
        ))
    }

    /// Mask of the largest connected region found by [`Engine::search`].
    pub fn largest_area_connected_components(
        &mut self,
        image: &Buffer2<f32>,
        mask: Option<&BitBuffer2>,
        percent_pixels: f32,
    ) -> Result<BitBuffer2> {
        self.search(image, mask, percent_pixels)
            .map(|outcome| outcome.mask)
    }
}

fn log_resource_error<T>(result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_resource() {
            tracing::error!("{}", e);
        }
    }
    result
}
