//! Memory-budgeted connected component labeling for large 2D rasters.
//!
//! Images are labeled in chunks sized to the memory the compute device reports
//! as free. Labels of regions split by chunk edges are unified afterwards, so
//! results do not depend on how the image was partitioned.
//!
//! On top of the labeling engine sit [`largest_component`], which extracts the
//! most populous region, and [`largest_area_connected_components`], which
//! searches for an intensity cutoff whose largest region covers a requested
//! share of the image.
//!
//! The free functions build a default [`Engine`] per call. Batch callers
//! should create one [`Engine`] and reuse it.

pub mod budget;
pub mod config;
pub mod device;
mod engine;
pub mod error;
pub mod labeling;
pub mod merge;
pub mod region;
pub mod threshold;

#[cfg(test)]
pub(crate) mod test_utils;

pub use common::{BitBuffer2, Buffer2};

pub use config::{Backend, Config, MergeStrategy};
pub use device::{ChunkLabels, CpuDevice, Device, MemoryInfo};
#[cfg(feature = "gpu")]
pub use device::GpuDevice;
pub use engine::Engine;
pub use error::{DeviceError, Error, Result};
pub use labeling::{GlobalLabelOffset, LabelImage};
pub use region::Component;
pub use threshold::SearchOutcome;

/// Labels the 4-connected foreground regions of `image` with a default engine.
pub fn connected_components(image: &BitBuffer2) -> Result<LabelImage> {
    Engine::new(Config::default())?.connected_components(image)
}

/// The largest region of `labels` and its pixel count, using a default engine.
pub fn largest_component(labels: &LabelImage) -> Result<Component> {
    Engine::new(Config::default())?.largest_component(labels)
}

/// Mask of the largest connected region above an adaptively chosen intensity
/// cutoff, covering roughly `percent_pixels` percent of the eligible pixels.
pub fn largest_area_connected_components(
    image: &Buffer2<f32>,
    mask: Option<&BitBuffer2>,
    percent_pixels: f32,
) -> Result<BitBuffer2> {
    Engine::new(Config::default())?.largest_area_connected_components(image, mask, percent_pixels)
}
