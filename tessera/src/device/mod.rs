//! Compute devices that run the per-chunk kernels.
//!
//! A [`Device`] labels one haloed chunk or histograms one block of labels at a
//! time. Calls never overlap: each call allocates its buffers, runs to
//! completion and releases everything before returning.

mod cpu;
#[cfg(feature = "gpu")]
mod gpu;

pub use cpu::CpuDevice;
#[cfg(feature = "gpu")]
pub use gpu::GpuDevice;

use common::{BitBuffer2, Buffer2};

use crate::config::Backend;
use crate::error::DeviceError;

/// Memory reported by a device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: u64,
    pub total: u64,
}

/// Dense chunk-local labels produced by [`Device::label_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLabels {
    /// Same dimensions as the input mask. 0 is background; foreground
    /// components are numbered 1..=`max_label` in raster order of their
    /// first pixel.
    pub labels: Buffer2<u32>,
    pub max_label: u32,
}

pub trait Device: std::fmt::Debug + Send {
    /// Short human-readable name for logs.
    fn name(&self) -> &str;

    /// Memory currently available for chunk workspaces.
    fn memory_info(&self) -> Result<MemoryInfo, DeviceError>;

    /// Labels the 4-connected foreground components of `mask`.
    fn label_chunk(&mut self, mask: &BitBuffer2) -> Result<ChunkLabels, DeviceError>;

    /// Counts occurrences of each label in `0..num_bins`. Labels outside that
    /// range are ignored.
    fn label_histogram(&mut self, labels: &[u32], num_bins: usize)
        -> Result<Vec<u64>, DeviceError>;
}

/// Creates the device selected by `backend`.
///
/// `Backend::Auto` falls back to the CPU when no GPU can be initialized.
pub fn create(backend: Backend) -> Result<Box<dyn Device>, DeviceError> {
    match backend {
        Backend::Cpu => Ok(Box::new(CpuDevice::new())),
        Backend::Gpu => create_gpu(),
        Backend::Auto => match create_gpu() {
            Ok(device) => Ok(device),
            Err(e) => {
                tracing::warn!("GPU initialization failed, falling back to CPU: {}", e);
                Ok(Box::new(CpuDevice::new()))
            }
        },
    }
}

#[cfg(feature = "gpu")]
fn create_gpu() -> Result<Box<dyn Device>, DeviceError> {
    Ok(Box::new(GpuDevice::new()?))
}

#[cfg(not(feature = "gpu"))]
fn create_gpu() -> Result<Box<dyn Device>, DeviceError> {
    Err(DeviceError::Unavailable(
        "built without the `gpu` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_cpu() {
        let device = create(Backend::Cpu).unwrap();
        assert_eq!(device.name(), "cpu");
    }

    #[test]
    fn test_create_gpu_never_falls_back() {
        match create(Backend::Gpu) {
            Ok(device) => assert_ne!(device.name(), "cpu"),
            Err(e) => assert!(matches!(e, DeviceError::Unavailable(_)), "{e}"),
        }
    }

    #[test]
    fn test_create_auto_always_succeeds() {
        let device = create(Backend::Auto).unwrap();
        assert!(!device.name().is_empty());
    }
}
