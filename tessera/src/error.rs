//! Error types for labeling and region extraction.

use thiserror::Error;

/// Failures reported by a [`crate::device::Device`].
///
/// None of these are retried; a failed chunk aborts the whole operation.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No usable compute device: {0}")]
    Unavailable(String),

    #[error("Failed to query device memory: {0}")]
    MemoryQuery(String),

    #[error("Insufficient device memory: {required} bytes required, {free} bytes free")]
    InsufficientMemory { required: u64, free: u64 },

    #[error("Failed to allocate {bytes} bytes for '{label}': {message}")]
    Allocation {
        label: &'static str,
        bytes: u64,
        message: String,
    },

    #[error("Kernel '{kernel}' failed: {message}")]
    Kernel {
        kernel: &'static str,
        message: String,
    },

    #[error("Device transfer failed: {0}")]
    Transfer(String),
}

/// Errors returned by the public operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Image is empty ({width}x{height})")]
    EmptyImage { width: usize, height: usize },

    #[error("Mask dimensions {mask:?} do not match image dimensions {image:?}")]
    DimensionMismatch {
        image: (usize, usize),
        mask: (usize, usize),
    },

    #[error("Image has {pixels} pixels, more than 32-bit labels can address")]
    TooLarge { pixels: u64 },

    #[error("percent_pixels must be in (0, 100], got {0}")]
    InvalidPercent(f32),

    #[error("Device failure: {0}")]
    Device(#[from] DeviceError),
}

impl Error {
    /// True for errors caused by the shape of the caller's inputs.
    pub fn is_input_shape(&self) -> bool {
        matches!(
            self,
            Error::EmptyImage { .. } | Error::DimensionMismatch { .. } | Error::TooLarge { .. }
        )
    }

    /// True for device and memory failures.
    pub fn is_resource(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
