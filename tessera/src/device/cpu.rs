//! Host implementation of [`Device`], backed by rayon.

use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;
use sysinfo::System;

use super::{ChunkLabels, Device, MemoryInfo};
use crate::error::DeviceError;
use crate::labeling::label_mask;

/// Runs the chunk kernels on the host. Free memory is the system's available RAM.
#[derive(Debug, Default)]
pub struct CpuDevice;

impl CpuDevice {
    pub fn new() -> Self {
        Self
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn memory_info(&self) -> Result<MemoryInfo, DeviceError> {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(DeviceError::MemoryQuery(
                "system reported no physical memory".to_string(),
            ));
        }
        Ok(MemoryInfo {
            free: sys.available_memory(),
            total,
        })
    }

    fn label_chunk(&mut self, mask: &BitBuffer2) -> Result<ChunkLabels, DeviceError> {
        let mut labels = Buffer2::new_default(mask.width(), mask.height());
        let max_label = label_mask(mask, &mut labels);
        Ok(ChunkLabels { labels, max_label })
    }

    fn label_histogram(
        &mut self,
        labels: &[u32],
        num_bins: usize,
    ) -> Result<Vec<u64>, DeviceError> {
        Ok(histogram_labels(labels, num_bins))
    }
}

/// One partial histogram per worker, summed element-wise.
pub(crate) fn histogram_labels(labels: &[u32], num_bins: usize) -> Vec<u64> {
    if labels.is_empty() {
        return vec![0; num_bins];
    }
    let block = labels
        .len()
        .div_ceil(rayon::current_num_threads())
        .max(4096);

    labels
        .par_chunks(block)
        .map(|part| {
            let mut bins = vec![0u64; num_bins];
            for &label in part {
                if let Some(bin) = bins.get_mut(label as usize) {
                    *bin += 1;
                }
            }
            bins
        })
        .reduce(
            || vec![0u64; num_bins],
            |mut acc, part| {
                acc.iter_mut().zip(&part).for_each(|(a, b)| *a += b);
                acc
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_info_reports_system_memory() {
        let info = CpuDevice::new().memory_info().unwrap();
        assert!(info.total > 0);
        assert!(info.free <= info.total);
    }

    #[test]
    fn test_histogram_counts_each_label() {
        let labels = [0, 1, 1, 2, 0, 2, 2, 3];
        let bins = CpuDevice::new().label_histogram(&labels, 4).unwrap();
        assert_eq!(bins, vec![2, 2, 3, 1]);
    }

    #[test]
    fn test_histogram_ignores_out_of_range_labels() {
        let bins = histogram_labels(&[0, 5, 1, 9], 2);
        assert_eq!(bins, vec![1, 1]);
    }

    #[test]
    fn test_histogram_large_input_matches_sequential() {
        let labels: Vec<u32> = (0..100_000u32).map(|i| (i * 7919) % 37).collect();
        let mut expected = vec![0u64; 37];
        for &l in &labels {
            expected[l as usize] += 1;
        }
        assert_eq!(histogram_labels(&labels, 37), expected);
    }

    #[test]
    fn test_label_chunk_single_component() {
        let mask = BitBuffer2::from_fn(4, 3, |x, y| (1..3).contains(&x) && y == 1);
        let result = CpuDevice::new().label_chunk(&mask).unwrap();
        assert_eq!(result.max_label, 1);
        assert_eq!(result.labels.row(1), &[0, 1, 1, 0]);
        assert_eq!(result.labels.row(0), &[0, 0, 0, 0]);
    }
}
