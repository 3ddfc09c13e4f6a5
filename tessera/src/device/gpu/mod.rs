//! wgpu implementation of [`Device`].
//!
//! Chunks are labeled by iterated min-label propagation with pointer jumping,
//! dispatched in batches between convergence checks. The converged labels are
//! compacted on the host into the same raster-order numbering the CPU labeler
//! produces. Allocation and validation failures are caught with error scopes
//! and reported as [`DeviceError`]s.

mod pipeline;


use bytemuck::{Pod, Zeroable};
use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use self::pipeline::ComputePipeline;
use super::{ChunkLabels, Device, MemoryInfo};
use crate::error::DeviceError;

/// Propagation passes encoded per submission between convergence checks.
const PROPAGATION_BATCH: usize = 8;

const LABEL_WORKGROUP: u32 = 16;
const HISTOGRAM_WORKGROUP: u32 = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PropagationParams {
    width: u32,
    height: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HistogramParams {
    len: u32,
    num_bins: u32,
    row_stride: u32,
    _pad: u32,
}

#[derive(Debug)]
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    name: String,
    propagation: ComputePipeline,
    histogram: ComputePipeline,
}

impl GpuDevice {
    /// Initializes wgpu on the highest-performance adapter available.
    pub fn new() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| DeviceError::Unavailable(format!("failed to find suitable GPU adapter: {e}")))?;

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("tessera_device"),
            required_limits: limits.clone(),
            ..Default::default()
        }))
        .map_err(|e| DeviceError::Unavailable(format!("failed to create device: {e}")))?;

        let info = adapter.get_info();
        let name = format!("gpu ({}, {:?})", info.name, info.backend);

        let propagation = ComputePipeline::label_propagation(&device);
        let histogram = ComputePipeline::label_histogram(&device);

        Ok(Self {
            device,
            queue,
            limits,
            name,
            propagation,
            histogram,
        })
    }

    fn wait(&self) -> Result<(), DeviceError> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| DeviceError::Transfer(format!("device poll failed: {e}")))
    }

    /// Rejects buffers larger than a single storage binding may be.
    fn check_binding(&self, bytes: u64) -> Result<(), DeviceError> {
        let max = self.limits.max_storage_buffer_binding_size as u64;
        if bytes > max {
            return Err(DeviceError::InsufficientMemory {
                required: bytes,
                free: max,
            });
        }
        Ok(())
    }

    fn check_workgroups(&self, kernel: &'static str, x: u32, y: u32) -> Result<(), DeviceError> {
        let max = self.limits.max_compute_workgroups_per_dimension;
        if x > max || y > max {
            return Err(DeviceError::Kernel {
                kernel,
                message: format!("dispatch {x}x{y} exceeds {max} workgroups per dimension"),
            });
        }
        Ok(())
    }

    /// Runs `f` inside validation and out-of-memory error scopes. Both scopes
    /// are popped even when `f` fails; a device error caught by them takes
    /// precedence over the result of `f`.
    fn scoped<T>(
        &self,
        kernel: &'static str,
        bytes: u64,
        f: impl FnOnce() -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let result = f();
        self.pop_scopes(kernel, bytes)?;
        result
    }

    fn pop_scopes(&self, kernel: &'static str, bytes: u64) -> Result<(), DeviceError> {
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        let validation = pollster::block_on(self.device.pop_error_scope());
        if let Some(e) = out_of_memory {
            return Err(DeviceError::Allocation {
                label: kernel,
                bytes,
                message: e.to_string(),
            });
        }
        if let Some(e) = validation {
            return Err(DeviceError::Kernel {
                kernel,
                message: e.to_string(),
            });
        }
        Ok(())
    }

    /// Copies `size` bytes of `source` to the host.
    fn read_back(&self, source: &wgpu::Buffer, size: u64) -> Result<Vec<u32>, DeviceError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = std::sync::mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait()?;
        receiver
            .recv()
            .map_err(|e| DeviceError::Transfer(e.to_string()))?
            .map_err(|e| DeviceError::Transfer(e.to_string()))?;

        let data = slice.get_mapped_range();
        let values: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        staging.destroy();
        Ok(values)
    }
}

impl Device for GpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    /// wgpu exposes no free-memory query; the budget is the largest storage
    /// binding the adapter allows.
    fn memory_info(&self) -> Result<MemoryInfo, DeviceError> {
        let free = self.limits.max_storage_buffer_binding_size as u64;
        if free == 0 {
            return Err(DeviceError::MemoryQuery(
                "adapter reports no storage buffer capacity".to_string(),
            ));
        }
        Ok(MemoryInfo {
            free,
            total: self.limits.max_buffer_size,
        })
    }

    fn label_chunk(&mut self, mask: &BitBuffer2) -> Result<ChunkLabels, DeviceError> {
        let (width, height) = (mask.width(), mask.height());
        let len = width * height;
        if len == 0 {
            return Ok(ChunkLabels {
                labels: Buffer2::new_default(width, height),
                max_label: 0,
            });
        }

        let bytes = (len * std::mem::size_of::<u32>()) as u64;
        self.check_binding(bytes)?;
        let groups_x = (width as u32).div_ceil(LABEL_WORKGROUP);
        let groups_y = (height as u32).div_ceil(LABEL_WORKGROUP);
        self.check_workgroups("label_propagation", groups_x, groups_y)?;

        let initial: Vec<u32> = (0..len)
            .into_par_iter()
            .map(|idx| if mask.get(idx) { idx as u32 + 1 } else { 0 })
            .collect();
        let params = PropagationParams {
            width: width as u32,
            height: height as u32,
            _pad0: 0,
            _pad1: 0,
        };

        let (labels_buffer, changed_buffer, params_buffer, bind_group) =
            self.scoped("label_propagation", bytes, || {
                let labels_buffer =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("chunk_labels_buffer"),
                            contents: bytemuck::cast_slice(&initial),
                            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                        });
                let changed_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("chunk_changed_buffer"),
                    size: std::mem::size_of::<u32>() as u64,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let params_buffer =
                    self.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("chunk_params_buffer"),
                            contents: bytemuck::bytes_of(&params),
                            usage: wgpu::BufferUsages::UNIFORM,
                        });
                let bind_group = self.propagation.bind_group(
                    &self.device,
                    "label_propagation_bind_group",
                    &[&params_buffer, &labels_buffer, &changed_buffer],
                );
                Ok((labels_buffer, changed_buffer, params_buffer, bind_group))
            })?;
        drop(initial);

        let mut passes = 0usize;
        loop {
            let changed = self.scoped("label_propagation", bytes, || {
                self.queue
                    .write_buffer(&changed_buffer, 0, bytemuck::bytes_of(&0u32));
                let mut encoder =
                    self.device
                        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                            label: Some("label_propagation_encoder"),
                        });
                for _ in 0..PROPAGATION_BATCH {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("label_propagation_pass"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&self.propagation.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(groups_x, groups_y, 1);
                }
                self.queue.submit(std::iter::once(encoder.finish()));
                self.read_back(&changed_buffer, std::mem::size_of::<u32>() as u64)
            })?;

            passes += PROPAGATION_BATCH;
            if changed.first().copied().unwrap_or(0) == 0 {
                break;
            }
        }

        let roots = self.read_back(&labels_buffer, bytes)?;
        labels_buffer.destroy();
        changed_buffer.destroy();
        params_buffer.destroy();

        let (labels, max_label) = compact_roots(&roots, width, height);
        tracing::trace!(width, height, passes, max_label, "GPU chunk labeled");
        Ok(ChunkLabels { labels, max_label })
    }

    fn label_histogram(
        &mut self,
        labels: &[u32],
        num_bins: usize,
    ) -> Result<Vec<u64>, DeviceError> {
        if labels.is_empty() || num_bins == 0 {
            return Ok(vec![0; num_bins]);
        }
        let label_bytes = std::mem::size_of_val(labels) as u64;
        let bin_bytes = (num_bins * std::mem::size_of::<u32>()) as u64;
        self.check_binding(label_bytes)?;
        self.check_binding(bin_bytes)?;

        let max_groups = self.limits.max_compute_workgroups_per_dimension;
        let total_groups = (labels.len() as u32).div_ceil(HISTOGRAM_WORKGROUP);
        let groups_x = total_groups.min(max_groups);
        let groups_y = total_groups.div_ceil(groups_x);
        self.check_workgroups("label_histogram", groups_x, groups_y)?;

        let params = HistogramParams {
            len: labels.len() as u32,
            num_bins: num_bins as u32,
            row_stride: groups_x * HISTOGRAM_WORKGROUP,
            _pad: 0,
        };

        let bins = self.scoped("label_histogram", label_bytes + bin_bytes, || {
            let labels_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("histogram_labels_buffer"),
                    contents: bytemuck::cast_slice(labels),
                    usage: wgpu::BufferUsages::STORAGE,
                });
            // wgpu zero-initializes new buffers.
            let bins_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("histogram_bins_buffer"),
                size: bin_bytes,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let params_buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("histogram_params_buffer"),
                    contents: bytemuck::bytes_of(&params),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = self.histogram.bind_group(
                &self.device,
                "label_histogram_bind_group",
                &[&params_buffer, &labels_buffer, &bins_buffer],
            );

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("label_histogram_encoder"),
                });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("label_histogram_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.histogram.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }
            self.queue.submit(std::iter::once(encoder.finish()));
            let bins = self.read_back(&bins_buffer, bin_bytes);
            labels_buffer.destroy();
            bins_buffer.destroy();
            params_buffer.destroy();
            bins
        })?;

        Ok(bins.into_iter().map(u64::from).collect())
    }
}

/// Renumbers converged propagation labels densely in raster order.
///
/// Each component holds its smallest pixel index + 1, i.e. its first pixel in
/// raster order, so a component's root pixel is visited before its other
/// pixels and their dense label is already known.
fn compact_roots(roots: &[u32], width: usize, height: usize) -> (Buffer2<u32>, u32) {
    let mut dense = vec![0u32; roots.len()];
    let mut count = 0u32;
    for (idx, &root) in roots.iter().enumerate() {
        if root == 0 {
            continue;
        }
        let root_idx = (root - 1) as usize;
        dense[idx] = if root_idx == idx {
            count += 1;
            count
        } else {
            dense[root_idx]
        };
    }
    (Buffer2::new(width, height, dense), count)
}
