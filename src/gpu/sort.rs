//! GPU depth sorter: key generation plus a stable LSD radix sort.
//!
//! Sorting runs entirely on the device every iteration; nothing about the
//! order is persisted. Keys are order-preserving u32 encodings of the
//! camera-space depth metric, so ascending key order is front-to-back draw
//! order. Ties resolve by ascending point index because pairs are generated
//! in index order and every radix pass is stable.

use crate::gpu::{buffers, matrix_to_gpu, storage_entry, uniform_entry};
use nalgebra::Matrix4;
use wgpu::util::DeviceExt;
use wgpu::*;

const BLOCK_SIZE: u32 = 256;

/// Ping-pong pair storage plus per-pass histograms, owned by the caller and
/// resized to the point count. The sorter itself is stateless between calls.
pub struct SortBuffers {
    keys_a: Buffer,
    values_a: Buffer,
    keys_b: Buffer,
    values_b: Buffer,
    histograms: Buffer,
    capacity: u32,
    len: u32,
}

impl SortBuffers {
    pub fn new(device: &Device, capacity: u32) -> Self {
        let capacity = capacity.max(1);
        let pair_size = (capacity as u64) * 4;
        let num_blocks = ((capacity + BLOCK_SIZE - 1) / BLOCK_SIZE) as u64;
        let make = |label: &str, size: u64| {
            buffers::create_buffer(
                device,
                label,
                size,
                BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            )
        };
        Self {
            keys_a: make("sort keys a", pair_size),
            values_a: make("sort values a", pair_size),
            keys_b: make("sort keys b", pair_size),
            values_b: make("sort values b", pair_size),
            histograms: make("sort histograms", 256 * num_blocks * 4),
            capacity,
            len: 0,
        }
    }

    /// Reallocate if the element count changed. Replaced buffers may still be
    /// referenced by in-flight submissions; wgpu keeps them alive until those
    /// complete.
    fn ensure(&mut self, device: &Device, count: u32) {
        if count.max(1) != self.capacity {
            *self = Self::new(device, count);
        }
    }

    /// Number of sorted pairs produced by the last sort.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Point indices in sorted (front-to-back) order. Valid after a sort;
    /// with zero points the buffer is a placeholder and `len()` is 0.
    pub fn sorted_indices(&self) -> &Buffer {
        &self.values_a
    }

    /// Sorted keys, for tests and debug readbacks.
    pub fn sorted_keys(&self) -> &Buffer {
        &self.keys_a
    }
}

/// Depth sorter: a key-generation pipeline plus the three radix phases.
pub struct DepthSorter {
    pairs_pipeline: ComputePipeline,
    pairs_bind_group_layout: BindGroupLayout,
    histogram_pipeline: ComputePipeline,
    scan_pipeline: ComputePipeline,
    scatter_pipeline: ComputePipeline,
    radix_bind_group_layout: BindGroupLayout,
}

impl DepthSorter {
    pub fn new(device: &Device) -> Self {
        let pairs_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Sort Pairs Shader"),
            source: ShaderSource::Wgsl(include_str!("sort_pairs.wgsl").into()),
        });
        let radix_shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Radix Sort Shader"),
            source: ShaderSource::Wgsl(include_str!("radix_sort.wgsl").into()),
        });

        let pairs_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Sort Pairs Bind Group Layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(1, true),  // positions
                    storage_entry(2, false), // keys
                    storage_entry(3, false), // indices
                ],
            });
        let radix_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("Radix Sort Bind Group Layout"),
                entries: &[
                    uniform_entry(0),
                    storage_entry(1, true),  // src keys
                    storage_entry(2, true),  // src values
                    storage_entry(3, false), // dst keys
                    storage_entry(4, false), // dst values
                    storage_entry(5, false), // histograms
                ],
            });

        let pairs_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Sort Pairs Pipeline Layout"),
            bind_group_layouts: &[&pairs_bind_group_layout],
            push_constant_ranges: &[],
        });
        let radix_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Radix Sort Pipeline Layout"),
            bind_group_layouts: &[&radix_bind_group_layout],
            push_constant_ranges: &[],
        });

        let make_radix_pipeline = |label: &str, entry_point: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&radix_pipeline_layout),
                module: &radix_shader,
                entry_point,
            })
        };

        Self {
            pairs_pipeline: device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some("Sort Pairs Pipeline"),
                layout: Some(&pairs_pipeline_layout),
                module: &pairs_shader,
                entry_point: "generate_pairs",
            }),
            pairs_bind_group_layout,
            histogram_pipeline: make_radix_pipeline("Radix Histogram Pipeline", "block_histograms"),
            scan_pipeline: make_radix_pipeline("Radix Scan Pipeline", "scan_histograms"),
            scatter_pipeline: make_radix_pipeline("Radix Scatter Pipeline", "scatter"),
            radix_bind_group_layout,
        }
    }

    /// Record a full depth sort into `encoder`.
    ///
    /// `positions` is borrowed for this recording only. Zero points records
    /// no dispatch and leaves an empty result; a single point needs key
    /// generation but no radix passes.
    pub fn sort(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        positions: &Buffer,
        count: u32,
        view: &Matrix4<f32>,
        depth_sign: f32,
        bufs: &mut SortBuffers,
    ) {
        bufs.ensure(device, count);
        bufs.len = count;
        if count == 0 {
            return;
        }

        self.generate_pairs(device, encoder, positions, count, view, depth_sign, bufs);
        if count <= 1 {
            return;
        }

        let num_blocks = (count + BLOCK_SIZE - 1) / BLOCK_SIZE;

        // Four 8-bit passes cover the full key; an even pass count lands the
        // result back in the `a` buffers.
        for pass in 0..4u32 {
            let params = RadixParams {
                num_elements: count,
                shift: pass * 8,
                num_blocks,
                _pad: 0,
            };
            let params_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
                label: Some("Radix Params"),
                contents: bytemuck::cast_slice(&[params]),
                usage: BufferUsages::UNIFORM,
            });

            let (src_keys, src_values, dst_keys, dst_values) = if pass % 2 == 0 {
                (&bufs.keys_a, &bufs.values_a, &bufs.keys_b, &bufs.values_b)
            } else {
                (&bufs.keys_b, &bufs.values_b, &bufs.keys_a, &bufs.values_a)
            };

            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("Radix Sort Bind Group"),
                layout: &self.radix_bind_group_layout,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: params_buffer.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: src_keys.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: src_values.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: dst_keys.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: dst_values.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 5,
                        resource: bufs.histograms.as_entire_binding(),
                    },
                ],
            });

            for (pipeline, label, workgroups) in [
                (&self.histogram_pipeline, "Radix Histogram Pass", num_blocks),
                (&self.scan_pipeline, "Radix Scan Pass", 1),
                (&self.scatter_pipeline, "Radix Scatter Pass", num_blocks),
            ] {
                let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn generate_pairs(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        positions: &Buffer,
        count: u32,
        view: &Matrix4<f32>,
        depth_sign: f32,
        bufs: &SortBuffers,
    ) {
        let params = SortPairsParams {
            view: matrix_to_gpu(view),
            num_points: count,
            depth_sign,
            _pad: [0; 2],
        };
        let params_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("Sort Pairs Params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Sort Pairs Bind Group"),
            layout: &self.pairs_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: positions.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: bufs.keys_a.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: bufs.values_a.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Sort Pairs Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pairs_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((count + BLOCK_SIZE - 1) / BLOCK_SIZE, 1, 1);
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SortPairsParams {
    view: [[f32; 4]; 4],
    num_points: u32,
    depth_sign: f32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct RadixParams {
    num_elements: u32,
    shift: u32,
    num_blocks: u32,
    _pad: u32,
}

#[cfg(test)]
mod tests {
    //! Host-side simulation of the radix phases. The shader and this model
    //! share the histogram layout and rank rule, so the model pins down the
    //! index arithmetic the GPU passes rely on.

    fn radix_pass(pairs: &[(u32, u32)], shift: u32) -> Vec<(u32, u32)> {
        let n = pairs.len();
        let num_blocks = (n + 255) / 256;
        let digit = |key: u32| ((key >> shift) & 0xff) as usize;

        // Phase 1: per-block histograms, digit-major.
        let mut hist = vec![0u32; 256 * num_blocks];
        for (i, (key, _)) in pairs.iter().enumerate() {
            hist[digit(*key) * num_blocks + i / 256] += 1;
        }

        // Phase 2: exclusive prefix sum.
        let mut sum = 0u32;
        for h in hist.iter_mut() {
            let v = *h;
            *h = sum;
            sum += v;
        }

        // Phase 3: scatter by base + in-block rank.
        let mut out = vec![(0u32, 0u32); n];
        let mut rank = vec![0u32; 256 * num_blocks];
        for (i, pair) in pairs.iter().enumerate() {
            let bin = digit(pair.0) * num_blocks + i / 256;
            out[(hist[bin] + rank[bin]) as usize] = *pair;
            rank[bin] += 1;
        }
        out
    }

    fn radix_sort(pairs: &[(u32, u32)]) -> Vec<(u32, u32)> {
        let mut data = pairs.to_vec();
        for pass in 0..4 {
            data = radix_pass(&data, pass * 8);
        }
        data
    }

    #[test]
    fn test_radix_model_sorts_random_keys() {
        // Deterministic pseudo-random keys spanning several blocks.
        let mut state = 0x1234_5678u32;
        let pairs: Vec<(u32, u32)> = (0..1000)
            .map(|i| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state, i)
            })
            .collect();

        let sorted = radix_sort(&pairs);
        let mut expected = pairs.clone();
        expected.sort_by_key(|&(key, idx)| (key, idx));
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_radix_model_is_stable() {
        // All keys equal: output order must be input order.
        let pairs: Vec<(u32, u32)> = (0..600).map(|i| (42, i)).collect();
        let sorted = radix_sort(&pairs);
        for (i, &(key, value)) in sorted.iter().enumerate() {
            assert_eq!(key, 42);
            assert_eq!(value, i as u32, "equal keys must keep index order");
        }
    }

    #[test]
    fn test_radix_model_partial_block() {
        let pairs: Vec<(u32, u32)> = (0..300).map(|i| (300 - i, i)).collect();
        let sorted = radix_sort(&pairs);
        for w in sorted.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
        assert_eq!(sorted[0], (1, 299));
    }
}
