//! Optimizable parameter storage on the device.
//!
//! A [`ParameterGroup`] bundles one flat float array of trainable values with
//! its gradient buffer and the two Adam moment buffers. The channel count is
//! a runtime field (3 for positions, 4 for colors); the optimizer kernel is
//! channel-agnostic and walks the flat array, so every group shares one
//! pipeline.
//!
//! Pipeline stages receive groups as plain `&Buffer` borrows for the duration
//! of one encoder recording and retain nothing.

use crate::gpu::buffers;
use wgpu::{Buffer, BufferUsages, CommandEncoder, Device, Queue};

/// Smallest backing allocation, in bytes. Zero-point groups keep a
/// placeholder allocation this size so bind groups stay valid; the logical
/// length is tracked separately and kernels guard on it.
const MIN_ALLOC: u64 = 16;

pub struct ParameterGroup {
    label: String,

    /// Floats per element (3 = positions, 4 = colors).
    pub channels: u32,

    /// Logical length in floats (`num_elements * channels`).
    len: u64,

    /// Trainable values, `len` floats.
    pub values: Buffer,

    /// Gradients, same shape as `values`. Cleared by the caller before each
    /// backward pass via [`ParameterGroup::clear_gradients`].
    pub gradients: Buffer,

    /// First/second Adam moments. Allocated lazily by the optimizer; their
    /// tracked length deliberately survives value reuploads of the same size
    /// so moments persist across training resets of an unchanged cloud.
    pub(crate) moments: Option<(Buffer, Buffer)>,
    pub(crate) moment_len: u64,
}

fn alloc_bytes(len: u64) -> u64 {
    (len * 4).max(MIN_ALLOC)
}

impl ParameterGroup {
    /// Upload a flat float array as a new parameter group.
    ///
    /// `data.len()` must be a multiple of `channels`; zero length is valid.
    pub fn new(device: &Device, label: &str, channels: u32, data: &[f32]) -> Self {
        assert!(channels > 0);
        assert_eq!(
            data.len() % channels as usize,
            0,
            "parameter data not a whole number of {}-float elements",
            channels
        );
        let len = data.len() as u64;

        let values = if data.is_empty() {
            buffers::create_buffer(
                device,
                &format!("{label} values"),
                alloc_bytes(0),
                BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            )
        } else {
            buffers::create_buffer_init(
                device,
                &format!("{label} values"),
                data,
                BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            )
        };
        let gradients = buffers::create_buffer(
            device,
            &format!("{label} gradients"),
            alloc_bytes(len),
            BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
        );

        Self {
            label: label.to_string(),
            channels,
            len,
            values,
            gradients,
            moments: None,
            moment_len: 0,
        }
    }

    /// Logical length in floats.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Number of elements (points).
    pub fn num_elements(&self) -> u64 {
        self.len / self.channels as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record a clear of the gradient buffer to zero.
    pub fn clear_gradients(&self, encoder: &mut CommandEncoder) {
        encoder.clear_buffer(&self.gradients, 0, None);
    }

    /// Overwrite the values with host data of the same length. Used by
    /// training reset; a changed length is a different group, not a reupload.
    pub fn upload(&self, queue: &Queue, data: &[f32]) {
        assert_eq!(
            data.len() as u64,
            self.len,
            "{}: upload length changed, rebuild the group instead",
            self.label
        );
        if !data.is_empty() {
            queue.write_buffer(&self.values, 0, bytemuck::cast_slice(data));
        }
    }

    /// (Re)allocate moment buffers to match the value length, zero-filled.
    /// Called by the optimizer when it detects a length mismatch.
    pub(crate) fn alloc_moments(&mut self, device: &Device) {
        let size = alloc_bytes(self.len);
        let m1 = buffers::create_buffer(
            device,
            &format!("{} moments1", self.label),
            size,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
        );
        let m2 = buffers::create_buffer(
            device,
            &format!("{} moments2", self.label),
            size,
            BufferUsages::STORAGE | BufferUsages::COPY_DST,
        );
        self.moments = Some((m1, m2));
        self.moment_len = self.len;
    }
}
