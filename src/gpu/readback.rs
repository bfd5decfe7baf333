//! Asynchronous host readback of the per-iteration loss value.
//!
//! The training loop never blocks on the device. Each iteration copies the
//! 4-byte loss cell into a staging slot from a recycling pool and maps it
//! asynchronously; completed values are drained a few iterations later in
//! submission order. The pool grows to the in-flight depth the device
//! actually exhibits and then stabilizes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::gpu::buffers;
use wgpu::{Buffer, BufferUsages, CommandEncoder, Device, MapMode};

struct Slot {
    buffer: Buffer,
    mapped: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    in_flight: bool,
}

impl Slot {
    fn new(device: &Device) -> Self {
        Self {
            buffer: buffers::create_buffer(
                device,
                "loss readback slot",
                4,
                BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            ),
            mapped: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            in_flight: false,
        }
    }
}

#[derive(Default)]
pub struct LossReadback {
    slots: Vec<Slot>,
    // (slot index, submission ticket), oldest first.
    pending: VecDeque<(usize, u64)>,
}

impl LossReadback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a copy of the loss cell into a free staging slot and return the
    /// slot token. Pass the token to [`LossReadback::submitted`] once the
    /// encoder has been submitted; mapping before submission is invalid.
    pub fn record_copy(
        &mut self,
        device: &Device,
        encoder: &mut CommandEncoder,
        loss: &Buffer,
    ) -> usize {
        let token = match self.slots.iter().position(|s| !s.in_flight) {
            Some(i) => i,
            None => {
                self.slots.push(Slot::new(device));
                self.slots.len() - 1
            }
        };
        self.slots[token].in_flight = true;
        encoder.copy_buffer_to_buffer(loss, 0, &self.slots[token].buffer, 0, 4);
        token
    }

    /// Associate a recorded copy with its submission ticket and start the
    /// asynchronous map.
    pub fn submitted(&mut self, token: usize, ticket: u64) {
        self.pending.push_back((token, ticket));
        let slot = &self.slots[token];
        let mapped = Arc::clone(&slot.mapped);
        let failed = Arc::clone(&slot.failed);
        slot.buffer.slice(..).map_async(MapMode::Read, move |result| {
            match result {
                Ok(()) => mapped.store(true, Ordering::SeqCst),
                Err(_) => failed.store(true, Ordering::SeqCst),
            }
        });
    }

    /// Drain the oldest pending readback if it has both finished on the
    /// device (its ticket is covered by `completed`) and finished mapping.
    /// Values are only ever consumed in submission order.
    pub fn try_consume(&mut self, completed: u64) -> Option<f32> {
        let &(token, ticket) = self.pending.front()?;
        if ticket > completed {
            return None;
        }
        let slot = &mut self.slots[token];
        if slot.failed.load(Ordering::SeqCst) {
            log::warn!("loss readback map failed, dropping sample");
            slot.failed.store(false, Ordering::SeqCst);
            slot.in_flight = false;
            self.pending.pop_front();
            return None;
        }
        if !slot.mapped.load(Ordering::SeqCst) {
            return None;
        }

        let value = {
            let view = slot.buffer.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&view)[0]
        };
        slot.buffer.unmap();
        slot.mapped.store(false, Ordering::SeqCst);
        slot.in_flight = false;
        self.pending.pop_front();
        Some(value)
    }

    /// Readbacks submitted but not yet consumed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current pool size, for observability.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}
