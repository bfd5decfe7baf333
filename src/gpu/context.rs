//! GPU context: wgpu device/queue plus the submission completion timeline.
//!
//! Every submission through [`GpuContext::submit`] is assigned a monotonically
//! increasing ticket. A `on_submitted_work_done` callback publishes the ticket
//! to a shared counter once the device has finished that submission; wgpu
//! fires these callbacks in submission order, so the counter never runs ahead
//! of completed work. Anything tagged with a ticket (loss readback slots) can
//! be consumed once `completed() >= ticket` without blocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use wgpu::{Device, Features, Instance, Limits, Queue, RequestAdapterOptions};

/// Errors from device setup and readback paths. Device loss and allocation
/// failures are unrecoverable here and propagate to the caller.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    AdapterNotFound,

    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("buffer readback failed: {0}")]
    Readback(String),
}

pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    next_ticket: AtomicU64,
    completed: Arc<AtomicU64>,
}

impl GpuContext {
    /// Initialize the GPU context asynchronously.
    ///
    /// Selects the first available adapter and creates a device with compute
    /// shader support. Default limits are sufficient: the widest bind group
    /// (the gradient scatter pass) uses exactly eight storage buffers.
    pub async fn new() -> Result<Self, GpuError> {
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: {
                #[cfg(target_os = "macos")]
                {
                    wgpu::Backends::METAL
                }
                #[cfg(not(target_os = "macos"))]
                {
                    wgpu::Backends::PRIMARY
                }
            },
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuError::AdapterNotFound)?;

        let info = adapter.get_info();
        log::info!("GPU: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("splatfit device"),
                    required_features: Features::empty(),
                    required_limits: Limits::default(),
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|e| {
            log::error!("[wgpu] uncaptured error: {e}");
        }));

        Ok(Self {
            device,
            queue,
            next_ticket: AtomicU64::new(1),
            completed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Synchronous wrapper using pollster, for CLI tools and tests.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    /// Submit a command buffer and return its completion ticket.
    pub fn submit(&self, commands: wgpu::CommandBuffer) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.queue.submit(Some(commands));

        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            // Callbacks fire in submission order; fetch_max keeps the counter
            // monotonic regardless.
            completed.fetch_max(ticket, Ordering::SeqCst);
        });
        ticket
    }

    /// Highest ticket whose submission has finished on the device.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Pump device callbacks without blocking. Call once per iteration so
    /// completion callbacks and buffer mappings make progress.
    pub fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    /// Block until all submitted work has completed.
    ///
    /// This is the only blocking operation in the pipeline; it is required
    /// before replacing resources that in-flight commands may still
    /// reference (render-target resize, scene reload).
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}
