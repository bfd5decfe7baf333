//! GPU Adam optimizer over [`ParameterGroup`]s.

use crate::gpu::params::ParameterGroup;
use crate::gpu::{storage_entry, uniform_entry};
use wgpu::util::DeviceExt;
use wgpu::*;

/// Adam hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub step_size: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            step_size: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// One optimizer instance drives any number of parameter groups through a
/// shared step counter: record [`GpuAdam::step`] for each group inside an
/// iteration's encoder, then call [`GpuAdam::advance`] once per iteration.
///
/// A group whose moment buffers do not match its value length (first use, or
/// the group was rebuilt at a new size) gets fresh zeroed moments and the
/// shared counter restarts from zero, so bias correction matches the new
/// moment history.
pub struct GpuAdam {
    pipeline: ComputePipeline,
    bind_group_layout: BindGroupLayout,
    config: AdamConfig,
    t: u32,
}

impl GpuAdam {
    pub fn new(device: &Device, config: AdamConfig) -> Self {
        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("Adam Shader"),
            source: ShaderSource::Wgsl(include_str!("adam.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("Adam Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, false), // values
                storage_entry(2, true),  // gradients
                storage_entry(3, false), // first moments
                storage_entry(4, false), // second moments
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Adam Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Adam Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "adam_step",
        });

        Self {
            pipeline,
            bind_group_layout,
            config,
            t: 0,
        }
    }

    /// Completed optimization steps since the last reset or moment
    /// reallocation.
    pub fn t(&self) -> u32 {
        self.t
    }

    pub fn config(&self) -> AdamConfig {
        self.config
    }

    /// Record one Adam update for `group`. Empty groups record nothing.
    pub fn step(&mut self, device: &Device, encoder: &mut CommandEncoder, group: &mut ParameterGroup) {
        if group.is_empty() {
            return;
        }
        if group.moment_len != group.len() {
            log::debug!("allocating Adam moments for {} floats", group.len());
            group.alloc_moments(device);
            self.t = 0;
        }
        let (moment1, moment2) = match &group.moments {
            Some(pair) => pair,
            None => return,
        };

        let params = AdamParamsGpu {
            num_values: group.len() as u32,
            t: self.t,
            step_size: self.config.step_size,
            beta1: self.config.beta1,
            beta2: self.config.beta2,
            epsilon: self.config.epsilon,
            _pad: [0; 2],
        };
        let params_buffer = device.create_buffer_init(&util::BufferInitDescriptor {
            label: Some("Adam Params"),
            contents: bytemuck::cast_slice(&[params]),
            usage: BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("Adam Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: group.values.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: group.gradients.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: moment1.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: moment2.as_entire_binding(),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("Adam Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups((group.len() as u32 + 255) / 256, 1, 1);
    }

    /// Advance the shared step counter. Call exactly once per iteration,
    /// after recording the step for every group.
    pub fn advance(&mut self) {
        self.t += 1;
    }

    /// Restart the step counter. Moment buffers are left in place; groups of
    /// unchanged size keep their history.
    pub fn reset(&mut self) {
        self.t = 0;
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct AdamParamsGpu {
    num_values: u32,
    t: u32,
    step_size: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    _pad: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adam_params_layout() {
        assert_eq!(std::mem::size_of::<AdamParamsGpu>(), 32);
    }

    #[test]
    fn test_default_config() {
        let c = AdamConfig::default();
        assert_eq!(c.step_size, 0.001);
        assert_eq!(c.beta1, 0.9);
        assert_eq!(c.beta2, 0.999);
        assert_eq!(c.epsilon, 1e-8);
    }
}
