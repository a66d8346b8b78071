// ============================================================================
// COMPUTE KERNELS
// ============================================================================
//
// One pipeline per stage, each with its own bind group layout so the
// read-set (read-only storage) and write-set (read-write storage) of a stage
// are fixed by construction. Ping-pong bind groups are built once for both
// orientations of the distribution pair.

use bytemuck::{Pod, Zeroable};

use crate::error::{LbmError, Result};
use crate::fields::{FieldKind, FieldStorage};
use crate::gpu::GpuContext;
use crate::lattice::Q;

const WORKGROUP_SIZE: u32 = 8;

const STREAM_SOURCE: &str = concat!(
    include_str!("../shaders/lattice.wgsl"),
    include_str!("../shaders/stream.wgsl")
);
const MACROSCOPIC_SOURCE: &str = concat!(
    include_str!("../shaders/lattice.wgsl"),
    include_str!("../shaders/macroscopic.wgsl")
);
const COLLIDE_SOURCE: &str = concat!(
    include_str!("../shaders/lattice.wgsl"),
    include_str!("../shaders/collide.wgsl")
);
const FILL_SOURCE: &str = concat!(
    include_str!("../shaders/lattice.wgsl"),
    include_str!("../shaders/fill.wgsl")
);

/// Streaming stage parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct StreamParams {
    pub n: u32,
    pub edge_policy: u32,
    pub boundary_policy: u32,
    pub _pad: u32,
}

/// Reduction stage parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MacroParams {
    pub n: u32,
    pub c: f32,
    pub tau: f32,
    pub velocity_limit: f32,
}

/// Collision stage parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CollideParams {
    pub n: u32,
    pub c: f32,
    pub tau: f32,
    pub _pad: u32,
}

/// Fill kernel parameters (must match WGSL struct layout)
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FillParams {
    pub n: u32,
    pub components: u32,
    pub mode: u32,
    pub value: f32,
}

/// Value written by the fill kernel for each cell component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPattern {
    Constant(f32),
    /// density / 9 in every direction
    Isotropic(f32),
    /// w_i * density
    Equilibrium(f32),
    /// The element's own linear index.
    LinearIndex,
}

impl FillPattern {
    fn mode_and_value(self) -> (u32, f32) {
        match self {
            FillPattern::Constant(v) => (0, v),
            FillPattern::Isotropic(rho) => (1, rho),
            FillPattern::Equilibrium(rho) => (2, rho),
            FillPattern::LinearIndex => (3, 0.0),
        }
    }
}

pub fn workgroups(n: u32) -> u32 {
    (n + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point,
        compilation_options: Default::default(),
        cache: None,
    })
}

fn params_buffer(device: &wgpu::Device, label: &str, size: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

struct FillGroups {
    // [0] targets distributions A, [1] targets B
    distributions: [wgpu::BindGroup; 2],
    boundary: wgpu::BindGroup,
    force: wgpu::BindGroup,
    velocity: wgpu::BindGroup,
    density: wgpu::BindGroup,
}

pub struct Kernels {
    stream_pipeline: wgpu::ComputePipeline,
    reduce_pipeline: wgpu::ComputePipeline,
    collide_pipeline: wgpu::ComputePipeline,
    fill_pipeline: wgpu::ComputePipeline,

    stream_params: wgpu::Buffer,
    macro_params: wgpu::Buffer,
    collide_params: wgpu::Buffer,
    fill_params: wgpu::Buffer,

    // Index 0 is used while distributions A is current, 1 while B is.
    stream_groups: [wgpu::BindGroup; 2],
    reduce_groups: [wgpu::BindGroup; 2],
    collide_groups: [wgpu::BindGroup; 2],
    fill_groups: FillGroups,
}

impl Kernels {
    pub fn new(ctx: &GpuContext, fields: &FieldStorage) -> Result<Self> {
        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let stream_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stream Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
            ],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Reduce Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });
        let collide_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Collide Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        });
        let fill_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fill Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false)],
        });

        let stream_pipeline =
            compute_pipeline(device, "Stream", STREAM_SOURCE, "stream", &stream_layout);
        let reduce_pipeline = compute_pipeline(
            device,
            "Macroscopic Reduction",
            MACROSCOPIC_SOURCE,
            "reduce_moments",
            &reduce_layout,
        );
        let collide_pipeline =
            compute_pipeline(device, "Collide", COLLIDE_SOURCE, "collide", &collide_layout);
        let fill_pipeline = compute_pipeline(device, "Fill", FILL_SOURCE, "fill", &fill_layout);

        let stream_params =
            params_buffer(device, "Stream Params", std::mem::size_of::<StreamParams>());
        let macro_params = params_buffer(device, "Macro Params", std::mem::size_of::<MacroParams>());
        let collide_params =
            params_buffer(device, "Collide Params", std::mem::size_of::<CollideParams>());
        let fill_params = params_buffer(device, "Fill Params", std::mem::size_of::<FillParams>());

        let a = fields.distributions.a();
        let b = fields.distributions.b();

        let stream_groups = [
            bind_group(
                device,
                "Stream A->B",
                &stream_layout,
                &[&stream_params, a, &fields.boundary, b],
            ),
            bind_group(
                device,
                "Stream B->A",
                &stream_layout,
                &[&stream_params, b, &fields.boundary, a],
            ),
        ];
        let reduce_groups = [
            bind_group(
                device,
                "Reduce A",
                &reduce_layout,
                &[&macro_params, a, &fields.force, &fields.velocity, &fields.density],
            ),
            bind_group(
                device,
                "Reduce B",
                &reduce_layout,
                &[&macro_params, b, &fields.force, &fields.velocity, &fields.density],
            ),
        ];
        let collide_groups = [
            bind_group(
                device,
                "Collide A->B",
                &collide_layout,
                &[&collide_params, a, &fields.velocity, &fields.density, b],
            ),
            bind_group(
                device,
                "Collide B->A",
                &collide_layout,
                &[&collide_params, b, &fields.velocity, &fields.density, a],
            ),
        ];
        let fill_groups = FillGroups {
            distributions: [
                bind_group(device, "Fill A", &fill_layout, &[&fill_params, a]),
                bind_group(device, "Fill B", &fill_layout, &[&fill_params, b]),
            ],
            boundary: bind_group(device, "Fill Boundary", &fill_layout, &[&fill_params, &fields.boundary]),
            force: bind_group(device, "Fill Force", &fill_layout, &[&fill_params, &fields.force]),
            velocity: bind_group(
                device,
                "Fill Velocity",
                &fill_layout,
                &[&fill_params, &fields.velocity],
            ),
            density: bind_group(device, "Fill Density", &fill_layout, &[&fill_params, &fields.density]),
        };

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(LbmError::Resource(format!("kernel creation failed: {err}")));
        }

        Ok(Self {
            stream_pipeline,
            reduce_pipeline,
            collide_pipeline,
            fill_pipeline,
            stream_params,
            macro_params,
            collide_params,
            fill_params,
            stream_groups,
            reduce_groups,
            collide_groups,
            fill_groups,
        })
    }

    fn orientation(fields: &FieldStorage) -> usize {
        if fields.distributions.a_is_current() {
            0
        } else {
            1
        }
    }

    pub fn write_stream_params(&self, queue: &wgpu::Queue, params: StreamParams) {
        queue.write_buffer(&self.stream_params, 0, bytemuck::cast_slice(&[params]));
    }

    pub fn write_macro_params(&self, queue: &wgpu::Queue, params: MacroParams) {
        queue.write_buffer(&self.macro_params, 0, bytemuck::cast_slice(&[params]));
    }

    pub fn write_collide_params(&self, queue: &wgpu::Queue, params: CollideParams) {
        queue.write_buffer(&self.collide_params, 0, bytemuck::cast_slice(&[params]));
    }

    /// current -> scratch, one invocation per (cell, direction).
    pub fn encode_stream(&self, encoder: &mut wgpu::CommandEncoder, fields: &FieldStorage) {
        let groups = workgroups(fields.size());
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Stream Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.stream_pipeline);
        pass.set_bind_group(0, &self.stream_groups[Self::orientation(fields)], &[]);
        pass.dispatch_workgroups(groups, groups, Q as u32);
    }

    /// current -> velocity + density, one invocation per cell.
    pub fn encode_reduce(&self, encoder: &mut wgpu::CommandEncoder, fields: &FieldStorage) {
        let groups = workgroups(fields.size());
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Macroscopic Reduction Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.reduce_pipeline);
        pass.set_bind_group(0, &self.reduce_groups[Self::orientation(fields)], &[]);
        pass.dispatch_workgroups(groups, groups, 1);
    }

    /// current + velocity + density -> scratch, one invocation per (cell, direction).
    pub fn encode_collide(&self, encoder: &mut wgpu::CommandEncoder, fields: &FieldStorage) {
        let groups = workgroups(fields.size());
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Collide Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.collide_pipeline);
        pass.set_bind_group(0, &self.collide_groups[Self::orientation(fields)], &[]);
        pass.dispatch_workgroups(groups, groups, Q as u32);
    }

    /// Fills one field and submits immediately, so consecutive fills each see
    /// their own parameter block.
    pub fn fill(
        &self,
        ctx: &GpuContext,
        fields: &FieldStorage,
        target: FieldKind,
        pattern: FillPattern,
    ) -> Result<()> {
        let (mode, value) = pattern.mode_and_value();
        let components = target.components();
        let params = FillParams {
            n: fields.size(),
            components,
            mode,
            value,
        };
        ctx.queue
            .write_buffer(&self.fill_params, 0, bytemuck::cast_slice(&[params]));

        let current = Self::orientation(fields);
        let group = match target {
            FieldKind::CurrentDistributions => &self.fill_groups.distributions[current],
            FieldKind::ScratchDistributions => &self.fill_groups.distributions[1 - current],
            FieldKind::Boundary => &self.fill_groups.boundary,
            FieldKind::Force => &self.fill_groups.force,
            FieldKind::Velocity => &self.fill_groups.velocity,
            FieldKind::Density => &self.fill_groups.density,
        };

        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Fill") });
        {
            let groups = workgroups(fields.size());
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Fill Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.fill_pipeline);
            pass.set_bind_group(0, group, &[]);
            pass.dispatch_workgroups(groups, groups, components);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            return Err(LbmError::Device(format!("{target:?} fill failed: {err}")));
        }
        Ok(())
    }

    pub fn release(&self) {
        self.stream_params.destroy();
        self.macro_params.destroy();
        self.collide_params.destroy();
        self.fill_params.destroy();
    }
}
