// ============================================================================
// FIELD STORAGE
// ============================================================================
//
// All per-cell arrays live in storage buffers sized from the lattice config.
// Distribution state is double-buffered; every other field is single.

use bytemuck::Pod;

use crate::config::LatticeConfig;
use crate::error::{LbmError, Result};
use crate::gpu::GpuContext;
use crate::lattice::Q;

/// Two equally shaped buffers, one "current" and one "scratch".
pub struct PingPong {
    a: wgpu::Buffer,
    b: wgpu::Buffer,
    a_is_current: bool,
}

impl PingPong {
    fn new(a: wgpu::Buffer, b: wgpu::Buffer) -> Self {
        Self {
            a,
            b,
            a_is_current: true,
        }
    }

    pub fn current(&self) -> &wgpu::Buffer {
        if self.a_is_current {
            &self.a
        } else {
            &self.b
        }
    }

    pub fn scratch(&self) -> &wgpu::Buffer {
        if self.a_is_current {
            &self.b
        } else {
            &self.a
        }
    }

    /// Role exchange only; no data moves.
    pub fn swap(&mut self) {
        self.a_is_current = !self.a_is_current;
    }

    pub fn a_is_current(&self) -> bool {
        self.a_is_current
    }

    pub fn a(&self) -> &wgpu::Buffer {
        &self.a
    }

    pub fn b(&self) -> &wgpu::Buffer {
        &self.b
    }
}

/// Buffer roles the initializer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    CurrentDistributions,
    ScratchDistributions,
    Boundary,
    Force,
    Velocity,
    Density,
}

impl FieldKind {
    /// Values stored per cell.
    pub fn components(self) -> u32 {
        match self {
            FieldKind::CurrentDistributions | FieldKind::ScratchDistributions => Q as u32,
            FieldKind::Force | FieldKind::Velocity => 2,
            FieldKind::Boundary | FieldKind::Density => 1,
        }
    }
}

pub struct FieldStorage {
    size: u32,
    pub distributions: PingPong,
    pub boundary: wgpu::Buffer,
    pub velocity: wgpu::Buffer,
    pub density: wgpu::Buffer,
    pub force: wgpu::Buffer,
    released: bool,
}

impl FieldStorage {
    pub fn allocate(ctx: &GpuContext, config: &LatticeConfig) -> Result<Self> {
        let cells = config.cell_count() as u64;
        let f32_size = std::mem::size_of::<f32>() as u64;
        let distribution_size = cells * Q as u64 * f32_size;
        let scalar_size = cells * f32_size;
        let vector_size = cells * 2 * f32_size;

        let limits = ctx.device.limits();
        let binding_limit = limits.max_storage_buffer_binding_size as u64;
        if distribution_size > limits.max_buffer_size || distribution_size > binding_limit {
            return Err(LbmError::Resource(format!(
                "distribution state for a {n}x{n} lattice needs {distribution_size} bytes, \
                 device allows {}",
                limits.max_buffer_size.min(binding_limit),
                n = config.size,
            )));
        }

        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let create = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };

        let distributions_a = create("Distributions A", distribution_size);
        let distributions_b = create("Distributions B", distribution_size);
        let boundary = create("Boundary", scalar_size);
        let velocity = create("Macroscopic Velocity", vector_size);
        let density = create("Macroscopic Density", scalar_size);
        let force = create("Force", vector_size);

        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            for buffer in [
                &distributions_a,
                &distributions_b,
                &boundary,
                &velocity,
                &density,
                &force,
            ] {
                buffer.destroy();
            }
            return Err(LbmError::Resource(format!("field allocation failed: {err}")));
        }

        log::debug!(
            "Allocated lattice fields: {} cells, {} bytes per distribution buffer",
            cells,
            distribution_size
        );

        Ok(Self {
            size: config.size,
            distributions: PingPong::new(distributions_a, distributions_b),
            boundary,
            velocity,
            density,
            force,
            released: false,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }

    pub fn buffer(&self, kind: FieldKind) -> &wgpu::Buffer {
        match kind {
            FieldKind::CurrentDistributions => self.distributions.current(),
            FieldKind::ScratchDistributions => self.distributions.scratch(),
            FieldKind::Boundary => &self.boundary,
            FieldKind::Force => &self.force,
            FieldKind::Velocity => &self.velocity,
            FieldKind::Density => &self.density,
        }
    }

    /// Destroys every buffer. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.distributions.a.destroy();
        self.distributions.b.destroy();
        self.boundary.destroy();
        self.velocity.destroy();
        self.density.destroy();
        self.force.destroy();
        self.released = true;
        log::debug!("Released lattice fields ({}x{})", self.size, self.size);
    }

    /// Overwrites a whole field from host memory.
    pub fn upload<T: Pod>(&self, queue: &wgpu::Queue, kind: FieldKind, data: &[T]) -> Result<()> {
        let expected = self.cell_count() * kind.components() as usize;
        let got = std::mem::size_of_val(data) / std::mem::size_of::<f32>();
        if got != expected {
            return Err(LbmError::Configuration(format!(
                "{kind:?} upload has {got} values, lattice needs {expected}"
            )));
        }
        queue.write_buffer(self.buffer(kind), 0, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Copies a whole field back to the host.
    pub fn read<T: Pod>(&self, ctx: &GpuContext, kind: FieldKind) -> Result<Vec<T>> {
        read_buffer(ctx, self.buffer(kind))
    }
}

impl Drop for FieldStorage {
    fn drop(&mut self) {
        self.release();
    }
}

/// Blocking readback through a staging buffer.
pub fn read_buffer<T: Pod>(ctx: &GpuContext, source: &wgpu::Buffer) -> Result<Vec<T>> {
    let size = source.size();
    let staging_buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Read") });
    encoder.copy_buffer_to_buffer(source, 0, &staging_buffer, 0, size);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);

    match pollster::block_on(receiver.receive()) {
        Some(Ok(())) => {}
        Some(Err(e)) => return Err(LbmError::Device(format!("readback failed: {e}"))),
        None => return Err(LbmError::Device("readback channel closed".into())),
    }

    let data = buffer_slice.get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging_buffer.unmap();
    staging_buffer.destroy();

    Ok(result)
}
