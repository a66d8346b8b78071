// Interactive lattice viewer.
// Run with: cargo run --release -- [latticeflow.json]

use anyhow::Context;
use bytemuck::{Pod, Zeroable};
use std::{path::PathBuf, sync::Arc};
use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

use latticeflow::{ForceField, GpuContext, ObstacleMask, SimulationSettings, Solver};

const BRUSH_RADIUS: f32 = 2.5;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ViewParams {
    size: u32,
    mode: u32,
    density_scale: f32,
    velocity_scale: f32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Brush {
    Paint,
    Erase,
}

struct Viewer {
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    ctx: GpuContext,
    solver: Solver,
    settings: SimulationSettings,
    mask: ObstacleMask,

    render_pipeline: wgpu::RenderPipeline,
    render_bind_group: wgpu::BindGroup,
    view_params_buffer: wgpu::Buffer,

    render_mode: u32,
    paused: bool,
    brush: Option<Brush>,
    cursor_cell: Option<(f32, f32)>,

    frame_count: u32,
    frame_time_sum: f32,
    last_fps_update: std::time::Instant,
}

impl Viewer {
    async fn new(
        window: Arc<winit::window::Window>,
        settings: SimulationSettings,
    ) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("creating window surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no GPU adapter can present to this window")?;
        let ctx = GpuContext::from_adapter(&adapter).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&ctx.device, &surface_config);

        let mut solver = Solver::new(ctx.clone(), settings.lattice())?;
        let mask = ObstacleMask::from_specs(
            settings.size,
            &settings.obstacles,
            settings.random_obstacles.as_ref(),
        );
        solver.set_boundary(mask.cells())?;
        let force = ForceField::from_sources(settings.size, &settings.force_sources, 0.0);
        if !force.is_zero() {
            solver.set_force(force.cells())?;
        }
        log::info!(
            "Viewer ready: {} obstacle cells, {} force sources",
            mask.solid_count(),
            settings.force_sources.len()
        );

        let device = &ctx.device;
        let view_params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("View Params"),
            size: std::mem::size_of::<ViewParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let render_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Render Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/render.wgsl").into()),
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let render_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Render Bind Group Layout"),
                entries: &[
                    storage_entry(0),
                    storage_entry(1),
                    storage_entry(2),
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        // Output buffers keep their identity for the solver's lifetime, so one
        // bind group serves every frame.
        let render_bind_group = {
            let outputs = solver.bind_outputs()?;
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Render Bind Group"),
                layout: &render_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: outputs.density.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: outputs.velocity.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: outputs.boundary.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: view_params_buffer.as_entire_binding(),
                    },
                ],
            })
        };

        let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Render Pipeline Layout"),
            bind_group_layouts: &[&render_bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Render Pipeline"),
            layout: Some(&render_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &render_shader,
                entry_point: "vs_main",
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &render_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        Ok(Self {
            surface,
            surface_config,
            ctx,
            solver,
            settings,
            mask,
            render_pipeline,
            render_bind_group,
            view_params_buffer,
            render_mode: 0,
            paused: false,
            brush: None,
            cursor_cell: None,
            frame_count: 0,
            frame_time_sum: 0.0,
            last_fps_update: std::time::Instant::now(),
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.ctx.device, &self.surface_config);
        }
    }

    fn set_cursor(&mut self, px: f32, py: f32) {
        let w = self.surface_config.width.max(1) as f32;
        let h = self.surface_config.height.max(1) as f32;
        let n = self.settings.size as f32;
        // Screen y grows downward, lattice y upward.
        self.cursor_cell = Some(((px / w) * n, (1.0 - py / h) * n));
    }

    fn apply_brush(&mut self) -> latticeflow::Result<()> {
        let (Some(brush), Some((x, y))) = (self.brush, self.cursor_cell) else {
            return Ok(());
        };
        self.mask
            .paint_circle(x, y, BRUSH_RADIUS, brush == Brush::Paint);
        self.solver.set_boundary(self.mask.cells())
    }

    fn update(&mut self, frame_dt: f32) -> latticeflow::Result<()> {
        self.frame_count += 1;
        self.frame_time_sum += frame_dt;

        self.apply_brush()?;
        if self.paused {
            return Ok(());
        }

        let dt = self.settings.time_step;
        let sim_time = self.solver.sim_time() + dt;
        if ForceField::has_pulse(&self.settings.force_sources) {
            let force =
                ForceField::from_sources(self.settings.size, &self.settings.force_sources, sim_time);
            self.solver.set_force(force.cells())?;
        }
        self.solver.tick(dt, sim_time)
    }

    fn reset(&mut self) -> latticeflow::Result<()> {
        self.solver.reset()
    }

    fn clear_obstacles(&mut self) -> latticeflow::Result<()> {
        self.mask.clear();
        self.solver.set_boundary(self.mask.cells())
    }

    fn get_fps_and_frame_time(&mut self) -> Option<(f32, f32)> {
        let elapsed = self.last_fps_update.elapsed();
        if elapsed.as_secs_f32() >= 0.5 && self.frame_count > 0 {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            let avg_frame_time_ms = (self.frame_time_sum / self.frame_count as f32) * 1000.0;
            self.frame_count = 0;
            self.frame_time_sum = 0.0;
            self.last_fps_update = std::time::Instant::now();
            return Some((fps, avg_frame_time_ms));
        }
        None
    }

    fn update_window_title(&mut self, window: &winit::window::Window) {
        if let Some((fps, frame_time_ms)) = self.get_fps_and_frame_time() {
            let n = self.settings.size;
            let title = format!(
                "Lattice Boltzmann - {n}x{n} | tick {} (t = {:.1}) | {:.0} FPS | {:.2} ms/frame{}",
                self.solver.generation(),
                self.solver.sim_time(),
                fps,
                frame_time_ms,
                if self.paused { " | paused" } else { "" },
            );
            window.set_title(&title);
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let params = ViewParams {
            size: self.settings.size,
            mode: self.render_mode,
            density_scale: 25.0,
            velocity_scale: 0.1,
        };
        self.ctx
            .queue
            .write_buffer(&self.view_params_buffer, 0, bytemuck::cast_slice(&[params]));

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, &self.render_bind_group, &[]);
            render_pass.draw(0..3, 0..1); // Full-screen triangle
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

fn load_settings() -> anyhow::Result<SimulationSettings> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SimulationSettings::default_path);
    if path.exists() {
        log::info!("Loading settings from {}", path.display());
        SimulationSettings::load_from_disk(&path)
            .with_context(|| format!("loading {}", path.display()))
    } else {
        log::info!("No settings at {}, using defaults", path.display());
        Ok(SimulationSettings::default())
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = load_settings()?;

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        event_loop.create_window(
            winit::window::WindowAttributes::default()
                .with_title("Lattice Boltzmann")
                .with_inner_size(winit::dpi::PhysicalSize::new(800, 800)),
        )?,
    );

    let mut viewer = pollster::block_on(Viewer::new(window.clone(), settings))?;
    let mut last_update = std::time::Instant::now();

    event_loop.run(move |event, control_flow| match event {
        Event::WindowEvent {
            ref event,
            window_id,
        } if window_id == window.id() => match event {
            WindowEvent::CloseRequested => control_flow.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => match key {
                KeyCode::Escape => control_flow.exit(),
                KeyCode::Digit1 => viewer.render_mode = 0,
                KeyCode::Digit2 => viewer.render_mode = 1,
                KeyCode::Space => viewer.paused = !viewer.paused,
                KeyCode::KeyR => {
                    if let Err(e) = viewer.reset() {
                        log::error!("Reset failed: {e}");
                        control_flow.exit();
                    }
                }
                KeyCode::KeyC => {
                    if let Err(e) = viewer.clear_obstacles() {
                        log::error!("Clearing obstacles failed: {e}");
                        control_flow.exit();
                    }
                }
                _ => {}
            },
            WindowEvent::CursorMoved { position, .. } => {
                viewer.set_cursor(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let brush = match button {
                    MouseButton::Left => Some(Brush::Paint),
                    MouseButton::Right => Some(Brush::Erase),
                    _ => None,
                };
                if brush.is_some() {
                    viewer.brush = if *state == ElementState::Pressed { brush } else { None };
                }
            }
            WindowEvent::Resized(physical_size) => {
                viewer.resize(physical_size.width, physical_size.height);
            }
            WindowEvent::RedrawRequested => {
                let now = std::time::Instant::now();
                let dt = (now - last_update).as_secs_f32();
                last_update = now;

                // A failed tick leaves a half-written generation behind.
                if let Err(e) = viewer.update(dt) {
                    log::error!("Simulation stopped: {e}");
                    control_flow.exit();
                    return;
                }
                viewer.update_window_title(&window);

                match viewer.render() {
                    Ok(_) => {}
                    Err(wgpu::SurfaceError::Lost) => {
                        let (w, h) = (viewer.surface_config.width, viewer.surface_config.height);
                        viewer.resize(w, h);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        control_flow.exit();
                    }
                    Err(e) => log::warn!("{e:?}"),
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            window.request_redraw();
        }
        _ => {}
    })?;

    Ok(())
}
