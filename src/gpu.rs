//! Adapter and device acquisition.

use std::sync::Arc;

use crate::error::{LbmError, Result};

/// Device and queue shared between the solver and whatever renders it.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
}

impl GpuContext {
    /// Headless context for the probe and the tests.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| LbmError::Resource("no compatible GPU adapter found".into()))?;
        pollster::block_on(Self::from_adapter(&adapter))
    }

    /// Requests a device from an adapter the caller already picked, e.g. one
    /// compatible with a window surface.
    pub async fn from_adapter(adapter: &wgpu::Adapter) -> Result<Self> {
        let adapter_limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Lattice Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_storage_buffer_binding_size: adapter_limits
                            .max_storage_buffer_binding_size,
                        max_buffer_size: adapter_limits.max_buffer_size,
                        ..wgpu::Limits::default()
                    },
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| LbmError::Resource(format!("device request failed: {e}")))?;

        let adapter_name = adapter.get_info().name;
        log::info!("Using GPU adapter: {adapter_name}");

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
        })
    }
}
