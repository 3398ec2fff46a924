// ============================================================================
// GPU CONTEXT — the device and queue tile textures are created on
// ============================================================================

use std::sync::Arc;

use crate::error::GpuError;

/// Device handles shared by every [`WgpuBackend`](super::WgpuBackend) of a session.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    /// Largest 2D texture edge the device accepts.
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Share a device the host already renders with.
    pub fn from_device(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let max_texture_dim = device.limits().max_texture_dimension_2d;
        Self { device, queue, max_texture_dim }
    }

    /// Open a device of our own for tools that run without a renderer.
    /// A software adapter is accepted when no hardware one is available.
    pub fn headless() -> Result<Self, GpuError> {
        pollster::block_on(Self::open(false)).or_else(|e| {
            log::warn!("{}; retrying with a software adapter", e);
            pollster::block_on(Self::open(true))
        })
    }

    async fn open(software: bool) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                force_fallback_adapter: software,
                ..Default::default()
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        // Tiles only need sampling and copies, but keep the adapter's texture limit.
        let required_limits = wgpu::Limits {
            max_texture_dimension_2d: adapter.limits().max_texture_dimension_2d,
            ..wgpu::Limits::downlevel_defaults()
        };
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("terrastream tiles"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| GpuError::RequestDevice(e.to_string()))?;

        log::info!("tile textures on '{}'", adapter.get_info().name);
        Ok(Self::from_device(Arc::new(device), Arc::new(queue)))
    }

    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }
}
