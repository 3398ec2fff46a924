// ============================================================================
// TILE TEXTURE — GPU-side texture wrapper with partial upload support
// ============================================================================

use std::sync::Arc;

use super::{GpuContext, TextureBackend, TextureDesc, expand_channels};
use crate::error::GpuError;
use crate::grid::PixelRect;

/// Pick the sampled format for a texel layout. Three-channel data has no wgpu
/// format and is widened to four on upload.
///
/// Returns the format and the channel count the GPU stores.
pub fn texture_format(channels: u32, bits_per_channel: u32) -> Result<(wgpu::TextureFormat, u32), GpuError> {
    use wgpu::TextureFormat as F;
    let format = match (channels, bits_per_channel) {
        (1, 8) => F::R8Unorm,
        (2, 8) => F::Rg8Unorm,
        (3 | 4, 8) => F::Rgba8Unorm,
        (1, 16) => F::R16Uint,
        (2, 16) => F::Rg16Uint,
        (3 | 4, 16) => F::Rgba16Uint,
        (1, 32) => F::R32Float,
        (2, 32) => F::Rg32Float,
        (3 | 4, 32) => F::Rgba32Float,
        _ => return Err(GpuError::UnsupportedFormat { channels, bits: bits_per_channel }),
    };
    Ok((format, if channels == 3 { 4 } else { channels }))
}

/// A GPU texture holding one cache tile (or a global fallback).
///
/// Edits re-upload only the modified rectangle via `update_rect`.
pub struct TileTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    /// Channels of the source data.
    pub channels: u32,
    /// Channels stored on the GPU (differs only for widened RGB).
    gpu_channels: u32,
    bytes_per_channel: usize,
}

impl TileTexture {
    /// Create a texture and upload its initial contents.
    pub fn new(ctx: &GpuContext, desc: &TextureDesc, data: &[u8]) -> Result<Self, GpuError> {
        if !ctx.supports_size(desc.width, desc.height) {
            return Err(GpuError::TextureTooLarge {
                width: desc.width,
                height: desc.height,
                max: ctx.max_texture_dim,
            });
        }
        let (format, gpu_channels) = texture_format(desc.channels, desc.bits_per_channel)?;

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("TileTexture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let validation = pollster::block_on(ctx.device.pop_error_scope());
        let oom = pollster::block_on(ctx.device.pop_error_scope());
        if let Some(e) = oom {
            return Err(GpuError::OutOfMemory(e.to_string()));
        }
        if let Some(e) = validation {
            return Err(GpuError::Validation(e.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let tile = Self {
            texture,
            view,
            width: desc.width,
            height: desc.height,
            format,
            channels: desc.channels,
            gpu_channels,
            bytes_per_channel: (desc.bits_per_channel / 8) as usize,
        };
        tile.update_rect(&ctx.queue, PixelRect::new(0, 0, desc.width, desc.height), data);
        Ok(tile)
    }

    /// Upload only the modified rectangle.
    ///
    /// `data` must contain `rect.w * rect.h` tightly packed source texels.
    pub fn update_rect(&self, queue: &wgpu::Queue, rect: PixelRect, data: &[u8]) {
        if rect.is_empty() {
            return;
        }
        let widened;
        let data = if self.gpu_channels != self.channels {
            widened = expand_channels(data, self.channels, self.gpu_channels, self.bytes_per_channel);
            &widened[..]
        } else {
            data
        };
        debug_assert_eq!(data.len(), rect.area() * self.gpu_channels as usize * self.bytes_per_channel);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(rect.w * self.gpu_channels * self.bytes_per_channel as u32),
                rows_per_image: Some(rect.h),
            },
            wgpu::Extent3d {
                width: rect.w,
                height: rect.h,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Approximate GPU memory held (bytes).
    pub fn memory_bytes(&self) -> usize {
        self.width as usize * self.height as usize * self.gpu_channels as usize * self.bytes_per_channel
    }
}

// ============================================================================
// WGPU BACKEND
// ============================================================================

/// Texture backend on a real wgpu device.
#[derive(Clone)]
pub struct WgpuBackend {
    ctx: Arc<GpuContext>,
}

impl WgpuBackend {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }
}

impl TextureBackend for WgpuBackend {
    type Texture = Arc<TileTexture>;

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<Self::Texture, GpuError> {
        Ok(Arc::new(TileTexture::new(&self.ctx, desc, data)?))
    }

    fn upload(&mut self, texture: &Self::Texture, rect: PixelRect, data: &[u8]) -> Result<(), GpuError> {
        texture.update_rect(&self.ctx.queue, rect, data);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: Self::Texture) {
        texture.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_cover_supported_layouts() {
        assert_eq!(texture_format(1, 8).unwrap(), (wgpu::TextureFormat::R8Unorm, 1));
        assert_eq!(texture_format(3, 8).unwrap(), (wgpu::TextureFormat::Rgba8Unorm, 4));
        assert_eq!(texture_format(1, 16).unwrap(), (wgpu::TextureFormat::R16Uint, 1));
        assert_eq!(texture_format(4, 32).unwrap(), (wgpu::TextureFormat::Rgba32Float, 4));
        assert!(matches!(
            texture_format(5, 8),
            Err(GpuError::UnsupportedFormat { channels: 5, bits: 8 })
        ));
    }
}
