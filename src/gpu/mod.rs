// ============================================================================
// GPU MODULE — texture backends for the tile cache
// ============================================================================
//
// Architecture:
//   context.rs  — wgpu Device, Queue, adapter init
//   texture.rs  — TileTexture wrapper with partial upload + WgpuBackend
//   headless.rs — CPU-side textures for tools without a GPU (and tests)
// ============================================================================

pub mod context;
pub mod headless;
pub mod texture;

pub use context::GpuContext;
pub use headless::{HeadlessBackend, HeadlessTexture};
pub use texture::{TileTexture, WgpuBackend};

use crate::error::GpuError;
use crate::grid::PixelRect;

/// Shape of a texture to create. Pixel data always arrives tightly packed
/// with `channels * bits_per_channel / 8` bytes per texel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bits_per_channel: u32,
}

impl TextureDesc {
    pub fn texel_size(&self) -> usize {
        (self.channels * self.bits_per_channel / 8) as usize
    }
}

/// Creates, updates and destroys GPU textures.
///
/// Handles are cheap to clone; every clone refers to the same GPU object.
/// All calls must happen on the thread that owns the device.
pub trait TextureBackend {
    type Texture: Clone;

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<Self::Texture, GpuError>;

    /// Overwrite `rect` (texture-local coordinates) with `data`.
    fn upload(&mut self, texture: &Self::Texture, rect: PixelRect, data: &[u8]) -> Result<(), GpuError>;

    /// Release the GPU memory. Other clones of the handle become invalid.
    fn destroy_texture(&mut self, texture: Self::Texture);
}

/// Widen packed texels from `from` to `to` channels. New channels are filled
/// with the maximum value for 8-bit data (opaque alpha) and zero otherwise.
pub fn expand_channels(data: &[u8], from: u32, to: u32, bytes_per_channel: usize) -> Vec<u8> {
    let src_texel = from as usize * bytes_per_channel;
    let pad_len = (to - from) as usize * bytes_per_channel;
    let pad = if bytes_per_channel == 1 { 0xFF } else { 0x00 };
    let mut out = Vec::with_capacity(data.len() / src_texel.max(1) * (src_texel + pad_len));
    for texel in data.chunks_exact(src_texel) {
        out.extend_from_slice(texel);
        out.extend(std::iter::repeat(pad).take(pad_len));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_expands_to_opaque_rgba() {
        let rgb = [1, 2, 3, 4, 5, 6];
        assert_eq!(expand_channels(&rgb, 3, 4, 1), vec![1, 2, 3, 255, 4, 5, 6, 255]);
        let rgb16 = [1, 0, 2, 0, 3, 0];
        assert_eq!(expand_channels(&rgb16, 3, 4, 2), vec![1, 0, 2, 0, 3, 0, 0, 0]);
    }
}
