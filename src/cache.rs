// ============================================================================
// TILED TEXTURE CACHE — reference-counted GPU tiles over a pixel store
// ============================================================================
//
// The raster is split into a D×D grid.  Each cell's texture exists exactly
// while somebody holds it (refcount > 0).  Writes go through the cache so the
// touched area can be re-uploaded in one batch by `update_textures()`.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};

use crate::error::{Result, StreamError};
use crate::file::TiledImageFile;
use crate::gpu::{TextureBackend, TextureDesc};
use crate::grid::{self, PixelRect};
use crate::settings::StreamSettings;
use crate::store::{PixelStore, PixelTarget};

/// Default edge length of the global fallback texture.
pub const DEFAULT_GLOBAL_SIZE: u32 = 64;

/// Arena slot for one grid cell. `texture.is_some() == (refcount > 0)`.
struct TileSlot<T> {
    refcount: u32,
    texture: Option<T>,
}

impl<T> Default for TileSlot<T> {
    fn default() -> Self {
        Self { refcount: 0, texture: None }
    }
}

/// A [`PixelStore`] plus a grid of reference-counted GPU textures.
pub struct TiledTextureCache<F: TiledImageFile, B: TextureBackend> {
    store: PixelStore<F>,
    backend: B,
    /// Cells per axis; 0 until `initialise`.
    divisions: u32,
    overlap: bool,
    tiles: Vec<TileSlot<B::Texture>>,
    /// Union of writes since the last `update_textures`.
    dirty: Option<PixelRect>,
    global: Option<B::Texture>,
    global_size: u32,
}

impl<F: TiledImageFile, B: TextureBackend> TiledTextureCache<F, B> {
    /// Wrap a store. Call [`initialise`](Self::initialise) before asking for tiles.
    pub fn new(store: PixelStore<F>, backend: B) -> Self {
        Self {
            store,
            backend,
            divisions: 0,
            overlap: false,
            tiles: Vec::new(),
            dirty: None,
            global: None,
            global_size: DEFAULT_GLOBAL_SIZE,
        }
    }

    /// Build and initialise from session settings.
    pub fn from_settings(store: PixelStore<F>, backend: B, settings: &StreamSettings) -> Result<Self> {
        let mut cache = Self::new(store, backend);
        cache.global_size = settings.global_texture_size.max(1);
        cache.initialise(settings.tile_resolution, settings.tile_overlap)?;
        Ok(cache)
    }

    /// Edge length of the fallback built by `get_global_texture`. Has no
    /// effect once the fallback exists.
    pub fn set_global_texture_size(&mut self, size: u32) {
        self.global_size = size.max(1);
    }

    /// Choose the grid so no cell edge exceeds `max_resolution` and allocate
    /// the tile arena. Fails while any tile is referenced.
    pub fn initialise(&mut self, max_resolution: u32, overlap: bool) -> Result<()> {
        let live = self.live_tiles();
        if live > 0 {
            return Err(StreamError::TilesInUse(live));
        }
        self.divisions = grid::compute_divisions(self.store.width(), self.store.height(), max_resolution, overlap);
        self.overlap = overlap;
        self.tiles.clear();
        self.tiles.resize_with((self.divisions * self.divisions) as usize, TileSlot::default);
        log::debug!(
            "tile grid {0}×{0} over {1}×{2} (overlap: {3})",
            self.divisions,
            self.store.width(),
            self.store.height(),
            overlap
        );
        Ok(())
    }

    pub fn get_divisions(&self) -> u32 {
        self.divisions
    }

    pub fn overlap(&self) -> bool {
        self.overlap
    }

    /// Pixel rectangle of cell (cx, cy). Stable for a given size, grid and overlap mode.
    pub fn get_pixel_rect(&self, cx: u32, cy: u32) -> PixelRect {
        grid::cell_rect(self.store.width(), self.store.height(), self.divisions, cx, cy, self.overlap)
    }

    fn slot_index(&self, cx: u32, cy: u32) -> Result<usize> {
        if self.divisions == 0 {
            return Err(StreamError::NotInitialised);
        }
        if cx >= self.divisions || cy >= self.divisions {
            return Err(StreamError::CellOutOfRange { cx, cy, divisions: self.divisions });
        }
        Ok((cy * self.divisions + cx) as usize)
    }

    fn desc(&self, width: u32, height: u32) -> TextureDesc {
        TextureDesc {
            width,
            height,
            channels: self.store.channels(),
            bits_per_channel: self.store.bits_per_channel(),
        }
    }

    // ---- tile lifetime ------------------------------------------------------

    /// Take a reference to cell (cx, cy)'s texture, creating it on first use.
    ///
    /// A failed creation leaves the cell unreferenced.
    pub fn get_texture(&mut self, cx: u32, cy: u32) -> Result<B::Texture> {
        let idx = self.slot_index(cx, cy)?;
        let slot = &mut self.tiles[idx];
        if let Some(texture) = &slot.texture {
            slot.refcount += 1;
            return Ok(texture.clone());
        }

        let rect = self.get_pixel_rect(cx, cy);
        let mut data = vec![0u8; rect.byte_len(self.store.pixel_size())];
        self.store.get_pixels(rect, &mut data)?;
        let desc = self.desc(rect.w, rect.h);
        let texture = self.backend.create_texture(&desc, &data)?;

        let slot = &mut self.tiles[idx];
        slot.refcount = 1;
        slot.texture = Some(texture.clone());
        log::debug!("tile ({}, {}) uploaded: {:?}", cx, cy, rect);
        Ok(texture)
    }

    /// Release one reference; the texture is destroyed when none remain.
    pub fn drop_texture(&mut self, cx: u32, cy: u32) -> Result<()> {
        let idx = self.slot_index(cx, cy)?;
        let slot = &mut self.tiles[idx];
        if slot.refcount == 0 {
            log::warn!("drop_texture({}, {}) on an unreferenced tile ignored", cx, cy);
            return Ok(());
        }
        slot.refcount -= 1;
        if slot.refcount == 0
            && let Some(texture) = slot.texture.take()
        {
            self.backend.destroy_texture(texture);
            log::debug!("tile ({}, {}) destroyed", cx, cy);
        }
        Ok(())
    }

    /// Current reference count of a cell (0 for cells outside the grid).
    pub fn refcount(&self, cx: u32, cy: u32) -> u32 {
        self.slot_index(cx, cy).map_or(0, |idx| self.tiles[idx].refcount)
    }

    /// Number of cells with a resident texture.
    pub fn live_tiles(&self) -> usize {
        self.tiles.iter().filter(|t| t.refcount > 0).count()
    }

    // ---- global fallback ----------------------------------------------------

    /// Low-detail texture of the whole raster, built on first call.
    pub fn get_global_texture(&mut self) -> Result<B::Texture> {
        if let Some(texture) = &self.global {
            return Ok(texture.clone());
        }
        let size = self.global_size;
        let data = if self.store.width() < size || self.store.height() < size {
            self.flat_placeholder(size)?
        } else {
            self.downsample(size)?
        };
        let desc = self.desc(size, size);
        let texture = self.backend.create_texture(&desc, &data)?;
        self.global = Some(texture.clone());
        log::debug!("global fallback {0}×{0} built", size);
        Ok(texture)
    }

    /// Uniform texture filled with the raster's centre pixel.
    fn flat_placeholder(&mut self, size: u32) -> Result<Vec<u8>> {
        let mut pixel = vec![0u8; self.store.pixel_size()];
        if self.store.width() > 0 && self.store.height() > 0 {
            self.store.get_pixel(self.store.width() / 2, self.store.height() / 2, &mut pixel)?;
        }
        Ok(pixel.repeat((size * size) as usize))
    }

    /// Triangle-filtered shrink, one output row (source strip) at a time.
    fn downsample(&mut self, size: u32) -> Result<Vec<u8>> {
        let (width, height) = (self.store.width(), self.store.height());
        let (channels, bits) = (self.store.channels(), self.store.bits_per_channel());
        let ps = self.store.pixel_size();
        let mut out = Vec::with_capacity((size * size) as usize * ps);
        let mut strip = Vec::new();
        for row in 0..size {
            let y0 = (row as u64 * height as u64 / size as u64) as u32;
            let y1 = (((row + 1) as u64 * height as u64 / size as u64) as u32).max(y0 + 1);
            let rect = PixelRect::new(0, y0, width, y1 - y0);
            strip.resize(rect.byte_len(ps), 0);
            self.store.get_pixels(rect, &mut strip)?;
            let shrunk = shrink_strip(&strip, width, rect.h, size, channels, bits).ok_or_else(|| {
                StreamError::InvalidFormat(format!("cannot downsample {} channels × {} bits", channels, bits))
            })?;
            out.extend_from_slice(&shrunk);
        }
        Ok(out)
    }

    // ---- pixel access -------------------------------------------------------

    pub fn get_pixel(&mut self, x: u32, y: u32, out: &mut [u8]) -> Result<()> {
        self.store.get_pixel(x, y, out)
    }

    pub fn get_pixels(&mut self, rect: PixelRect, out: &mut [u8]) -> Result<()> {
        self.store.get_pixels(rect, out)
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, data: &[u8]) -> Result<()> {
        self.mark_dirty(PixelRect::new(x, y, 1, 1));
        self.store.set_pixel(x, y, data)
    }

    pub fn set_pixels(&mut self, rect: PixelRect, data: &[u8]) -> Result<()> {
        self.mark_dirty(rect);
        self.store.set_pixels(rect, data)
    }

    fn mark_dirty(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        self.dirty = Some(self.dirty.map_or(rect, |d| d.union(&rect)));
    }

    /// Area written since the last `update_textures`.
    pub fn dirty_rect(&self) -> Option<PixelRect> {
        self.dirty
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    /// Re-upload the dirty part of every live tile, then clear the dirty area.
    /// Call once per edit batch. Returns the number of tiles refreshed.
    ///
    /// On failure the dirty area is kept so the call can be retried.
    pub fn update_textures(&mut self) -> Result<usize> {
        let Some(dirty) = self.dirty.take() else {
            return Ok(0);
        };
        match self.refresh(&dirty) {
            Ok(refreshed) => {
                log::debug!("refreshed {} tiles for {:?}", refreshed, dirty);
                Ok(refreshed)
            }
            Err(e) => {
                self.dirty = Some(dirty);
                Err(e)
            }
        }
    }

    fn refresh(&mut self, dirty: &PixelRect) -> Result<usize> {
        let ps = self.store.pixel_size();
        let mut refreshed = 0;
        let mut buf = Vec::new();
        for cy in 0..self.divisions {
            for cx in 0..self.divisions {
                let idx = (cy * self.divisions + cx) as usize;
                let Some(texture) = self.tiles[idx].texture.clone() else { continue };
                let cell = self.get_pixel_rect(cx, cy);
                let Some(region) = cell.intersect(dirty) else { continue };
                buf.resize(region.byte_len(ps), 0);
                self.store.get_pixels(region, &mut buf)?;
                let local = PixelRect::new(region.x - cell.x, region.y - cell.y, region.w, region.h);
                self.backend.upload(&texture, local, &buf)?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    // ---- accessors ----------------------------------------------------------

    pub fn store(&self) -> &PixelStore<F> {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn width(&self) -> u32 { self.store.width() }
    pub fn height(&self) -> u32 { self.store.height() }
    pub fn channels(&self) -> u32 { self.store.channels() }
    pub fn pixel_size(&self) -> usize { self.store.pixel_size() }
}

impl<F: TiledImageFile, B: TextureBackend> PixelTarget for TiledTextureCache<F, B> {
    fn width(&self) -> u32 { self.store.width() }
    fn height(&self) -> u32 { self.store.height() }
    fn pixel_size(&self) -> usize { self.store.pixel_size() }

    fn read_pixels(&mut self, rect: PixelRect, out: &mut [u8]) -> Result<()> {
        self.get_pixels(rect, out)
    }

    fn write_pixels(&mut self, rect: PixelRect, data: &[u8]) -> Result<()> {
        self.set_pixels(rect, data)
    }
}

impl<F: TiledImageFile, B: TextureBackend> Drop for TiledTextureCache<F, B> {
    fn drop(&mut self) {
        let live = self.live_tiles();
        if live > 0 {
            log::debug!("cache dropped with {} tiles still referenced", live);
        }
        for slot in &mut self.tiles {
            if let Some(texture) = slot.texture.take() {
                self.backend.destroy_texture(texture);
            }
        }
        if let Some(texture) = self.global.take() {
            self.backend.destroy_texture(texture);
        }
    }
}

// ============================================================================
// STRIP DOWNSAMPLING
// ============================================================================

fn resize_strip<P>(samples: Vec<P::Subpixel>, width: u32, rows: u32, out_width: u32) -> Option<Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let strip = ImageBuffer::<P, Vec<P::Subpixel>>::from_raw(width, rows, samples)?;
    Some(imageops::resize(&strip, out_width, 1, FilterType::Triangle).into_raw())
}

fn to_u16s(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|b| u16::from_ne_bytes([b[0], b[1]])).collect()
}

fn to_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])).collect()
}

/// Shrink a `width × rows` strip to a single row of `out_width` pixels.
fn shrink_strip(strip: &[u8], width: u32, rows: u32, out_width: u32, channels: u32, bits: u32) -> Option<Vec<u8>> {
    match (channels, bits) {
        (1, 8) => resize_strip::<Luma<u8>>(strip.to_vec(), width, rows, out_width),
        (2, 8) => resize_strip::<LumaA<u8>>(strip.to_vec(), width, rows, out_width),
        (3, 8) => resize_strip::<Rgb<u8>>(strip.to_vec(), width, rows, out_width),
        (4, 8) => resize_strip::<Rgba<u8>>(strip.to_vec(), width, rows, out_width),
        (1, 16) => resize_strip::<Luma<u16>>(to_u16s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (2, 16) => resize_strip::<LumaA<u16>>(to_u16s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (3, 16) => resize_strip::<Rgb<u16>>(to_u16s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (4, 16) => resize_strip::<Rgba<u16>>(to_u16s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (1, 32) => resize_strip::<Luma<f32>>(to_f32s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (2, 32) => resize_strip::<LumaA<f32>>(to_f32s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (3, 32) => resize_strip::<Rgb<f32>>(to_f32s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        (4, 32) => resize_strip::<Rgba<f32>>(to_f32s(strip), width, rows, out_width).map(|v| bytemuck::cast_slice(&v).to_vec()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;
    use crate::file::MemoryImageFile;
    use crate::gpu::HeadlessBackend;

    fn make_cache(size: u32, max_res: u32, overlap: bool) -> (TiledTextureCache<MemoryImageFile, HeadlessBackend>, HeadlessBackend) {
        let store = PixelStore::new(MemoryImageFile::new(size, size, 1, 8).unwrap(), 64);
        let backend = HeadlessBackend::new();
        let mut cache = TiledTextureCache::new(store, backend.clone());
        cache.initialise(max_res, overlap).unwrap();
        (cache, backend)
    }

    #[test]
    fn grid_for_256_source() {
        let (cache, _) = make_cache(256, 64, false);
        assert_eq!(cache.get_divisions(), 4);
        assert_eq!(cache.get_pixel_rect(0, 0), PixelRect::new(0, 0, 64, 64));
        assert!(cache.get_pixel_rect(0, 0).intersect(&cache.get_pixel_rect(1, 0)).is_none());

        let (cache, _) = make_cache(257, 65, true);
        let a = cache.get_pixel_rect(0, 0);
        let b = cache.get_pixel_rect(1, 0);
        assert_eq!(a.intersect(&b).map(|r| r.w), Some(1));
    }

    #[test]
    fn overlapping_tiles_stay_within_max_resolution() {
        let (cache, _) = make_cache(256, 64, true);
        assert_eq!(cache.get_divisions(), 8);

        for (size, max_res) in [(256, 64), (256, 128), (200, 64), (513, 128), (100, 33)] {
            let (cache, _) = make_cache(size, max_res, true);
            let d = cache.get_divisions();
            for cy in 0..d {
                for cx in 0..d {
                    let rect = cache.get_pixel_rect(cx, cy);
                    assert!(rect.w <= max_res && rect.h <= max_res, "{}px cell ({}, {}) is {:?}", size, cx, cy, rect);
                    if cx + 1 < d {
                        let right = cache.get_pixel_rect(cx + 1, cy);
                        assert_eq!(rect.intersect(&right).map(|r| r.w), Some(1));
                    }
                    if cy + 1 < d {
                        let below = cache.get_pixel_rect(cx, cy + 1);
                        assert_eq!(rect.intersect(&below).map(|r| r.h), Some(1));
                    }
                }
            }
            let last = cache.get_pixel_rect(d - 1, d - 1);
            assert_eq!((last.right(), last.bottom()), (size, size));
        }
    }

    #[test]
    fn texture_lives_until_last_drop() -> Result<()> {
        let (mut cache, backend) = make_cache(256, 64, false);
        let first = cache.get_texture(1, 2)?;
        for _ in 0..4 {
            let again = cache.get_texture(1, 2)?;
            assert!(again.same_texture(&first));
        }
        for _ in 0..4 {
            cache.drop_texture(1, 2)?;
        }
        assert!(first.is_alive());
        assert_eq!(cache.refcount(1, 2), 1);
        cache.drop_texture(1, 2)?;
        assert!(!first.is_alive());
        assert_eq!(backend.live(), 0);

        // Extra drops never go negative.
        cache.drop_texture(1, 2)?;
        assert_eq!(cache.refcount(1, 2), 0);

        // The slot can be used again.
        let second = cache.get_texture(1, 2)?;
        assert_ne!(second.id(), first.id());
        Ok(())
    }

    #[test]
    fn tile_contents_come_from_the_store() -> Result<()> {
        let (mut cache, _) = make_cache(256, 64, false);
        cache.set_pixel(70, 3, &[42])?;
        let tile = cache.get_texture(1, 0)?;
        assert_eq!(tile.desc().width, 64);
        assert_eq!(tile.pixels()[3 * 64 + 6], 42);
        Ok(())
    }

    #[test]
    fn update_refreshes_only_live_intersecting_tiles() -> Result<()> {
        let (mut cache, backend) = make_cache(256, 64, false);
        let near = cache.get_texture(0, 0)?;
        let far = cache.get_texture(3, 3)?;

        let rect = PixelRect::new(60, 60, 8, 8);
        cache.set_pixels(rect, &[9; 64])?;
        assert_eq!(cache.dirty_rect(), Some(rect));

        assert_eq!(cache.update_textures()?, 1);
        assert_eq!(cache.dirty_rect(), None);
        assert_eq!(backend.uploads(), 1);
        assert_eq!(near.pixels()[63 * 64 + 63], 9);
        assert_eq!(near.pixels()[59 * 64 + 59], 0);
        assert!(far.pixels().iter().all(|&v| v == 0));

        // Tiles created afterwards start from the edited data.
        let edge = cache.get_texture(1, 1)?;
        assert_eq!(edge.pixels()[0], 9);
        assert_eq!(cache.update_textures()?, 0);
        Ok(())
    }

    #[test]
    fn failed_creation_leaves_tile_unreferenced() {
        let store = PixelStore::new(MemoryImageFile::new(256, 256, 1, 8).unwrap(), 64);
        let mut cache = TiledTextureCache::new(store, HeadlessBackend::with_budget(64 * 64));
        cache.initialise(64, false).unwrap();
        cache.get_texture(0, 0).unwrap();
        let err = cache.get_texture(1, 0);
        assert!(matches!(err, Err(StreamError::Gpu(GpuError::OutOfMemory(_)))));
        assert_eq!(cache.refcount(1, 0), 0);
        assert_eq!(cache.live_tiles(), 1);
    }

    #[test]
    fn reinitialise_requires_no_live_tiles() -> Result<()> {
        let (mut cache, _) = make_cache(256, 64, false);
        cache.get_texture(0, 0)?;
        assert!(matches!(cache.initialise(128, false), Err(StreamError::TilesInUse(1))));
        cache.drop_texture(0, 0)?;
        cache.initialise(128, false)?;
        assert_eq!(cache.get_divisions(), 2);
        assert!(matches!(cache.get_texture(2, 0), Err(StreamError::CellOutOfRange { .. })));
        Ok(())
    }

    #[test]
    fn global_texture_is_built_once() -> Result<()> {
        let (mut cache, backend) = make_cache(256, 64, false);
        cache.set_pixels(PixelRect::new(0, 0, 64, 64), &[200; 64 * 64])?;
        let global = cache.get_global_texture()?;
        assert_eq!((global.desc().width, global.desc().height), (64, 64));
        // Top-left quarter of the source is bright, the rest dark.
        assert!(global.pixels()[5 * 64 + 5] > 150);
        assert!(global.pixels()[40 * 64 + 40] < 50);
        let again = cache.get_global_texture()?;
        assert!(again.same_texture(&global));
        assert_eq!(backend.created(), 1);
        Ok(())
    }

    #[test]
    fn small_sources_get_flat_fallback() -> Result<()> {
        let (mut cache, _) = make_cache(32, 64, false);
        cache.set_pixel(16, 16, &[77])?;
        let global = cache.get_global_texture()?;
        assert_eq!(global.desc().width, DEFAULT_GLOBAL_SIZE);
        assert!(global.pixels().iter().all(|&v| v == 77));
        Ok(())
    }
}
