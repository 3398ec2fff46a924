// ============================================================================
// MATERIAL POOL — per-cell materials composed from several tile caches
// ============================================================================
//
// Every stream (layer) is a TiledTextureCache with its own grid.  The pool
// exposes one D×D grid with D = the finest stream's divisions; coarser streams
// are shared by all fine cells that fall inside one of their tiles.  Each
// material carries, per stream, the tile texture and a vec4 that maps world
// positions onto that tile's UVs:
//
//   uv = (world_xy - info.offset) * info.inv_scale

use bytemuck::{Pod, Zeroable};

use crate::cache::TiledTextureCache;
use crate::error::{Result, StreamError};
use crate::file::TiledImageFile;
use crate::gpu::TextureBackend;
use crate::grid::{self, PixelRect};

/// World placement of one tile, laid out for direct upload as a vec4 uniform.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TileInfo {
    pub offset: [f32; 2],
    pub inv_scale: [f32; 2],
}

impl TileInfo {
    pub fn as_vec4(&self) -> [f32; 4] {
        [self.offset[0], self.offset[1], self.inv_scale[0], self.inv_scale[1]]
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Tile UV of a world position.
    pub fn world_to_uv(&self, x: f32, y: f32) -> [f32; 2] {
        [
            (x - self.offset[0]) * self.inv_scale[0],
            (y - self.offset[1]) * self.inv_scale[1],
        ]
    }
}

/// World placement of `rect` inside a `width × height` raster spanning
/// `world_size` units from `world_offset`.
///
/// With overlap, texel centres sit on the raster edges, so spans are measured
/// in texel intervals (`n - 1`) rather than texel counts.
pub fn tile_info(rect: &PixelRect, width: u32, height: u32, overlap: bool, world_size: [f32; 2], world_offset: [f32; 2]) -> TileInfo {
    let axis = |start: u32, span: u32, len: u32, size: f32, origin: f32| -> (f32, f32) {
        let (span, len) = if overlap {
            (span.saturating_sub(1), len.saturating_sub(1))
        } else {
            (span, len)
        };
        if len == 0 || span == 0 {
            return (origin, 0.0);
        }
        let offset = origin + start as f32 / len as f32 * size;
        let extent = span as f32 / len as f32 * size;
        (offset, if extent != 0.0 { 1.0 / extent } else { 0.0 })
    };
    let (ox, ix) = axis(rect.x, rect.w, width, world_size[0], world_offset[0]);
    let (oy, iy) = axis(rect.y, rect.h, height, world_size[1], world_offset[1]);
    TileInfo { offset: [ox, oy], inv_scale: [ix, iy] }
}

/// Name of the info vector bound next to a stream's texture.
pub fn info_param(stream: &str) -> String {
    format!("{}_info", stream)
}

// ============================================================================
// MATERIAL
// ============================================================================

/// A renderer-ready material: named textures plus named tile-info vectors.
#[derive(Clone, Debug)]
pub struct Material<T> {
    name: String,
    textures: Vec<(String, T)>,
    infos: Vec<(String, TileInfo)>,
}

impl<T> Material<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            textures: Vec::new(),
            infos: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_texture(&mut self, param: &str, texture: T) {
        match self.textures.iter_mut().find(|(n, _)| n == param) {
            Some(slot) => slot.1 = texture,
            None => self.textures.push((param.to_string(), texture)),
        }
    }

    pub fn texture(&self, param: &str) -> Option<&T> {
        self.textures.iter().find(|(n, _)| n == param).map(|(_, t)| t)
    }

    pub fn remove_texture(&mut self, param: &str) -> Option<T> {
        let idx = self.textures.iter().position(|(n, _)| n == param)?;
        Some(self.textures.remove(idx).1)
    }

    pub fn set_info(&mut self, param: &str, info: TileInfo) {
        match self.infos.iter_mut().find(|(n, _)| n == param) {
            Some(slot) => slot.1 = info,
            None => self.infos.push((param.to_string(), info)),
        }
    }

    pub fn info(&self, param: &str) -> Option<TileInfo> {
        self.infos.iter().find(|(n, _)| n == param).map(|(_, i)| *i)
    }

    pub fn remove_info(&mut self, param: &str) -> Option<TileInfo> {
        let idx = self.infos.iter().position(|(n, _)| n == param)?;
        Some(self.infos.remove(idx).1)
    }

    pub fn textures(&self) -> impl Iterator<Item = (&str, &T)> {
        self.textures.iter().map(|(n, t)| (n.as_str(), t))
    }
}

// ============================================================================
// MATERIAL POOL
// ============================================================================

/// Key of a live material, returned by [`MaterialPool::get_material`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialHandle {
    pub cx: u32,
    pub cy: u32,
}

struct Stream<F: TiledImageFile, B: TextureBackend> {
    name: String,
    cache: TiledTextureCache<F, B>,
}

/// Arena slot for one material cell. `material.is_some() == (refcount > 0)`.
struct MaterialCell<T> {
    refcount: u32,
    material: Option<Material<T>>,
}

impl<T> Default for MaterialCell<T> {
    fn default() -> Self {
        Self { refcount: 0, material: None }
    }
}

/// Reference-counted materials over one or more tile caches.
pub struct MaterialPool<F: TiledImageFile, B: TextureBackend> {
    template: Material<B::Texture>,
    streams: Vec<Stream<F, B>>,
    /// Cells per axis; 0 until `initialise`.
    divisions: u32,
    cells: Vec<MaterialCell<B::Texture>>,
    global: Option<Material<B::Texture>>,
    world_size: [f32; 2],
    world_offset: [f32; 2],
}

impl<F: TiledImageFile, B: TextureBackend> MaterialPool<F, B> {
    /// `template` is cloned for every cell and for the global material.
    pub fn new(template: Material<B::Texture>) -> Self {
        Self {
            template,
            streams: Vec::new(),
            divisions: 0,
            cells: Vec::new(),
            global: None,
            world_size: [1.0, 1.0],
            world_offset: [0.0, 0.0],
        }
    }

    /// World extent covered by the streams. Live materials are updated.
    pub fn set_coordinates(&mut self, world_size: [f32; 2], world_offset: [f32; 2]) {
        self.world_size = world_size;
        self.world_offset = world_offset;
        for idx in 0..self.cells.len() {
            if self.cells[idx].material.is_none() {
                continue;
            }
            let (cx, cy) = self.cell_coord(idx);
            for s in 0..self.streams.len() {
                let info = self.stream_info(s, cx, cy);
                let param = info_param(&self.streams[s].name);
                if let Some(material) = self.cells[idx].material.as_mut() {
                    material.set_info(&param, info);
                }
            }
        }
        let global_info = self.global_info();
        if let Some(global) = self.global.as_mut() {
            for stream in &self.streams {
                global.set_info(&info_param(&stream.name), global_info);
            }
        }
    }

    /// Register a layer. Once materials exist they all receive the new layer
    /// immediately. A layer finer than an initialised grid is rejected.
    pub fn add_stream(&mut self, name: &str, cache: TiledTextureCache<F, B>) -> Result<()> {
        if self.streams.iter().any(|s| s.name == name) {
            return Err(StreamError::DuplicateStream(name.to_string()));
        }
        let divisions = cache.get_divisions();
        if divisions == 0 {
            return Err(StreamError::NotInitialised);
        }
        if self.divisions > 0 && divisions > self.divisions {
            return Err(StreamError::DivisionMismatch {
                name: name.to_string(),
                divisions,
                grid: self.divisions,
            });
        }
        self.streams.push(Stream { name: name.to_string(), cache });
        let s = self.streams.len() - 1;

        let live: Vec<usize> = (0..self.cells.len()).filter(|&i| self.cells[i].refcount > 0).collect();
        for (done, &idx) in live.iter().enumerate() {
            if let Err(e) = self.bind_stream(s, idx) {
                for &bound in &live[..done] {
                    self.unbind_stream(s, bound)?;
                }
                self.streams.pop();
                return Err(e);
            }
        }
        if self.global.is_some() {
            let texture = match self.streams[s].cache.get_global_texture() {
                Ok(texture) => texture,
                Err(e) => {
                    for &idx in &live {
                        self.unbind_stream(s, idx)?;
                    }
                    self.streams.pop();
                    return Err(e);
                }
            };
            let info = self.global_info();
            if let Some(global) = self.global.as_mut() {
                global.set_texture(name, texture);
                global.set_info(&info_param(name), info);
            }
        }
        log::debug!("stream '{}' added ({} divisions, {} live cells)", name, divisions, live.len());
        Ok(())
    }

    /// Unregister a layer, releasing its textures from every live material.
    pub fn remove_stream(&mut self, name: &str) -> Result<TiledTextureCache<F, B>> {
        let s = self
            .streams
            .iter()
            .position(|st| st.name == name)
            .ok_or_else(|| StreamError::UnknownStream(name.to_string()))?;
        for idx in 0..self.cells.len() {
            if self.cells[idx].refcount > 0 {
                self.unbind_stream(s, idx)?;
            }
        }
        if let Some(global) = self.global.as_mut() {
            global.remove_texture(name);
            global.remove_info(&info_param(name));
        }
        log::debug!("stream '{}' removed", name);
        Ok(self.streams.remove(s).cache)
    }

    /// Fix the grid at the finest stream's divisions and allocate the cell arena.
    pub fn initialise(&mut self) -> Result<()> {
        let divisions = self
            .streams
            .iter()
            .map(|s| s.cache.get_divisions())
            .max()
            .ok_or(StreamError::NoStreams)?;
        let live = self.cells.iter().filter(|c| c.refcount > 0).count();
        if live > 0 {
            return Err(StreamError::TilesInUse(live));
        }
        self.divisions = divisions;
        self.cells.clear();
        self.cells.resize_with((divisions * divisions) as usize, MaterialCell::default);
        Ok(())
    }

    pub fn get_divisions(&self) -> u32 {
        self.divisions
    }

    fn cell_index(&self, cx: u32, cy: u32) -> Result<usize> {
        if self.divisions == 0 {
            return Err(StreamError::NotInitialised);
        }
        if cx >= self.divisions || cy >= self.divisions {
            return Err(StreamError::CellOutOfRange { cx, cy, divisions: self.divisions });
        }
        Ok((cy * self.divisions + cx) as usize)
    }

    fn cell_coord(&self, idx: usize) -> (u32, u32) {
        (idx as u32 % self.divisions, idx as u32 / self.divisions)
    }

    /// Stream `s`'s cell under pool cell (cx, cy).
    fn stream_cell(&self, s: usize, cx: u32, cy: u32) -> (u32, u32) {
        let d = self.streams[s].cache.get_divisions();
        (grid::map_cell(self.divisions, cx, d), grid::map_cell(self.divisions, cy, d))
    }

    fn stream_info(&self, s: usize, cx: u32, cy: u32) -> TileInfo {
        let (lx, ly) = self.stream_cell(s, cx, cy);
        let cache = &self.streams[s].cache;
        tile_info(
            &cache.get_pixel_rect(lx, ly),
            cache.width(),
            cache.height(),
            cache.overlap(),
            self.world_size,
            self.world_offset,
        )
    }

    fn global_info(&self) -> TileInfo {
        let inv = |size: f32| if size != 0.0 { 1.0 / size } else { 0.0 };
        TileInfo {
            offset: self.world_offset,
            inv_scale: [inv(self.world_size[0]), inv(self.world_size[1])],
        }
    }

    /// Acquire stream `s`'s texture for live cell `idx` and bind it.
    fn bind_stream(&mut self, s: usize, idx: usize) -> Result<()> {
        let (cx, cy) = self.cell_coord(idx);
        let (lx, ly) = self.stream_cell(s, cx, cy);
        let texture = self.streams[s].cache.get_texture(lx, ly)?;
        let info = self.stream_info(s, cx, cy);
        let name = &self.streams[s].name;
        if let Some(material) = self.cells[idx].material.as_mut() {
            material.set_texture(name, texture);
            material.set_info(&info_param(name), info);
        }
        Ok(())
    }

    /// Unbind stream `s` from live cell `idx` and release its texture.
    fn unbind_stream(&mut self, s: usize, idx: usize) -> Result<()> {
        let (cx, cy) = self.cell_coord(idx);
        let (lx, ly) = self.stream_cell(s, cx, cy);
        let name = &self.streams[s].name;
        if let Some(material) = self.cells[idx].material.as_mut() {
            material.remove_texture(name);
            material.remove_info(&info_param(name));
        }
        self.streams[s].cache.drop_texture(lx, ly)
    }

    // ---- material lifetime --------------------------------------------------

    /// Take a reference to cell (cx, cy)'s material, building it on first use.
    pub fn get_material(&mut self, cx: u32, cy: u32) -> Result<MaterialHandle> {
        let idx = self.cell_index(cx, cy)?;
        let handle = MaterialHandle { cx, cy };
        if self.cells[idx].refcount > 0 {
            self.cells[idx].refcount += 1;
            return Ok(handle);
        }

        let mut material = self.template.clone();
        for s in 0..self.streams.len() {
            let (lx, ly) = self.stream_cell(s, cx, cy);
            match self.streams[s].cache.get_texture(lx, ly) {
                Ok(texture) => {
                    let name = &self.streams[s].name;
                    material.set_texture(name, texture);
                    material.set_info(&info_param(name), self.stream_info(s, cx, cy));
                }
                Err(e) => {
                    for acquired in 0..s {
                        let (ax, ay) = self.stream_cell(acquired, cx, cy);
                        self.streams[acquired].cache.drop_texture(ax, ay)?;
                    }
                    return Err(e);
                }
            }
        }

        let cell = &mut self.cells[idx];
        cell.refcount = 1;
        cell.material = Some(material);
        log::debug!("material ({}, {}) built from {} streams", cx, cy, self.streams.len());
        Ok(handle)
    }

    /// Release one reference; at zero every stream's tile reference is dropped.
    pub fn drop_material(&mut self, cx: u32, cy: u32) -> Result<()> {
        let idx = self.cell_index(cx, cy)?;
        let cell = &mut self.cells[idx];
        if cell.refcount == 0 {
            log::warn!("drop_material({}, {}) on an unreferenced cell ignored", cx, cy);
            return Ok(());
        }
        cell.refcount -= 1;
        if cell.refcount > 0 {
            return Ok(());
        }
        cell.material = None;
        // Every stream gives its reference back even if an earlier one fails.
        let mut first_err = None;
        for s in 0..self.streams.len() {
            let (lx, ly) = self.stream_cell(s, cx, cy);
            if let Err(e) = self.streams[s].cache.drop_texture(lx, ly) {
                log::warn!("stream '{}' failed to release tile ({}, {}): {}", self.streams[s].name, lx, ly, e);
                first_err.get_or_insert(e);
            }
        }
        log::debug!("material ({}, {}) released", cx, cy);
        first_err.map_or(Ok(()), Err)
    }

    /// Same as [`drop_material`](Self::drop_material) for a handle.
    pub fn release(&mut self, handle: MaterialHandle) -> Result<()> {
        self.drop_material(handle.cx, handle.cy)
    }

    /// The material behind a live handle.
    pub fn material(&self, handle: MaterialHandle) -> Option<&Material<B::Texture>> {
        let idx = self.cell_index(handle.cx, handle.cy).ok()?;
        self.cells[idx].material.as_ref()
    }

    pub fn refcount(&self, cx: u32, cy: u32) -> u32 {
        self.cell_index(cx, cy).map_or(0, |idx| self.cells[idx].refcount)
    }

    /// Low-detail material over every stream's global texture, built on first call.
    pub fn get_global(&mut self) -> Result<&Material<B::Texture>> {
        if self.global.is_none() {
            let mut material = self.template.clone();
            let info = self.global_info();
            for stream in &mut self.streams {
                let texture = stream.cache.get_global_texture()?;
                material.set_texture(&stream.name, texture);
                material.set_info(&info_param(&stream.name), info);
            }
            self.global = Some(material);
        }
        self.global.as_ref().ok_or(StreamError::NoStreams)
    }

    // ---- streams ------------------------------------------------------------

    pub fn stream(&self, name: &str) -> Option<&TiledTextureCache<F, B>> {
        self.streams.iter().find(|s| s.name == name).map(|s| &s.cache)
    }

    /// Mutable access for editing. Call `update_textures` after a batch.
    pub fn stream_mut(&mut self, name: &str) -> Option<&mut TiledTextureCache<F, B>> {
        self.streams.iter_mut().find(|s| s.name == name).map(|s| &mut s.cache)
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.name.as_str())
    }

    /// Refresh every stream's dirty tiles. Returns the tiles refreshed.
    pub fn update_textures(&mut self) -> Result<usize> {
        let mut refreshed = 0;
        for stream in &mut self.streams {
            refreshed += stream.cache.update_textures()?;
        }
        Ok(refreshed)
    }
}
