// ============================================================================
// HEADLESS BACKEND — CPU-side textures with lifetime bookkeeping
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{TextureBackend, TextureDesc};
use crate::error::GpuError;
use crate::grid::{self, PixelRect};

struct TextureData {
    id: u64,
    desc: TextureDesc,
    pixels: RefCell<Vec<u8>>,
    alive: Cell<bool>,
}

/// Handle to a CPU-side texture. Clones share the same texture.
#[derive(Clone)]
pub struct HeadlessTexture(Rc<TextureData>);

impl HeadlessTexture {
    /// Unique per created texture, never reused.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn desc(&self) -> TextureDesc {
        self.0.desc
    }

    /// False once the backend has destroyed it.
    pub fn is_alive(&self) -> bool {
        self.0.alive.get()
    }

    /// Copy of the texel data.
    pub fn pixels(&self) -> Vec<u8> {
        self.0.pixels.borrow().clone()
    }

    /// Same underlying texture object.
    pub fn same_texture(&self, other: &HeadlessTexture) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for HeadlessTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessTexture")
            .field("id", &self.0.id)
            .field("size", &(self.0.desc.width, self.0.desc.height))
            .field("alive", &self.0.alive.get())
            .finish()
    }
}

#[derive(Default)]
struct Counters {
    next_id: u64,
    created: usize,
    destroyed: usize,
    uploads: usize,
    /// Texel-count cap standing in for device memory; `None` is unlimited.
    budget: Option<usize>,
    resident: usize,
}

/// Texture backend that keeps textures in host memory.
///
/// Clones share counters, so a caller can keep one clone to observe what a
/// cache does with the other.
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    counters: Rc<RefCell<Counters>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail creations once `texels` would be exceeded.
    pub fn with_budget(texels: usize) -> Self {
        let backend = Self::default();
        backend.counters.borrow_mut().budget = Some(texels);
        backend
    }

    pub fn created(&self) -> usize {
        self.counters.borrow().created
    }

    pub fn destroyed(&self) -> usize {
        self.counters.borrow().destroyed
    }

    /// Textures created and not yet destroyed.
    pub fn live(&self) -> usize {
        let c = self.counters.borrow();
        c.created - c.destroyed
    }

    pub fn uploads(&self) -> usize {
        self.counters.borrow().uploads
    }
}

impl TextureBackend for HeadlessBackend {
    type Texture = HeadlessTexture;

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> Result<HeadlessTexture, GpuError> {
        let mut c = self.counters.borrow_mut();
        let texels = desc.width as usize * desc.height as usize;
        if let Some(budget) = c.budget
            && c.resident + texels > budget
        {
            return Err(GpuError::OutOfMemory(format!(
                "{} texels requested, {} of {} in use",
                texels, c.resident, budget
            )));
        }
        c.resident += texels;
        c.created += 1;
        c.next_id += 1;
        Ok(HeadlessTexture(Rc::new(TextureData {
            id: c.next_id,
            desc: *desc,
            pixels: RefCell::new(data.to_vec()),
            alive: Cell::new(true),
        })))
    }

    fn upload(&mut self, texture: &HeadlessTexture, rect: PixelRect, data: &[u8]) -> Result<(), GpuError> {
        if !texture.is_alive() {
            return Err(GpuError::Validation(format!("upload to destroyed texture {}", texture.id())));
        }
        let desc = texture.desc();
        let full = PixelRect::new(0, 0, desc.width, desc.height);
        grid::blit(data, &rect, &mut texture.0.pixels.borrow_mut()[..], &full, &rect, desc.texel_size());
        self.counters.borrow_mut().uploads += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        if texture.0.alive.replace(false) {
            let desc = texture.desc();
            let mut c = self.counters.borrow_mut();
            c.destroyed += 1;
            c.resident -= desc.width as usize * desc.height as usize;
        }
    }
}
