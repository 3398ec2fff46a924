// ============================================================================
// EDIT HISTORY — block-granular undo snapshots over a pixel target
// ============================================================================

use std::collections::{BTreeMap, VecDeque};

use crate::error::Result;
use crate::grid::{self, PixelRect};
use crate::settings::StreamSettings;
use crate::store::PixelTarget;

/// Default edge length of an undo block.
pub const DEFAULT_BLOCK_SIZE: u32 = 64;

/// Snapshot of every block a stroke touched, taken before the stroke.
///
/// Blocks are grid-aligned `block_size` squares (clipped at the raster edge)
/// and each is captured at most once, so however many overlapping rectangles
/// a stroke reports, the entry holds the state from before the whole stroke.
#[derive(Clone, Debug)]
pub struct EditHistoryBlock {
    name: String,
    block_size: u32,
    /// Block coordinate → (clipped rect, pixels).
    blocks: BTreeMap<(u32, u32), (PixelRect, Vec<u8>)>,
}

impl EditHistoryBlock {
    pub fn new(name: impl Into<String>, block_size: u32) -> Self {
        Self {
            name: name.into(),
            block_size: block_size.max(1),
            blocks: BTreeMap::new(),
        }
    }

    /// Entry using the session's `history_block_size`.
    pub fn from_settings(name: impl Into<String>, settings: &StreamSettings) -> Self {
        Self::new(name, settings.history_block_size)
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Snapshot every not-yet-captured block intersecting `rect`.
    pub fn add_rect<T: PixelTarget + ?Sized>(&mut self, target: &mut T, rect: PixelRect) -> Result<()> {
        let (width, height) = (target.width(), target.height());
        let Some(rect) = rect.intersect(&PixelRect::new(0, 0, width, height)) else {
            return Ok(());
        };
        for (bx, by) in grid::blocks_covering(&rect, self.block_size) {
            if self.blocks.contains_key(&(bx, by)) {
                continue;
            }
            let block = grid::block_rect(bx, by, self.block_size, width, height);
            let mut pixels = vec![0u8; block.byte_len(target.pixel_size())];
            target.read_pixels(block, &mut pixels)?;
            self.blocks.insert((bx, by), (block, pixels));
        }
        Ok(())
    }

    /// Write every snapshot back. Running it twice restores the same state.
    pub fn execute<T: PixelTarget + ?Sized>(&self, target: &mut T) -> Result<()> {
        for (block, pixels) in self.blocks.values() {
            target.write_pixels(*block, pixels)?;
        }
        log::debug!("restored '{}' ({} blocks)", self.name, self.blocks.len());
        Ok(())
    }

    /// Snapshot the current contents of the same blocks, e.g. to redo after
    /// this entry has been executed.
    pub fn capture_inverse<T: PixelTarget + ?Sized>(&self, target: &mut T) -> Result<EditHistoryBlock> {
        let mut inverse = EditHistoryBlock::new(self.name.clone(), self.block_size);
        for (&key, (block, _)) in &self.blocks {
            let mut pixels = vec![0u8; block.byte_len(target.pixel_size())];
            target.read_pixels(*block, &mut pixels)?;
            inverse.blocks.insert(key, (*block, pixels));
        }
        Ok(inverse)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether block (bx, by) has been captured.
    pub fn contains_block(&self, bx: u32, by: u32) -> bool {
        self.blocks.contains_key(&(bx, by))
    }

    /// Bounding rectangle of the captured blocks.
    pub fn bounds(&self) -> Option<PixelRect> {
        self.blocks.values().map(|(r, _)| *r).reduce(|a, b| a.union(&b))
    }

    pub fn memory_size(&self) -> usize {
        self.blocks.values().map(|(_, p)| p.len()).sum()
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history manager with memory limits.
pub struct EditHistory {
    undo_stack: VecDeque<EditHistoryBlock>,
    redo_stack: VecDeque<EditHistoryBlock>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for EditHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl EditHistory {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(100 * 1024 * 1024), // 100 MB default limit
            total_memory: 0,
        }
    }

    pub fn from_settings(settings: &StreamSettings) -> Self {
        let mut history = Self::new(settings.max_history_steps);
        history.max_memory_bytes = settings.max_history_bytes();
        history
    }

    pub fn set_memory_limit(&mut self, bytes: Option<usize>) {
        self.max_memory_bytes = bytes;
        self.prune();
    }

    /// Record a finished stroke. Empty entries are dropped.
    pub fn push(&mut self, entry: EditHistoryBlock) {
        if entry.is_empty() {
            return;
        }
        // Clear redo stack when a new action is performed
        for e in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(e.memory_size());
        }

        self.total_memory += entry.memory_size();
        self.undo_stack.push_back(entry);

        self.prune();
    }

    /// Restore the state before the most recent entry. The current contents
    /// of its blocks become the redo entry.
    pub fn undo<T: PixelTarget + ?Sized>(&mut self, target: &mut T) -> Result<Option<String>> {
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        let redo = match entry.capture_inverse(target) {
            Ok(redo) => redo,
            Err(e) => {
                self.undo_stack.push_back(entry);
                return Err(e);
            }
        };
        if let Err(e) = entry.execute(target) {
            self.undo_stack.push_back(entry);
            return Err(e);
        }
        self.total_memory = self.total_memory.saturating_sub(entry.memory_size()) + redo.memory_size();
        let name = entry.get_name().to_string();
        self.redo_stack.push_back(redo);
        self.prune();
        Ok(Some(name))
    }

    /// Re-apply the most recently undone entry.
    pub fn redo<T: PixelTarget + ?Sized>(&mut self, target: &mut T) -> Result<Option<String>> {
        let Some(entry) = self.redo_stack.pop_back() else {
            return Ok(None);
        };
        let undo = match entry.capture_inverse(target) {
            Ok(undo) => undo,
            Err(e) => {
                self.redo_stack.push_back(entry);
                return Err(e);
            }
        };
        if let Err(e) = entry.execute(target) {
            self.redo_stack.push_back(entry);
            return Err(e);
        }
        self.total_memory = self.total_memory.saturating_sub(entry.memory_size()) + undo.memory_size();
        let name = entry.get_name().to_string();
        self.undo_stack.push_back(undo);
        self.prune();
        Ok(Some(name))
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|e| e.get_name().to_string()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Prune old entries to stay within limits
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
            // Then the redo entries furthest from the current state.
            while self.total_memory > max_bytes && self.undo_stack.len() + self.redo_stack.len() > 1 {
                let Some(removed) = self.redo_stack.pop_front() else { break };
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }
}
