// ============================================================================
// PIXEL STORE — single-window write buffer over a tiled image file
// ============================================================================
//
// One square window of the raster is resident at a time.  Writes land in the
// window and reach the file on `flush()` or when the window has to move.
//
// Window policy: reads never move the window (anything outside it comes
// straight from the file), writes always make the window cover their target
// when the target fits inside the window dimensions.

use std::path::Path;

use crate::error::{Result, check_len};
use crate::file::{RawTileFile, TiledImageFile};
use crate::grid::{self, PixelRect};

/// Anything pixels can be read from and written to by rectangle.
///
/// Undo capture goes through this so edits replayed on a texture cache still
/// mark its dirty region.
pub trait PixelTarget {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel_size(&self) -> usize;
    fn read_pixels(&mut self, rect: PixelRect, out: &mut [u8]) -> Result<()>;
    fn write_pixels(&mut self, rect: PixelRect, data: &[u8]) -> Result<()>;
}

/// Buffered random access over a [`TiledImageFile`].
pub struct PixelStore<F: TiledImageFile> {
    file: F,
    /// Window edge length requested at open time.
    window_size: u32,
    /// Resident rectangle; empty until the first write.
    window: PixelRect,
    buffer: Vec<u8>,
    /// True when `buffer` holds edits not yet written to `file`.
    dirty: bool,
    pixel_size: usize,
}

impl PixelStore<RawTileFile> {
    /// Open an existing raw raster.
    pub fn open<P: AsRef<Path>>(path: P, window_size: u32) -> Result<Self> {
        Ok(Self::new(RawTileFile::open(path)?, window_size))
    }

    /// Create a zero-filled raw raster.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: u32,
        height: u32,
        channels: u32,
        bits_per_channel: u32,
        window_size: u32,
    ) -> Result<Self> {
        Ok(Self::new(
            RawTileFile::create(path, width, height, channels, bits_per_channel)?,
            window_size,
        ))
    }
}

impl<F: TiledImageFile> PixelStore<F> {
    pub fn new(file: F, window_size: u32) -> Self {
        let pixel_size = file.pixel_size();
        Self {
            file,
            window_size: window_size.max(1),
            window: PixelRect::default(),
            buffer: Vec::new(),
            dirty: false,
            pixel_size,
        }
    }

    /// Flush and sync. Dropping a store flushes too, but only this reports failure.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.file.sync()?;
        Ok(())
    }

    pub fn width(&self) -> u32 { self.file.width() }
    pub fn height(&self) -> u32 { self.file.height() }
    pub fn channels(&self) -> u32 { self.file.channels() }
    pub fn bits_per_channel(&self) -> u32 { self.file.bits_per_channel() }
    pub fn pixel_size(&self) -> usize { self.pixel_size }
    pub fn window_rect(&self) -> PixelRect { self.window }
    pub fn is_dirty(&self) -> bool { self.dirty }

    /// The backing file.
    pub fn file(&self) -> &F {
        &self.file
    }

    /// Window dimensions, clamped to the raster.
    fn window_extent(&self) -> (u32, u32) {
        (self.window_size.min(self.width()), self.window_size.min(self.height()))
    }

    // ---- window management --------------------------------------------------

    /// Write the window back if it holds unsaved edits.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty && !self.window.is_empty() {
            self.file.write_block(self.window, &self.buffer)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Flush, then recentre the window on (x, y) and load its contents.
    pub fn fill_buffer(&mut self, x: u32, y: u32) -> Result<()> {
        let (ww, wh) = self.window_extent();
        let wx = x.saturating_sub(ww / 2).min(self.width() - ww);
        let wy = y.saturating_sub(wh / 2).min(self.height() - wh);
        self.load_window(PixelRect::new(wx, wy, ww, wh))
    }

    fn load_window(&mut self, rect: PixelRect) -> Result<()> {
        self.flush()?;
        // Drop the old window first so a failed read leaves nothing stale behind.
        self.window = PixelRect::default();
        self.buffer.resize(rect.byte_len(self.pixel_size), 0);
        self.file.read_block(rect, &mut self.buffer)?;
        self.window = rect;
        log::debug!("pixel window moved to {:?}", rect);
        Ok(())
    }

    /// Move the window so it contains `rect`, which must fit the window extent.
    fn cover(&mut self, rect: &PixelRect) -> Result<()> {
        if self.window.contains_rect(rect) {
            return Ok(());
        }
        let (ww, wh) = self.window_extent();
        let wx = (rect.x + rect.w / 2)
            .saturating_sub(ww / 2)
            .min(rect.x)
            .max(rect.right().saturating_sub(ww))
            .min(self.width() - ww);
        let wy = (rect.y + rect.h / 2)
            .saturating_sub(wh / 2)
            .min(rect.y)
            .max(rect.bottom().saturating_sub(wh))
            .min(self.height() - wh);
        self.load_window(PixelRect::new(wx, wy, ww, wh))
    }

    #[inline]
    fn buffer_offset(&self, x: u32, y: u32) -> usize {
        ((y - self.window.y) as usize * self.window.w as usize + (x - self.window.x) as usize) * self.pixel_size
    }

    // ---- pixel access -------------------------------------------------------

    /// Read one pixel. Outside the window this reads the file directly.
    pub fn get_pixel(&mut self, x: u32, y: u32, out: &mut [u8]) -> Result<()> {
        check_len(self.pixel_size, out.len())?;
        if self.window.contains_point(x, y) {
            let off = self.buffer_offset(x, y);
            out.copy_from_slice(&self.buffer[off..off + self.pixel_size]);
        } else {
            self.file.get_pixel(x, y, out)?;
        }
        Ok(())
    }

    /// Write one pixel, recentring the window on it if needed.
    pub fn set_pixel(&mut self, x: u32, y: u32, data: &[u8]) -> Result<()> {
        check_len(self.pixel_size, data.len())?;
        if !self.window.contains_point(x, y) {
            self.fill_buffer(x, y)?;
        }
        let off = self.buffer_offset(x, y);
        self.buffer[off..off + self.pixel_size].copy_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    /// Read a rectangle, taking the windowed part from memory and the rest
    /// from the file.
    pub fn get_pixels(&mut self, rect: PixelRect, out: &mut [u8]) -> Result<()> {
        check_len(rect.byte_len(self.pixel_size), out.len())?;
        let Some(inner) = self.window.intersect(&rect) else {
            if !rect.is_empty() {
                self.file.read_block(rect, out)?;
            }
            return Ok(());
        };
        grid::blit(&self.buffer, &self.window, out, &rect, &inner, self.pixel_size);
        if inner == rect {
            return Ok(());
        }
        let mut band_buf = Vec::new();
        for band in rect.subtract(&self.window) {
            band_buf.resize(band.byte_len(self.pixel_size), 0);
            self.file.read_block(band, &mut band_buf)?;
            grid::blit(&band_buf, &band, out, &rect, &band, self.pixel_size);
        }
        Ok(())
    }

    /// Write a rectangle. The window is moved to cover it when it fits;
    /// larger rectangles write their windowed part to memory and the
    /// remainder straight to the file.
    pub fn set_pixels(&mut self, rect: PixelRect, data: &[u8]) -> Result<()> {
        check_len(rect.byte_len(self.pixel_size), data.len())?;
        if rect.is_empty() {
            return Ok(());
        }
        let (ww, wh) = self.window_extent();
        if rect.w <= ww && rect.h <= wh {
            self.cover(&rect)?;
            grid::blit(data, &rect, &mut self.buffer, &self.window, &rect, self.pixel_size);
            self.dirty = true;
            return Ok(());
        }

        if let Some(inner) = self.window.intersect(&rect) {
            grid::blit(data, &rect, &mut self.buffer, &self.window, &inner, self.pixel_size);
            self.dirty = true;
        }
        let mut band_buf = Vec::new();
        for band in rect.subtract(&self.window) {
            band_buf.resize(band.byte_len(self.pixel_size), 0);
            grid::blit(data, &rect, &mut band_buf, &band, &band, self.pixel_size);
            self.file.write_block(band, &band_buf)?;
        }
        Ok(())
    }
}

impl<F: TiledImageFile> PixelTarget for PixelStore<F> {
    fn width(&self) -> u32 { PixelStore::width(self) }
    fn height(&self) -> u32 { PixelStore::height(self) }
    fn pixel_size(&self) -> usize { self.pixel_size }

    fn read_pixels(&mut self, rect: PixelRect, out: &mut [u8]) -> Result<()> {
        self.get_pixels(rect, out)
    }

    fn write_pixels(&mut self, rect: PixelRect, data: &[u8]) -> Result<()> {
        self.set_pixels(rect, data)
    }
}

impl<F: TiledImageFile> Drop for PixelStore<F> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("pixel store lost unsaved window {:?}: {}", self.window, e);
        }
    }
}
