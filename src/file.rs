// ============================================================================
// TILED IMAGE FILES — random-access raster storage behind the pixel store
// ============================================================================

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::grid::PixelRect;

/// Random-access raster file with block read/write.
///
/// Block buffers are tightly packed, row-major, `pixel_size()` bytes per pixel.
/// Rectangles are trusted to lie inside the raster.
pub trait TiledImageFile {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn channels(&self) -> u32;
    fn bits_per_channel(&self) -> u32;

    fn read_block(&mut self, rect: PixelRect, out: &mut [u8]) -> io::Result<()>;
    fn write_block(&mut self, rect: PixelRect, data: &[u8]) -> io::Result<()>;

    /// Push buffered writes down to the storage medium.
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn pixel_size(&self) -> usize {
        (self.channels() * self.bits_per_channel() / 8) as usize
    }

    fn get_pixel(&mut self, x: u32, y: u32, out: &mut [u8]) -> io::Result<()> {
        self.read_block(PixelRect::new(x, y, 1, 1), out)
    }

    fn set_pixel(&mut self, x: u32, y: u32, data: &[u8]) -> io::Result<()> {
        self.write_block(PixelRect::new(x, y, 1, 1), data)
    }
}

/// Reject texel layouts the streaming layer cannot carry.
pub(crate) fn validate_layout(channels: u32, bits: u32) -> Result<()> {
    if !(1..=4).contains(&channels) {
        return Err(StreamError::InvalidFormat(format!("{} channels (expected 1-4)", channels)));
    }
    if !matches!(bits, 8 | 16 | 32) {
        return Err(StreamError::InvalidFormat(format!("{} bits per channel (expected 8, 16 or 32)", bits)));
    }
    Ok(())
}

// ============================================================================
// RAW TILE FILE — uncompressed on-disk raster
// ============================================================================

/// Magic header for raw tile files
const RAW_MAGIC: &str = "TSR1";

/// Serializable header, followed by `width * height * pixel_size` payload bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct RawHeader {
    magic: String,
    width: u32,
    height: u32,
    channels: u32,
    bits_per_channel: u32,
}

/// Uncompressed row-major raster on disk.
#[derive(Debug)]
pub struct RawTileFile {
    file: File,
    header: RawHeader,
    /// Byte offset of pixel (0, 0).
    data_offset: u64,
}

impl RawTileFile {
    /// Create (or truncate) a zero-filled raster at `path`.
    pub fn create<P: AsRef<Path>>(path: P, width: u32, height: u32, channels: u32, bits_per_channel: u32) -> Result<Self> {
        validate_layout(channels, bits_per_channel)?;
        let header = RawHeader {
            magic: RAW_MAGIC.to_string(),
            width,
            height,
            channels,
            bits_per_channel,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        bincode::serialize_into(&mut file, &header)?;
        let data_offset = file.stream_position()?;
        let payload = width as u64 * height as u64 * (channels * bits_per_channel / 8) as u64;
        file.set_len(data_offset + payload)?;
        Ok(Self { file, header, data_offset })
    }

    /// Open an existing raster for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header: RawHeader = {
            let mut reader = BufReader::new(&mut file);
            bincode::deserialize_from(&mut reader)?
        };
        if header.magic != RAW_MAGIC {
            return Err(StreamError::InvalidFormat(format!("bad magic '{}'", header.magic)));
        }
        validate_layout(header.channels, header.bits_per_channel)?;
        let data_offset = bincode::serialized_size(&header)?;
        let payload = header.width as u64
            * header.height as u64
            * (header.channels * header.bits_per_channel / 8) as u64;
        let len = file.metadata()?.len();
        if len < data_offset + payload {
            return Err(StreamError::InvalidFormat(format!(
                "payload truncated: {} bytes, expected {}",
                len.saturating_sub(data_offset),
                payload
            )));
        }
        Ok(Self { file, header, data_offset })
    }

    #[inline]
    fn offset_of(&self, x: u32, y: u32) -> u64 {
        self.data_offset + (y as u64 * self.header.width as u64 + x as u64) * self.pixel_size() as u64
    }
}

impl TiledImageFile for RawTileFile {
    fn width(&self) -> u32 { self.header.width }
    fn height(&self) -> u32 { self.header.height }
    fn channels(&self) -> u32 { self.header.channels }
    fn bits_per_channel(&self) -> u32 { self.header.bits_per_channel }

    fn read_block(&mut self, rect: PixelRect, out: &mut [u8]) -> io::Result<()> {
        let row_bytes = rect.w as usize * self.pixel_size();
        if rect.x == 0 && rect.w == self.header.width {
            // Full-width rows are contiguous on disk.
            self.file.seek(SeekFrom::Start(self.offset_of(0, rect.y)))?;
            return self.file.read_exact(&mut out[..row_bytes * rect.h as usize]);
        }
        for (row, chunk) in out.chunks_exact_mut(row_bytes).take(rect.h as usize).enumerate() {
            self.file.seek(SeekFrom::Start(self.offset_of(rect.x, rect.y + row as u32)))?;
            self.file.read_exact(chunk)?;
        }
        Ok(())
    }

    fn write_block(&mut self, rect: PixelRect, data: &[u8]) -> io::Result<()> {
        let row_bytes = rect.w as usize * self.pixel_size();
        if rect.x == 0 && rect.w == self.header.width {
            self.file.seek(SeekFrom::Start(self.offset_of(0, rect.y)))?;
            return self.file.write_all(&data[..row_bytes * rect.h as usize]);
        }
        for (row, chunk) in data.chunks_exact(row_bytes).take(rect.h as usize).enumerate() {
            self.file.seek(SeekFrom::Start(self.offset_of(rect.x, rect.y + row as u32)))?;
            self.file.write_all(chunk)?;
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

// ============================================================================
// MEMORY IMAGE FILE — in-memory raster with block-operation counters
// ============================================================================

/// Raster held in memory. Counts block operations so callers can see how
/// often the window actually reaches the backing file.
#[derive(Debug, Clone)]
pub struct MemoryImageFile {
    width: u32,
    height: u32,
    channels: u32,
    bits_per_channel: u32,
    data: Vec<u8>,
    block_reads: usize,
    block_writes: usize,
}

impl MemoryImageFile {
    pub fn new(width: u32, height: u32, channels: u32, bits_per_channel: u32) -> Result<Self> {
        validate_layout(channels, bits_per_channel)?;
        let len = width as usize * height as usize * (channels * bits_per_channel / 8) as usize;
        Ok(Self {
            width,
            height,
            channels,
            bits_per_channel,
            data: vec![0; len],
            block_reads: 0,
            block_writes: 0,
        })
    }

    /// Whole raster, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn block_reads(&self) -> usize {
        self.block_reads
    }

    pub fn block_writes(&self) -> usize {
        self.block_writes
    }

    fn full_rect(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }
}

impl TiledImageFile for MemoryImageFile {
    fn width(&self) -> u32 { self.width }
    fn height(&self) -> u32 { self.height }
    fn channels(&self) -> u32 { self.channels }
    fn bits_per_channel(&self) -> u32 { self.bits_per_channel }

    fn read_block(&mut self, rect: PixelRect, out: &mut [u8]) -> io::Result<()> {
        self.block_reads += 1;
        let ps = self.pixel_size();
        crate::grid::blit(&self.data, &self.full_rect(), out, &rect, &rect, ps);
        Ok(())
    }

    fn write_block(&mut self, rect: PixelRect, data: &[u8]) -> io::Result<()> {
        self.block_writes += 1;
        let ps = self.pixel_size();
        let full = self.full_rect();
        crate::grid::blit(data, &rect, &mut self.data, &full, &rect, ps);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_file_round_trips_blocks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("height.tsr");
        {
            let mut file = RawTileFile::create(&path, 32, 16, 2, 16)?;
            assert_eq!(file.pixel_size(), 4);
            let block: Vec<u8> = (0..3 * 2 * 4).map(|v| v as u8).collect();
            file.write_block(PixelRect::new(5, 7, 3, 2), &block)?;
            file.sync()?;
        }
        let mut file = RawTileFile::open(&path)?;
        assert_eq!((file.width(), file.height(), file.channels(), file.bits_per_channel()), (32, 16, 2, 16));
        let mut px = [0u8; 4];
        file.get_pixel(6, 8, &mut px)?;
        assert_eq!(px, [16, 17, 18, 19]);
        file.get_pixel(0, 0, &mut px)?;
        assert_eq!(px, [0; 4]);
        Ok(())
    }

    #[test]
    fn raw_file_rejects_foreign_data() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("junk.tsr");
        std::fs::write(&path, b"\x04\0\0\0\0\0\0\0JUNKxxxxxxxxxxxxxxxx")?;
        assert!(matches!(RawTileFile::open(&path), Err(StreamError::InvalidFormat(_))));
        assert!(RawTileFile::create(dir.path().join("bad.tsr"), 4, 4, 5, 8).is_err());
        Ok(())
    }

    #[test]
    fn memory_file_counts_block_operations() -> Result<()> {
        let mut file = MemoryImageFile::new(8, 8, 1, 8)?;
        file.set_pixel(3, 4, &[7])?;
        let mut out = [0u8; 4];
        file.read_block(PixelRect::new(2, 4, 2, 2), &mut out)?;
        assert_eq!(out, [0, 7, 0, 0]);
        assert_eq!((file.block_reads(), file.block_writes()), (1, 1));
        Ok(())
    }
}
