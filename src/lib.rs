//! Out-of-core terrain streaming.
//!
//! A large heightmap or texture lives in a tiled file on disk. [`PixelStore`]
//! keeps a square window of it in memory, [`TiledTextureCache`] cuts the
//! raster into a grid of reference-counted GPU tiles, [`MaterialPool`] pairs
//! the tiles of several such streams into per-cell terrain materials, and
//! [`EditHistoryBlock`] / [`EditHistory`] snapshot pixel blocks for undo.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod cache;
pub mod error;
pub mod file;
pub mod gpu;
pub mod grid;
pub mod history;
pub mod logger;
pub mod material;
pub mod settings;
pub mod store;

pub use cache::TiledTextureCache;
pub use error::{GpuError, Result, StreamError};
pub use file::{MemoryImageFile, RawTileFile, TiledImageFile};
pub use gpu::{GpuContext, HeadlessBackend, HeadlessTexture, TextureBackend, TextureDesc, TileTexture, WgpuBackend};
pub use grid::PixelRect;
pub use history::{EditHistory, EditHistoryBlock};
pub use material::{Material, MaterialHandle, MaterialPool, TileInfo};
pub use settings::StreamSettings;
pub use store::{PixelStore, PixelTarget};
