// ============================================================================
// ERRORS — shared error types for stores, caches and the material pool
// ============================================================================

/// Errors raised by the GPU texture backends.
#[derive(thiserror::Error, Debug)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("device request failed: {0}")]
    RequestDevice(String),

    #[error("unsupported texel layout: {channels} channels × {bits} bits")]
    UnsupportedFormat { channels: u32, bits: u32 },

    #[error("texture {width}×{height} exceeds device limit {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("out of GPU memory: {0}")]
    OutOfMemory(String),

    #[error("GPU validation error: {0}")]
    Validation(String),
}

/// Errors raised by the streaming layer.
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header error: {0}")]
    Header(#[from] bincode::Error),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("cell ({cx}, {cy}) outside {divisions}×{divisions} grid")]
    CellOutOfRange { cx: u32, cy: u32, divisions: u32 },

    #[error("{0} tiles are still referenced")]
    TilesInUse(usize),

    #[error("grid has not been initialised")]
    NotInitialised,

    #[error("material pool has no streams")]
    NoStreams,

    #[error("stream '{name}' has {divisions} divisions but the pool grid has {grid}")]
    DivisionMismatch { name: String, divisions: u32, grid: u32 },

    #[error("unknown stream '{0}'")]
    UnknownStream(String),

    #[error("stream '{0}' is already registered")]
    DuplicateStream(String),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Check a caller-provided buffer against the byte count a rectangle needs.
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StreamError::BufferSize { expected, actual })
    }
}
