use thiserror::Error;

use crate::backend::BufferId;
use crate::buffer::BufferHandle;

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: u64 },
    #[error("buffer of {requested} bytes exceeds the device limit of {max} bytes")]
    BufferTooLarge { requested: u64, max: u64 },
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("unknown backend buffer {0:?}")]
    UnknownBackendBuffer(BufferId),
    #[error("failed to map buffer: {0}")]
    MapFailed(String),
    #[error("buffer write out of bounds (buffer size {buffer_size}, write end {write_end})")]
    BufferWriteOutOfBounds { buffer_size: u64, write_end: u64 },
    #[error("client attribute data out of bounds (need {required} bytes, have {available})")]
    ClientRangeOutOfBounds { required: u64, available: u64 },
    #[error("index data out of bounds (need {required} bytes, have {available})")]
    IndexRangeOutOfBounds { required: u64, available: u64 },
    #[error("wgpu adapter not found")]
    AdapterNotFound,
    #[error("request_device failed: {0}")]
    RequestDevice(String),
    #[error("map_async callback dropped unexpectedly")]
    MapAsyncDropped,
    #[error("map_async failed: {0}")]
    MapAsync(String),
}

pub type Result<T, E = StagingError> = std::result::Result<T, E>;
