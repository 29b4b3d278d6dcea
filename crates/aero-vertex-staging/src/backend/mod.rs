//! The device boundary: buffer allocation, host mapping and the two device-side operations.

mod host;
mod webgpu;

pub use host::{HostBackend, HostBackendCounters};
pub use webgpu::WgpuBackend;

use bitflags::bitflags;

use crate::buffer_arena::align_up;
use crate::dirty_range::ByteRange;
use crate::error::Result;
use crate::format::VertexFormat;
use crate::format_map::TargetCaps;

/// Backend-level buffer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        /// Read or written by a conversion dispatch.
        const STORAGE = 1 << 2;
        /// Written from the host through `map_write`.
        const MAP_WRITE = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: BufferUsages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCaps {
    pub formats: TargetCaps,
    /// Whether `convert_vertices`/`widen_indices` are available.
    pub gpu_conversion: bool,
    pub max_buffer_size: u64,
}

/// One contiguous run of vertices to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexRange {
    pub src_offset: u64,
    /// Multiple of 4; the device writes whole words.
    pub dst_offset: u64,
    pub vertex_count: u32,
}

/// A device-side vertex conversion over one or more ranges, issued as one submission.
#[derive(Debug, Clone, Copy)]
pub struct GpuVertexConversion<'a> {
    pub src: BufferId,
    pub dst: BufferId,
    pub src_format: VertexFormat,
    pub dst_format: VertexFormat,
    pub src_stride: u32,
    pub primary: VertexRange,
    pub additional: &'a [VertexRange],
}

impl GpuVertexConversion<'_> {
    pub fn ranges(&self) -> impl Iterator<Item = &VertexRange> {
        std::iter::once(&self.primary).chain(self.additional)
    }
}

/// A device-side 8-bit to 16-bit index widening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuIndexWidening {
    pub src: BufferId,
    pub src_offset: u64,
    pub dst: BufferId,
    /// Multiple of 4.
    pub dst_offset: u64,
    /// The destination must hold `index_count * 2` bytes rounded up to a multiple of 4; the
    /// device writes indices in pairs.
    pub index_count: u32,
    pub primitive_restart: bool,
}

/// Device operations the staging engine needs.
///
/// Host writes made through `map_write`/`map_read_write` are not visible to the device until
/// the written range is passed to `flush`.
pub trait StagingBackend {
    fn caps(&self) -> BackendCaps;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId>;
    fn destroy_buffer(&mut self, id: BufferId);
    fn buffer_size(&self, id: BufferId) -> Option<u64>;

    fn map_read(&mut self, id: BufferId) -> Result<&[u8]>;
    fn map_write(&mut self, id: BufferId) -> Result<&mut [u8]>;
    /// Maps two distinct buffers at once.
    fn map_read_write(&mut self, src: BufferId, dst: BufferId) -> Result<(&[u8], &mut [u8])>;
    fn flush(&mut self, id: BufferId, range: ByteRange) -> Result<()>;

    /// Panics if the destination is too small for any range.
    fn convert_vertices(&mut self, op: &GpuVertexConversion<'_>) -> Result<()>;
    /// Panics if the destination is too small.
    fn widen_indices(&mut self, op: &GpuIndexWidening) -> Result<()>;
}

pub(crate) fn assert_conversion_fits(op: &GpuVertexConversion<'_>, dst_size: u64) {
    let dst_stride = op.dst_format.byte_size() as u64;
    for range in op.ranges() {
        assert!(
            range.dst_offset % 4 == 0,
            "unaligned conversion destination offset {}",
            range.dst_offset
        );
        let end = range.dst_offset + range.vertex_count as u64 * dst_stride;
        assert!(
            end <= dst_size,
            "conversion destination too small: need {end} bytes, have {dst_size}"
        );
    }
}

pub(crate) fn assert_widening_fits(op: &GpuIndexWidening, dst_size: u64) {
    assert!(op.dst_offset % 4 == 0, "unaligned widening destination offset {}", op.dst_offset);
    let end = op.dst_offset + align_up(op.index_count as u64 * 2, 4);
    assert!(end <= dst_size, "widening destination too small: need {end} bytes, have {dst_size}");
}
