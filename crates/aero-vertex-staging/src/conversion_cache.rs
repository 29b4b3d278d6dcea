//! Converted copies of a source buffer, one per access pattern.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::{debug, trace};

use crate::backend::{BufferDesc, BufferId, BufferUsages, GpuVertexConversion, StagingBackend, VertexRange};
use crate::buffer::BufferChange;
use crate::buffer_arena::align_up;
use crate::convert::{convert_vertices, vertex_count_for_len};
use crate::dirty_range::{ByteRange, DirtyRanges};
use crate::error::Result;
use crate::format::VertexFormat;
use crate::format_map::VertexLoadPlan;
use crate::stats::StagingStats;

/// Access pattern over a source buffer. Compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionCacheKey {
    pub src_format: VertexFormat,
    pub stride: u32,
    pub offset: u64,
    /// Misaligned accesses can only be converted on the host.
    pub unaligned: bool,
}

impl ConversionCacheKey {
    /// Whether an entry under `self` already holds the data `other` asks for.
    ///
    /// True when everything but the offset matches and `other` starts a whole number of
    /// vertices after `self`.
    fn covers(&self, other: &ConversionCacheKey) -> bool {
        if self.src_format != other.src_format || self.stride != other.stride || self.unaligned != other.unaligned {
            return false;
        }
        if self.stride == 0 {
            return self.offset == other.offset;
        }
        other.offset >= self.offset && (other.offset - self.offset) % self.stride as u64 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPath {
    Gpu,
    Cpu,
}

#[derive(Debug)]
pub struct ConversionCacheEntry {
    key: ConversionCacheKey,
    plan: VertexLoadPlan,
    path: ConversionPath,
    buffer: Option<BufferId>,
    capacity: u64,
    dirty: DirtyRanges,
}

impl ConversionCacheEntry {
    fn new(key: ConversionCacheKey, plan: VertexLoadPlan, path: ConversionPath) -> Self {
        let mut dirty = DirtyRanges::default();
        dirty.mark_entire();
        Self {
            key,
            plan,
            path,
            buffer: None,
            capacity: 0,
            dirty,
        }
    }

    pub fn key(&self) -> &ConversionCacheKey {
        &self.key
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn path(&self) -> ConversionPath {
        self.path
    }

    pub fn dst_format(&self) -> VertexFormat {
        self.plan.dst_format
    }

    pub fn dst_stride(&self) -> u32 {
        self.plan.dst_stride()
    }

    pub fn dirty(&self) -> &DirtyRanges {
        &self.dirty
    }
}

/// Result of [`ConversionCache::get_or_create`].
pub struct CacheSlot<'a> {
    pub entry: &'a mut ConversionCacheEntry,
    /// Where the requested offset's first vertex sits in the entry's destination.
    pub dst_relative_offset: u64,
    pub created: bool,
    /// Entry dropped to make room; its buffer must be released.
    pub evicted: Option<ConversionCacheEntry>,
}

/// Conversion entries of one source buffer, least recently used evicted first.
#[derive(Debug)]
pub struct ConversionCache {
    entries: LruCache<ConversionCacheKey, ConversionCacheEntry>,
}

impl ConversionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self, key: &ConversionCacheKey) -> Option<&ConversionCacheEntry> {
        self.entries.peek(key)
    }

    pub fn get_or_create(&mut self, key: ConversionCacheKey, plan: VertexLoadPlan, path: ConversionPath) -> CacheSlot<'_> {
        let found = if self.entries.contains(&key) {
            Some((key, 0))
        } else {
            self.entries.iter().find(|(k, _)| k.covers(&key)).map(|(k, entry)| {
                let vertices = (key.offset - k.offset) / k.stride as u64;
                (*k, vertices * entry.dst_stride() as u64)
            })
        };

        let (entry_key, dst_relative_offset, evicted) = match found {
            Some((k, rel)) => (k, rel, None),
            None => {
                let evicted = if self.entries.len() == self.entries.cap().get() {
                    self.entries.pop_lru().map(|(_, e)| e)
                } else {
                    None
                };
                (key, 0, evicted)
            }
        };

        let created = found.is_none();
        let entry = self
            .entries
            .get_or_insert_mut(entry_key, || ConversionCacheEntry::new(key, plan, path));
        CacheSlot {
            entry,
            dst_relative_offset,
            created,
            evicted,
        }
    }

    /// Marks every entry stale over `change`.
    pub fn on_content_changed(&mut self, change: BufferChange) {
        for (_, entry) in self.entries.iter_mut() {
            match change {
                BufferChange::Entire => entry.dirty.mark_entire(),
                BufferChange::Range(range) => entry.dirty.add(range),
            }
        }
    }

    /// Drops every entry, returning the destination buffers to release.
    pub fn release_all(&mut self) -> Vec<BufferId> {
        let mut buffers = Vec::with_capacity(self.entries.len());
        while let Some((_, entry)) = self.entries.pop_lru() {
            buffers.extend(entry.buffer);
        }
        buffers
    }
}

/// Walks a destination start back whole elements until it is 4-byte aligned.
///
/// The source offset moves back by the same number of elements.
pub fn align_destination_start(src_offset: u64, dst_offset: u64, src_stride: u32, dst_stride: u32) -> (u64, u64) {
    let (mut src, mut dst) = (src_offset, dst_offset);
    while dst % 4 != 0 && dst >= dst_stride as u64 {
        dst -= dst_stride as u64;
        src = src.saturating_sub(src_stride as u64);
    }
    debug_assert_eq!(dst % 4, 0, "destination start {dst_offset} cannot be aligned with stride {dst_stride}");
    (src, dst)
}

/// Source/destination run covering `dirty` for an entry starting at `base_offset`.
fn range_for_dirty(
    dirty: ByteRange,
    base_offset: u64,
    src_stride: u32,
    dst_stride: u32,
    max_vertices: u64,
) -> Option<VertexRange> {
    if dirty.high <= base_offset {
        return None;
    }
    let stride = src_stride as u64;

    let first = if dirty.low > base_offset && stride > 0 {
        (dirty.low - base_offset) / stride
    } else {
        0
    };
    let (src_offset, dst_offset) = align_destination_start(
        base_offset + first * stride,
        first * dst_stride as u64,
        src_stride,
        dst_stride,
    );
    let first = if dst_stride == 0 { 0 } else { dst_offset / dst_stride as u64 };
    if first >= max_vertices {
        return None;
    }

    let count = if stride == 0 {
        1
    } else {
        (dirty.high - src_offset).div_ceil(stride)
    };
    let count = count.min(max_vertices - first);
    Some(VertexRange {
        src_offset,
        dst_offset,
        vertex_count: u32::try_from(count).unwrap_or(u32::MAX),
    })
}

/// Source buffer an entry converts from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceBuffer {
    pub id: BufferId,
    pub size: u64,
}

/// Brings an entry's destination in line with its source.
///
/// Converts the whole valid range when everything is stale, otherwise each consolidated dirty
/// range. Returns whether any conversion work was issued.
pub(crate) fn ensure_up_to_date<B: StagingBackend + ?Sized>(
    entry: &mut ConversionCacheEntry,
    source: SourceBuffer,
    backend: &mut B,
    stats: &StagingStats,
) -> Result<bool> {
    if !entry.dirty.is_dirty() {
        return Ok(false);
    }

    let key = entry.key;
    let element_size = key.src_format.byte_size();
    let dst_stride = entry.dst_stride();
    let max_vertices = vertex_count_for_len(source.size.saturating_sub(key.offset), element_size, key.stride);
    if max_vertices == 0 {
        entry.dirty.clear();
        return Ok(false);
    }

    let required = align_up(max_vertices * dst_stride as u64, 4);
    let dst = match entry.buffer {
        Some(buffer) if entry.capacity >= required => buffer,
        previous => {
            if let Some(previous) = previous {
                backend.destroy_buffer(previous);
            }
            let buffer = backend.create_buffer(&BufferDesc {
                label: Some("aero-vertex-staging-conversion"),
                size: required,
                usage: BufferUsages::VERTEX | BufferUsages::STORAGE | BufferUsages::MAP_WRITE,
            })?;
            debug!(?key, capacity = required, "allocated conversion destination");
            entry.buffer = Some(buffer);
            entry.capacity = required;
            entry.dirty.mark_entire();
            buffer
        }
    };

    let ranges: Vec<VertexRange> = if entry.dirty.is_entire() {
        vec![VertexRange {
            src_offset: key.offset,
            dst_offset: 0,
            vertex_count: u32::try_from(max_vertices).unwrap_or(u32::MAX),
        }]
    } else {
        entry
            .dirty
            .consolidate()
            .into_iter()
            .filter_map(|dirty| range_for_dirty(dirty, key.offset, key.stride, dst_stride, max_vertices))
            .collect()
    };
    let Some((primary, additional)) = ranges.split_first() else {
        entry.dirty.clear();
        return Ok(false);
    };

    match entry.path {
        ConversionPath::Gpu => {
            backend.convert_vertices(&GpuVertexConversion {
                src: source.id,
                dst,
                src_format: key.src_format,
                dst_format: entry.plan.dst_format,
                src_stride: key.stride,
                primary: *primary,
                additional,
            })?;
            stats.inc_gpu_conversion_submissions();
            stats.add_gpu_conversion_ranges(ranges.len() as u64);
        }
        ConversionPath::Cpu => {
            let (src, out) = backend.map_read_write(source.id, dst)?;
            for range in &ranges {
                convert_vertices(
                    &entry.plan.conversion,
                    &src[range.src_offset as usize..],
                    key.stride as usize,
                    range.vertex_count as usize,
                    &mut out[range.dst_offset as usize..],
                );
            }
            for range in &ranges {
                let len = range.vertex_count as u64 * dst_stride as u64;
                backend.flush(dst, ByteRange::from_offset_len(range.dst_offset, len))?;
            }
            stats.inc_cpu_conversions();
        }
    }
    entry.dirty.clear();

    trace!(?key, ranges = ranges.len(), path = ?entry.path, "converted vertex data");
    Ok(true)
}
