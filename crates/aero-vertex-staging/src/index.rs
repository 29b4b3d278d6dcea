//! Index buffer adaptation: 8-bit widening and a small content cache for client indices.

use tracing::{debug, trace};
use xxhash_rust::xxh3::xxh3_64;

use crate::backend::{BufferDesc, BufferId, BufferUsages, GpuIndexWidening, StagingBackend};
use crate::buffer::BufferHandle;
use crate::buffer_arena::align_up;
use crate::context::StagingContext;
use crate::convert::widen_u8_indices;
use crate::dirty_range::ByteRange;
use crate::error::{Result, StagingError};
use crate::format::{IndexFormat, IndexType};
use crate::streaming::write_allocation;
use crate::vertex_array::VertexArray;

const INDEX_USAGE: BufferUsages = BufferUsages::INDEX
    .union(BufferUsages::STORAGE)
    .union(BufferUsages::MAP_WRITE)
    .union(BufferUsages::COPY_DST);

/// Where a draw's indices live.
#[derive(Debug, Clone, Copy)]
pub enum IndexData<'a> {
    /// Client memory starting at the first index.
    Client(&'a [u8]),
    /// The bound element buffer at a byte offset.
    Buffer { handle: BufferHandle, offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIndexSource {
    pub buffer: BufferId,
    pub byte_offset: u64,
    pub format: IndexFormat,
    /// The index binding differs from the one returned by the previous resolve.
    pub binding_dirty: bool,
}

#[derive(Debug)]
struct CachedIndices {
    index_type: IndexType,
    primitive_restart: bool,
    hash: u64,
    source: Vec<u8>,
    buffer: BufferId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TranslationKey {
    handle: BufferHandle,
    generation: u64,
    offset: u64,
    count: u32,
    primitive_restart: bool,
}

#[derive(Debug)]
struct TranslatedIndices {
    buffer: BufferId,
    capacity: u64,
    key: Option<TranslationKey>,
}

/// Index state owned by one vertex array.
///
/// The content cache holds at most `capacity` patterns of `canonical_count` indices and never
/// evicts; once full, further patterns are streamed.
#[derive(Debug)]
pub(crate) struct IndexState {
    cached: Vec<CachedIndices>,
    capacity: usize,
    canonical_count: u32,
    translated: Option<TranslatedIndices>,
    bound: Option<(BufferId, u64, IndexFormat)>,
}

impl IndexState {
    pub(crate) fn new(capacity: usize, canonical_count: u32) -> Self {
        Self {
            cached: Vec::with_capacity(capacity),
            capacity,
            canonical_count,
            translated: None,
            bound: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_patterns(&self) -> usize {
        self.cached.len()
    }

    fn lookup(&self, index_type: IndexType, primitive_restart: bool, bytes: &[u8]) -> Option<BufferId> {
        let hash = xxh3_64(bytes);
        self.cached
            .iter()
            .find(|c| {
                c.index_type == index_type
                    && c.primitive_restart == primitive_restart
                    && c.hash == hash
                    && c.source == bytes
            })
            .map(|c| c.buffer)
    }

    fn bind(&mut self, buffer: BufferId, byte_offset: u64, format: IndexFormat) -> ResolvedIndexSource {
        let binding = (buffer, byte_offset, format);
        let binding_dirty = self.bound != Some(binding);
        self.bound = Some(binding);
        ResolvedIndexSource {
            buffer,
            byte_offset,
            format,
            binding_dirty,
        }
    }

    pub(crate) fn release<B: StagingBackend + ?Sized>(&mut self, backend: &mut B) {
        for cached in self.cached.drain(..) {
            backend.destroy_buffer(cached.buffer);
        }
        if let Some(translated) = self.translated.take() {
            backend.destroy_buffer(translated.buffer);
        }
        self.bound = None;
    }
}

/// Writes `count` indices of `index_type` into `dst` in the format the target binds.
fn write_indices(index_type: IndexType, src: &[u8], dst: &mut [u8], primitive_restart: bool) {
    match index_type {
        IndexType::U8 => widen_u8_indices(src, dst, primitive_restart),
        IndexType::U16 | IndexType::U32 => dst[..src.len()].copy_from_slice(src),
    }
}

fn out_of_bounds(required: u64, available: u64) -> StagingError {
    StagingError::IndexRangeOutOfBounds { required, available }
}

impl VertexArray {
    /// Resolves the index buffer binding for an indexed draw of `count` indices.
    pub fn resolve_index_source<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        index_type: IndexType,
        count: u32,
        data: IndexData<'_>,
        primitive_restart: bool,
    ) -> Result<ResolvedIndexSource> {
        let format = index_type.effective_format();
        if count == 0 {
            return Ok(self.index.bind(ctx.empty_buffer(), 0, format));
        }

        match data {
            IndexData::Buffer { handle, offset } => {
                self.resolve_buffered_indices(ctx, index_type, count, handle, offset, primitive_restart)
            }
            IndexData::Client(bytes) => self.resolve_client_indices(ctx, index_type, count, bytes, primitive_restart),
        }
    }

    fn resolve_buffered_indices<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        index_type: IndexType,
        count: u32,
        handle: BufferHandle,
        offset: u64,
        primitive_restart: bool,
    ) -> Result<ResolvedIndexSource> {
        let format = index_type.effective_format();
        let object = ctx.buffer_ref(handle)?;
        let (src, size, generation) = (object.id(), object.size(), object.generation());
        let src_bytes = count as u64 * index_type.byte_size() as u64;
        let end = offset + src_bytes;
        if end > size {
            return Err(out_of_bounds(end, size));
        }

        if index_type != IndexType::U8 {
            if offset % index_type.byte_size() as u64 == 0 {
                return Ok(self.index.bind(src, offset, format));
            }
            // Index offsets must be a multiple of the index size on the target.
            let allocation = ctx.allocate_streaming(src_bytes)?;
            let (src_data, dst) = ctx.backend.map_read_write(src, allocation.buffer)?;
            let start = allocation.byte_offset as usize;
            dst[start..start + src_bytes as usize].copy_from_slice(&src_data[offset as usize..end as usize]);
            ctx.backend.flush(allocation.buffer, allocation.range())?;
            trace!(?handle, offset, "realigned index data");
            return Ok(self.index.bind(allocation.buffer, allocation.byte_offset, format));
        }

        let key = TranslationKey {
            handle,
            generation,
            offset,
            count,
            primitive_restart,
        };
        if let Some(translated) = &self.index.translated {
            if translated.key == Some(key) {
                let buffer = translated.buffer;
                return Ok(self.index.bind(buffer, 0, format));
            }
        }

        let dst_size = align_up(count as u64 * 2, 4);
        let mut dst = match self.index.translated.take() {
            Some(translated) if translated.capacity >= dst_size => translated,
            previous => {
                if let Some(previous) = previous {
                    ctx.backend.destroy_buffer(previous.buffer);
                }
                debug!(?handle, count, "allocating widened index buffer");
                let buffer = ctx.backend.create_buffer(&BufferDesc {
                    label: Some("aero-vertex-staging-widened-indices"),
                    size: dst_size,
                    usage: INDEX_USAGE,
                })?;
                TranslatedIndices {
                    buffer,
                    capacity: dst_size,
                    key: None,
                }
            }
        };
        dst.key = None;
        let buffer = dst.buffer;
        self.index.translated = Some(dst);

        if ctx.backend.caps().gpu_conversion && !ctx.config.force_cpu_conversion {
            ctx.backend.widen_indices(&GpuIndexWidening {
                src,
                src_offset: offset,
                dst: buffer,
                dst_offset: 0,
                index_count: count,
                primitive_restart,
            })?;
        } else {
            let (src_data, dst_data) = ctx.backend.map_read_write(src, buffer)?;
            widen_u8_indices(&src_data[offset as usize..end as usize], dst_data, primitive_restart);
            ctx.backend.flush(buffer, ByteRange::new(0, count as u64 * 2))?;
        }
        ctx.stats.inc_index_widenings();

        if let Some(translated) = &mut self.index.translated {
            translated.key = Some(key);
        }
        Ok(self.index.bind(buffer, 0, format))
    }

    fn resolve_client_indices<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        index_type: IndexType,
        count: u32,
        data: &[u8],
        primitive_restart: bool,
    ) -> Result<ResolvedIndexSource> {
        let format = index_type.effective_format();
        let src_bytes = count as u64 * index_type.byte_size() as u64;
        if src_bytes > data.len() as u64 {
            return Err(out_of_bounds(src_bytes, data.len() as u64));
        }
        let bytes = &data[..src_bytes as usize];
        let dst_bytes = count as u64 * format.byte_size() as u64;

        if count == self.index.canonical_count && format == IndexFormat::Uint16 {
            if let Some(buffer) = self.index.lookup(index_type, primitive_restart, bytes) {
                ctx.stats.inc_index_cache_hits();
                return Ok(self.index.bind(buffer, 0, format));
            }
            ctx.stats.inc_index_cache_misses();

            if self.index.cached.len() < self.index.capacity {
                let buffer = ctx.backend.create_buffer(&BufferDesc {
                    label: Some("aero-vertex-staging-cached-indices"),
                    size: align_up(dst_bytes, 4),
                    usage: INDEX_USAGE,
                })?;
                let dst = ctx.backend.map_write(buffer)?;
                write_indices(index_type, bytes, dst, primitive_restart);
                ctx.backend.flush(buffer, ByteRange::new(0, dst_bytes))?;
                if index_type == IndexType::U8 {
                    ctx.stats.inc_index_widenings();
                }

                self.index.cached.push(CachedIndices {
                    index_type,
                    primitive_restart,
                    hash: xxh3_64(bytes),
                    source: bytes.to_vec(),
                    buffer,
                });
                debug!(slot = self.index.cached.len() - 1, ?index_type, "cached client index pattern");
                return Ok(self.index.bind(buffer, 0, format));
            }
        }

        let allocation = ctx.allocate_streaming(dst_bytes)?;
        write_allocation(&mut ctx.backend, &allocation, |dst| {
            write_indices(index_type, bytes, dst, primitive_restart)
        })?;
        if index_type == IndexType::U8 {
            ctx.stats.inc_index_widenings();
        }
        trace!(count, ?index_type, "streamed client indices");
        Ok(self.index.bind(allocation.buffer, allocation.byte_offset, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::config::StagingConfig;
    use pretty_assertions::assert_eq;

    fn setup() -> (StagingContext<HostBackend>, VertexArray) {
        let config = StagingConfig::default();
        let vao = VertexArray::new(&config);
        (StagingContext::new(HostBackend::default(), config).unwrap(), vao)
    }

    fn u16s(bytes: &[u8]) -> Vec<u16> {
        bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
    }

    fn read(ctx: &StagingContext<HostBackend>, resolved: &ResolvedIndexSource, count: usize) -> Vec<u16> {
        let start = resolved.byte_offset as usize;
        u16s(&ctx.backend().contents(resolved.buffer).unwrap()[start..start + count * 2])
    }

    #[test]
    fn bound_u16_indices_pass_through() {
        let (mut ctx, mut vao) = setup();
        let handle = ctx.create_buffer_with_data(&[0, 0, 1, 0, 2, 0, 3, 0]).unwrap();
        let id = ctx.buffer(handle).unwrap().id();

        let data = IndexData::Buffer { handle, offset: 2 };
        let resolved = vao.resolve_index_source(&mut ctx, IndexType::U16, 3, data, false).unwrap();
        assert_eq!((resolved.buffer, resolved.byte_offset), (id, 2));
        assert!(resolved.binding_dirty);

        let again = vao.resolve_index_source(&mut ctx, IndexType::U16, 3, data, false).unwrap();
        assert!(!again.binding_dirty);
    }

    #[test]
    fn bound_u8_indices_are_widened_once_per_generation() {
        let (mut ctx, mut vao) = setup();
        let handle = ctx.create_buffer_with_data(&[5, 255, 3, 0]).unwrap();
        let data = IndexData::Buffer { handle, offset: 0 };

        let first = vao.resolve_index_source(&mut ctx, IndexType::U8, 3, data, true).unwrap();
        assert_eq!(first.format, IndexFormat::Uint16);
        assert_eq!(read(&ctx, &first, 3), vec![5, 0xffff, 3]);
        assert_eq!(ctx.backend().counters().index_widening_submissions, 1);

        vao.resolve_index_source(&mut ctx, IndexType::U8, 3, data, true).unwrap();
        assert_eq!(ctx.backend().counters().index_widening_submissions, 1);

        ctx.buffer_sub_data(handle, 0, &[7]).unwrap();
        let after = vao.resolve_index_source(&mut ctx, IndexType::U8, 3, data, true).unwrap();
        assert_eq!(read(&ctx, &after, 3), vec![7, 0xffff, 3]);
        assert_eq!(ctx.backend().counters().index_widening_submissions, 2);
        assert_eq!(ctx.stats().snapshot().index_widenings, 2);
    }

    #[test]
    fn cpu_widening_without_restart_zero_extends() {
        let config = StagingConfig {
            force_cpu_conversion: true,
            ..StagingConfig::default()
        };
        let mut vao = VertexArray::new(&config);
        let mut ctx = StagingContext::new(HostBackend::default(), config).unwrap();
        let handle = ctx.create_buffer_with_data(&[5, 255, 3]).unwrap();

        let data = IndexData::Buffer { handle, offset: 0 };
        let resolved = vao.resolve_index_source(&mut ctx, IndexType::U8, 3, data, false).unwrap();
        assert_eq!(read(&ctx, &resolved, 3), vec![5, 255, 3]);
        assert_eq!(ctx.backend().counters().index_widening_submissions, 0);
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let (mut ctx, mut vao) = setup();
        let handle = ctx.create_buffer(4).unwrap();
        let data = IndexData::Buffer { handle, offset: 2 };
        let err = vao.resolve_index_source(&mut ctx, IndexType::U16, 2, data, false).unwrap_err();
        assert!(matches!(err, StagingError::IndexRangeOutOfBounds { required: 6, available: 4 }));

        let err = vao
            .resolve_index_source(&mut ctx, IndexType::U16, 3, IndexData::Client(&[0; 4]), false)
            .unwrap_err();
        assert!(matches!(err, StagingError::IndexRangeOutOfBounds { required: 6, available: 4 }));
    }

    #[test]
    fn canonical_patterns_are_cached_without_eviction() {
        let (mut ctx, mut vao) = setup();
        let quad: Vec<u8> = [0u16, 1, 2, 2, 3, 0].iter().flat_map(|v| v.to_le_bytes()).collect();

        let first = vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&quad), false).unwrap();
        let second = vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&quad), false).unwrap();
        assert_eq!(first.buffer, second.buffer);
        assert!(!second.binding_dirty);
        assert_eq!(read(&ctx, &second, 6), vec![0, 1, 2, 2, 3, 0]);

        for base in 1..4u16 {
            let pattern: Vec<u8> = [0u16, 1, 2, 2, 3, 0].iter().flat_map(|v| (v + base * 4).to_le_bytes()).collect();
            vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&pattern), false).unwrap();
        }
        assert_eq!(vao.index.cached_patterns(), 4);

        let overflow: Vec<u8> = [9u16; 6].iter().flat_map(|v| v.to_le_bytes()).collect();
        let a = vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&overflow), false).unwrap();
        let b = vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&overflow), false).unwrap();
        assert_eq!(vao.index.cached_patterns(), 4);
        assert_eq!(read(&ctx, &b, 6), vec![9; 6]);
        assert_eq!(a.byte_offset + 12, b.byte_offset);

        let stats = ctx.stats().snapshot();
        assert_eq!(stats.index_cache_hits, 1);
        assert_eq!(stats.index_cache_misses, 6);

        let again = vao.resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&quad), false).unwrap();
        assert_eq!(again.buffer, first.buffer);
    }

    #[test]
    fn restart_flag_is_part_of_the_cached_pattern() {
        let (mut ctx, mut vao) = setup();
        let indices = [0u8, 1, 255, 2, 3, 4];

        let with = vao.resolve_index_source(&mut ctx, IndexType::U8, 6, IndexData::Client(&indices), true).unwrap();
        let without = vao.resolve_index_source(&mut ctx, IndexType::U8, 6, IndexData::Client(&indices), false).unwrap();
        assert_ne!(with.buffer, without.buffer);
        assert_eq!(read(&ctx, &with, 6)[2], 0xffff);
        assert_eq!(read(&ctx, &without, 6)[2], 255);
    }

    #[test]
    fn other_counts_are_streamed() {
        let (mut ctx, mut vao) = setup();
        let indices = [1u8, 2, 3];
        let resolved = vao.resolve_index_source(&mut ctx, IndexType::U8, 3, IndexData::Client(&indices), false).unwrap();
        assert_eq!(read(&ctx, &resolved, 3), vec![1, 2, 3]);
        assert_eq!(vao.index.cached_patterns(), 0);
        assert_eq!(ctx.stats().snapshot().index_cache_misses, 0);
    }

    #[test]
    fn release_destroys_owned_buffers() {
        let (mut ctx, mut vao) = setup();
        let quad = [0u8, 1, 2, 2, 3, 0];
        vao.resolve_index_source(&mut ctx, IndexType::U8, 6, IndexData::Client(&quad), false).unwrap();
        let live = ctx.backend().live_buffers();

        vao.release(&mut ctx);
        assert_eq!(ctx.backend().live_buffers(), live - 1);
        assert_eq!(vao.index.cached_patterns(), 0);
    }
}
