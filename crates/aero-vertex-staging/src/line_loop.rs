//! Line loops drawn as indexed line strips closed back to their first vertex.

use tracing::{debug, trace};

use crate::backend::{BufferDesc, BufferId, BufferUsages, StagingBackend};
use crate::buffer::BufferHandle;
use crate::buffer_arena::align_up;
use crate::context::StagingContext;
use crate::convert::widen_u8_index;
use crate::dirty_range::ByteRange;
use crate::error::{Result, StagingError};
use crate::format::{IndexFormat, IndexType};
use crate::index::IndexData;
use crate::streaming::write_allocation;
use crate::vertex_array::VertexArray;

const LINE_LOOP_USAGE: BufferUsages = BufferUsages::INDEX
    .union(BufferUsages::MAP_WRITE)
    .union(BufferUsages::COPY_DST);

#[derive(Debug, Clone, Copy)]
pub enum LineLoopDraw<'a> {
    Arrays {
        first: u32,
        count: u32,
    },
    Elements {
        index_type: IndexType,
        count: u32,
        data: IndexData<'a>,
        primitive_restart: bool,
    },
}

/// Index buffer to draw as a line strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLineLoop {
    pub buffer: BufferId,
    pub byte_offset: u64,
    pub index_count: u32,
    pub format: IndexFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineLoopKey {
    Arrays {
        first: u32,
        count: u32,
    },
    Elements {
        handle: BufferHandle,
        generation: u64,
        index_type: IndexType,
        offset: u64,
        count: u32,
        primitive_restart: bool,
    },
}

#[derive(Debug)]
struct CachedLineLoop {
    key: LineLoopKey,
    buffer: BufferId,
    index_count: u32,
    format: IndexFormat,
}

/// Last synthesised loop of a vertex array. `None` means the next draw regenerates.
#[derive(Debug, Default)]
pub(crate) struct LineLoopCache {
    cached: Option<CachedLineLoop>,
    /// Buffer of a loop that was invalidated; destroyed on the next regeneration.
    stale: Option<BufferId>,
}

impl LineLoopCache {
    /// Forces regeneration on the next draw.
    pub(crate) fn invalidate(&mut self) {
        if let Some(cached) = self.cached.take() {
            debug_assert!(self.stale.is_none());
            self.stale = Some(cached.buffer);
        }
    }

    fn lookup(&self, key: &LineLoopKey) -> Option<ResolvedLineLoop> {
        self.cached.as_ref().filter(|c| c.key == *key).map(|c| ResolvedLineLoop {
            buffer: c.buffer,
            byte_offset: 0,
            index_count: c.index_count,
            format: c.format,
        })
    }

    fn retire<B: StagingBackend + ?Sized>(&mut self, backend: &mut B) {
        self.invalidate();
        if let Some(buffer) = self.stale.take() {
            backend.destroy_buffer(buffer);
        }
    }

    pub(crate) fn release<B: StagingBackend + ?Sized>(&mut self, backend: &mut B) {
        self.retire(backend);
    }
}

/// `[first, first + 1, .., first + count - 1, first]`.
pub fn array_loop_indices(first: u32, count: u32) -> Vec<u32> {
    if count == 0 {
        return Vec::new();
    }
    (0..count).map(|i| first.wrapping_add(i)).chain(std::iter::once(first)).collect()
}

/// Appends each loop's first index after its last one. With `restart` set, every
/// sentinel-delimited run is closed separately and the sentinels are kept.
pub fn element_loop_indices(indices: &[u32], restart: Option<u32>) -> Vec<u32> {
    let mut out = Vec::with_capacity(indices.len() + 1);
    let mut loop_start = None;
    for &index in indices {
        if restart == Some(index) {
            if let Some(first) = loop_start.take() {
                out.push(first);
            }
            out.push(index);
            continue;
        }
        loop_start.get_or_insert(index);
        out.push(index);
    }
    if let Some(first) = loop_start {
        out.push(first);
    }
    out
}

/// Decodes indices to `u32`, widening 8-bit values (and their sentinel) to 16-bit.
fn decode_indices(index_type: IndexType, bytes: &[u8], primitive_restart: bool) -> Vec<u32> {
    match index_type {
        IndexType::U8 => bytes.iter().map(|&v| widen_u8_index(v, primitive_restart) as u32).collect(),
        IndexType::U16 => bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
            .collect(),
        IndexType::U32 => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

fn encode_indices(indices: &[u32], format: IndexFormat) -> Vec<u8> {
    match format {
        IndexFormat::Uint16 => {
            let narrow: Vec<u16> = indices.iter().map(|&v| v as u16).collect();
            bytemuck::cast_slice::<u16, u8>(&narrow).to_vec()
        }
        IndexFormat::Uint32 => bytemuck::cast_slice::<u32, u8>(indices).to_vec(),
    }
}

fn synthesize_elements(index_type: IndexType, bytes: &[u8], primitive_restart: bool) -> (Vec<u8>, u32, IndexFormat) {
    let format = index_type.effective_format();
    let restart = primitive_restart.then(|| match format {
        IndexFormat::Uint16 => 0xffff,
        IndexFormat::Uint32 => 0xffff_ffff,
    });
    let indices = element_loop_indices(&decode_indices(index_type, bytes, primitive_restart), restart);
    (encode_indices(&indices, format), indices.len() as u32, format)
}

impl VertexArray {
    /// Resolves the line-strip index buffer that draws a line loop.
    pub fn resolve_line_loop_indices<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        draw: LineLoopDraw<'_>,
    ) -> Result<ResolvedLineLoop> {
        match draw {
            LineLoopDraw::Arrays { first, count } => {
                if count == 0 {
                    return Ok(empty_loop(ctx, IndexFormat::Uint32));
                }
                let key = LineLoopKey::Arrays { first, count };
                if let Some(resolved) = self.line_loop.lookup(&key) {
                    return Ok(resolved);
                }
                let indices = array_loop_indices(first, count);
                let bytes = encode_indices(&indices, IndexFormat::Uint32);
                self.regenerate_line_loop(ctx, key, &bytes, count + 1, IndexFormat::Uint32)
            }
            LineLoopDraw::Elements {
                index_type,
                count,
                data,
                primitive_restart,
            } => {
                let format = index_type.effective_format();
                if count == 0 {
                    return Ok(empty_loop(ctx, format));
                }
                let src_bytes = count as u64 * index_type.byte_size() as u64;

                match data {
                    IndexData::Buffer { handle, offset } => {
                        let object = ctx.buffer_ref(handle)?;
                        let (id, size) = (object.id(), object.size());
                        let key = LineLoopKey::Elements {
                            handle,
                            generation: object.generation(),
                            index_type,
                            offset,
                            count,
                            primitive_restart,
                        };
                        if let Some(resolved) = self.line_loop.lookup(&key) {
                            return Ok(resolved);
                        }

                        let end = offset + src_bytes;
                        if end > size {
                            return Err(StagingError::IndexRangeOutOfBounds {
                                required: end,
                                available: size,
                            });
                        }
                        let src = &ctx.backend.map_read(id)?[offset as usize..end as usize];
                        let (bytes, index_count, format) = synthesize_elements(index_type, src, primitive_restart);
                        self.regenerate_line_loop(ctx, key, &bytes, index_count, format)
                    }
                    IndexData::Client(data) => {
                        if src_bytes > data.len() as u64 {
                            return Err(StagingError::IndexRangeOutOfBounds {
                                required: src_bytes,
                                available: data.len() as u64,
                            });
                        }
                        let (bytes, index_count, format) =
                            synthesize_elements(index_type, &data[..src_bytes as usize], primitive_restart);

                        let allocation = ctx.allocate_streaming(bytes.len() as u64)?;
                        write_allocation(&mut ctx.backend, &allocation, |dst| dst.copy_from_slice(&bytes))?;
                        trace!(count, index_count, "streamed client line loop");
                        Ok(ResolvedLineLoop {
                            buffer: allocation.buffer,
                            byte_offset: allocation.byte_offset,
                            index_count,
                            format,
                        })
                    }
                }
            }
        }
    }

    fn regenerate_line_loop<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        key: LineLoopKey,
        bytes: &[u8],
        index_count: u32,
        format: IndexFormat,
    ) -> Result<ResolvedLineLoop> {
        self.line_loop.retire(&mut ctx.backend);

        let buffer = ctx.backend.create_buffer(&BufferDesc {
            label: Some("aero-vertex-staging-line-loop"),
            size: align_up(bytes.len() as u64, 4),
            usage: LINE_LOOP_USAGE,
        })?;
        ctx.backend.map_write(buffer)?[..bytes.len()].copy_from_slice(bytes);
        ctx.backend.flush(buffer, ByteRange::new(0, bytes.len() as u64))?;

        ctx.stats.inc_line_loop_regenerations();
        debug!(?key, index_count, "regenerated line loop indices");

        self.line_loop.cached = Some(CachedLineLoop {
            key,
            buffer,
            index_count,
            format,
        });
        Ok(ResolvedLineLoop {
            buffer,
            byte_offset: 0,
            index_count,
            format,
        })
    }
}

fn empty_loop<B: StagingBackend>(ctx: &StagingContext<B>, format: IndexFormat) -> ResolvedLineLoop {
    ResolvedLineLoop {
        buffer: ctx.empty_buffer(),
        byte_offset: 0,
        index_count: 0,
        format,
    }
}
