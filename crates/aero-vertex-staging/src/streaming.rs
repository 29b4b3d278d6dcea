//! Per-draw allocations for data without a stable identity.

use tracing::trace;

use crate::backend::{BufferDesc, BufferId, BufferUsages, StagingBackend};
use crate::buffer_arena::BufferArena;
use crate::dirty_range::ByteRange;
use crate::error::Result;

/// Offset alignment of streamed data; satisfies vertex, 16/32-bit index and copy alignment.
pub const STREAMING_ALIGNMENT: u64 = 4;

const STREAMING_USAGE: BufferUsages = BufferUsages::VERTEX
    .union(BufferUsages::INDEX)
    .union(BufferUsages::MAP_WRITE)
    .union(BufferUsages::COPY_DST);

/// A streamed region. Valid until its segment is recycled by a later `begin_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingAllocation {
    pub buffer: BufferId,
    pub byte_offset: u64,
    pub size: u64,
    pub generation: u64,
}

impl StreamingAllocation {
    pub fn range(&self) -> ByteRange {
        ByteRange::from_offset_len(self.byte_offset, self.size)
    }
}

#[derive(Debug)]
struct Segment {
    buffer: Option<BufferId>,
    arena: BufferArena,
    /// Dedicated buffers for requests that did not fit the arena.
    overflow: Vec<BufferId>,
}

/// Ring of `frames_in_flight` segments, one written per frame.
#[derive(Debug)]
pub(crate) struct StreamingAllocator {
    segments: Vec<Segment>,
    current: usize,
    generation: u64,
}

impl StreamingAllocator {
    pub(crate) fn new(segment_size: u64, frames_in_flight: usize) -> Self {
        let segments = (0..frames_in_flight.max(1))
            .map(|_| Segment {
                buffer: None,
                arena: BufferArena::new(segment_size),
                overflow: Vec::new(),
            })
            .collect();
        Self {
            segments,
            current: 0,
            generation: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn allocate<B: StagingBackend + ?Sized>(&mut self, backend: &mut B, size: u64) -> Result<StreamingAllocation> {
        let generation = self.generation;
        let segment = &mut self.segments[self.current];

        if size <= segment.arena.capacity() {
            let buffer = match segment.buffer {
                Some(buffer) => buffer,
                None => {
                    let buffer = backend.create_buffer(&BufferDesc {
                        label: Some("aero-vertex-staging-stream"),
                        size: segment.arena.capacity(),
                        usage: STREAMING_USAGE,
                    })?;
                    segment.buffer = Some(buffer);
                    buffer
                }
            };
            if let Some(byte_offset) = segment.arena.alloc(size, STREAMING_ALIGNMENT) {
                trace!(size, byte_offset, generation, "streaming allocation");
                return Ok(StreamingAllocation {
                    buffer,
                    byte_offset,
                    size,
                    generation,
                });
            }
        }

        let buffer = backend.create_buffer(&BufferDesc {
            label: Some("aero-vertex-staging-stream-overflow"),
            size,
            usage: STREAMING_USAGE,
        })?;
        segment.overflow.push(buffer);
        trace!(size, used = segment.arena.used(), generation, "streaming overflow allocation");
        Ok(StreamingAllocation {
            buffer,
            byte_offset: 0,
            size,
            generation,
        })
    }

    /// Moves to the next segment, recycling whatever it held.
    pub(crate) fn begin_frame<B: StagingBackend + ?Sized>(&mut self, backend: &mut B) {
        self.current = (self.current + 1) % self.segments.len();
        self.generation += 1;

        let segment = &mut self.segments[self.current];
        segment.arena.reset();
        for buffer in segment.overflow.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }

    pub(crate) fn release_all<B: StagingBackend + ?Sized>(&mut self, backend: &mut B) {
        for segment in &mut self.segments {
            segment.arena.reset();
            for buffer in segment.buffer.take().into_iter().chain(segment.overflow.drain(..)) {
                backend.destroy_buffer(buffer);
            }
        }
    }
}

/// Fills a streamed region on the host and flushes it.
pub(crate) fn write_allocation<B, F>(backend: &mut B, allocation: &StreamingAllocation, fill: F) -> Result<()>
where
    B: StagingBackend + ?Sized,
    F: FnOnce(&mut [u8]),
{
    let start = allocation.byte_offset as usize;
    let end = start + allocation.size as usize;
    fill(&mut backend.map_write(allocation.buffer)?[start..end]);
    backend.flush(allocation.buffer, allocation.range())
}
