use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::backend::{BufferDesc, BufferId, BufferUsages, StagingBackend};
use crate::buffer::{BufferChange, BufferHandle, BufferObject};
use crate::config::StagingConfig;
use crate::conversion_cache::{ensure_up_to_date, ConversionCacheKey, ConversionPath, SourceBuffer};
use crate::convert::vertex_count_for_len;
use crate::dirty_range::ByteRange;
use crate::error::{Result, StagingError};
use crate::format::VertexFormat;
use crate::format_map::{needs_conversion, ConversionNeed, VertexLoadPlan};
use crate::stats::StagingStats;
use crate::streaming::{StreamingAllocation, StreamingAllocator};
use crate::vertex_array::{ResolvedVertexSource, SourceKind};

const EMPTY_BUFFER_SIZE: u64 = 16;

const SOURCE_USAGE: BufferUsages = BufferUsages::VERTEX
    .union(BufferUsages::INDEX)
    .union(BufferUsages::STORAGE)
    .union(BufferUsages::MAP_WRITE)
    .union(BufferUsages::COPY_DST);

/// Per-context staging state: the backend, the source buffer side-table and the streaming ring.
pub struct StagingContext<B: StagingBackend> {
    pub(crate) backend: B,
    pub(crate) config: StagingConfig,
    pub(crate) buffers: HashMap<BufferHandle, BufferObject>,
    next_handle: u32,
    pub(crate) streaming: StreamingAllocator,
    empty_buffer: BufferId,
    pub(crate) stats: Arc<StagingStats>,
}

impl<B: StagingBackend> StagingContext<B> {
    pub fn new(mut backend: B, config: StagingConfig) -> Result<Self> {
        let empty_buffer = backend.create_buffer(&BufferDesc {
            label: Some("aero-vertex-staging-empty"),
            size: EMPTY_BUFFER_SIZE,
            usage: BufferUsages::VERTEX | BufferUsages::INDEX,
        })?;
        Ok(Self {
            backend,
            streaming: StreamingAllocator::new(config.streaming_frame_size, config.frames_in_flight),
            config,
            buffers: HashMap::new(),
            next_handle: 1,
            empty_buffer,
            stats: Arc::new(StagingStats::new()),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StagingStats> {
        &self.stats
    }

    /// Zero-filled buffer bound for attributes that have no data.
    pub fn empty_buffer(&self) -> BufferId {
        self.empty_buffer
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&BufferObject> {
        self.buffers.get(&handle)
    }

    pub(crate) fn buffer_ref(&self, handle: BufferHandle) -> Result<&BufferObject> {
        self.buffers.get(&handle).ok_or(StagingError::UnknownBuffer(handle))
    }

    /// Advances the streaming ring; call once per submitted frame.
    pub fn begin_frame(&mut self) {
        self.streaming.begin_frame(&mut self.backend);
    }

    pub fn streaming_generation(&self) -> u64 {
        self.streaming.generation()
    }

    pub(crate) fn allocate_streaming(&mut self, size: u64) -> Result<StreamingAllocation> {
        let allocation = self.streaming.allocate(&mut self.backend, size)?;
        self.stats.add_streamed_bytes(size);
        Ok(allocation)
    }

    pub fn create_buffer(&mut self, size: u64) -> Result<BufferHandle> {
        let id = self.create_source(size)?;
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(
            handle,
            BufferObject::new(handle, id, size, self.config.max_conversions_per_buffer),
        );
        Ok(handle)
    }

    pub fn create_buffer_with_data(&mut self, data: &[u8]) -> Result<BufferHandle> {
        let handle = self.create_buffer(data.len() as u64)?;
        self.buffer_sub_data(handle, 0, data)?;
        Ok(handle)
    }

    fn create_source(&mut self, size: u64) -> Result<BufferId> {
        self.backend.create_buffer(&BufferDesc {
            label: Some("aero-vertex-staging-source"),
            size,
            usage: SOURCE_USAGE,
        })
    }

    /// Replaces a buffer's storage and contents. Every conversion becomes entirely stale.
    pub fn buffer_data(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        let object = self.buffers.get(&handle).ok_or(StagingError::UnknownBuffer(handle))?;
        let (old_id, old_size) = (object.id(), object.size());

        let id = if old_size == size {
            old_id
        } else {
            let id = self.create_source(size)?;
            self.backend.destroy_buffer(old_id);
            id
        };
        self.backend.map_write(id)?[..data.len()].copy_from_slice(data);
        self.backend.flush(id, ByteRange::new(0, size))?;

        if let Some(object) = self.buffers.get_mut(&handle) {
            object.respecify(id, size);
        }
        Ok(())
    }

    /// Writes part of a buffer and marks the written range stale in every conversion.
    pub fn buffer_sub_data(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let object = self.buffer_ref(handle)?;
        let (id, size) = (object.id(), object.size());
        let write_end = offset.saturating_add(data.len() as u64);
        if write_end > size {
            return Err(StagingError::BufferWriteOutOfBounds {
                buffer_size: size,
                write_end,
            });
        }

        self.backend.map_write(id)?[offset as usize..write_end as usize].copy_from_slice(data);
        let range = ByteRange::new(offset, write_end);
        self.backend.flush(id, range)?;
        self.notify_buffer_content_changed(handle, BufferChange::Range(range))
    }

    /// Entry point for writes made outside the context (e.g. through the backend directly).
    pub fn notify_buffer_content_changed(&mut self, handle: BufferHandle, change: BufferChange) -> Result<()> {
        let object = self
            .buffers
            .get_mut(&handle)
            .ok_or(StagingError::UnknownBuffer(handle))?;
        object.content_changed(change);
        Ok(())
    }

    /// Destroys a buffer and every conversion derived from it.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let Some(mut object) = self.buffers.remove(&handle) else {
            return;
        };
        let released = object.conversions.release_all();
        debug!(?handle, conversions = released.len(), "destroying source buffer");
        for buffer in released {
            self.backend.destroy_buffer(buffer);
        }
        self.backend.destroy_buffer(object.id());
    }

    /// Destroys every source buffer and streaming segment. Vertex arrays must be released
    /// separately with [`VertexArray::release`](crate::VertexArray::release).
    pub fn release(&mut self) {
        let handles: Vec<_> = self.buffers.keys().copied().collect();
        for handle in handles {
            self.destroy_buffer(handle);
        }
        self.streaming.release_all(&mut self.backend);
    }

    /// The compute path writes 32-bit components only.
    fn conversion_path(&self, plan: &VertexLoadPlan) -> ConversionPath {
        match plan.need {
            ConversionNeed::GpuCapable
                if plan.dst_format.component_bytes() == 4
                    && self.backend.caps().gpu_conversion
                    && !self.config.force_cpu_conversion =>
            {
                ConversionPath::Gpu
            }
            _ => ConversionPath::Cpu,
        }
    }

    /// Resolves an attribute reading from a source buffer at a hardware-supported divisor.
    pub(crate) fn resolve_buffered(
        &mut self,
        handle: BufferHandle,
        format: VertexFormat,
        offset: u64,
        stride: u32,
        divisor: u32,
    ) -> Result<ResolvedVertexSource> {
        let caps = self.backend.caps().formats;
        let object = self.buffer_ref(handle)?;
        let source = SourceBuffer {
            id: object.id(),
            size: object.size(),
        };

        if vertex_count_for_len(source.size.saturating_sub(offset), format.byte_size(), stride) == 0 {
            return Ok(ResolvedVertexSource::empty(self.empty_buffer, format));
        }

        let need = needs_conversion(format, offset, stride, &caps);
        if need == ConversionNeed::No {
            return Ok(ResolvedVertexSource {
                buffer: source.id,
                byte_offset: offset,
                stride,
                format,
                divisor,
                kind: SourceKind::PassThrough,
                pipeline_dirty: false,
            });
        }

        let plan = VertexLoadPlan::new(format, offset, stride, &caps);
        let path = self.conversion_path(&plan);
        let key = ConversionCacheKey {
            src_format: format,
            stride,
            offset,
            unaligned: need == ConversionNeed::CpuOnly,
        };

        let empty_buffer = self.empty_buffer;
        let Self {
            backend,
            buffers,
            stats,
            ..
        } = &mut *self;
        let object = buffers.get_mut(&handle).ok_or(StagingError::UnknownBuffer(handle))?;
        let slot = object.conversions.get_or_create(key, plan, path);

        if slot.created {
            stats.inc_conversion_cache_misses();
            debug!(?handle, ?key, ?path, "new conversion entry");
            if path == ConversionPath::Cpu {
                stats.inc_cpu_fallback_conversions();
                if need == ConversionNeed::CpuOnly {
                    warn!(?handle, ?format, offset, stride, "GPU stall due to vertex format conversion of unaligned data");
                } else {
                    debug!(?handle, ?format, "converting vertex data on the host");
                }
            }
        } else {
            stats.inc_conversion_cache_hits();
        }
        if let Some(evicted) = slot.evicted {
            stats.inc_conversion_cache_evictions();
            if let Some(buffer) = evicted.buffer() {
                backend.destroy_buffer(buffer);
            }
        }

        let entry = slot.entry;
        ensure_up_to_date(entry, source, backend, &**stats)?;

        Ok(ResolvedVertexSource {
            buffer: entry.buffer().unwrap_or(empty_buffer),
            byte_offset: slot.dst_relative_offset,
            stride: entry.dst_stride(),
            format: entry.dst_format(),
            divisor,
            kind: SourceKind::Converted,
            pipeline_dirty: false,
        })
    }
}
