use crate::backend::{
    assert_conversion_fits, assert_widening_fits, BackendCaps, BufferDesc, BufferId, BufferUsages,
    GpuIndexWidening, GpuVertexConversion, StagingBackend,
};
use crate::convert::{convert_vertices, widen_u8_indices, ElementConversion};
use crate::dirty_range::ByteRange;
use crate::error::{Result, StagingError};
use crate::format_map::TargetCaps;

/// Operation counts recorded by [`HostBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostBackendCounters {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub flushes: u64,
    pub vertex_conversion_submissions: u64,
    pub vertex_conversion_ranges: u64,
    pub index_widening_submissions: u64,
}

#[derive(Debug)]
struct HostBuffer {
    data: Vec<u8>,
    usage: BufferUsages,
    label: Option<String>,
    flushes: u64,
}

/// Backend whose "device memory" is host vectors.
///
/// Device-side operations run synchronously with the same alignment contract as the compute
/// path. Used as a software target and in tests.
#[derive(Debug)]
pub struct HostBackend {
    caps: BackendCaps,
    buffers: Vec<Option<HostBuffer>>,
    free: Vec<u32>,
    counters: HostBackendCounters,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(TargetCaps::webgpu())
    }
}

impl HostBackend {
    pub fn new(formats: TargetCaps) -> Self {
        Self::with_caps(BackendCaps {
            formats,
            gpu_conversion: true,
            max_buffer_size: 256 * 1024 * 1024,
        })
    }

    pub fn with_caps(caps: BackendCaps) -> Self {
        Self {
            caps,
            buffers: Vec::new(),
            free: Vec::new(),
            counters: HostBackendCounters::default(),
        }
    }

    pub fn counters(&self) -> HostBackendCounters {
        self.counters
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    /// Current contents of a buffer, for inspection.
    pub fn contents(&self, id: BufferId) -> Option<&[u8]> {
        self.slot(id).ok().map(|b| b.data.as_slice())
    }

    pub fn flush_count(&self, id: BufferId) -> u64 {
        self.slot(id).map(|b| b.flushes).unwrap_or(0)
    }

    pub fn usage(&self, id: BufferId) -> Option<BufferUsages> {
        self.slot(id).ok().map(|b| b.usage)
    }

    pub fn label(&self, id: BufferId) -> Option<&str> {
        self.slot(id).ok().and_then(|b| b.label.as_deref())
    }

    fn slot(&self, id: BufferId) -> Result<&HostBuffer> {
        self.buffers
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StagingError::UnknownBackendBuffer(id))
    }

    fn slot_mut(&mut self, id: BufferId) -> Result<&mut HostBuffer> {
        self.buffers
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StagingError::UnknownBackendBuffer(id))
    }

    fn pair_mut(&mut self, src: BufferId, dst: BufferId) -> Result<(&HostBuffer, &mut HostBuffer)> {
        assert_ne!(src, dst, "source and destination must be distinct buffers");
        self.slot(src)?;
        self.slot(dst)?;

        let (s, d) = (src.0 as usize, dst.0 as usize);
        let (src_buf, dst_buf) = if s < d {
            let (lo, hi) = self.buffers.split_at_mut(d);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.buffers.split_at_mut(s);
            (&hi[0], &mut lo[d])
        };
        match (src_buf.as_ref(), dst_buf.as_mut()) {
            (Some(src_buf), Some(dst_buf)) => Ok((src_buf, dst_buf)),
            _ => Err(StagingError::UnknownBackendBuffer(dst)),
        }
    }
}

impl StagingBackend for HostBackend {
    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        if desc.size > self.caps.max_buffer_size {
            return Err(StagingError::BufferTooLarge {
                requested: desc.size,
                max: self.caps.max_buffer_size,
            });
        }
        let len = usize::try_from(desc.size).map_err(|_| StagingError::OutOfMemory {
            requested: desc.size,
        })?;

        let buffer = HostBuffer {
            data: vec![0; len],
            usage: desc.usage,
            label: desc.label.map(str::to_owned),
            flushes: 0,
        };
        self.counters.buffers_created += 1;

        let id = match self.free.pop() {
            Some(index) => {
                self.buffers[index as usize] = Some(buffer);
                index
            }
            None => {
                self.buffers.push(Some(buffer));
                (self.buffers.len() - 1) as u32
            }
        };
        Ok(BufferId(id))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(slot) = self.buffers.get_mut(id.0 as usize) {
            if slot.take().is_some() {
                self.free.push(id.0);
                self.counters.buffers_destroyed += 1;
            }
        }
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.slot(id).ok().map(|b| b.data.len() as u64)
    }

    fn map_read(&mut self, id: BufferId) -> Result<&[u8]> {
        Ok(&self.slot(id)?.data)
    }

    fn map_write(&mut self, id: BufferId) -> Result<&mut [u8]> {
        Ok(&mut self.slot_mut(id)?.data)
    }

    fn map_read_write(&mut self, src: BufferId, dst: BufferId) -> Result<(&[u8], &mut [u8])> {
        let (src, dst) = self.pair_mut(src, dst)?;
        Ok((&src.data, &mut dst.data))
    }

    fn flush(&mut self, id: BufferId, range: ByteRange) -> Result<()> {
        let buffer = self.slot_mut(id)?;
        debug_assert!(range.high <= buffer.data.len() as u64, "flush past end of buffer");
        buffer.flushes += 1;
        self.counters.flushes += 1;
        Ok(())
    }

    fn convert_vertices(&mut self, op: &GpuVertexConversion<'_>) -> Result<()> {
        let conversion = ElementConversion::new(op.src_format, op.dst_format);
        let (src, dst) = self.pair_mut(op.src, op.dst)?;
        assert_conversion_fits(op, dst.data.len() as u64);

        let mut ranges = 0;
        for range in op.ranges() {
            convert_vertices(
                &conversion,
                &src.data[range.src_offset as usize..],
                op.src_stride as usize,
                range.vertex_count as usize,
                &mut dst.data[range.dst_offset as usize..],
            );
            ranges += 1;
        }

        self.counters.vertex_conversion_submissions += 1;
        self.counters.vertex_conversion_ranges += ranges;
        Ok(())
    }

    fn widen_indices(&mut self, op: &GpuIndexWidening) -> Result<()> {
        let (src, dst) = self.pair_mut(op.src, op.dst)?;
        assert_widening_fits(op, dst.data.len() as u64);

        let start = op.src_offset as usize;
        let end = start + op.index_count as usize;
        widen_u8_indices(&src.data[start..end], &mut dst.data[op.dst_offset as usize..], op.primitive_restart);

        self.counters.index_widening_submissions += 1;
        Ok(())
    }
}
