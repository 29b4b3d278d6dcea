//! Per-vertex-array resolution of attribute sources.

mod attribs;
mod streamed;

pub use attribs::{AttribEvent, AttribSyncState};

use tracing::trace;

use self::attribs::{AttribSlot, SlotLayout};
use crate::backend::{BufferId, StagingBackend};
use crate::buffer::BufferHandle;
use crate::config::StagingConfig;
use crate::context::StagingContext;
use crate::draw::DrawRange;
use crate::error::Result;
use crate::format::VertexFormat;
use crate::index::IndexState;
use crate::line_loop::LineLoopCache;
use crate::streaming::write_allocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub enabled: bool,
    pub format: VertexFormat,
    pub relative_offset: u32,
    pub binding_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingDescriptor {
    /// `None` when the attribute reads client memory.
    pub buffer: Option<BufferHandle>,
    pub offset: i64,
    pub stride: u32,
    pub divisor: u32,
}

/// Client memory an attribute reads from.
///
/// `offset` is the attribute's first byte within `memory`, relative offset included.
#[derive(Debug, Clone, Copy)]
pub struct ClientPointer<'a> {
    pub memory: &'a [u8],
    pub offset: usize,
}

impl ClientPointer<'_> {
    pub(crate) fn address(&self) -> usize {
        self.memory.as_ptr() as usize + self.offset
    }
}

/// One active attribute of a draw.
#[derive(Debug, Clone, Copy)]
pub struct VertexSource<'a> {
    pub location: u32,
    pub attrib: AttributeDescriptor,
    pub binding: BindingDescriptor,
    pub client: Option<ClientPointer<'a>>,
}

impl VertexSource<'_> {
    /// Byte offset of the first element inside the bound buffer.
    pub(crate) fn buffer_offset(&self) -> u64 {
        debug_assert!(self.binding.offset >= 0, "negative binding offset {}", self.binding.offset);
        self.binding.offset.max(0) as u64 + self.attrib.relative_offset as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Reads the source buffer directly.
    PassThrough,
    /// Reads a cached conversion of the source buffer.
    Converted,
    /// Reads a per-draw streaming allocation.
    Streamed,
    /// Nothing to read; bound to the zero-filled empty buffer.
    Empty,
}

/// Where the draw layer binds an attribute from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVertexSource {
    pub buffer: BufferId,
    pub byte_offset: u64,
    pub stride: u32,
    pub format: VertexFormat,
    /// Step rate to program; emulated divisors come back as 1.
    pub divisor: u32,
    pub kind: SourceKind,
    /// The vertex layout differs from what the draw layer last saw for this slot.
    pub pipeline_dirty: bool,
}

impl ResolvedVertexSource {
    pub(crate) fn empty(buffer: BufferId, format: VertexFormat) -> Self {
        Self {
            buffer,
            byte_offset: 0,
            stride: 0,
            format,
            divisor: 0,
            kind: SourceKind::Empty,
            pipeline_dirty: false,
        }
    }
}

/// Staging state of one vertex array object.
#[derive(Debug)]
pub struct VertexArray {
    slots: Vec<AttribSlot>,
    element_buffer: Option<BufferHandle>,
    pub(crate) index: IndexState,
    pub(crate) line_loop: LineLoopCache,
}

impl VertexArray {
    pub fn new(config: &StagingConfig) -> Self {
        Self {
            slots: Vec::new(),
            element_buffer: None,
            index: IndexState::new(config.index_cache_slots, config.index_cache_count),
            line_loop: LineLoopCache::default(),
        }
    }

    fn slot_mut(&mut self, location: u32) -> &mut AttribSlot {
        let location = location as usize;
        if self.slots.len() <= location {
            self.slots.resize_with(location + 1, AttribSlot::default);
        }
        &mut self.slots[location]
    }

    pub fn attrib_state(&self, location: u32) -> AttribSyncState {
        self.slots
            .get(location as usize)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    /// The slot's binding now points at a different buffer.
    pub fn mark_buffer_rebound(&mut self, location: u32) {
        let slot = self.slot_mut(location);
        slot.state = slot.state.on(AttribEvent::BufferRebound);
    }

    /// The slot's format, offset or stride changed.
    pub fn mark_respecified(&mut self, location: u32) {
        let slot = self.slot_mut(location);
        slot.state = slot.state.on(AttribEvent::Respecified);
    }

    pub fn element_buffer(&self) -> Option<BufferHandle> {
        self.element_buffer
    }

    pub fn bind_element_buffer(&mut self, buffer: Option<BufferHandle>) {
        if self.element_buffer != buffer {
            self.element_buffer = buffer;
            self.line_loop.invalidate();
        }
    }

    /// Resolves one attribute for a draw.
    pub fn resolve_vertex_source<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        source: &VertexSource<'_>,
        draw: &DrawRange,
    ) -> Result<ResolvedVertexSource> {
        let mut resolved = self.resolve_vertex_sources(ctx, std::slice::from_ref(source), draw)?;
        Ok(resolved.remove(0))
    }

    /// Resolves every active attribute of a draw, merging client attributes that share memory.
    pub fn resolve_vertex_sources<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        sources: &[VertexSource<'_>],
        draw: &DrawRange,
    ) -> Result<Vec<ResolvedVertexSource>> {
        let max_divisor = ctx.backend.caps().formats.max_vertex_attrib_divisor;
        let mut resolved: Vec<Option<ResolvedVertexSource>> = vec![None; sources.len()];
        let mut streamed = Vec::new();

        for (i, source) in sources.iter().enumerate() {
            let attrib = &source.attrib;
            if !attrib.enabled {
                resolved[i] = Some(ResolvedVertexSource::empty(ctx.empty_buffer(), attrib.format));
                continue;
            }
            let binding = &source.binding;
            match binding.buffer {
                Some(handle) if binding.divisor <= max_divisor => {
                    resolved[i] = Some(ctx.resolve_buffered(
                        handle,
                        attrib.format,
                        source.buffer_offset(),
                        binding.stride,
                        binding.divisor,
                    )?);
                }
                _ => streamed.push(i),
            }
        }

        if !streamed.is_empty() {
            streamed::stream_attributes(ctx, sources, &streamed, draw, &mut resolved)?;
        }

        let mut out = Vec::with_capacity(sources.len());
        for (source, resolved) in sources.iter().zip(resolved) {
            let mut resolved = resolved.unwrap_or_else(|| ResolvedVertexSource::empty(ctx.empty_buffer(), source.attrib.format));
            resolved.pipeline_dirty = self.slot_mut(source.location).sync(SlotLayout {
                stride: resolved.stride,
                format: resolved.format,
                divisor: resolved.divisor,
            });
            out.push(resolved);
        }
        Ok(out)
    }

    /// Streams the current value of a disabled attribute as a 16-byte constant.
    pub fn resolve_default_attribute<B: StagingBackend>(
        &mut self,
        ctx: &mut StagingContext<B>,
        location: u32,
        format: VertexFormat,
        value: [u8; 16],
    ) -> Result<ResolvedVertexSource> {
        debug_assert_eq!(format.byte_size(), 16, "current values are four 32-bit components");
        let allocation = ctx.allocate_streaming(value.len() as u64)?;
        write_allocation(&mut ctx.backend, &allocation, |dst| dst.copy_from_slice(&value))?;
        trace!(location, ?allocation, "streamed default attribute");

        let mut resolved = ResolvedVertexSource {
            buffer: allocation.buffer,
            byte_offset: allocation.byte_offset,
            stride: 0,
            format,
            divisor: 0,
            kind: SourceKind::Streamed,
            pipeline_dirty: false,
        };
        resolved.pipeline_dirty = self.slot_mut(location).sync(SlotLayout {
            stride: 0,
            format,
            divisor: 0,
        });
        Ok(resolved)
    }

    /// Releases every buffer owned by this vertex array.
    pub fn release<B: StagingBackend>(&mut self, ctx: &mut StagingContext<B>) {
        self.index.release(&mut ctx.backend);
        self.line_loop.release(&mut ctx.backend);
    }
}
