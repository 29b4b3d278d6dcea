use crate::backend::BufferId;
use crate::conversion_cache::ConversionCache;
use crate::dirty_range::ByteRange;

/// Engine-level identity of a source buffer. Never reused within a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// What part of a buffer's contents changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferChange {
    Entire,
    Range(ByteRange),
}

/// A source buffer and the conversions derived from it.
///
/// Destroying the object releases every conversion destination it owns.
#[derive(Debug)]
pub struct BufferObject {
    handle: BufferHandle,
    id: BufferId,
    size: u64,
    generation: u64,
    pub(crate) conversions: ConversionCache,
}

impl BufferObject {
    pub(crate) fn new(handle: BufferHandle, id: BufferId, size: u64, max_conversions: usize) -> Self {
        Self {
            handle,
            id,
            size,
            generation: 0,
            conversions: ConversionCache::new(max_conversions),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bumped on every content change; consumers compare it to detect stale derived data.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn conversions(&self) -> &ConversionCache {
        &self.conversions
    }

    pub(crate) fn respecify(&mut self, id: BufferId, size: u64) {
        self.id = id;
        self.size = size;
        self.content_changed(BufferChange::Entire);
    }

    /// Propagates a write to every conversion of this buffer.
    pub(crate) fn content_changed(&mut self, change: BufferChange) {
        self.generation += 1;
        let change = match change {
            BufferChange::Range(range) => {
                debug_assert!(range.high <= self.size, "dirty range {range:?} outside buffer of {} bytes", self.size);
                BufferChange::Range(range.clamp_to(self.size))
            }
            BufferChange::Entire => BufferChange::Entire,
        };
        self.conversions.on_content_changed(change);
    }
}
