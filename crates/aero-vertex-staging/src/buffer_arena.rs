/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0. Saturates instead of overflowing.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    match value.checked_add(alignment - 1) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

pub(crate) fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    value / alignment * alignment
}

/// Linear sub-allocator over one streaming segment.
///
/// Tracks offsets only; the segment's backing buffer lives in the streaming allocator.
#[derive(Debug, Clone)]
pub(crate) struct BufferArena {
    capacity: u64,
    cursor: u64,
}

impl BufferArena {
    pub(crate) fn new(capacity: u64) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn used(&self) -> u64 {
        self.cursor
    }

    /// Allocate `size` bytes at an offset aligned to `alignment`.
    ///
    /// Returns `None` when the segment cannot fit the request.
    pub(crate) fn alloc(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let aligned = align_up(self.cursor, alignment.max(1));
        let end = aligned.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.cursor = end;
        Some(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers_round_to_multiples() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(u64::MAX, 4), u64::MAX / 4 * 4);
        assert_eq!(align_down(7, 4), 4);
        assert_eq!(align_down(8, 4), 8);
    }

    #[test]
    fn arena_alloc_respects_alignment_and_capacity() {
        let mut arena = BufferArena::new(64);

        assert_eq!(arena.alloc(6, 4), Some(0));
        assert_eq!(arena.alloc(4, 4), Some(8));
        assert_eq!(arena.used(), 12);

        assert_eq!(arena.alloc(52, 4), None);
        assert_eq!(arena.alloc(48, 16), Some(16));
        assert_eq!(arena.alloc(1, 1), None);
    }

    #[test]
    fn reset_reuses_the_segment() {
        let mut arena = BufferArena::new(16);
        assert_eq!(arena.alloc(16, 4), Some(0));
        arena.reset();
        assert_eq!(arena.alloc(8, 4), Some(0));
        assert_eq!(arena.capacity(), 16);
    }
}
