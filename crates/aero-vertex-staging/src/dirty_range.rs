//! Stale byte ranges of a source buffer, tracked per conversion.

/// Half-open byte interval `[low, high)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteRange {
    pub low: u64,
    pub high: u64,
}

impl ByteRange {
    pub fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    pub fn from_offset_len(offset: u64, len: u64) -> Self {
        Self {
            low: offset,
            high: offset.saturating_add(len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    pub fn len(&self) -> u64 {
        self.high.saturating_sub(self.low)
    }

    /// Restricts the range to `[0, size)`.
    pub fn clamp_to(self, size: u64) -> Self {
        Self {
            low: self.low.min(size),
            high: self.high.min(size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyRanges {
    /// Everything is stale; individual ranges are not tracked.
    Entire,
    /// Possibly overlapping ranges; empty means clean.
    Ranges(Vec<ByteRange>),
}

impl Default for DirtyRanges {
    fn default() -> Self {
        Self::Ranges(Vec::new())
    }
}

impl DirtyRanges {
    pub fn mark_entire(&mut self) {
        *self = Self::Entire;
    }

    pub fn add(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }
        if let Self::Ranges(ranges) = self {
            ranges.push(range);
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Entire => true,
            Self::Ranges(ranges) => !ranges.is_empty(),
        }
    }

    pub fn is_entire(&self) -> bool {
        matches!(self, Self::Entire)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Sorted, disjoint, non-adjacent ranges covering the same bytes as the tracked ones.
    ///
    /// Returns an empty list for [`DirtyRanges::Entire`]; callers check `is_entire` first.
    pub fn consolidate(&self) -> Vec<ByteRange> {
        let Self::Ranges(ranges) = self else {
            return Vec::new();
        };

        let mut sorted: Vec<ByteRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
        sorted.sort_unstable();

        let mut merged: Vec<ByteRange> = Vec::with_capacity(sorted.len());
        for range in sorted {
            match merged.last_mut() {
                Some(last) if range.low <= last.high => last.high = last.high.max(range.high),
                _ => merged.push(range),
            }
        }
        merged
    }
}
