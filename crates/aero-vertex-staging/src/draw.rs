use crate::format::IndexType;

/// Vertices and instances a draw references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawRange {
    pub first_vertex: u32,
    /// Up to `2^32` for 32-bit indices spanning the whole index range.
    pub vertex_count: u64,
    pub instance_count: u32,
}

impl DrawRange {
    pub fn arrays(first_vertex: u32, vertex_count: u32, instance_count: u32) -> Self {
        Self {
            first_vertex,
            vertex_count: vertex_count as u64,
            instance_count,
        }
    }

    /// Vertex range referenced by an indexed draw over little-endian `indices`.
    ///
    /// Restart sentinels are skipped when `primitive_restart` is set. Returns `None` if no
    /// vertex is referenced.
    pub fn from_indices(
        index_type: IndexType,
        indices: &[u8],
        count: u32,
        primitive_restart: bool,
        instance_count: u32,
    ) -> Option<Self> {
        let size = index_type.byte_size() as usize;
        let restart = index_type.restart_value();

        let (min, max) = indices
            .chunks_exact(size)
            .take(count as usize)
            .map(|c| match index_type {
                IndexType::U8 => c[0] as u32,
                IndexType::U16 => u16::from_le_bytes([c[0], c[1]]) as u32,
                IndexType::U32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
            })
            .filter(|&v| !(primitive_restart && v == restart))
            .fold(None, |acc: Option<(u32, u32)>, v| match acc {
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                None => Some((v, v)),
            })?;

        Some(Self {
            first_vertex: min,
            vertex_count: (max - min) as u64 + 1,
            instance_count,
        })
    }

    /// One past the last referenced vertex.
    pub fn end_vertex(&self) -> u64 {
        self.first_vertex as u64 + self.vertex_count
    }
}
