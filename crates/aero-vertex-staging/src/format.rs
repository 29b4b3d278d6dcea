//! Vertex attribute and index formats understood by the staging engine.

/// Per-component encoding of a vector vertex format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Uint8,
    Sint8,
    Unorm8,
    Snorm8,
    Uscaled8,
    Sscaled8,
    Uint16,
    Sint16,
    Unorm16,
    Snorm16,
    Uscaled16,
    Sscaled16,
    Uint32,
    Sint32,
    Float16,
    Float32,
    /// 16.16 signed fixed point.
    Fixed32,
}

impl ComponentKind {
    pub fn byte_size(self) -> u32 {
        use ComponentKind::*;
        match self {
            Uint8 | Sint8 | Unorm8 | Snorm8 | Uscaled8 | Sscaled8 => 1,
            Uint16 | Sint16 | Unorm16 | Snorm16 | Uscaled16 | Sscaled16 | Float16 => 2,
            Uint32 | Sint32 | Float32 | Fixed32 => 4,
        }
    }

    /// Pure integer components, read by the shader as integers rather than floats.
    pub fn is_integer(self) -> bool {
        use ComponentKind::*;
        matches!(self, Uint8 | Sint8 | Uint16 | Sint16 | Uint32 | Sint32)
    }

    pub fn is_signed(self) -> bool {
        use ComponentKind::*;
        matches!(
            self,
            Sint8 | Snorm8 | Sscaled8 | Sint16 | Snorm16 | Sscaled16 | Sint32 | Float16 | Float32 | Fixed32
        )
    }
}

/// Interpretation of a 10/10/10/2 packed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackedKind {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Uscaled,
    Sscaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Vector { kind: ComponentKind, components: u8 },
    Packed1010102(PackedKind),
}

impl VertexFormat {
    pub const FLOAT32: Self = Self::vector(ComponentKind::Float32, 1);
    pub const FLOAT32X2: Self = Self::vector(ComponentKind::Float32, 2);
    pub const FLOAT32X3: Self = Self::vector(ComponentKind::Float32, 3);
    pub const FLOAT32X4: Self = Self::vector(ComponentKind::Float32, 4);
    pub const UINT32X4: Self = Self::vector(ComponentKind::Uint32, 4);
    pub const SINT32X4: Self = Self::vector(ComponentKind::Sint32, 4);

    pub const fn vector(kind: ComponentKind, components: u8) -> Self {
        assert!(components >= 1 && components <= 4);
        Self::Vector { kind, components }
    }

    pub fn byte_size(self) -> u32 {
        match self {
            Self::Vector { kind, components } => kind.byte_size() * components as u32,
            Self::Packed1010102(_) => 4,
        }
    }

    pub fn component_count(self) -> u32 {
        match self {
            Self::Vector { components, .. } => components as u32,
            Self::Packed1010102(_) => 4,
        }
    }

    /// Size of one independently addressable component.
    ///
    /// Packed components are not byte aligned, so the whole element is the unit.
    pub fn component_bytes(self) -> u32 {
        match self {
            Self::Vector { kind, .. } => kind.byte_size(),
            Self::Packed1010102(_) => 4,
        }
    }

    /// `component_bytes - 1` for byte-addressable components, `None` for packed formats.
    pub fn alignment_mask(self) -> Option<u32> {
        match self {
            Self::Vector { kind, .. } => Some(kind.byte_size() - 1),
            Self::Packed1010102(_) => None,
        }
    }

    pub fn is_integer(self) -> bool {
        match self {
            Self::Vector { kind, .. } => kind.is_integer(),
            Self::Packed1010102(kind) => matches!(kind, PackedKind::Uint | PackedKind::Sint),
        }
    }

    /// The equivalent WebGPU vertex format, if one exists.
    pub fn to_wgpu(self) -> Option<wgpu::VertexFormat> {
        use wgpu::VertexFormat as W;
        use ComponentKind::*;

        let Self::Vector { kind, components } = self else {
            return None;
        };
        let out = match (kind, components) {
            (Uint8, 2) => W::Uint8x2,
            (Uint8, 4) => W::Uint8x4,
            (Sint8, 2) => W::Sint8x2,
            (Sint8, 4) => W::Sint8x4,
            (Unorm8, 2) => W::Unorm8x2,
            (Unorm8, 4) => W::Unorm8x4,
            (Snorm8, 2) => W::Snorm8x2,
            (Snorm8, 4) => W::Snorm8x4,
            (Uint16, 2) => W::Uint16x2,
            (Uint16, 4) => W::Uint16x4,
            (Sint16, 2) => W::Sint16x2,
            (Sint16, 4) => W::Sint16x4,
            (Unorm16, 2) => W::Unorm16x2,
            (Unorm16, 4) => W::Unorm16x4,
            (Snorm16, 2) => W::Snorm16x2,
            (Snorm16, 4) => W::Snorm16x4,
            (Float16, 2) => W::Float16x2,
            (Float16, 4) => W::Float16x4,
            (Float32, 1) => W::Float32,
            (Float32, 2) => W::Float32x2,
            (Float32, 3) => W::Float32x3,
            (Float32, 4) => W::Float32x4,
            (Uint32, 1) => W::Uint32,
            (Uint32, 2) => W::Uint32x2,
            (Uint32, 3) => W::Uint32x3,
            (Uint32, 4) => W::Uint32x4,
            (Sint32, 1) => W::Sint32,
            (Sint32, 2) => W::Sint32x2,
            (Sint32, 3) => W::Sint32x3,
            (Sint32, 4) => W::Sint32x4,
            _ => return None,
        };
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U8,
    U16,
    U32,
}

impl IndexType {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// All-bits-set sentinel for primitive restart.
    pub fn restart_value(self) -> u32 {
        match self {
            Self::U8 => 0xff,
            Self::U16 => 0xffff,
            Self::U32 => 0xffff_ffff,
        }
    }

    /// Index format the target consumes for this type. 8-bit indices are widened.
    pub fn effective_format(self) -> IndexFormat {
        match self {
            Self::U8 | Self::U16 => IndexFormat::Uint16,
            Self::U32 => IndexFormat::Uint32,
        }
    }
}

/// Index formats the target can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }

    pub fn to_wgpu(self) -> wgpu::IndexFormat {
        match self {
            Self::Uint16 => wgpu::IndexFormat::Uint16,
            Self::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }
}
