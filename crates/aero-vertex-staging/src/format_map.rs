//! Decides whether an attribute can be consumed in place and, if not, what it becomes.

use crate::convert::ElementConversion;
use crate::format::{ComponentKind, PackedKind, VertexFormat};

/// Vertex input capabilities of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCaps {
    /// Largest per-instance step rate the target accepts; larger divisors are emulated.
    pub max_vertex_attrib_divisor: u32,
    /// `float16x2` / `float16x4`.
    pub vertex_attribute_16bit: bool,
    /// 1- and 3-component 8/16-bit formats (`unorm8x3`, `float16x3`, ...).
    pub vertex_formats_1_and_3_component: bool,
    /// 10/10/10/2 packed formats.
    pub packed_1010102: bool,
    /// `uscaled`/`sscaled` formats.
    pub scaled_formats: bool,
    /// Required multiple for vertex buffer strides. Attribute offsets need the smaller of this
    /// and the element size.
    pub vertex_stride_alignment: u32,
}

impl TargetCaps {
    /// Core WebGPU: two- and four-component small formats only, step rate of one.
    pub fn webgpu() -> Self {
        Self {
            max_vertex_attrib_divisor: 1,
            vertex_attribute_16bit: true,
            vertex_formats_1_and_3_component: false,
            packed_1010102: false,
            scaled_formats: false,
            vertex_stride_alignment: 4,
        }
    }

    /// Whether the target accepts `stride` and `offset` for a binding of `format`.
    pub fn layout_is_valid(&self, format: VertexFormat, offset: u64, stride: u32) -> bool {
        let alignment = self.vertex_stride_alignment.max(1) as u64;
        stride as u64 % alignment == 0 && offset % alignment.min(format.byte_size() as u64) == 0
    }

    pub fn is_natively_supported(&self, format: VertexFormat) -> bool {
        use ComponentKind::*;
        match format {
            VertexFormat::Vector { kind, components } => {
                let shape_ok = components == 2 || components == 4 || self.vertex_formats_1_and_3_component;
                match kind {
                    Float32 | Uint32 | Sint32 => true,
                    Fixed32 => false,
                    Float16 => self.vertex_attribute_16bit && shape_ok,
                    Uscaled8 | Sscaled8 | Uscaled16 | Sscaled16 => self.scaled_formats && shape_ok,
                    Uint8 | Sint8 | Unorm8 | Snorm8 | Uint16 | Sint16 | Unorm16 | Snorm16 => shape_ok,
                }
            }
            VertexFormat::Packed1010102(kind) => {
                self.packed_1010102
                    && (self.scaled_formats || !matches!(kind, PackedKind::Uscaled | PackedKind::Sscaled))
            }
        }
    }
}

/// Outcome of [`needs_conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionNeed {
    No,
    /// Only the host path can produce the destination; forces a host/device sync.
    CpuOnly,
    GpuCapable,
}

/// Whether `offset` and `stride` satisfy the format's addressing requirement.
///
/// Byte-addressable components need component alignment; packed formats need whole-element
/// alignment.
pub fn binding_is_aligned(format: VertexFormat, offset: u64, stride: u32) -> bool {
    let alignment = match format.alignment_mask() {
        Some(mask) => mask as u64 + 1,
        None => format.byte_size() as u64,
    };
    offset % alignment == 0 && stride as u64 % alignment == 0
}

pub fn needs_conversion(format: VertexFormat, offset: u64, stride: u32, caps: &TargetCaps) -> ConversionNeed {
    let aligned = binding_is_aligned(format, offset, stride);
    if caps.is_natively_supported(format) && aligned && caps.layout_is_valid(format, offset, stride) {
        ConversionNeed::No
    } else if aligned {
        ConversionNeed::GpuCapable
    } else {
        ConversionNeed::CpuOnly
    }
}

/// Format an attribute is rewritten into when it cannot be consumed in place.
///
/// Supported formats keep their own format (re-layout only) unless a tightly packed element
/// would violate the target's stride alignment. Everything else widens to the 32-bit format with
/// the same component count and numeric class.
pub fn destination_format(format: VertexFormat, caps: &TargetCaps) -> VertexFormat {
    if caps.is_natively_supported(format) && format.byte_size() % caps.vertex_stride_alignment.max(1) == 0 {
        return format;
    }
    match format {
        VertexFormat::Vector { kind, components } => {
            let dst_kind = if !kind.is_integer() {
                ComponentKind::Float32
            } else if kind.is_signed() {
                ComponentKind::Sint32
            } else {
                ComponentKind::Uint32
            };
            VertexFormat::vector(dst_kind, components)
        }
        VertexFormat::Packed1010102(PackedKind::Uint) => VertexFormat::UINT32X4,
        VertexFormat::Packed1010102(PackedKind::Sint) => VertexFormat::SINT32X4,
        VertexFormat::Packed1010102(_) => VertexFormat::FLOAT32X4,
    }
}

/// How an attribute's data gets into a consumable layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLoadPlan {
    pub src_format: VertexFormat,
    pub dst_format: VertexFormat,
    pub conversion: ElementConversion,
    pub need: ConversionNeed,
}

impl VertexLoadPlan {
    pub fn new(format: VertexFormat, offset: u64, stride: u32, caps: &TargetCaps) -> Self {
        let dst_format = destination_format(format, caps);
        Self {
            src_format: format,
            dst_format,
            conversion: ElementConversion::new(format, dst_format),
            need: needs_conversion(format, offset, stride, caps),
        }
    }

    pub fn dst_stride(&self) -> u32 {
        self.dst_format.byte_size()
    }
}
