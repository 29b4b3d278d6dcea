//! Host-side element transforms.
//!
//! The numeric rules here are the reference for the compute shaders in
//! `backend::webgpu`; both paths must produce identical bits for every format pair.

use half::f16;

use crate::format::{ComponentKind, PackedKind, VertexFormat};

/// Per-element transform from a source format to its destination format.
///
/// Resolved once per cache entry or streamed attribute, then applied per vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementConversion {
    /// Source and destination are bit-identical.
    Copy { bytes: u32 },
    /// Each component becomes an `f32`.
    ToFloat { kind: ComponentKind, components: u8 },
    /// Each component becomes a 32-bit integer of the same signedness.
    ToInt { kind: ComponentKind, components: u8 },
    /// A 10/10/10/2 element becomes four 32-bit lanes.
    Packed { kind: PackedKind },
}

impl ElementConversion {
    /// Picks the transform between two formats.
    ///
    /// `dst` must be `src` itself or the 32-bit expansion of `src`.
    pub fn new(src: VertexFormat, dst: VertexFormat) -> Self {
        if src == dst {
            return Self::Copy {
                bytes: src.byte_size(),
            };
        }

        match (src, dst) {
            (
                VertexFormat::Vector { kind, components },
                VertexFormat::Vector {
                    kind: ComponentKind::Float32,
                    components: dst_components,
                },
            ) if components == dst_components && !kind.is_integer() => Self::ToFloat { kind, components },
            (
                VertexFormat::Vector { kind, components },
                VertexFormat::Vector {
                    kind: ComponentKind::Uint32 | ComponentKind::Sint32,
                    components: dst_components,
                },
            ) if components == dst_components && kind.is_integer() => Self::ToInt { kind, components },
            (VertexFormat::Packed1010102(kind), VertexFormat::Vector { components: 4, kind: dst_kind })
                if dst_kind.byte_size() == 4 =>
            {
                Self::Packed { kind }
            }
            _ => unreachable!("no element conversion from {src:?} to {dst:?}"),
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Self::Copy { .. })
    }

    pub fn src_size(&self) -> usize {
        match *self {
            Self::Copy { bytes } => bytes as usize,
            Self::ToFloat { kind, components } | Self::ToInt { kind, components } => {
                kind.byte_size() as usize * components as usize
            }
            Self::Packed { .. } => 4,
        }
    }

    pub fn dst_size(&self) -> usize {
        match *self {
            Self::Copy { bytes } => bytes as usize,
            Self::ToFloat { components, .. } | Self::ToInt { components, .. } => components as usize * 4,
            Self::Packed { .. } => 16,
        }
    }

    /// Converts one element. `src` and `dst` may be longer than one element.
    pub fn convert_element(&self, src: &[u8], dst: &mut [u8]) {
        match *self {
            Self::Copy { bytes } => {
                let bytes = bytes as usize;
                dst[..bytes].copy_from_slice(&src[..bytes]);
            }
            Self::ToFloat { kind, components } => {
                let size = kind.byte_size() as usize;
                for c in 0..components as usize {
                    let v = component_to_f32(kind, &src[c * size..]);
                    dst[c * 4..c * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            Self::ToInt { kind, components } => {
                let size = kind.byte_size() as usize;
                for c in 0..components as usize {
                    let v = component_to_u32(kind, &src[c * size..]);
                    dst[c * 4..c * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            Self::Packed { kind } => {
                let packed = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
                for (c, lane) in unpack_1010102(packed, kind).into_iter().enumerate() {
                    dst[c * 4..c * 4 + 4].copy_from_slice(&lane.to_le_bytes());
                }
            }
        }
    }
}

fn read_u16(src: &[u8]) -> u16 {
    u16::from_le_bytes([src[0], src[1]])
}

fn read_u32(src: &[u8]) -> u32 {
    u32::from_le_bytes([src[0], src[1], src[2], src[3]])
}

fn component_to_f32(kind: ComponentKind, src: &[u8]) -> f32 {
    use ComponentKind::*;
    match kind {
        Uint8 | Uscaled8 => src[0] as f32,
        Sint8 | Sscaled8 => src[0] as i8 as f32,
        Unorm8 => src[0] as f32 / 255.0,
        Snorm8 => (src[0] as i8 as f32 / 127.0).max(-1.0),
        Uint16 | Uscaled16 => read_u16(src) as f32,
        Sint16 | Sscaled16 => read_u16(src) as i16 as f32,
        Unorm16 => read_u16(src) as f32 / 65535.0,
        Snorm16 => (read_u16(src) as i16 as f32 / 32767.0).max(-1.0),
        Uint32 => read_u32(src) as f32,
        Sint32 => read_u32(src) as i32 as f32,
        Float16 => f16::from_bits(read_u16(src)).to_f32(),
        Float32 => f32::from_bits(read_u32(src)),
        Fixed32 => read_u32(src) as i32 as f32 / 65536.0,
    }
}

/// Zero- or sign-extends an integer component to 32 bits.
fn component_to_u32(kind: ComponentKind, src: &[u8]) -> u32 {
    use ComponentKind::*;
    match kind {
        Uint8 => src[0] as u32,
        Sint8 => src[0] as i8 as i32 as u32,
        Uint16 => read_u16(src) as u32,
        Sint16 => read_u16(src) as i16 as i32 as u32,
        Uint32 | Sint32 => read_u32(src),
        _ => unreachable!("{kind:?} is not an integer component"),
    }
}

fn sign_extend(v: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((v << shift) as i32) >> shift
}

/// Unpacks x/y/z (10 bits) and w (2 bits) into the bit patterns of four 32-bit lanes.
fn unpack_1010102(packed: u32, kind: PackedKind) -> [u32; 4] {
    let raw = [
        packed & 0x3ff,
        (packed >> 10) & 0x3ff,
        (packed >> 20) & 0x3ff,
        packed >> 30,
    ];
    let bits = [10, 10, 10, 2];

    let mut out = [0u32; 4];
    for i in 0..4 {
        let v = raw[i];
        let signed = sign_extend(v, bits[i]);
        out[i] = match kind {
            PackedKind::Unorm => (v as f32 / ((1u32 << bits[i]) - 1) as f32).to_bits(),
            PackedKind::Snorm => {
                let max = ((1u32 << (bits[i] - 1)) - 1) as f32;
                (signed as f32 / max).max(-1.0).to_bits()
            }
            PackedKind::Uint => v,
            PackedKind::Sint => signed as u32,
            PackedKind::Uscaled => (v as f32).to_bits(),
            PackedKind::Sscaled => (signed as f32).to_bits(),
        };
    }
    out
}

/// Number of whole elements readable from `len` bytes.
pub fn vertex_count_for_len(len: u64, element_size: u32, stride: u32) -> u64 {
    let element_size = element_size as u64;
    if len < element_size {
        return 0;
    }
    if stride == 0 {
        return 1;
    }
    (len - element_size) / stride as u64 + 1
}

/// Converts `count` vertices read from `src` at `src_stride` into tightly packed `dst`.
///
/// Bit-identical formats with a tightly packed source are a single bulk copy.
pub fn convert_vertices(conversion: &ElementConversion, src: &[u8], src_stride: usize, count: usize, dst: &mut [u8]) {
    if count == 0 {
        return;
    }

    let dst_size = conversion.dst_size();
    if conversion.is_copy() && src_stride == dst_size {
        let bytes = count * dst_size;
        dst[..bytes].copy_from_slice(&src[..bytes]);
        return;
    }

    for (i, out) in dst[..count * dst_size].chunks_exact_mut(dst_size).enumerate() {
        conversion.convert_element(&src[i * src_stride..], out);
    }
}

/// Emulates an instance divisor by repeating each source element `divisor` times.
///
/// Writes at most `dst.len()` bytes rounded down to whole elements, and no more than
/// `num_src_vertices * divisor` elements. With `robust` set the rest of `dst` is zeroed.
/// Returns the number of bytes written.
pub fn replicate_with_divisor(
    conversion: &ElementConversion,
    src: &[u8],
    src_stride: usize,
    num_src_vertices: usize,
    divisor: u32,
    dst: &mut [u8],
    robust: bool,
) -> usize {
    debug_assert!(divisor > 0);
    let divisor = divisor.max(1) as usize;
    let dst_stride = conversion.dst_size();

    let wanted = num_src_vertices.saturating_mul(divisor).saturating_mul(dst_stride);
    let clamped = wanted.min(dst.len()) / dst_stride * dst_stride;

    for (i, out) in dst[..clamped].chunks_exact_mut(dst_stride).enumerate() {
        conversion.convert_element(&src[(i / divisor) * src_stride..], out);
    }
    if robust {
        dst[clamped..].fill(0);
    }
    clamped
}

pub fn widen_u8_index(v: u8, primitive_restart: bool) -> u16 {
    if primitive_restart && v == 0xff {
        0xffff
    } else {
        v as u16
    }
}

/// Widens 8-bit indices into little-endian 16-bit indices in `dst`.
pub fn widen_u8_indices(src: &[u8], dst: &mut [u8], primitive_restart: bool) {
    assert!(dst.len() >= src.len() * 2, "index widening destination too small");
    for (out, &v) in dst.chunks_exact_mut(2).zip(src) {
        out.copy_from_slice(&widen_u8_index(v, primitive_restart).to_le_bytes());
    }
}
