//! Client memory attributes and emulated divisors.

use tracing::trace;

use super::{ClientPointer, ResolvedVertexSource, SourceKind, VertexSource};
use crate::backend::StagingBackend;
use crate::context::StagingContext;
use crate::convert::{convert_vertices, replicate_with_divisor, vertex_count_for_len, ElementConversion};
use crate::draw::DrawRange;
use crate::error::{Result, StagingError};
use crate::format_map::{destination_format, needs_conversion, ConversionNeed, TargetCaps};
use crate::streaming::{write_allocation, STREAMING_ALIGNMENT};

/// A client attribute that can be copied in its interleaved layout.
#[derive(Debug, Clone, Copy)]
struct MergeCandidate {
    source: usize,
    /// Identity of the client memory slice.
    memory: (usize, usize),
    /// Byte offsets inside the client memory.
    start: u64,
    end: u64,
    copy_start: u64,
}

#[derive(Debug)]
struct MergedRange {
    memory: (usize, usize),
    start: u64,
    end: u64,
    copy_start: u64,
    members: Vec<MergeCandidate>,
}

/// Attributes copied verbatim must already be consumable at their client address.
fn can_combine(source: &VertexSource<'_>, client: &ClientPointer<'_>, caps: &TargetCaps) -> bool {
    let binding = &source.binding;
    binding.divisor == 0
        && binding.stride != 0
        && needs_conversion(source.attrib.format, client.address() as u64, binding.stride, caps) == ConversionNeed::No
}

fn out_of_bounds(required: u64, available: usize) -> StagingError {
    StagingError::ClientRangeOutOfBounds {
        required,
        available: available as u64,
    }
}

/// Sorts candidates by address and merges transitively when a range starts at or before the
/// end of the running range.
fn merge_ranges(mut candidates: Vec<MergeCandidate>) -> Vec<MergedRange> {
    candidates.sort_by_key(|c| (c.memory, c.start));

    let mut merged: Vec<MergedRange> = Vec::new();
    for candidate in candidates {
        match merged.last_mut() {
            Some(range) if range.memory == candidate.memory && candidate.start <= range.end => {
                range.end = range.end.max(candidate.end);
                range.copy_start = range.copy_start.min(candidate.copy_start);
                range.members.push(candidate);
            }
            _ => merged.push(MergedRange {
                memory: candidate.memory,
                start: candidate.start,
                end: candidate.end,
                copy_start: candidate.copy_start,
                members: vec![candidate],
            }),
        }
    }
    merged
}

pub(super) fn stream_attributes<B: StagingBackend>(
    ctx: &mut StagingContext<B>,
    sources: &[VertexSource<'_>],
    streamed: &[usize],
    draw: &DrawRange,
    resolved: &mut [Option<ResolvedVertexSource>],
) -> Result<()> {
    let caps = ctx.backend.caps().formats;

    let mut candidates = Vec::new();
    let mut remaining = Vec::new();
    for &i in streamed {
        let source = &sources[i];
        match source.client {
            Some(client)
                if ctx.config.merge_client_attribs
                    && source.binding.buffer.is_none()
                    && can_combine(source, &client, &caps) =>
            {
                if draw.vertex_count == 0 {
                    continue;
                }
                let stride = source.binding.stride as u64;
                let start = client.offset as u64;
                candidates.push(MergeCandidate {
                    source: i,
                    memory: (client.memory.as_ptr() as usize, client.memory.len()),
                    start,
                    end: start + (draw.end_vertex() - 1) * stride + source.attrib.format.byte_size() as u64,
                    copy_start: start + draw.first_vertex as u64 * stride,
                });
            }
            _ => remaining.push(i),
        }
    }

    for range in merge_ranges(candidates) {
        stream_merged(ctx, sources, &range, resolved)?;
    }
    for i in remaining {
        resolved[i] = Some(stream_one(ctx, &sources[i], draw, &caps)?);
    }
    Ok(())
}

fn stream_merged<B: StagingBackend>(
    ctx: &mut StagingContext<B>,
    sources: &[VertexSource<'_>],
    range: &MergedRange,
    resolved: &mut [Option<ResolvedVertexSource>],
) -> Result<()> {
    let Some(client) = sources[range.members[0].source].client else {
        return Ok(());
    };
    if range.end > client.memory.len() as u64 {
        return Err(out_of_bounds(range.end, client.memory.len()));
    }

    // Keep the client address modulo the streaming alignment so every member stays aligned.
    let pad = ((client.memory.as_ptr() as u64 + range.start) % STREAMING_ALIGNMENT) as usize;
    let allocation = ctx.allocate_streaming(pad as u64 + range.end - range.start)?;
    let skip = pad + (range.copy_start - range.start) as usize;
    let bytes = &client.memory[range.copy_start as usize..range.end as usize];
    write_allocation(&mut ctx.backend, &allocation, |dst| {
        dst[skip..skip + bytes.len()].copy_from_slice(bytes);
    })?;

    if range.members.len() > 1 {
        ctx.stats.inc_merged_attribute_groups();
    }
    trace!(
        attributes = range.members.len(),
        bytes = range.end - range.copy_start,
        "streamed interleaved client attributes"
    );

    for member in &range.members {
        let source = &sources[member.source];
        resolved[member.source] = Some(ResolvedVertexSource {
            buffer: allocation.buffer,
            byte_offset: allocation.byte_offset + pad as u64 + (member.start - range.start),
            stride: source.binding.stride,
            format: source.attrib.format,
            divisor: 0,
            kind: SourceKind::Streamed,
            pipeline_dirty: false,
        });
    }
    Ok(())
}

fn stream_one<B: StagingBackend>(
    ctx: &mut StagingContext<B>,
    source: &VertexSource<'_>,
    draw: &DrawRange,
    caps: &TargetCaps,
) -> Result<ResolvedVertexSource> {
    let format = source.attrib.format;
    let dst_format = destination_format(format, caps);
    let conversion = ElementConversion::new(format, dst_format);
    let dst_stride = dst_format.byte_size() as u64;
    let src_stride = source.binding.stride as usize;
    let divisor = source.binding.divisor;
    let empty = ResolvedVertexSource::empty(ctx.empty_buffer(), format);

    if divisor > caps.max_vertex_attrib_divisor {
        // One element per instance, each source element repeated `divisor` times.
        let bytes = draw.instance_count as u64 * dst_stride;
        if bytes == 0 {
            return Ok(empty);
        }
        let allocation = ctx.allocate_streaming(bytes)?;
        let robust = ctx.config.robust_access;
        let (start, end) = (allocation.byte_offset as usize, (allocation.byte_offset + bytes) as usize);

        match (source.binding.buffer, source.client) {
            (Some(handle), _) => {
                let object = ctx.buffer_ref(handle)?;
                let (id, size) = (object.id(), object.size());
                let offset = source.buffer_offset();
                let available = vertex_count_for_len(size.saturating_sub(offset), format.byte_size(), source.binding.stride);
                if available > 0 {
                    let (src, dst) = ctx.backend.map_read_write(id, allocation.buffer)?;
                    replicate_with_divisor(
                        &conversion,
                        &src[offset as usize..],
                        src_stride,
                        available as usize,
                        divisor,
                        &mut dst[start..end],
                        robust,
                    );
                    ctx.backend.flush(allocation.buffer, allocation.range())?;
                } else if robust {
                    write_allocation(&mut ctx.backend, &allocation, |dst| dst.fill(0))?;
                }
            }
            (None, Some(client)) => {
                let memory = client.memory.get(client.offset..).unwrap_or(&[]);
                let available = vertex_count_for_len(memory.len() as u64, format.byte_size(), source.binding.stride)
                    .min(draw.instance_count as u64);
                write_allocation(&mut ctx.backend, &allocation, |dst| {
                    replicate_with_divisor(&conversion, memory, src_stride, available as usize, divisor, dst, robust);
                })?;
            }
            (None, None) => {
                if robust {
                    write_allocation(&mut ctx.backend, &allocation, |dst| dst.fill(0))?;
                }
            }
        }

        ctx.stats.inc_divisor_emulations();
        return Ok(ResolvedVertexSource {
            buffer: allocation.buffer,
            byte_offset: allocation.byte_offset,
            stride: dst_stride as u32,
            format: dst_format,
            divisor: 1,
            kind: SourceKind::Streamed,
            pipeline_dirty: false,
        });
    }

    let Some(client) = source.client else {
        return Ok(empty);
    };

    // Per-instance client data starts at instance 0; per-vertex data at the first vertex.
    let (first, count) = if divisor > 0 {
        (0u64, (draw.instance_count as u64).div_ceil(divisor as u64))
    } else {
        (draw.first_vertex as u64, draw.vertex_count)
    };
    if count == 0 {
        return Ok(empty);
    }

    let read_start = client.offset as u64 + first * src_stride as u64;
    let read_end = read_start + (count - 1) * src_stride as u64 + format.byte_size() as u64;
    if read_end > client.memory.len() as u64 {
        return Err(out_of_bounds(read_end, client.memory.len()));
    }

    let allocation = ctx.allocate_streaming((first + count) * dst_stride)?;
    let dst_start = (first * dst_stride) as usize;
    let src = &client.memory[read_start as usize..read_end as usize];
    write_allocation(&mut ctx.backend, &allocation, |dst| {
        convert_vertices(&conversion, src, src_stride, count as usize, &mut dst[dst_start..]);
    })?;
    trace!(location = source.location, vertices = count, "streamed client attribute");

    Ok(ResolvedVertexSource {
        buffer: allocation.buffer,
        byte_offset: allocation.byte_offset,
        stride: dst_stride as u32,
        format: dst_format,
        divisor,
        kind: SourceKind::Streamed,
        pipeline_dirty: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: usize, start: u64, end: u64) -> MergeCandidate {
        MergeCandidate {
            source,
            memory: (0x1000, 256),
            start,
            end,
            copy_start: start,
        }
    }

    #[test]
    fn overlapping_ranges_merge_transitively() {
        let merged = merge_ranges(vec![
            candidate(0, 40, 60),
            candidate(1, 0, 20),
            candidate(2, 12, 40),
            candidate(3, 100, 120),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].start, merged[0].end), (0, 60));
        assert_eq!(merged[0].members.len(), 3);
        assert_eq!((merged[1].start, merged[1].end), (100, 120));
    }

    #[test]
    fn different_memory_never_merges() {
        let mut other = candidate(1, 0, 20);
        other.memory = (0x2000, 256);
        let merged = merge_ranges(vec![candidate(0, 0, 20), other]);
        assert_eq!(merged.len(), 2);
    }
}
