mod common;

use aero_vertex_staging::{
    AttribSyncState, AttributeDescriptor, BindingDescriptor, BufferHandle, ClientPointer, ComponentKind,
    DrawRange, IndexType, SourceKind, StagingConfig, StagingError, VertexFormat, VertexSource,
};
use pretty_assertions::assert_eq;

fn buffered(location: u32, handle: BufferHandle, format: VertexFormat, offset: u32, stride: u32) -> VertexSource<'static> {
    VertexSource {
        location,
        attrib: AttributeDescriptor {
            enabled: true,
            format,
            relative_offset: offset,
            binding_index: location,
        },
        binding: BindingDescriptor {
            buffer: Some(handle),
            offset: 0,
            stride,
            divisor: 0,
        },
        client: None,
    }
}

fn client(location: u32, memory: &[u8], format: VertexFormat, offset: usize, stride: u32) -> VertexSource<'_> {
    VertexSource {
        location,
        attrib: AttributeDescriptor {
            enabled: true,
            format,
            relative_offset: 0,
            binding_index: location,
        },
        binding: BindingDescriptor {
            buffer: None,
            offset: 0,
            stride,
            divisor: 0,
        },
        client: Some(ClientPointer { memory, offset }),
    }
}

fn rgb8() -> VertexFormat {
    VertexFormat::vector(ComponentKind::Unorm8, 3)
}

#[test]
fn conversion_runs_once_until_the_source_changes() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let handle = ctx
        .create_buffer_with_data(&[255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255])
        .unwrap();
    let source = buffered(0, handle, rgb8(), 0, 3);
    let draw = DrawRange::arrays(0, 4, 1);

    let first = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();
    assert_eq!(first.kind, SourceKind::Converted);
    assert_eq!(first.format, VertexFormat::FLOAT32X3);
    assert_eq!(first.stride, 12);
    assert!(first.pipeline_dirty);

    let second = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();
    assert_eq!(second.buffer, first.buffer);
    assert!(!second.pipeline_dirty);
    assert_eq!(ctx.backend().counters().vertex_conversion_submissions, 1);

    ctx.buffer_sub_data(handle, 3, &[0, 0, 0]).unwrap();
    let third = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();
    assert_eq!(ctx.backend().counters().vertex_conversion_submissions, 2);
    assert_eq!(
        common::f32s(&common::host_bytes(&ctx, third.buffer, third.byte_offset, 48)),
        vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]
    );

    let stats = ctx.stats().snapshot();
    assert_eq!(stats.conversion_cache_misses, 1);
    assert_eq!(stats.conversion_cache_hits, 2);
    assert_eq!(stats.gpu_conversion_submissions, 2);
}

#[test]
fn disjoint_writes_share_one_submission() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let handle = ctx.create_buffer(32).unwrap();
    let source = buffered(0, handle, rgb8(), 0, 4);
    let draw = DrawRange::arrays(0, 8, 1);
    vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();

    ctx.buffer_sub_data(handle, 4, &[255, 255, 255]).unwrap();
    ctx.buffer_sub_data(handle, 24, &[0, 255, 0]).unwrap();
    let resolved = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();

    let counters = ctx.backend().counters();
    assert_eq!(counters.vertex_conversion_submissions, 2);
    assert_eq!(counters.vertex_conversion_ranges, 3);
    assert_eq!(ctx.stats().snapshot().gpu_conversion_ranges, 3);

    let floats = common::f32s(&common::host_bytes(&ctx, resolved.buffer, 0, 96));
    assert_eq!(&floats[3..6], &[1.0, 1.0, 1.0]);
    assert_eq!(&floats[18..21], &[0.0, 1.0, 0.0]);
    assert!(floats[6..18].iter().all(|&v| v == 0.0));
}

#[test]
fn unaligned_data_falls_back_to_the_host() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let mut data = vec![0u8; 2];
    for v in [1.0f32, 2.0, 3.0, 4.0] {
        data.extend_from_slice(&v.to_le_bytes());
    }
    let handle = ctx.create_buffer_with_data(&data).unwrap();
    let source = buffered(0, handle, VertexFormat::FLOAT32X2, 2, 8);

    let resolved = vao
        .resolve_vertex_source(&mut ctx, &source, &DrawRange::arrays(0, 2, 1))
        .unwrap();
    assert_eq!(resolved.kind, SourceKind::Converted);
    assert_eq!((resolved.format, resolved.stride), (VertexFormat::FLOAT32X2, 8));
    assert_eq!(
        common::f32s(&common::host_bytes(&ctx, resolved.buffer, resolved.byte_offset, 16)),
        vec![1.0, 2.0, 3.0, 4.0]
    );

    let stats = ctx.stats().snapshot();
    assert_eq!(stats.cpu_fallback_conversions, 1);
    assert_eq!(stats.cpu_conversions, 1);
    assert_eq!(ctx.backend().counters().vertex_conversion_submissions, 0);
}

#[test]
fn aligned_native_attributes_pass_through() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let handle = ctx.create_buffer(64).unwrap();
    let source = buffered(0, handle, VertexFormat::FLOAT32X3, 4, 16);

    let resolved = vao
        .resolve_vertex_source(&mut ctx, &source, &DrawRange::arrays(0, 4, 1))
        .unwrap();
    assert_eq!(resolved.kind, SourceKind::PassThrough);
    assert_eq!(resolved.buffer, ctx.buffer(handle).unwrap().id());
    assert_eq!(resolved.byte_offset, 4);
    assert_eq!(ctx.stats().snapshot().conversion_cache_misses, 0);
}

#[test]
fn interleaved_client_attributes_share_one_allocation() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let words: Vec<u32> = (0..9).map(|i| 0x0101_0101 * i).collect();
    let memory: &[u8] = bytemuck::cast_slice(&words);
    let rgba8 = VertexFormat::vector(ComponentKind::Unorm8, 4);
    let sources = [
        client(0, memory, VertexFormat::FLOAT32X2, 0, 12),
        client(1, memory, rgba8, 8, 12),
    ];

    let resolved = vao
        .resolve_vertex_sources(&mut ctx, &sources, &DrawRange::arrays(0, 3, 1))
        .unwrap();
    assert_eq!(resolved[0].kind, SourceKind::Streamed);
    assert_eq!(resolved[0].buffer, resolved[1].buffer);
    assert_eq!(resolved[1].byte_offset - resolved[0].byte_offset, 8);
    assert_eq!((resolved[0].stride, resolved[1].stride), (12, 12));
    assert_eq!(
        common::host_bytes(&ctx, resolved[0].buffer, resolved[0].byte_offset, 36),
        memory.to_vec()
    );
    assert_eq!(ctx.stats().snapshot().merged_attribute_groups, 1);
}

#[test]
fn unmerged_client_attributes_are_packed_separately() {
    let config = StagingConfig {
        merge_client_attribs: false,
        ..StagingConfig::default()
    };
    let (mut ctx, mut vao) = common::host_context(config);
    let words: Vec<u32> = (0..9).collect();
    let memory: &[u8] = bytemuck::cast_slice(&words);
    let sources = [
        client(0, memory, VertexFormat::FLOAT32X2, 0, 12),
        client(1, memory, VertexFormat::FLOAT32, 8, 12),
    ];

    let resolved = vao
        .resolve_vertex_sources(&mut ctx, &sources, &DrawRange::arrays(1, 2, 1))
        .unwrap();
    assert_eq!((resolved[0].stride, resolved[1].stride), (8, 4));
    // Per-vertex data is placed so that the first vertex index addresses it directly.
    assert_eq!(
        common::u32s(&common::host_bytes(&ctx, resolved[1].buffer, resolved[1].byte_offset + 4, 8)),
        vec![5, 8]
    );
    let stats = ctx.stats().snapshot();
    assert_eq!(stats.merged_attribute_groups, 0);
    assert_eq!(stats.streamed_bytes, 3 * 8 + 3 * 4);
}

#[test]
fn client_ranges_past_the_end_are_rejected() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let words = [0u32; 4];
    let memory: &[u8] = bytemuck::cast_slice(&words);
    let source = client(0, memory, VertexFormat::FLOAT32X3, 0, 12);

    let err = vao
        .resolve_vertex_source(&mut ctx, &source, &DrawRange::arrays(0, 2, 1))
        .unwrap_err();
    assert!(matches!(err, StagingError::ClientRangeOutOfBounds { required: 24, available: 16 }));
}

#[test]
fn full_range_u32_indices_still_bound_check_client_data() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let words = [0u32; 4];
    let memory: &[u8] = bytemuck::cast_slice(&words);
    let source = client(0, memory, VertexFormat::FLOAT32, 0, 4);

    let indices: Vec<u8> = [0u32, u32::MAX].iter().flat_map(|v| v.to_le_bytes()).collect();
    let draw = DrawRange::from_indices(IndexType::U32, &indices, 2, false, 1).unwrap();
    let err = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap_err();
    assert!(matches!(
        err,
        StagingError::ClientRangeOutOfBounds { required, available: 16 } if required == 4 << 32
    ));
}

#[test]
fn large_divisors_are_emulated_with_zero_filled_tail() {
    let config = StagingConfig {
        robust_access: true,
        ..StagingConfig::default()
    };
    let (mut ctx, mut vao) = common::host_context(config);
    let values: Vec<u32> = (0..7).map(|i| 100 + i).collect();
    let handle = ctx.create_buffer_with_data(bytemuck::cast_slice(&values)).unwrap();
    let mut source = buffered(0, handle, VertexFormat::vector(ComponentKind::Uint32, 1), 0, 4);
    source.binding.divisor = 3;

    let resolved = vao
        .resolve_vertex_source(&mut ctx, &source, &DrawRange::arrays(0, 3, 24))
        .unwrap();
    assert_eq!((resolved.kind, resolved.divisor, resolved.stride), (SourceKind::Streamed, 1, 4));

    let out = common::u32s(&common::host_bytes(&ctx, resolved.buffer, resolved.byte_offset, 24 * 4));
    for (i, &v) in out.iter().enumerate() {
        if i < 21 {
            assert_eq!(v, 100 + i as u32 / 3, "element {i}");
        } else {
            assert_eq!(v, 0, "element {i}");
        }
    }
    assert_eq!(ctx.stats().snapshot().divisor_emulations, 1);
}

#[test]
fn pipeline_dirty_follows_slot_state() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let handle = ctx.create_buffer(48).unwrap();
    let other = ctx.create_buffer(48).unwrap();
    let draw = DrawRange::arrays(0, 4, 1);

    assert!(vao.resolve_vertex_source(&mut ctx, &buffered(2, handle, VertexFormat::FLOAT32X3, 0, 12), &draw).unwrap().pipeline_dirty);
    assert_eq!(vao.attrib_state(2), AttribSyncState::Clean);

    vao.mark_buffer_rebound(2);
    assert_eq!(vao.attrib_state(2), AttribSyncState::BufferSwapped);
    let rebound = vao.resolve_vertex_source(&mut ctx, &buffered(2, other, VertexFormat::FLOAT32X3, 0, 12), &draw).unwrap();
    assert!(!rebound.pipeline_dirty);

    vao.mark_respecified(2);
    let respecified = vao.resolve_vertex_source(&mut ctx, &buffered(2, other, VertexFormat::FLOAT32X3, 0, 12), &draw).unwrap();
    assert!(respecified.pipeline_dirty);

    // Converted data that lands in the same layout needs no pipeline change.
    let converted = vao.resolve_vertex_source(&mut ctx, &buffered(2, other, rgb8(), 0, 12), &draw).unwrap();
    assert_eq!(converted.kind, SourceKind::Converted);
    assert!(!converted.pipeline_dirty);

    let narrowed = vao.resolve_vertex_source(&mut ctx, &buffered(2, other, VertexFormat::FLOAT32X2, 0, 12), &draw).unwrap();
    assert!(narrowed.pipeline_dirty);
}

#[test]
fn disabled_attributes_use_the_empty_buffer() {
    let (mut ctx, mut vao) = common::host_context(StagingConfig::default());
    let handle = ctx.create_buffer(16).unwrap();
    let mut source = buffered(0, handle, VertexFormat::FLOAT32X4, 0, 16);
    source.attrib.enabled = false;

    let resolved = vao
        .resolve_vertex_source(&mut ctx, &source, &DrawRange::arrays(0, 1, 1))
        .unwrap();
    assert_eq!(resolved.kind, SourceKind::Empty);
    assert_eq!(resolved.buffer, ctx.empty_buffer());

    let mut value = [0u8; 16];
    value[..4].copy_from_slice(&1.0f32.to_le_bytes());
    let current = vao
        .resolve_default_attribute(&mut ctx, 0, VertexFormat::FLOAT32X4, value)
        .unwrap();
    assert_eq!(current.stride, 0);
    assert_eq!(common::host_bytes(&ctx, current.buffer, current.byte_offset, 16), value.to_vec());
}

#[test]
fn least_recently_used_conversion_is_evicted() {
    let config = StagingConfig {
        max_conversions_per_buffer: 1,
        ..StagingConfig::default()
    };
    let (mut ctx, mut vao) = common::host_context(config);
    let handle = ctx.create_buffer(48).unwrap();
    let draw = DrawRange::arrays(0, 4, 1);

    vao.resolve_vertex_source(&mut ctx, &buffered(0, handle, rgb8(), 0, 12), &draw).unwrap();
    let live = ctx.backend().live_buffers();
    let half3 = VertexFormat::vector(ComponentKind::Float16, 3);
    vao.resolve_vertex_source(&mut ctx, &buffered(0, handle, half3, 0, 12), &draw).unwrap();

    assert_eq!(ctx.backend().live_buffers(), live);
    let object = ctx.buffer(handle).unwrap();
    assert_eq!(object.conversions().len(), 1);
    assert_eq!(ctx.stats().snapshot().conversion_cache_evictions, 1);
}
