//! End-to-end draw recording against the host backend: attributes, indices and line loops for a
//! few frames, then teardown.

use aero_vertex_staging::{
    AttributeDescriptor, BindingDescriptor, ClientPointer, ComponentKind, DrawRange, HostBackend, IndexData,
    IndexFormat, IndexType, LineLoopDraw, SourceKind, StagingConfig, StagingContext, VertexArray, VertexFormat,
    VertexSource,
};
use pretty_assertions::assert_eq;

fn attribute(location: u32, format: VertexFormat, relative_offset: u32) -> AttributeDescriptor {
    AttributeDescriptor {
        enabled: true,
        format,
        relative_offset,
        binding_index: location,
    }
}

#[test]
fn quad_frames_reuse_conversions_and_index_cache() {
    let config = StagingConfig::default();
    let mut ctx = StagingContext::new(HostBackend::default(), config).unwrap();
    let mut vao = VertexArray::new(&config);

    // Four corners: float32x2 position followed by an unorm8x3 color, 12-byte stride.
    let mut vertices = Vec::new();
    for (i, (x, y)) in [(-1.0f32, -1.0f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)].into_iter().enumerate() {
        vertices.extend_from_slice(&x.to_le_bytes());
        vertices.extend_from_slice(&y.to_le_bytes());
        vertices.extend_from_slice(&[(i * 80) as u8, 255, 0, 0]);
    }
    let vbo = ctx.create_buffer_with_data(&vertices).unwrap();
    let binding = BindingDescriptor {
        buffer: Some(vbo),
        offset: 0,
        stride: 12,
        divisor: 0,
    };
    let sources = [
        VertexSource {
            location: 0,
            attrib: attribute(0, VertexFormat::FLOAT32X2, 0),
            binding,
            client: None,
        },
        VertexSource {
            location: 1,
            attrib: attribute(1, VertexFormat::vector(ComponentKind::Unorm8, 3), 8),
            binding,
            client: None,
        },
    ];
    let quad: Vec<u8> = [0u16, 1, 2, 2, 3, 0].iter().flat_map(|v| v.to_le_bytes()).collect();
    let draw = DrawRange::from_indices(IndexType::U16, &quad, 6, false, 1).unwrap();
    assert_eq!(draw, DrawRange::arrays(0, 4, 1));

    let mut index_buffers = Vec::new();
    for frame in 0..4 {
        let resolved = vao.resolve_vertex_sources(&mut ctx, &sources, &draw).unwrap();
        assert_eq!(resolved[0].kind, SourceKind::PassThrough);
        assert_eq!(resolved[1].kind, SourceKind::Converted);
        assert_eq!(resolved[1].format, VertexFormat::FLOAT32X3);
        assert_eq!(resolved.iter().any(|r| r.pipeline_dirty), frame == 0);

        let index = vao
            .resolve_index_source(&mut ctx, IndexType::U16, 6, IndexData::Client(&quad), false)
            .unwrap();
        assert_eq!(index.format, IndexFormat::Uint16);
        index_buffers.push(index.buffer);

        ctx.begin_frame();
    }
    assert!(index_buffers.windows(2).all(|w| w[0] == w[1]));

    let stats = ctx.stats().snapshot();
    assert_eq!(stats.conversion_cache_misses, 1);
    assert_eq!(stats.gpu_conversion_submissions, 1);
    assert_eq!(stats.index_cache_misses, 1);
    assert_eq!(stats.index_cache_hits, 3);
    assert_eq!(ctx.streaming_generation(), 4);

    let json = stats.to_json();
    assert!(json.contains("\"index_cache_hits\":3"), "{json}");

    vao.release(&mut ctx);
    ctx.release();
    assert_eq!(ctx.backend().live_buffers(), 1);
}

#[test]
fn client_line_loop_with_widened_indices() {
    let config = StagingConfig::default();
    let mut ctx = StagingContext::new(HostBackend::default(), config).unwrap();
    let mut vao = VertexArray::new(&config);

    let positions: Vec<f32> = vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
    let memory: &[u8] = bytemuck::cast_slice(&positions);
    let source = VertexSource {
        location: 0,
        attrib: attribute(0, VertexFormat::FLOAT32X2, 0),
        binding: BindingDescriptor {
            buffer: None,
            offset: 0,
            stride: 8,
            divisor: 0,
        },
        client: Some(ClientPointer { memory, offset: 0 }),
    };
    let indices = [3u8, 2, 1, 0];
    let draw = DrawRange::from_indices(IndexType::U8, &indices, 4, false, 1).unwrap();
    let resolved = vao.resolve_vertex_source(&mut ctx, &source, &draw).unwrap();
    assert_eq!(resolved.kind, SourceKind::Streamed);

    let looped = vao
        .resolve_line_loop_indices(
            &mut ctx,
            LineLoopDraw::Elements {
                index_type: IndexType::U8,
                count: 4,
                data: IndexData::Client(&indices),
                primitive_restart: false,
            },
        )
        .unwrap();
    assert_eq!((looped.index_count, looped.format), (5, IndexFormat::Uint16));

    let start = looped.byte_offset as usize;
    let bytes = &ctx.backend().contents(looped.buffer).unwrap()[start..start + 10];
    let out: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    assert_eq!(out, vec![3, 2, 1, 0, 3]);
}
