#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use aero_vertex_staging::convert::{convert_vertices, replicate_with_divisor, widen_u8_indices, ElementConversion};
#[cfg(not(target_arch = "wasm32"))]
use aero_vertex_staging::dirty_range::{ByteRange, DirtyRanges};
#[cfg(not(target_arch = "wasm32"))]
use aero_vertex_staging::{ComponentKind, PackedKind, VertexFormat};
#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("AERO_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            // Keep PR runtime low.
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
const VERTICES: usize = 16 * 1024;

#[cfg(not(target_arch = "wasm32"))]
fn source_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_convert_vertices(c: &mut Criterion) {
    let cases = [
        ("unorm8x3", VertexFormat::vector(ComponentKind::Unorm8, 3), VertexFormat::FLOAT32X3, 4),
        ("snorm16x3", VertexFormat::vector(ComponentKind::Snorm16, 3), VertexFormat::FLOAT32X3, 8),
        ("float16x3", VertexFormat::vector(ComponentKind::Float16, 3), VertexFormat::FLOAT32X3, 6),
        ("packed_snorm", VertexFormat::Packed1010102(PackedKind::Snorm), VertexFormat::FLOAT32X4, 4),
        ("float32x3_copy", VertexFormat::FLOAT32X3, VertexFormat::FLOAT32X3, 12),
    ];

    let mut group = c.benchmark_group("convert_vertices");
    group.throughput(Throughput::Elements(VERTICES as u64));
    for (name, src, dst, stride) in cases {
        let conversion = ElementConversion::new(src, dst);
        let input = source_bytes(VERTICES * stride);
        let mut output = vec![0u8; VERTICES * dst.byte_size() as usize];
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                convert_vertices(&conversion, black_box(&input), stride, VERTICES, &mut output);
                black_box(output[0]);
            })
        });
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_divisor_and_indices(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_transforms");

    let format = VertexFormat::FLOAT32X4;
    let conversion = ElementConversion::new(format, format);
    let input = source_bytes(1024 * 16);
    let mut output = vec![0u8; VERTICES * 16];
    group.throughput(Throughput::Elements(VERTICES as u64));
    group.bench_function("replicate_divisor_16", |b| {
        b.iter(|| {
            let written = replicate_with_divisor(&conversion, black_box(&input), 16, 1024, 16, &mut output, true);
            black_box(written);
        })
    });

    let indices = source_bytes(VERTICES);
    let mut widened = vec![0u8; VERTICES * 2];
    group.bench_function("widen_u8_indices_restart", |b| {
        b.iter(|| {
            widen_u8_indices(black_box(&indices), &mut widened, true);
            black_box(widened[0]);
        })
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_dirty_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("dirty_ranges");
    for writes in [16u64, 256, 4096] {
        group.throughput(Throughput::Elements(writes));
        group.bench_with_input(BenchmarkId::new("consolidate", writes), &writes, |b, &writes| {
            b.iter(|| {
                let mut dirty = DirtyRanges::default();
                for i in 0..writes {
                    // Interleaved overlapping and disjoint writes.
                    let low = (i * 7919) % (writes * 16);
                    dirty.add(ByteRange::new(low, low + 24));
                }
                black_box(dirty.consolidate().len());
            })
        });
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_convert_vertices, bench_divisor_and_indices, bench_dirty_ranges
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
