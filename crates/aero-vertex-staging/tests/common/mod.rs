//! Shared helpers for `aero-vertex-staging` integration tests.

#![allow(dead_code)]

use aero_vertex_staging::{BufferId, HostBackend, StagingConfig, StagingContext, VertexArray};

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("AERO_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("AERO_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

/// Routes `tracing` output through the test harness so it only shows for failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn host_context(config: StagingConfig) -> (StagingContext<HostBackend>, VertexArray) {
    init_tracing();
    let vao = VertexArray::new(&config);
    let ctx = StagingContext::new(HostBackend::default(), config).expect("host context");
    (ctx, vao)
}

pub fn host_bytes(ctx: &StagingContext<HostBackend>, buffer: BufferId, offset: u64, len: usize) -> Vec<u8> {
    let start = offset as usize;
    ctx.backend().contents(buffer).expect("live buffer")[start..start + len].to_vec()
}

pub fn f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn u16s(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect()
}
