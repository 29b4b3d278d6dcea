//! `aero-vertex-staging` stages vertex and index data for a WebGPU-class target.
//!
//! The target lacks several GL-era vertex features, so this crate provides:
//! - Per-buffer caches of converted vertex data, kept up to date from dirty byte ranges and
//!   converted on the device when the layout allows it (see [`StagingContext`]).
//! - Streaming of client-memory attributes, including merging of interleaved attributes and
//!   emulation of instance divisors the target cannot express (see [`VertexArray`]).
//! - 8-bit index widening with a small content cache for short index lists
//!   (see [`VertexArray::resolve_index_source`]).
//! - Line-loop index synthesis (see [`VertexArray::resolve_line_loop_indices`]).

mod buffer_arena;

pub mod backend;
pub mod buffer;
pub mod config;
pub mod context;
pub mod conversion_cache;
pub mod convert;
pub mod dirty_range;
pub mod draw;
pub mod error;
pub mod format;
pub mod format_map;
pub mod index;
pub mod line_loop;
pub mod stats;
pub mod streaming;
pub mod vertex_array;

pub use backend::{BackendCaps, BufferId, HostBackend, StagingBackend, WgpuBackend};
pub use buffer::{BufferChange, BufferHandle};
pub use config::StagingConfig;
pub use context::StagingContext;
pub use dirty_range::ByteRange;
pub use draw::DrawRange;
pub use error::{Result, StagingError};
pub use format::{ComponentKind, IndexFormat, IndexType, PackedKind, VertexFormat};
pub use format_map::TargetCaps;
pub use index::{IndexData, ResolvedIndexSource};
pub use line_loop::{LineLoopDraw, ResolvedLineLoop};
pub use stats::{StagingStats, StagingStatsSnapshot};
pub use vertex_array::{
    AttribEvent, AttribSyncState, AttributeDescriptor, BindingDescriptor, ClientPointer,
    ResolvedVertexSource, SourceKind, VertexArray, VertexSource,
};
