use std::num::NonZeroU64;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use futures_intrusive::channel::shared::oneshot_channel;
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::backend::{
    assert_conversion_fits, assert_widening_fits, BackendCaps, BufferDesc, BufferId, BufferUsages,
    GpuIndexWidening, GpuVertexConversion, StagingBackend,
};
use crate::buffer_arena::{align_down, align_up};
use crate::dirty_range::ByteRange;
use crate::error::{Result, StagingError};
use crate::format::{ComponentKind, PackedKind, VertexFormat};
use crate::format_map::TargetCaps;

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS_PER_DIM: u32 = 65535;

// Kind codes must match `kind_code`.
const VERTEX_CONVERT_WGSL: &str = r#"
struct Params {
    src_offset: u32,
    src_stride: u32,
    dst_offset: u32,
    vertex_count: u32,
    component_count: u32,
    component_bytes: u32,
    kind: u32,
    _pad: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> src: array<u32>;
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;

fn load_bits(addr: u32, bytes: u32) -> u32 {
    let word = src[addr >> 2u];
    if (bytes == 4u) {
        return word;
    }
    let shift = (addr & 3u) * 8u;
    let mask = (1u << (bytes * 8u)) - 1u;
    return (word >> shift) & mask;
}

fn sign_extend(v: u32, bits: u32) -> i32 {
    let shift = 32u - bits;
    return bitcast<i32>(v << shift) >> shift;
}

fn snorm_to_f32(v: u32, bits: u32) -> f32 {
    let max_value = f32((1u << (bits - 1u)) - 1u);
    return max(f32(sign_extend(v, bits)) / max_value, -1.0);
}

fn convert_component(bits: u32, kind: u32) -> u32 {
    var out = bits;
    switch kind {
        case 1u: {
            out = bitcast<u32>(sign_extend(bits, 8u));
        }
        case 7u: {
            out = bitcast<u32>(sign_extend(bits, 16u));
        }
        case 2u: {
            out = bitcast<u32>(f32(bits) / 255.0);
        }
        case 8u: {
            out = bitcast<u32>(f32(bits) / 65535.0);
        }
        case 3u: {
            out = bitcast<u32>(snorm_to_f32(bits, 8u));
        }
        case 9u: {
            out = bitcast<u32>(snorm_to_f32(bits, 16u));
        }
        case 4u, 10u: {
            out = bitcast<u32>(f32(bits));
        }
        case 5u: {
            out = bitcast<u32>(f32(sign_extend(bits, 8u)));
        }
        case 11u: {
            out = bitcast<u32>(f32(sign_extend(bits, 16u)));
        }
        case 14u: {
            out = bitcast<u32>(unpack2x16float(bits).x);
        }
        case 16u: {
            out = bitcast<u32>(f32(bitcast<i32>(bits)) / 65536.0);
        }
        default: {
            // Uint8/16/32, Sint32 and Float32 are raw bits.
        }
    }
    return out;
}

fn convert_packed_lane(word: u32, lane: u32, kind: u32) -> u32 {
    var bits = 10u;
    if (lane == 3u) {
        bits = 2u;
    }
    let v = (word >> (lane * 10u)) & ((1u << bits) - 1u);
    var out = v;
    switch kind {
        case 32u: {
            out = bitcast<u32>(f32(v) / f32((1u << bits) - 1u));
        }
        case 33u: {
            out = bitcast<u32>(snorm_to_f32(v, bits));
        }
        case 35u: {
            out = bitcast<u32>(sign_extend(v, bits));
        }
        case 36u: {
            out = bitcast<u32>(f32(v));
        }
        case 37u: {
            out = bitcast<u32>(f32(sign_extend(v, bits)));
        }
        default: {
            // Uint lanes are raw bits.
        }
    }
    return out;
}

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {
    let vertex = gid.x + gid.y * groups.x * 64u;
    if (vertex >= params.vertex_count) {
        return;
    }

    let src_base = params.src_offset + vertex * params.src_stride;
    let dst_base = (params.dst_offset >> 2u) + vertex * params.component_count;

    if (params.kind >= 32u) {
        let word = src[src_base >> 2u];
        for (var lane = 0u; lane < 4u; lane = lane + 1u) {
            dst[dst_base + lane] = convert_packed_lane(word, lane, params.kind);
        }
        return;
    }

    for (var c = 0u; c < params.component_count; c = c + 1u) {
        let bits = load_bits(src_base + c * params.component_bytes, params.component_bytes);
        dst[dst_base + c] = convert_component(bits, params.kind);
    }
}
"#;

const INDEX_WIDEN_WGSL: &str = r#"
struct Params {
    src_offset: u32,
    dst_offset: u32,
    index_count: u32,
    primitive_restart: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> src: array<u32>;
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;

fn load_index(i: u32) -> u32 {
    let addr = params.src_offset + i;
    let v = (src[addr >> 2u] >> ((addr & 3u) * 8u)) & 0xffu;
    if (params.primitive_restart != 0u && v == 0xffu) {
        return 0xffffu;
    }
    return v;
}

@compute @workgroup_size(64)
fn cs_main(@builtin(global_invocation_id) gid: vec3<u32>, @builtin(num_workgroups) groups: vec3<u32>) {
    let pair = gid.x + gid.y * groups.x * 64u;
    let first = pair * 2u;
    if (first >= params.index_count) {
        return;
    }

    let lo = load_index(first);
    var hi = 0u;
    if (first + 1u < params.index_count) {
        hi = load_index(first + 1u);
    }
    dst[(params.dst_offset >> 2u) + pair] = lo | (hi << 16u);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VertexConvertParams {
    src_offset: u32,
    src_stride: u32,
    dst_offset: u32,
    vertex_count: u32,
    component_count: u32,
    component_bytes: u32,
    kind: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct IndexWidenParams {
    src_offset: u32,
    dst_offset: u32,
    index_count: u32,
    primitive_restart: u32,
}

fn kind_code(format: VertexFormat) -> u32 {
    use ComponentKind::*;
    match format {
        VertexFormat::Vector { kind, .. } => match kind {
            Uint8 => 0,
            Sint8 => 1,
            Unorm8 => 2,
            Snorm8 => 3,
            Uscaled8 => 4,
            Sscaled8 => 5,
            Uint16 => 6,
            Sint16 => 7,
            Unorm16 => 8,
            Snorm16 => 9,
            Uscaled16 => 10,
            Sscaled16 => 11,
            Uint32 => 12,
            Sint32 => 13,
            Float16 => 14,
            Float32 => 15,
            Fixed32 => 16,
        },
        VertexFormat::Packed1010102(kind) => match kind {
            PackedKind::Unorm => 32,
            PackedKind::Snorm => 33,
            PackedKind::Uint => 34,
            PackedKind::Sint => 35,
            PackedKind::Uscaled => 36,
            PackedKind::Sscaled => 37,
        },
    }
}

fn dispatch_size(items: u32) -> (u32, u32) {
    let groups = items.div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= MAX_WORKGROUPS_PER_DIM {
        (groups, 1)
    } else {
        (MAX_WORKGROUPS_PER_DIM, groups.div_ceil(MAX_WORKGROUPS_PER_DIM))
    }
}

fn to_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or_else(|_| panic!("offset {value} does not fit a shader parameter"))
}

struct ConversionPipelines {
    bind_group_layout: wgpu::BindGroupLayout,
    vertex: wgpu::ComputePipeline,
    index: wgpu::ComputePipeline,
}

impl ConversionPipelines {
    fn new(device: &wgpu::Device) -> Self {
        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("aero-vertex-staging-convert-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("aero-vertex-staging-convert-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, source: &str| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module: &module,
                entry_point: "cs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })
        };

        Self {
            vertex: pipeline("aero-vertex-staging-convert-vertices", VERTEX_CONVERT_WGSL),
            index: pipeline("aero-vertex-staging-widen-indices", INDEX_WIDEN_WGSL),
            bind_group_layout,
        }
    }
}

struct WgpuBuffer {
    buffer: Arc<wgpu::Buffer>,
    /// Host copy of everything written through the map calls.
    shadow: Vec<u8>,
    size: u64,
}

/// `wgpu` device backend.
///
/// Host mapping is served from a per-buffer shadow copy; `flush` uploads the flushed range with
/// `queue.write_buffer`, which orders it before the next submission. Device-written contents
/// (conversion destinations) are not reflected in the shadow; use [`WgpuBackend::read_buffer`].
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: BackendCaps,
    pipelines: Option<ConversionPipelines>,
    uniform_alignment: u64,
    buffers: Vec<Option<WgpuBuffer>>,
    free: Vec<u32>,
}

impl WgpuBackend {
    /// Wraps an existing device. `compute` says whether the adapter supports compute shaders.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, compute: bool) -> Self {
        let limits = device.limits();
        let pipelines = compute.then(|| ConversionPipelines::new(&device));
        Self {
            caps: BackendCaps {
                formats: TargetCaps::webgpu(),
                gpu_conversion: pipelines.is_some(),
                max_buffer_size: limits.max_buffer_size,
            },
            uniform_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            device,
            queue,
            pipelines,
            buffers: Vec::new(),
            free: Vec::new(),
        }
    }

    pub async fn new_headless() -> Result<Self> {
        // Prefer GL on Linux CI to avoid crashes in some Vulkan software adapters.
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: if cfg!(target_os = "linux") {
                wgpu::Backends::GL
            } else {
                wgpu::Backends::all()
            },
            ..Default::default()
        });
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(adapter) => adapter,
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok_or(StagingError::AdapterNotFound)?,
        };

        let downlevel_flags = adapter.get_downlevel_capabilities().flags;
        let compute = downlevel_flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        let required_limits = if compute {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        }
        .using_resolution(adapter.limits());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("aero-vertex-staging-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| StagingError::RequestDevice(e.to_string()))?;

        debug!(backend = ?adapter.get_info().backend, compute, "aero-vertex-staging created wgpu device");
        Ok(Self::from_device(device, queue, compute))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The `wgpu` buffer to bind for a draw.
    pub fn wgpu_buffer(&self, id: BufferId) -> Option<Arc<wgpu::Buffer>> {
        self.slot(id).ok().map(|b| Arc::clone(&b.buffer))
    }

    /// Copies a buffer's device contents back to the host.
    pub async fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>> {
        let source = self.slot(id)?;
        let padded = source.shadow.len() as u64;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aero-vertex-staging-readback"),
            size: padded,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aero-vertex-staging-readback-encoder"),
            });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &readback, 0, padded);
        self.queue.submit([encoder.finish()]);

        let slice = readback.slice(..);
        let (sender, receiver) = oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result.map_err(|e| e.to_string()));
        });

        #[cfg(not(target_arch = "wasm32"))]
        self.device.poll(wgpu::Maintain::Wait);

        #[cfg(target_arch = "wasm32")]
        self.device.poll(wgpu::Maintain::Poll);

        let mapped = receiver
            .receive()
            .await
            .ok_or(StagingError::MapAsyncDropped)?;
        mapped.map_err(StagingError::MapAsync)?;

        let data = slice.get_mapped_range();
        let out = data[..source.size as usize].to_vec();
        drop(data);
        readback.unmap();
        Ok(out)
    }

    fn slot(&self, id: BufferId) -> Result<&WgpuBuffer> {
        self.buffers
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(StagingError::UnknownBackendBuffer(id))
    }

    fn slot_mut(&mut self, id: BufferId) -> Result<&mut WgpuBuffer> {
        self.buffers
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(StagingError::UnknownBackendBuffer(id))
    }

    fn pipelines(&self) -> &ConversionPipelines {
        self.pipelines
            .as_ref()
            .unwrap_or_else(|| panic!("device-side conversion requested without compute support"))
    }

    /// Packs one parameter block per dispatch at the uniform offset alignment.
    fn params_buffer<P: Pod>(&self, params: &[P]) -> (wgpu::Buffer, u64) {
        let stride = align_up(std::mem::size_of::<P>() as u64, self.uniform_alignment);
        let mut bytes = vec![0u8; stride as usize * params.len()];
        for (i, p) in params.iter().enumerate() {
            let start = i * stride as usize;
            let raw = bytemuck::bytes_of(p);
            bytes[start..start + raw.len()].copy_from_slice(raw);
        }
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("aero-vertex-staging-params"),
            contents: &bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        (buffer, stride)
    }

    fn dispatch<P: Pod>(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        src: &wgpu::Buffer,
        dst: &wgpu::Buffer,
        params: &[(P, u32)],
    ) {
        let blocks: Vec<P> = params.iter().map(|(p, _)| *p).collect();
        let (uniform, stride) = self.params_buffer(&blocks);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.pipelines().bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &uniform,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<P>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: src.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: dst.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            for (i, (_, items)) in params.iter().enumerate() {
                let (x, y) = dispatch_size(*items);
                pass.set_bind_group(0, &bind_group, &[(i as u64 * stride) as u32]);
                pass.dispatch_workgroups(x, y, 1);
            }
        }
        self.queue.submit([encoder.finish()]);
    }
}

impl StagingBackend for WgpuBackend {
    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        if desc.size > self.caps.max_buffer_size {
            return Err(StagingError::BufferTooLarge {
                requested: desc.size,
                max: self.caps.max_buffer_size,
            });
        }
        let padded = align_up(desc.size.max(wgpu::COPY_BUFFER_ALIGNMENT), wgpu::COPY_BUFFER_ALIGNMENT);

        let mut usage = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        if desc.usage.contains(BufferUsages::VERTEX) {
            usage |= wgpu::BufferUsages::VERTEX;
        }
        if desc.usage.contains(BufferUsages::INDEX) {
            usage |= wgpu::BufferUsages::INDEX;
        }
        if desc.usage.contains(BufferUsages::STORAGE) && self.caps.gpu_conversion {
            usage |= wgpu::BufferUsages::STORAGE;
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label,
            size: padded,
            usage,
            mapped_at_creation: false,
        });
        let shadow_len = usize::try_from(padded).map_err(|_| StagingError::OutOfMemory { requested: padded })?;
        let entry = WgpuBuffer {
            buffer: Arc::new(buffer),
            shadow: vec![0; shadow_len],
            size: desc.size,
        };

        let id = match self.free.pop() {
            Some(index) => {
                self.buffers[index as usize] = Some(entry);
                index
            }
            None => {
                self.buffers.push(Some(entry));
                (self.buffers.len() - 1) as u32
            }
        };
        Ok(BufferId(id))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(slot) = self.buffers.get_mut(id.0 as usize) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }

    fn buffer_size(&self, id: BufferId) -> Option<u64> {
        self.slot(id).ok().map(|b| b.size)
    }

    fn map_read(&mut self, id: BufferId) -> Result<&[u8]> {
        let buffer = self.slot(id)?;
        Ok(&buffer.shadow[..buffer.size as usize])
    }

    fn map_write(&mut self, id: BufferId) -> Result<&mut [u8]> {
        let buffer = self.slot_mut(id)?;
        let size = buffer.size as usize;
        Ok(&mut buffer.shadow[..size])
    }

    fn map_read_write(&mut self, src: BufferId, dst: BufferId) -> Result<(&[u8], &mut [u8])> {
        assert_ne!(src, dst, "source and destination must be distinct buffers");
        self.slot(src)?;
        self.slot(dst)?;

        let (s, d) = (src.0 as usize, dst.0 as usize);
        let (src_buf, dst_buf) = if s < d {
            let (lo, hi) = self.buffers.split_at_mut(d);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.buffers.split_at_mut(s);
            (&hi[0], &mut lo[d])
        };
        match (src_buf.as_ref(), dst_buf.as_mut()) {
            (Some(src_buf), Some(dst_buf)) => {
                let dst_size = dst_buf.size as usize;
                Ok((&src_buf.shadow[..src_buf.size as usize], &mut dst_buf.shadow[..dst_size]))
            }
            _ => Err(StagingError::UnknownBackendBuffer(dst)),
        }
    }

    fn flush(&mut self, id: BufferId, range: ByteRange) -> Result<()> {
        let buffer = self.slot(id)?;
        let padded = buffer.shadow.len() as u64;
        let low = align_down(range.low, wgpu::COPY_BUFFER_ALIGNMENT).min(padded);
        let high = align_up(range.high, wgpu::COPY_BUFFER_ALIGNMENT).min(padded);
        if high > low {
            self.queue
                .write_buffer(&buffer.buffer, low, &buffer.shadow[low as usize..high as usize]);
        }
        Ok(())
    }

    fn convert_vertices(&mut self, op: &GpuVertexConversion<'_>) -> Result<()> {
        let src = self.slot(op.src)?;
        let dst = self.slot(op.dst)?;
        assert_conversion_fits(op, dst.size);

        let params: Vec<(VertexConvertParams, u32)> = op
            .ranges()
            .filter(|r| r.vertex_count > 0)
            .map(|r| {
                let params = VertexConvertParams {
                    src_offset: to_u32(r.src_offset),
                    src_stride: op.src_stride,
                    dst_offset: to_u32(r.dst_offset),
                    vertex_count: r.vertex_count,
                    component_count: op.dst_format.component_count(),
                    component_bytes: op.src_format.component_bytes(),
                    kind: kind_code(op.src_format),
                    _pad: 0,
                };
                (params, r.vertex_count)
            })
            .collect();
        if params.is_empty() {
            return Ok(());
        }

        self.dispatch(
            "aero-vertex-staging-convert-vertices",
            &self.pipelines().vertex,
            &src.buffer,
            &dst.buffer,
            &params,
        );
        Ok(())
    }

    fn widen_indices(&mut self, op: &GpuIndexWidening) -> Result<()> {
        let src = self.slot(op.src)?;
        let dst = self.slot(op.dst)?;
        assert_widening_fits(op, dst.size);
        if op.index_count == 0 {
            return Ok(());
        }

        let params = IndexWidenParams {
            src_offset: to_u32(op.src_offset),
            dst_offset: to_u32(op.dst_offset),
            index_count: op.index_count,
            primitive_restart: op.primitive_restart as u32,
        };
        self.dispatch(
            "aero-vertex-staging-widen-indices",
            &self.pipelines().index,
            &src.buffer,
            &dst.buffer,
            &[(params, op.index_count.div_ceil(2))],
        );
        Ok(())
    }
}
