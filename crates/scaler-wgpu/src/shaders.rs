//! WGSL shader assembly and the compiled-program cache.
//!
//! Every scaler stage draws one quad with one of a closed set of fragment
//! shaders. Sources are assembled from static snippets selected by
//! exhaustive matches over [`ShaderKind`], so adding a kind is a localized,
//! compile-time-checked change. Compiled programs are cached per
//! `(kind, swizzle)` and shared by reference across all executors built by
//! the same owner.

use std::collections::HashMap;
use std::rc::Rc;

use crate::yuv::{RGB_TO_U_WEIGHTS, RGB_TO_V_WEIGHTS, RGB_TO_Y_WEIGHTS};

/// Texel format used for every intermediate and output texture.
pub(crate) const RENDER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Resampling shader selected for one scaler stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// One linear tap; also the identity/crop pass.
    Bilinear,
    /// Two taps along one axis, spanning four texels.
    Bilinear2,
    /// Three taps along one axis, spanning six texels (2x-3x reductions).
    Bilinear3,
    /// Four taps along one axis, spanning eight texels.
    Bilinear4,
    /// Four taps in a 2x2 pattern for sub-2x reductions on both axes.
    Bilinear2x2,
    /// Four-tap Catmull-Rom filter along one axis for scale-to ops.
    BicubicUpscale,
    /// Eight-tap cubic kernel halving one axis.
    BicubicHalf1d,
    /// Packs four weighted dot-products into the channels of one texel.
    Planar,
    /// MRT pass writing packed luma and interleaved chroma together.
    YuvMrtPass1,
    /// MRT pass splitting interleaved chroma into packed U and V planes.
    YuvMrtPass2,
}

impl ShaderKind {
    /// Returns the human-readable name of this shader kind
    pub fn name(&self) -> &'static str {
        match self {
            ShaderKind::Bilinear => "bilinear",
            ShaderKind::Bilinear2 => "bilinear2",
            ShaderKind::Bilinear3 => "bilinear3",
            ShaderKind::Bilinear4 => "bilinear4",
            ShaderKind::Bilinear2x2 => "bilinear2x2",
            ShaderKind::BicubicUpscale => "bicubic_upscale",
            ShaderKind::BicubicHalf1d => "bicubic_half",
            ShaderKind::Planar => "planar",
            ShaderKind::YuvMrtPass1 => "yuv_mrt_pass1",
            ShaderKind::YuvMrtPass2 => "yuv_mrt_pass2",
        }
    }

    /// Number of color attachments a pass with this shader draws into.
    pub fn render_target_count(&self) -> u32 {
        match self {
            ShaderKind::YuvMrtPass1 | ShaderKind::YuvMrtPass2 => 2,
            _ => 1,
        }
    }
}

/// Bindings and uniform block shared by every shader variant, plus the quad
/// vertex stage. The fragment snippet for the selected kind is appended.
const SHADER_COMMON: &str = r#"
struct StageParams {
    // Normalized source subrectangle: origin in xy, size in zw.
    src_rect: vec4<f32>,
    // Footprint of one destination pixel in normalized source coordinates.
    footprint: vec2<f32>,
    // One source texel in normalized coordinates.
    texel: vec2<f32>,
    // (1, 0) to resample along X, (0, 1) along Y.
    axis: vec2<f32>,
    // 1.0 mirrors the source vertically.
    flip: f32,
    pad: f32,
    // Planar projection weights: rgb dot weights in xyz, bias in w.
    color_weights: vec4<f32>,
}

@group(0) @binding(0) var src_texture: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;
@group(0) @binding(2) var<uniform> params: StageParams;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    // Triangle-strip quad: (0,0) (1,0) (0,1) (1,1).
    let corner = vec2<f32>(f32(index & 1u), f32(index >> 1u));
    var out: VertexOutput;
    out.position = vec4<f32>(corner.x * 2.0 - 1.0, 1.0 - corner.y * 2.0, 0.0, 1.0);
    let v = mix(corner.y, 1.0 - corner.y, params.flip);
    out.uv = params.src_rect.xy + vec2<f32>(corner.x, v) * params.src_rect.zw;
    return out;
}
"#;

const SWIZZLE_IDENTITY: &str = r#"
fn apply_swizzle(color: vec4<f32>) -> vec4<f32> {
    return color;
}
"#;

const SWIZZLE_BGRA: &str = r#"
fn apply_swizzle(color: vec4<f32>) -> vec4<f32> {
    return color.bgra;
}
"#;

const FS_BILINEAR: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return apply_swizzle(textureSample(src_texture, src_sampler, in.uv));
}
"#;

// Taps sit on texel-pair boundaries so the linear filter averages each pair.
const FS_BILINEAR2: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let tap = params.axis * dot(params.footprint, params.axis) * 0.25;
    var acc = textureSample(src_texture, src_sampler, in.uv - tap);
    acc += textureSample(src_texture, src_sampler, in.uv + tap);
    return apply_swizzle(acc * 0.5);
}
"#;

const FS_BILINEAR3: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let tap = params.axis * dot(params.footprint, params.axis) / 3.0;
    var acc = textureSample(src_texture, src_sampler, in.uv);
    acc += textureSample(src_texture, src_sampler, in.uv - tap);
    acc += textureSample(src_texture, src_sampler, in.uv + tap);
    return apply_swizzle(acc / 3.0);
}
"#;

const FS_BILINEAR4: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let tap = params.axis * dot(params.footprint, params.axis) * 0.125;
    var acc = textureSample(src_texture, src_sampler, in.uv - tap * 3.0);
    acc += textureSample(src_texture, src_sampler, in.uv - tap);
    acc += textureSample(src_texture, src_sampler, in.uv + tap);
    acc += textureSample(src_texture, src_sampler, in.uv + tap * 3.0);
    return apply_swizzle(acc * 0.25);
}
"#;

const FS_BILINEAR2X2: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let quarter = params.footprint * 0.25;
    var acc = textureSample(src_texture, src_sampler, in.uv + vec2<f32>(-quarter.x, -quarter.y));
    acc += textureSample(src_texture, src_sampler, in.uv + vec2<f32>(quarter.x, -quarter.y));
    acc += textureSample(src_texture, src_sampler, in.uv + vec2<f32>(-quarter.x, quarter.y));
    acc += textureSample(src_texture, src_sampler, in.uv + quarter);
    return apply_swizzle(acc * 0.25);
}
"#;

// Catmull-Rom (a = -0.5) over the four texels straddling the sample point,
// applied along one axis only.
const FS_BICUBIC_UPSCALE: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = dot(params.texel, params.axis);
    let ortho = in.uv * (vec2<f32>(1.0) - params.axis);
    let coord = dot(in.uv, params.axis) / texel - 0.5;
    let base = floor(coord);
    let t = coord - base;
    let t2 = t * t;
    let t3 = t2 * t;
    let w0 = -0.5 * t3 + t2 - 0.5 * t;
    let w1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let w2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let w3 = 0.5 * t3 - 0.5 * t2;
    var acc = textureSample(src_texture, src_sampler, ortho + params.axis * ((base - 0.5) * texel)) * w0;
    acc += textureSample(src_texture, src_sampler, ortho + params.axis * ((base + 0.5) * texel)) * w1;
    acc += textureSample(src_texture, src_sampler, ortho + params.axis * ((base + 1.5) * texel)) * w2;
    acc += textureSample(src_texture, src_sampler, ortho + params.axis * ((base + 2.5) * texel)) * w3;
    return apply_swizzle(clamp(acc, vec4<f32>(0.0), vec4<f32>(1.0)));
}
"#;

// Fixed cubic kernel for an exact 2:1 reduction: symmetric taps at 0.5,
// 1.5, 2.5 and 3.5 input texels from the destination center.
const FS_BICUBIC_HALF_1D: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = dot(params.texel, params.axis);
    let ortho = in.uv * (vec2<f32>(1.0) - params.axis);
    let center = dot(in.uv, params.axis);
    let w = vec4<f32>(0.43359375, 0.11328125, -0.03515625, -0.01171875);
    var acc = (textureSample(src_texture, src_sampler, ortho + params.axis * (center - 0.5 * texel))
        + textureSample(src_texture, src_sampler, ortho + params.axis * (center + 0.5 * texel))) * w.x;
    acc += (textureSample(src_texture, src_sampler, ortho + params.axis * (center - 1.5 * texel))
        + textureSample(src_texture, src_sampler, ortho + params.axis * (center + 1.5 * texel))) * w.y;
    acc += (textureSample(src_texture, src_sampler, ortho + params.axis * (center - 2.5 * texel))
        + textureSample(src_texture, src_sampler, ortho + params.axis * (center + 2.5 * texel))) * w.z;
    acc += (textureSample(src_texture, src_sampler, ortho + params.axis * (center - 3.5 * texel))
        + textureSample(src_texture, src_sampler, ortho + params.axis * (center + 3.5 * texel))) * w.w;
    return apply_swizzle(clamp(acc, vec4<f32>(0.0), vec4<f32>(1.0)));
}
"#;

// One output texel packs the weighted projection of four consecutive
// horizontal samples; single-channel planes are not renderable everywhere,
// so the plane is emulated with a quarter-width RGBA texture. Channel order
// is positional, so the swizzle hook intentionally does not apply.
const FS_PLANAR: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let tap = vec2<f32>(params.footprint.x * 0.25, 0.0);
    let s0 = textureSample(src_texture, src_sampler, in.uv - tap * 1.5);
    let s1 = textureSample(src_texture, src_sampler, in.uv - tap * 0.5);
    let s2 = textureSample(src_texture, src_sampler, in.uv + tap * 0.5);
    let s3 = textureSample(src_texture, src_sampler, in.uv + tap * 1.5);
    let w = params.color_weights;
    return vec4<f32>(
        dot(s0.rgb, w.xyz) + w.w,
        dot(s1.rgb, w.xyz) + w.w,
        dot(s2.rgb, w.xyz) + w.w,
        dot(s3.rgb, w.xyz) + w.w,
    );
}
"#;

// First MRT pass: packed luma plus row-level interleaved chroma at full
// vertical resolution. The chroma taps sit on horizontal pair centers so
// each linear tap averages one pixel pair.
const FS_YUV_MRT_PASS1_TEMPLATE: &str = r#"
struct Pass1Output {
    @location(0) y_plane: vec4<f32>,
    @location(1) uv_interleaved: vec4<f32>,
}

@fragment
fn fs_main(in: VertexOutput) -> Pass1Output {
    let tap = vec2<f32>(params.footprint.x * 0.25, 0.0);
    let s0 = textureSample(src_texture, src_sampler, in.uv - tap * 1.5);
    let s1 = textureSample(src_texture, src_sampler, in.uv - tap * 0.5);
    let s2 = textureSample(src_texture, src_sampler, in.uv + tap * 0.5);
    let s3 = textureSample(src_texture, src_sampler, in.uv + tap * 1.5);
    let c0 = textureSample(src_texture, src_sampler, in.uv - tap);
    let c1 = textureSample(src_texture, src_sampler, in.uv + tap);
    var out: Pass1Output;
    out.y_plane = vec4<f32>(
        dot(s0.rgb, RGB_TO_Y.xyz) + RGB_TO_Y.w,
        dot(s1.rgb, RGB_TO_Y.xyz) + RGB_TO_Y.w,
        dot(s2.rgb, RGB_TO_Y.xyz) + RGB_TO_Y.w,
        dot(s3.rgb, RGB_TO_Y.xyz) + RGB_TO_Y.w,
    );
    out.uv_interleaved = vec4<f32>(
        dot(c0.rgb, RGB_TO_U.xyz) + RGB_TO_U.w,
        dot(c0.rgb, RGB_TO_V.xyz) + RGB_TO_V.w,
        dot(c1.rgb, RGB_TO_U.xyz) + RGB_TO_U.w,
        dot(c1.rgb, RGB_TO_V.xyz) + RGB_TO_V.w,
    );
    return out;
}
"#;

// Second MRT pass: splits the interleaved chroma texture into packed U and
// V planes at quarter 4:2:0 resolution. Source texels are read at their
// exact horizontal centers (no horizontal blending across unlike channels)
// while the vertical coordinate sits between two rows so the linear filter
// performs the row average.
const FS_YUV_MRT_PASS2: &str = r#"
struct Pass2Output {
    @location(0) u_plane: vec4<f32>,
    @location(1) v_plane: vec4<f32>,
}

@fragment
fn fs_main(in: VertexOutput) -> Pass2Output {
    let half_x = vec2<f32>(params.texel.x * 0.5, 0.0);
    let a = textureSample(src_texture, src_sampler, in.uv - half_x);
    let b = textureSample(src_texture, src_sampler, in.uv + half_x);
    var out: Pass2Output;
    out.u_plane = vec4<f32>(a.x, a.z, b.x, b.z);
    out.v_plane = vec4<f32>(a.y, a.w, b.y, b.w);
    return out;
}
"#;

fn weights_const(name: &str, weights: [f32; 4]) -> String {
    format!(
        "const {name} = vec4<f32>({:?}, {:?}, {:?}, {:?});\n",
        weights[0], weights[1], weights[2], weights[3]
    )
}

/// Assembles the complete WGSL source for one shader variant.
fn assemble_source(kind: ShaderKind, swizzle: bool) -> String {
    let mut source = String::from(SHADER_COMMON);
    source.push_str(if swizzle { SWIZZLE_BGRA } else { SWIZZLE_IDENTITY });
    match kind {
        ShaderKind::Bilinear => source.push_str(FS_BILINEAR),
        ShaderKind::Bilinear2 => source.push_str(FS_BILINEAR2),
        ShaderKind::Bilinear3 => source.push_str(FS_BILINEAR3),
        ShaderKind::Bilinear4 => source.push_str(FS_BILINEAR4),
        ShaderKind::Bilinear2x2 => source.push_str(FS_BILINEAR2X2),
        ShaderKind::BicubicUpscale => source.push_str(FS_BICUBIC_UPSCALE),
        ShaderKind::BicubicHalf1d => source.push_str(FS_BICUBIC_HALF_1D),
        ShaderKind::Planar => source.push_str(FS_PLANAR),
        ShaderKind::YuvMrtPass1 => {
            source.push_str(&weights_const("RGB_TO_Y", RGB_TO_Y_WEIGHTS));
            source.push_str(&weights_const("RGB_TO_U", RGB_TO_U_WEIGHTS));
            source.push_str(&weights_const("RGB_TO_V", RGB_TO_V_WEIGHTS));
            source.push_str(FS_YUV_MRT_PASS1_TEMPLATE);
        }
        ShaderKind::YuvMrtPass2 => source.push_str(FS_YUV_MRT_PASS2),
    }
    source
}

/// A compiled shader variant: render pipeline plus its bind group layout.
#[derive(Debug)]
pub(crate) struct ShaderProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

fn compile_program(device: &wgpu::Device, kind: ShaderKind, swizzle: bool) -> ShaderProgram {
    let source = assemble_source(kind, swizzle);
    tracing::debug!(shader = kind.name(), swizzle, "compiling scaler shader");

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kind.name()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(kind.name()),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(kind.name()),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let targets = vec![
        Some(wgpu::ColorTargetState {
            format: RENDER_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        });
        kind.render_target_count() as usize
    ];

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(kind.name()),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &targets,
        }),
        multiview: None,
        cache: None,
    });

    ShaderProgram {
        pipeline,
        bind_group_layout,
    }
}

/// Cache of compiled shader variants, keyed by `(kind, swizzle)`.
///
/// Programs are immutable once compiled; executors borrow them through
/// `Rc`, and the cache must outlive every executor that references it —
/// the pipeline-builder object owns it for exactly that reason.
pub(crate) struct ShaderCache {
    programs: HashMap<(ShaderKind, bool), Rc<ShaderProgram>>,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
        }
    }

    /// Returns the cached program for this variant, compiling on first use.
    pub fn get(&mut self, device: &wgpu::Device, kind: ShaderKind, swizzle: bool) -> Rc<ShaderProgram> {
        if let Some(program) = self.programs.get(&(kind, swizzle)) {
            return Rc::clone(program);
        }
        let program = Rc::new(compile_program(device, kind, swizzle));
        self.programs.insert((kind, swizzle), Rc::clone(&program));
        program
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.programs.len()
    }
}
