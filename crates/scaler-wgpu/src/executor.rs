//! Stage execution: binding compiled stage lists to GPU resources and
//! recording their draws.
//!
//! A [`ScalerExecutor`] holds its stages as a flat vector executed in index
//! order; stage `i`'s input is either the external source (for `i == 0`) or
//! stage `i - 1`'s intermediate texture. Each stage issues exactly one draw,
//! so the total draw count equals the stage count.

use std::rc::Rc;

use wgpu::util::DeviceExt;

use crate::geometry::Size;
use crate::shaders::{RENDER_FORMAT, ShaderCache, ShaderKind, ShaderProgram};
use crate::stages::ScalerStage;

/// Uniform block consumed by every shader variant. Layout must match the
/// `StageParams` struct in the WGSL prelude.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct StageParams {
    src_rect: [f32; 4],
    footprint: [f32; 2],
    texel: [f32; 2],
    axis: [f32; 2],
    flip: f32,
    pad: f32,
    color_weights: [f32; 4],
}

impl StageParams {
    fn for_stage(stage: &ScalerStage, color_weights: [f32; 4]) -> Self {
        let src_w = stage.src_size.width as f32;
        let src_h = stage.src_size.height as f32;
        let src_rect = [
            stage.src_subrect.x as f32 / src_w,
            stage.src_subrect.y as f32 / src_h,
            stage.src_subrect.width as f32 / src_w,
            stage.src_subrect.height as f32 / src_h,
        ];
        Self {
            src_rect,
            footprint: [
                src_rect[2] / stage.dst_size.width as f32,
                src_rect[3] / stage.dst_size.height as f32,
            ],
            texel: [1.0 / src_w, 1.0 / src_h],
            axis: if stage.scale_x { [1.0, 0.0] } else { [0.0, 1.0] },
            flip: if stage.vertically_flip { 1.0 } else { 0.0 },
            pad: 0.0,
            color_weights,
        }
    }
}

/// One bound stage: its compiled program, frozen uniforms, and the
/// intermediate output texture (absent on the final stage, which draws into
/// caller-provided views).
struct StageNode {
    stage: ScalerStage,
    program: Rc<ShaderProgram>,
    params: wgpu::Buffer,
    intermediate: Option<wgpu::TextureView>,
}

/// A bound, reusable scaling pass chain.
pub(crate) struct ScalerExecutor {
    stages: Vec<StageNode>,
    sampler: wgpu::Sampler,
    dst_size: Size,
}

impl ScalerExecutor {
    /// Binds a compiled stage list to GPU resources.
    pub fn new(device: &wgpu::Device, cache: &mut ShaderCache, stages: Vec<ScalerStage>) -> Self {
        Self::with_color_weights(device, cache, stages, [0.0; 4])
    }

    /// Binds a stage list whose planar stages project through
    /// `color_weights`.
    pub fn with_color_weights(device: &wgpu::Device, cache: &mut ShaderCache, stages: Vec<ScalerStage>, color_weights: [f32; 4]) -> Self {
        assert!(!stages.is_empty(), "a scaler needs at least one stage");
        let dst_size = stages.last().expect("non-empty").dst_size;

        let last = stages.len() - 1;
        let nodes = stages
            .into_iter()
            .enumerate()
            .map(|(index, stage)| {
                let program = cache.get(device, stage.shader, stage.swizzle);
                let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(stage.shader.name()),
                    contents: bytemuck::bytes_of(&StageParams::for_stage(&stage, color_weights)),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                let intermediate = (index < last).then(|| {
                    create_texture(
                        device,
                        stage.dst_size,
                        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
                    )
                    .create_view(&wgpu::TextureViewDescriptor::default())
                });
                StageNode {
                    stage,
                    program,
                    params,
                    intermediate,
                }
            })
            .collect();

        // Scaling correctness depends on linear filtering with edge clamping;
        // the chain never inherits sampler state from the caller.
        let sampler = create_sampler(device);

        Self {
            stages: nodes,
            sampler,
            dst_size,
        }
    }

    pub fn dst_size(&self) -> Size {
        self.dst_size
    }

    /// The final stage's shader kind, which fixes how many destination views
    /// [`encode`](Self::encode) expects.
    pub fn output_shader(&self) -> ShaderKind {
        self.stages.last().expect("non-empty").stage.shader
    }

    /// Records one draw per stage into `encoder`. The final stage draws into
    /// `dst_views`; MRT kinds take two views, all others exactly one.
    pub fn encode(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, src_view: &wgpu::TextureView, dst_views: &[&wgpu::TextureView]) {
        debug_assert_eq!(dst_views.len() as u32, self.output_shader().render_target_count());

        let mut input = src_view;
        for (index, node) in self.stages.iter().enumerate() {
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(node.stage.shader.name()),
                layout: &node.program.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(input),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: node.params.as_entire_binding(),
                    },
                ],
            });

            let targets: Vec<&wgpu::TextureView> = match &node.intermediate {
                Some(view) => vec![view],
                None => dst_views.to_vec(),
            };
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = targets
                .iter()
                .map(|view| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(node.stage.shader.name()),
                color_attachments: &color_attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&node.program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            // The quad covering the destination viewport; the one draw this
            // stage contributes.
            pass.draw(0..4, 0..1);
            drop(pass);

            if let Some(view) = &node.intermediate {
                debug_assert!(index < self.stages.len() - 1);
                input = view;
            }
        }
    }

    /// Convenience wrapper: records into a fresh encoder and submits it.
    pub fn execute(&self, device: &wgpu::Device, queue: &wgpu::Queue, src_view: &wgpu::TextureView, dst_views: &[&wgpu::TextureView]) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("scaler chain"),
        });
        self.encode(device, &mut encoder, src_view, dst_views);
        queue.submit(std::iter::once(encoder.finish()));
    }
}

/// Creates a 2D RGBA8 texture of `size` with the given usage flags.
pub(crate) fn create_texture(device: &wgpu::Device, size: Size, usage: wgpu::TextureUsages) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("scaler texture"),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: RENDER_FORMAT,
        usage,
        view_formats: &[],
    })
}

/// Creates the linear clamp-to-edge sampler every stage samples through.
pub(crate) fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("scaler sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        lod_min_clamp: 0.0,
        lod_max_clamp: 0.0,
        compare: None,
        anisotropy_clamp: 1,
        border_color: None,
    })
}
