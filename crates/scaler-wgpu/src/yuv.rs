//! RGBA-to-planar-YUV conversion pipelines with asynchronous plane readback.
//!
//! Two interchangeable strategies produce the same 4:2:0 output. The 3-pass
//! strategy scales to the destination size, then runs three independent
//! planar projections (Y at full resolution, U and V at half resolution in
//! both axes). The 2-pass strategy uses multiple render targets to emit the
//! packed luma plane and an interleaved chroma intermediate in one draw,
//! then splits the chroma in a second; at fast quality it also folds the
//! initial crop/scale into the first pass and samples the source directly.
//!
//! Every plane is packed 4:1 horizontally: four consecutive plane samples
//! become the R, G, B and A channels of one output texel, so planes read
//! back as tightly packed byte rows.

use std::cell::RefCell;
use std::rc::Rc;

use crate::TextureScaler;
use crate::error::ScalerError;
use crate::executor::{ScalerExecutor, create_texture};
use crate::geometry::{Rect, Size};
use crate::shaders::ShaderKind;
use crate::stages::{Quality, ScalerStage, compute_scaler_stages};

/// RGB-to-luma projection: weights in xyz, bias in w.
/// `Y = 0.257 R + 0.504 G + 0.098 B + 0.0625`
pub const RGB_TO_Y_WEIGHTS: [f32; 4] = [0.257, 0.504, 0.098, 0.0625];
/// RGB-to-U projection: `U = -0.148 R - 0.291 G + 0.439 B + 0.5`
pub const RGB_TO_U_WEIGHTS: [f32; 4] = [-0.148, -0.291, 0.439, 0.5];
/// RGB-to-V projection: `V = 0.439 R - 0.368 G - 0.071 B + 0.5`
pub const RGB_TO_V_WEIGHTS: [f32; 4] = [0.439, -0.368, -0.071, 0.5];

/// Owned 4:2:0 plane buffers travelling through a readback request.
///
/// The pipeline writes into these buffers at the caller's strides and hands
/// them back through the completion callback.
#[derive(Debug)]
pub struct YuvPlanes {
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
}

impl YuvPlanes {
    /// Allocates zeroed planes for a frame of `frame_size` with tight
    /// strides.
    pub fn allocate(frame_size: Size) -> Self {
        let w = frame_size.width as usize;
        let h = frame_size.height as usize;
        let cw = frame_size.width.div_ceil(2) as usize;
        let ch = frame_size.height.div_ceil(2) as usize;
        Self {
            y: vec![0; w * h],
            u: vec![0; cw * ch],
            v: vec![0; cw * ch],
            y_stride: w,
            u_stride: cw,
            v_stride: cw,
        }
    }
}

/// Completion callback for a YUV readback.
pub type YuvCallback = Box<dyn FnOnce(bool, YuvPlanes)>;

/// Width of the packed plane texture holding `samples` plane samples.
fn packed_width(samples: u32) -> u32 {
    samples.div_ceil(4)
}

/// Checks the 4:2:0 paste contract: even paste coordinates and the pasted
/// region inside the target frame.
fn paste_is_valid(target_rect: Rect, dst_size: Size, paste_location: (u32, u32)) -> bool {
    let (px, py) = paste_location;
    if px % 2 != 0 || py % 2 != 0 {
        return false;
    }
    target_rect.contains_rect(&Rect::new(px, py, dst_size.width, dst_size.height))
}

/// Checks that each plane buffer can hold the pasted region at its stride.
fn planes_fit(planes: &YuvPlanes, dst_size: Size, paste_location: (u32, u32)) -> bool {
    let (px, py) = (paste_location.0 as usize, paste_location.1 as usize);
    let (w, h) = (dst_size.width as usize, dst_size.height as usize);
    let fits = |len: usize, stride: usize, x: usize, y: usize, rw: usize, rh: usize| rh == 0 || (y + rh - 1) * stride + x + rw <= len;
    fits(planes.y.len(), planes.y_stride, px, py, w, h)
        && fits(planes.u.len(), planes.u_stride, px / 2, py / 2, w / 2, h / 2)
        && fits(planes.v.len(), planes.v_stride, px / 2, py / 2, w / 2, h / 2)
}

enum Strategy {
    ThreePass {
        scaler: ScalerExecutor,
        y_pass: ScalerExecutor,
        u_pass: ScalerExecutor,
        v_pass: ScalerExecutor,
        rgba_view: wgpu::TextureView,
    },
    TwoPassMrt {
        /// Absent at fast quality, where pass 1 samples the source directly.
        scaler: Option<ScalerExecutor>,
        pass1: ScalerExecutor,
        pass2: ScalerExecutor,
        rgba_view: Option<wgpu::TextureView>,
        uv_view: wgpu::TextureView,
    },
}

/// A reusable crop/scale/convert pipeline producing 4:2:0 planes.
///
/// Built once per source/destination geometry and invoked any number of
/// times; the caller owns and destroys it explicitly.
pub struct YuvReadbackPipeline {
    dst_size: Size,
    strategy: Strategy,
    y_texture: wgpu::Texture,
    u_texture: wgpu::Texture,
    v_texture: wgpu::Texture,
}

impl YuvReadbackPipeline {
    pub(crate) fn new(
        scaler: &mut TextureScaler,
        quality: Quality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        vertically_flip: bool,
        use_mrt: bool,
    ) -> Result<Self, ScalerError> {
        if src_size.is_empty() || dst_size.is_empty() {
            return Err(ScalerError::EmptySize);
        }
        if !Rect::of_size(src_size).contains_rect(&src_subrect) {
            return Err(ScalerError::SubrectOutOfBounds);
        }
        if dst_size.width % 2 != 0 || dst_size.height % 2 != 0 {
            return Err(ScalerError::OddDestinationSize {
                width: dst_size.width,
                height: dst_size.height,
            });
        }

        let device = scaler.device.clone();
        let mrt = use_mrt && scaler.max_render_targets() >= 2;
        let cache = &mut scaler.cache;

        let luma_size = Size::new(packed_width(dst_size.width), dst_size.height);
        let chroma_size = Size::new(packed_width(dst_size.width / 2), dst_size.height / 2);

        let plane_usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        let y_texture = create_texture(&device, luma_size, plane_usage);
        let u_texture = create_texture(&device, chroma_size, plane_usage);
        let v_texture = create_texture(&device, chroma_size, plane_usage);
        tracing::debug!(
            quality = quality.name(),
            %src_size,
            %dst_size,
            mrt,
            "building yuv readback pipeline"
        );

        // Planar stages read a whole number of samples per packed output
        // texel, so their source span is padded up to the packed width times
        // the per-sample footprint (1 px for luma, 2 px for chroma). The
        // overhang past the texture edge clamps, and the padded output
        // channels are never copied out.
        let luma_span = Rect::new(0, 0, luma_size.width * 4, dst_size.height);
        let chroma_span = Rect::new(0, 0, chroma_size.width * 8, dst_size.height);
        let planar_stage = |span: Rect, dst: Size| ScalerStage {
            shader: ShaderKind::Planar,
            src_size: dst_size,
            src_subrect: span,
            dst_size: dst,
            scale_x: true,
            vertically_flip: false,
            swizzle: false,
        };

        let strategy = if mrt {
            let intermediate_usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
            let uv_texture = create_texture(&device, luma_size, intermediate_usage);
            let uv_view = uv_texture.create_view(&wgpu::TextureViewDescriptor::default());

            // At fast quality the crop/scale folds into pass 1 and the pass
            // samples the source texture directly. Only possible when the
            // destination width packs evenly, otherwise the padded span has
            // no integral pre-scale counterpart in the source.
            let fused = quality == Quality::Fast && dst_size.width % 4 == 0;
            let (scaler_exec, rgba_view, pass1_src, pass1_subrect, pass1_flip) = if fused {
                (None, None, src_size, src_subrect, vertically_flip)
            } else {
                let rgba = create_texture(&device, dst_size, intermediate_usage);
                let view = rgba.create_view(&wgpu::TextureViewDescriptor::default());
                let stages = compute_scaler_stages(quality, src_size, src_subrect, dst_size, vertically_flip, false);
                (
                    Some(ScalerExecutor::new(&device, cache, stages)),
                    Some(view),
                    dst_size,
                    luma_span,
                    false,
                )
            };

            let pass1 = ScalerExecutor::new(
                &device,
                cache,
                vec![ScalerStage {
                    shader: ShaderKind::YuvMrtPass1,
                    src_size: pass1_src,
                    src_subrect: pass1_subrect,
                    dst_size: luma_size,
                    scale_x: true,
                    vertically_flip: pass1_flip,
                    swizzle: false,
                }],
            );
            // Two interleaved-chroma texels feed each packed output texel.
            let pass2 = ScalerExecutor::new(
                &device,
                cache,
                vec![ScalerStage {
                    shader: ShaderKind::YuvMrtPass2,
                    src_size: luma_size,
                    src_subrect: Rect::new(0, 0, chroma_size.width * 2, luma_size.height),
                    dst_size: chroma_size,
                    scale_x: true,
                    vertically_flip: false,
                    swizzle: false,
                }],
            );

            Strategy::TwoPassMrt {
                scaler: scaler_exec,
                pass1,
                pass2,
                rgba_view,
                uv_view,
            }
        } else {
            let rgba = create_texture(&device, dst_size, wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING);
            let rgba_view = rgba.create_view(&wgpu::TextureViewDescriptor::default());
            let stages = compute_scaler_stages(quality, src_size, src_subrect, dst_size, vertically_flip, false);

            Strategy::ThreePass {
                scaler: ScalerExecutor::new(&device, cache, stages),
                y_pass: ScalerExecutor::with_color_weights(&device, cache, vec![planar_stage(luma_span, luma_size)], RGB_TO_Y_WEIGHTS),
                u_pass: ScalerExecutor::with_color_weights(&device, cache, vec![planar_stage(chroma_span, chroma_size)], RGB_TO_U_WEIGHTS),
                v_pass: ScalerExecutor::with_color_weights(&device, cache, vec![planar_stage(chroma_span, chroma_size)], RGB_TO_V_WEIGHTS),
                rgba_view,
            }
        };

        Ok(Self {
            dst_size,
            strategy,
            y_texture,
            u_texture,
            v_texture,
        })
    }

    /// Destination size the pipeline was built for.
    pub fn dst_size(&self) -> Size {
        self.dst_size
    }

    /// True when this pipeline runs the 2-pass multiple-render-target
    /// strategy.
    pub fn uses_mrt(&self) -> bool {
        matches!(self.strategy, Strategy::TwoPassMrt { .. })
    }

    /// Converts `src_view` and reads the three planes back into `planes`,
    /// pasting at `paste_location` within the `target_rect` frame.
    ///
    /// The callback receives the planes exactly once; violated geometry
    /// preconditions fail the request immediately without GPU work.
    pub fn readback(
        &self,
        scaler: &mut TextureScaler,
        src_view: &wgpu::TextureView,
        target_rect: Rect,
        planes: YuvPlanes,
        paste_location: (u32, u32),
        callback: impl FnOnce(bool, YuvPlanes) + 'static,
    ) {
        if !paste_is_valid(target_rect, self.dst_size, paste_location) {
            tracing::warn!(
                ?paste_location,
                %target_rect,
                dst = %self.dst_size,
                "rejecting yuv readback: paste location must be even and inside the target frame"
            );
            callback(false, planes);
            return;
        }
        if !planes_fit(&planes, self.dst_size, paste_location) {
            tracing::warn!("rejecting yuv readback: plane buffers too small for paste");
            callback(false, planes);
            return;
        }

        let mut encoder = scaler.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("yuv readback"),
        });
        let y_view = self.y_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let u_view = self.u_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let v_view = self.v_texture.create_view(&wgpu::TextureViewDescriptor::default());

        match &self.strategy {
            Strategy::ThreePass {
                scaler: scale,
                y_pass,
                u_pass,
                v_pass,
                rgba_view,
            } => {
                debug_assert_eq!(scale.dst_size(), self.dst_size);
                scale.encode(&scaler.device, &mut encoder, src_view, &[rgba_view]);
                y_pass.encode(&scaler.device, &mut encoder, rgba_view, &[&y_view]);
                u_pass.encode(&scaler.device, &mut encoder, rgba_view, &[&u_view]);
                v_pass.encode(&scaler.device, &mut encoder, rgba_view, &[&v_view]);
            }
            Strategy::TwoPassMrt {
                scaler: scale,
                pass1,
                pass2,
                rgba_view,
                uv_view,
            } => {
                let pass1_input = match (scale, rgba_view) {
                    (Some(scale), Some(rgba_view)) => {
                        scale.encode(&scaler.device, &mut encoder, src_view, &[rgba_view]);
                        rgba_view
                    }
                    _ => src_view,
                };
                pass1.encode(&scaler.device, &mut encoder, pass1_input, &[&y_view, uv_view]);
                pass2.encode(&scaler.device, &mut encoder, uv_view, &[&u_view, &v_view]);
            }
        }
        scaler.queue.submit(std::iter::once(encoder.finish()));

        self.enqueue_plane_readbacks(scaler, planes, paste_location, Box::new(callback));
    }

    fn enqueue_plane_readbacks(&self, scaler: &mut TextureScaler, planes: YuvPlanes, paste_location: (u32, u32), callback: YuvCallback) {
        let (px, py) = (paste_location.0 as usize, paste_location.1 as usize);
        let YuvPlanes {
            y,
            u,
            v,
            y_stride,
            u_stride,
            v_stride,
        } = planes;

        let gather = Rc::new(RefCell::new(PlaneGather {
            y: None,
            u: None,
            v: None,
            y_stride,
            u_stride,
            v_stride,
            ok: true,
            remaining: 3,
            callback: Some(callback),
        }));

        let w = self.dst_size.width;
        let h = self.dst_size.height;
        let plane_reads = [
            (&self.y_texture, w, y, py * y_stride + px, y_stride, PlaneSlot::Y),
            (&self.u_texture, w / 2, u, (py / 2) * u_stride + px / 2, u_stride, PlaneSlot::U),
            (&self.v_texture, w / 2, v, (py / 2) * v_stride + px / 2, v_stride, PlaneSlot::V),
        ];
        for (texture, row_bytes, dst, dst_offset, dst_stride, slot) in plane_reads {
            let rect = match slot {
                PlaneSlot::Y => Rect::new(0, 0, packed_width(w), h),
                _ => Rect::new(0, 0, packed_width(w / 2), h / 2),
            };
            let gather = Rc::clone(&gather);
            scaler.readbacks.read_texture(
                &scaler.device,
                &scaler.queue,
                texture,
                rect,
                row_bytes,
                dst,
                dst_offset,
                dst_stride,
                Box::new(move |ok, data| PlaneGather::deposit(&gather, slot, ok, data)),
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaneSlot {
    Y,
    U,
    V,
}

/// Collects the three plane completions and fires the caller's callback
/// exactly once, after the last plane (success or not) has been delivered.
struct PlaneGather {
    y: Option<Vec<u8>>,
    u: Option<Vec<u8>>,
    v: Option<Vec<u8>>,
    y_stride: usize,
    u_stride: usize,
    v_stride: usize,
    ok: bool,
    remaining: u8,
    callback: Option<YuvCallback>,
}

impl PlaneGather {
    fn deposit(gather: &Rc<RefCell<Self>>, slot: PlaneSlot, ok: bool, data: Vec<u8>) {
        let mut state = gather.borrow_mut();
        state.ok &= ok;
        match slot {
            PlaneSlot::Y => state.y = Some(data),
            PlaneSlot::U => state.u = Some(data),
            PlaneSlot::V => state.v = Some(data),
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            let callback = state.callback.take().expect("gather fires once");
            let planes = YuvPlanes {
                y: state.y.take().expect("y delivered"),
                u: state.u.take().expect("u delivered"),
                v: state.v.take().expect("v delivered"),
                y_stride: state.y_stride,
                u_stride: state.u_stride,
                v_stride: state.v_stride,
            };
            let ok = state.ok;
            drop(state);
            callback(ok, planes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_width_rounds_up() {
        assert_eq!(packed_width(64), 16);
        assert_eq!(packed_width(66), 17);
        assert_eq!(packed_width(1), 1);
        assert_eq!(packed_width(4), 1);
    }

    #[test]
    fn test_paste_must_be_even_and_inside() {
        let frame = Rect::new(0, 0, 64, 64);
        let dst = Size::new(32, 32);
        assert!(paste_is_valid(frame, dst, (0, 0)));
        assert!(paste_is_valid(frame, dst, (32, 32)));
        assert!(paste_is_valid(frame, dst, (16, 2)));
        // Odd coordinates break 4:2:0 chroma alignment.
        assert!(!paste_is_valid(frame, dst, (1, 0)));
        assert!(!paste_is_valid(frame, dst, (0, 3)));
        // Region escaping the frame.
        assert!(!paste_is_valid(frame, dst, (34, 0)));
        assert!(!paste_is_valid(frame, dst, (0, 40)));
    }

    #[test]
    fn test_planes_fit_checks_strided_extent() {
        let dst = Size::new(32, 16);
        let planes = YuvPlanes::allocate(Size::new(64, 64));
        assert!(planes_fit(&planes, dst, (0, 0)));
        assert!(planes_fit(&planes, dst, (32, 48)));

        let tight = YuvPlanes::allocate(Size::new(32, 16));
        assert!(planes_fit(&tight, dst, (0, 0)));
        assert!(!planes_fit(&tight, dst, (2, 0)));
    }

    #[test]
    fn test_allocate_tight_planes() {
        let planes = YuvPlanes::allocate(Size::new(48, 30));
        assert_eq!(planes.y.len(), 48 * 30);
        assert_eq!(planes.u.len(), 24 * 15);
        assert_eq!(planes.v.len(), 24 * 15);
        assert_eq!(planes.y_stride, 48);
        assert_eq!(planes.u_stride, 24);
    }

    #[test]
    fn test_color_weights_match_documented_formulas() {
        // Full-scale white must land on the nominal Y ceiling of 235/255.
        let white_y = RGB_TO_Y_WEIGHTS[0] + RGB_TO_Y_WEIGHTS[1] + RGB_TO_Y_WEIGHTS[2] + RGB_TO_Y_WEIGHTS[3];
        assert!((white_y - 235.0 / 255.0).abs() < 0.005);
        // Chroma weights sum to zero so neutral gray maps to the 0.5 bias.
        let u_sum: f32 = RGB_TO_U_WEIGHTS[..3].iter().sum();
        let v_sum: f32 = RGB_TO_V_WEIGHTS[..3].iter().sum();
        assert!(u_sum.abs() < 0.005);
        assert!(v_sum.abs() < 0.005);
    }
}
