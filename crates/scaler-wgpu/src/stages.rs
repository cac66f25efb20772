//! Stage compilation: merging per-axis scale plans into GPU passes.
//!
//! The planner produces independent op queues for the X and Y axes; this
//! module greedily merges them into the smallest number of draw passes the
//! quality policy allows. Each emitted [`ScalerStage`] is one draw.

use std::collections::VecDeque;

use crate::geometry::{Rect, Size};
use crate::planner::ScaleOp;
use crate::shaders::ShaderKind;

/// Pass-count/filtering policy for a scaling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// One bilinear pass whatever the ratio. Cheap, and blurry past 2x.
    Fast,
    /// Multi-pass bilinear with pass-merging optimizations.
    Good,
    /// Bicubic filtering, one axis per pass. Most passes, best output.
    Best,
}

impl Quality {
    /// Returns the human-readable name of this quality level
    pub fn name(&self) -> &'static str {
        match self {
            Quality::Fast => "fast",
            Quality::Good => "good",
            Quality::Best => "best",
        }
    }
}

/// One GPU draw pass of a scaling pipeline.
///
/// A pipeline is an ordered stage sequence: stage `i + 1` consumes stage
/// `i`'s output as its full-rect source. Only the first stage may crop,
/// flip or swizzle; later stages run on normalized intermediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalerStage {
    /// Resampling shader this pass runs.
    pub shader: ShaderKind,
    /// Full extent of the pass input.
    pub src_size: Size,
    /// Region of the input this pass reads.
    pub src_subrect: Rect,
    /// Extent of the pass output.
    pub dst_size: Size,
    /// Axis the 1-D shaders resample along.
    pub scale_x: bool,
    /// Mirror the source vertically while sampling.
    pub vertically_flip: bool,
    /// Swap the red and blue channels on output.
    pub swizzle: bool,
}

/// Compiles a crop+scale request into an ordered stage list.
///
/// `Fast` quality and identity-sized requests compile to a single bilinear
/// pass. Otherwise both axes are planned independently and the two op queues
/// are merged, preferring Y first so pipelines stay deterministic.
pub fn compute_scaler_stages(
    quality: Quality,
    src_size: Size,
    src_subrect: Rect,
    dst_size: Size,
    vertically_flip: bool,
    swizzle: bool,
) -> Vec<ScalerStage> {
    if quality == Quality::Fast || src_subrect.size() == dst_size {
        return vec![ScalerStage {
            shader: ShaderKind::Bilinear,
            src_size,
            src_subrect,
            dst_size,
            scale_x: false,
            vertically_flip,
            swizzle,
        }];
    }

    let mut x_ops = VecDeque::new();
    let mut y_ops = VecDeque::new();
    ScaleOp::add_ops(src_subrect.width, dst_size.width, true, quality == Quality::Good, &mut x_ops);
    ScaleOp::add_ops(src_subrect.height, dst_size.height, false, quality == Quality::Good, &mut y_ops);

    let stages = convert_ops_to_stages(quality, src_size, src_subrect, vertically_flip, swizzle, &mut x_ops, &mut y_ops);
    debug_assert_eq!(stages.last().map(|stage| stage.dst_size), Some(dst_size));
    stages
}

fn convert_ops_to_stages(
    quality: Quality,
    mut src_size: Size,
    mut src_subrect: Rect,
    mut vertically_flip: bool,
    mut swizzle: bool,
    x_ops: &mut VecDeque<ScaleOp>,
    y_ops: &mut VecDeque<ScaleOp>,
) -> Vec<ScalerStage> {
    let mut stages = Vec::new();

    while !x_ops.is_empty() || !y_ops.is_empty() {
        let mut intermediate_size = src_subrect.size();
        let use_y = !y_ops.is_empty();

        let front = {
            let queue = if use_y { &mut *y_ops } else { &mut *x_ops };
            queue.pop_front().expect("loop condition guarantees a non-empty queue")
        };
        let scale_x = front.scale_x;
        let axis_len = if scale_x { intermediate_size.width } else { intermediate_size.height };
        let current_is_upscale = front.scale_factor == 0 && front.scale_size >= axis_len;

        let mut shader = match front.scale_factor {
            0 if quality == Quality::Best => ShaderKind::BicubicUpscale,
            2 if quality == Quality::Best => ShaderKind::BicubicHalf1d,
            0 | 2 => ShaderKind::Bilinear,
            3 => {
                debug_assert!(quality != Quality::Best, "factor 3 is never planned at best quality");
                ShaderKind::Bilinear3
            }
            other => unreachable!("planner emits factors 0, 2 and 3 only, got {other}"),
        };
        front.update_size(&mut intermediate_size);

        if quality == Quality::Good {
            // Fold one or two further halvings on the same axis into this
            // pass: two taps span four texels, four taps span eight.
            {
                let queue = if use_y { &mut *y_ops } else { &mut *x_ops };
                if shader == ShaderKind::Bilinear {
                    if let Some(next) = queue.pop_front() {
                        next.update_size(&mut intermediate_size);
                        shader = ShaderKind::Bilinear2;
                        if let Some(next) = queue.pop_front() {
                            next.update_size(&mut intermediate_size);
                            shader = ShaderKind::Bilinear4;
                        }
                    }
                }
            }

            // A pending step of at most 2x on the other axis rides along in
            // the same pass: every tap is a linear filter in both dimensions.
            let other_queue = if scale_x { &mut *y_ops } else { &mut *x_ops };
            if let Some(&other) = other_queue.front() {
                if other.scale_factor <= 2 {
                    let other_len = if scale_x { intermediate_size.height } else { intermediate_size.width };
                    let fused = match shader {
                        // A single linear tap is exact for a two-axis
                        // upscale; any downscale needs the four-tap pattern.
                        ShaderKind::Bilinear => {
                            let other_is_upscale = other.scale_factor == 0 && other.scale_size >= other_len;
                            Some(if current_is_upscale && other_is_upscale {
                                ShaderKind::Bilinear
                            } else {
                                ShaderKind::Bilinear2x2
                            })
                        }
                        ShaderKind::Bilinear2 | ShaderKind::Bilinear3 | ShaderKind::Bilinear4 => Some(shader),
                        _ => None,
                    };
                    if let Some(fused_shader) = fused {
                        other.update_size(&mut intermediate_size);
                        other_queue.pop_front();
                        shader = fused_shader;
                    }
                }
            }
        }

        stages.push(ScalerStage {
            shader,
            src_size,
            src_subrect,
            dst_size: intermediate_size,
            scale_x,
            vertically_flip,
            swizzle,
        });
        src_size = intermediate_size;
        src_subrect = Rect::of_size(intermediate_size);
        vertically_flip = false;
        swizzle = false;
    }

    stages
}
