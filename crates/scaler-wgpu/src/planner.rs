//! One-dimensional scale planning.
//!
//! An arbitrary source-to-destination resize along one axis is decomposed
//! into an ordered run of elementary operations: an optional leading
//! scale-to op covering the non-power-of-two remainder, followed by exact
//! halvings — or a single 2x-3x reduction when the ratio permits one.

use std::collections::VecDeque;

use crate::geometry::Size;

/// One elementary resampling operation on a single axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScaleOp {
    /// 0 = scale directly to `scale_size` (direction implied by the current
    /// axis length), 2 = exact halving, 3 = a single 2x-3x reduction.
    pub scale_factor: u32,
    /// True when this op scales the X axis.
    pub scale_x: bool,
    /// Axis length after this op has been applied.
    pub scale_size: u32,
}

impl ScaleOp {
    /// Applies this op's result to the matching axis of `size`.
    pub fn update_size(&self, size: &mut Size) {
        if self.scale_x {
            size.width = self.scale_size;
        } else {
            size.height = self.scale_size;
        }
    }

    /// Decomposes `src -> dst` into ops appended to `ops`, front-to-back in
    /// execution order.
    ///
    /// With `allow3`, a reduction between 2x and 3x becomes a single
    /// factor-3 op. Factor 3 is never mixed with other factors: the
    /// intermediate sizes would not stay integral.
    pub fn add_ops(src: u32, dst: u32, scale_x: bool, allow3: bool, ops: &mut VecDeque<ScaleOp>) {
        debug_assert!(src > 0 && dst > 0, "axis lengths must be non-zero");
        if allow3 && dst * 3 >= src && dst * 2 < src {
            ops.push_back(ScaleOp {
                scale_factor: 3,
                scale_x,
                scale_size: dst,
            });
            return;
        }

        // Largest number of exact halvings that still fits inside src.
        let mut num_downscales = 0u32;
        while ((dst as u64) << (num_downscales + 1)) <= src as u64 {
            num_downscales += 1;
        }

        if (dst << num_downscales) != src {
            ops.push_back(ScaleOp {
                scale_factor: 0,
                scale_x,
                scale_size: dst << num_downscales,
            });
        }
        while num_downscales > 0 {
            num_downscales -= 1;
            ops.push_back(ScaleOp {
                scale_factor: 2,
                scale_x,
                scale_size: dst << num_downscales,
            });
        }
    }
}
