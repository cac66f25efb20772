//! GPU texture scaling and planar readback for wgpu.
//!
//! This crate takes an arbitrary GPU-resident RGBA texture, crops and
//! scales it to a target resolution in a minimal number of draw passes,
//! optionally converts it to 4:2:0 planar YUV, and reads the result back to
//! CPU memory asynchronously. Readback completions are delivered strictly
//! in request order regardless of how the driver reorders GPU completions.
//!
//! All pipeline construction, execution and queue management happen on one
//! thread; asynchrony is GPU-side only and surfaces through
//! [`TextureScaler::process_completions`], the cooperative event-processing
//! point that pumps the device and flushes finished readbacks.

mod error;
mod executor;
mod geometry;
mod planner;
mod readback;
mod shaders;
mod stages;
mod yuv;

pub use error::ScalerError;
pub use geometry::{Rect, Size};
pub use shaders::ShaderKind;
pub use stages::{Quality, ScalerStage, compute_scaler_stages};
pub use yuv::{RGB_TO_U_WEIGHTS, RGB_TO_V_WEIGHTS, RGB_TO_Y_WEIGHTS, YuvPlanes, YuvReadbackPipeline};

use executor::{ScalerExecutor, create_texture};
use readback::ReadbackQueue;
use shaders::ShaderCache;

/// How a readback format maps onto this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    /// The format cannot be read back.
    Unsupported,
    /// Texel bytes come out in the requested order directly.
    Supported,
    /// Producible by swapping the red and blue channels in the final pass.
    RequiresSwizzle,
}

/// Entry point owning the shader cache and the readback request queue.
///
/// Shader programs compiled for one `TextureScaler` are cached for its whole
/// lifetime and shared across every pipeline it builds. Dropping the scaler
/// drains all outstanding readbacks, failing each pending callback in FIFO
/// order.
pub struct TextureScaler {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) cache: ShaderCache,
    pub(crate) readbacks: ReadbackQueue,
}

impl TextureScaler {
    /// Creates a scaler bound to a device and its submission queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            cache: ShaderCache::new(),
            readbacks: ReadbackQueue::new(),
        }
    }

    /// Probes how `format` can be read back on this device.
    pub fn format_support(&self, format: wgpu::TextureFormat) -> FormatSupport {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => FormatSupport::Supported,
            wgpu::TextureFormat::Bgra8Unorm => FormatSupport::RequiresSwizzle,
            _ => FormatSupport::Unsupported,
        }
    }

    /// Maximum simultaneous color attachments one draw may write.
    pub fn max_render_targets(&self) -> u32 {
        self.device.limits().max_color_attachments
    }

    /// Number of readbacks still waiting for completion.
    pub fn pending_readbacks(&self) -> usize {
        self.readbacks.pending()
    }

    /// Crops `src_subrect` out of the source, scales it to `dst_size` and
    /// reads the result back asynchronously into `out` (tightly packed
    /// `dst_size.width * 4`-byte rows).
    ///
    /// The callback fires exactly once from [`process_completions`], or
    /// immediately with `false` when `format` is unsupported or the
    /// geometry is invalid — in that case no GPU work is issued.
    ///
    /// [`process_completions`]: Self::process_completions
    #[allow(clippy::too_many_arguments)]
    pub fn crop_scale_readback(
        &mut self,
        src_view: &wgpu::TextureView,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        out: Vec<u8>,
        format: wgpu::TextureFormat,
        quality: Quality,
        callback: impl FnOnce(bool, Vec<u8>) + 'static,
    ) {
        let swizzle = match self.format_support(format) {
            FormatSupport::Supported => false,
            FormatSupport::RequiresSwizzle => true,
            FormatSupport::Unsupported => {
                tracing::warn!(?format, "rejecting readback of unsupported format");
                callback(false, out);
                return;
            }
        };
        if src_size.is_empty() || dst_size.is_empty() || !Rect::of_size(src_size).contains_rect(&src_subrect) {
            tracing::warn!(%src_size, %src_subrect, %dst_size, "rejecting readback with invalid geometry");
            callback(false, out);
            return;
        }

        let stages = compute_scaler_stages(quality, src_size, src_subrect, dst_size, false, swizzle);
        let scaler = ScalerExecutor::new(&self.device, &mut self.cache, stages);
        let target = create_texture(
            &self.device,
            dst_size,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        scaler.execute(&self.device, &self.queue, src_view, &[&target_view]);

        let row_bytes = dst_size.width * 4;
        self.readbacks.read_texture(
            &self.device,
            &self.queue,
            &target,
            Rect::of_size(dst_size),
            row_bytes,
            out,
            0,
            row_bytes as usize,
            Box::new(callback),
        );
    }

    /// Scales the full source into a freshly allocated texture and returns
    /// it. The texture is usable as both a sampling source and a render
    /// attachment.
    pub fn copy_and_scale_texture(
        &mut self,
        src_view: &wgpu::TextureView,
        src_size: Size,
        dst_size: Size,
        vertically_flip: bool,
        quality: Quality,
    ) -> wgpu::Texture {
        let stages = compute_scaler_stages(quality, src_size, Rect::of_size(src_size), dst_size, vertically_flip, false);
        let scaler = ScalerExecutor::new(&self.device, &mut self.cache, stages);
        let target = create_texture(
            &self.device,
            dst_size,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_SRC,
        );
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        scaler.execute(&self.device, &self.queue, src_view, &[&target_view]);
        target
    }

    /// Builds a reusable crop/scale/convert-to-YUV pipeline. `use_mrt`
    /// requests the 2-pass multiple-render-target strategy, granted only
    /// when the device can write two attachments at once.
    pub fn create_readback_pipeline_yuv(
        &mut self,
        quality: Quality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        vertically_flip: bool,
        use_mrt: bool,
    ) -> Result<YuvReadbackPipeline, ScalerError> {
        YuvReadbackPipeline::new(self, quality, src_size, src_subrect, dst_size, vertically_flip, use_mrt)
    }

    /// Synchronously reads `rect` out of `texture` into `out`, blocking the
    /// calling thread until the GPU copy completes. `texture` must use the
    /// byte layout named by `format`. Returns false without touching `out`
    /// on a format mismatch or map failure.
    pub fn readback_texture_sync(&self, texture: &wgpu::Texture, rect: Rect, out: &mut [u8], format: wgpu::TextureFormat) -> bool {
        if self.format_support(format) == FormatSupport::Unsupported || texture.format() != format {
            return false;
        }
        let row_bytes = rect.width * 4;
        readback::read_texture_sync(&self.device, &self.queue, texture, rect, row_bytes, out, row_bytes as usize)
    }

    /// Pumps driver completions and releases finished readbacks in FIFO
    /// order. Returns how many callbacks fired. Call this from the render
    /// loop (or any idle point) to drive asynchronous readbacks forward.
    pub fn process_completions(&mut self) -> usize {
        let _ = self.device.poll(wgpu::PollType::Poll);
        self.readbacks.release_completed()
    }

    /// Blocks until every outstanding readback has completed (or failed)
    /// and its callback has run.
    pub fn wait_for_completions(&mut self) {
        while self.readbacks.pending() > 0 {
            if self.device.poll(wgpu::PollType::Wait).is_err() {
                // The device is lost; fail whatever is still queued.
                self.readbacks.cancel_all();
                return;
            }
            self.readbacks.release_completed();
        }
    }
}
