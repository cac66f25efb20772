//! Asynchronous GPU-to-CPU pixel transfer with strict FIFO delivery.
//!
//! Driver map completions arrive in whatever order the GPU finishes, but
//! callers observe completions in enqueue order: the queue re-evaluates a
//! can-flush-front predicate on every pump and never releases a request
//! ahead of an older one. Every enqueued request gets exactly one callback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::geometry::Rect;

/// Completion state shared with the driver-side map callback.
#[derive(Debug)]
pub(crate) struct CompletionFlag(AtomicU8);

const PENDING: u8 = 0;
const MAPPED: u8 = 1;
const FAILED: u8 = 2;

impl CompletionFlag {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(PENDING)))
    }

    /// Called from the raw driver completion handler, possibly out of
    /// request order.
    pub fn signal(&self, ok: bool) {
        self.0.store(if ok { MAPPED } else { FAILED }, Ordering::Release);
    }

    fn get(&self) -> Option<bool> {
        match self.0.load(Ordering::Acquire) {
            PENDING => None,
            MAPPED => Some(true),
            _ => Some(false),
        }
    }
}

/// FIFO of in-flight entries. Entries complete in any order; release always
/// happens front-to-back, so a finished entry waits behind an unfinished
/// older one.
pub(crate) struct CompletionFifo<T> {
    entries: VecDeque<T>,
}

impl<T> CompletionFifo<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pops and finishes every leading entry whose completion has signaled.
    /// Returns how many entries were released.
    pub fn release_ready(&mut self, is_done: impl Fn(&T) -> bool, mut finish: impl FnMut(T)) -> usize {
        let mut released = 0;
        while self.entries.front().is_some_and(&is_done) {
            finish(self.entries.pop_front().expect("front checked above"));
            released += 1;
        }
        released
    }

    /// Drains every entry front-to-back regardless of completion state.
    /// Teardown path; returns how many entries were drained.
    pub fn release_all(&mut self, mut finish: impl FnMut(T)) -> usize {
        let drained = self.entries.len();
        for entry in self.entries.drain(..) {
            finish(entry);
        }
        drained
    }
}

/// Completion callback: success flag plus the returned destination buffer.
pub type ByteCallback = Box<dyn FnOnce(bool, Vec<u8>)>;

/// One in-flight readback: the staging buffer being mapped, the destination
/// it pastes into, and the callback owed to the caller.
struct ReadbackRequest {
    staging: wgpu::Buffer,
    rows: u32,
    /// Bytes per row delivered to the destination; may be narrower than the
    /// staging row when only part of the texel row is meaningful.
    row_bytes: u32,
    /// Staging row pitch, padded to the device copy alignment.
    padded_row_bytes: u32,
    dst: Vec<u8>,
    dst_offset: usize,
    dst_stride: usize,
    flag: Arc<CompletionFlag>,
    callback: ByteCallback,
}

impl ReadbackRequest {
    /// Copies the mapped staging rows into the destination and fires the
    /// callback. Called only once the flag has signaled.
    fn finish(self) {
        let ReadbackRequest {
            staging,
            rows,
            row_bytes,
            padded_row_bytes,
            mut dst,
            dst_offset,
            dst_stride,
            flag,
            callback,
        } = self;

        if flag.get() != Some(true) {
            callback(false, dst);
            return;
        }

        {
            let data = staging.slice(..).get_mapped_range();
            for row in 0..rows as usize {
                let src_start = row * padded_row_bytes as usize;
                let dst_start = dst_offset + row * dst_stride;
                let len = row_bytes as usize;
                if dst_start + len <= dst.len() {
                    dst[dst_start..dst_start + len].copy_from_slice(&data[src_start..src_start + len]);
                }
            }
        }
        staging.unmap();
        callback(true, dst);
    }

    /// Fails the request without touching the staging buffer. Used for
    /// cancellation and for requests whose map never completed.
    fn fail(self) {
        (self.callback)(false, self.dst);
    }
}

/// In-order delivery queue for asynchronous texture readbacks.
pub(crate) struct ReadbackQueue {
    requests: CompletionFifo<ReadbackRequest>,
}

impl ReadbackQueue {
    pub fn new() -> Self {
        Self {
            requests: CompletionFifo::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Issues the texture-to-buffer copy, registers the map completion and
    /// enqueues the request. `row_bytes` of each of `rect.height` rows land
    /// in `dst` at `dst_offset` advancing by `dst_stride` per row.
    #[allow(clippy::too_many_arguments)]
    pub fn read_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        rect: Rect,
        row_bytes: u32,
        dst: Vec<u8>,
        dst_offset: usize,
        dst_stride: usize,
        callback: ByteCallback,
    ) {
        let texel_row_bytes = rect.width * 4;
        debug_assert!(row_bytes <= texel_row_bytes);
        let padded_row_bytes = texel_row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: padded_row_bytes as u64 * rect.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback copy"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let flag = CompletionFlag::new();
        let signal = Arc::clone(&flag);
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            signal.signal(result.is_ok());
        });

        self.requests.push(ReadbackRequest {
            staging,
            rows: rect.height,
            row_bytes,
            padded_row_bytes,
            dst,
            dst_offset,
            dst_stride,
            flag,
            callback,
        });
    }

    /// Releases every leading request whose map has signaled. Callbacks run
    /// on the calling thread, strictly front-to-back.
    pub fn release_completed(&mut self) -> usize {
        self.requests.release_ready(|request| request.flag.get().is_some(), ReadbackRequest::finish)
    }

    /// Fails every outstanding request in FIFO order. Each pending callback
    /// fires exactly once with `false`.
    pub fn cancel_all(&mut self) -> usize {
        let drained = self.requests.release_all(ReadbackRequest::fail);
        if drained > 0 {
            tracing::debug!(drained, "cancelled outstanding readbacks");
        }
        drained
    }
}

impl Drop for ReadbackQueue {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Blocking readback of `rect` from `texture`. Rows of `row_bytes` bytes are
/// written into `out` at `out_stride` spacing. Returns false on map failure.
pub(crate) fn read_texture_sync(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rect: Rect,
    row_bytes: u32,
    out: &mut [u8],
    out_stride: usize,
) -> bool {
    let texel_row_bytes = rect.width * 4;
    let padded_row_bytes = texel_row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("sync readback staging"),
        size: padded_row_bytes as u64 * rect.height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("sync readback copy"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: rect.x,
                y: rect.y,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row_bytes),
                rows_per_image: Some(rect.height),
            },
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let buffer_slice = staging.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    if device.poll(wgpu::PollType::Wait).is_err() {
        return false;
    }
    match pollster::block_on(receiver.receive()) {
        Some(Ok(())) => {}
        _ => return false,
    }

    {
        let data = buffer_slice.get_mapped_range();
        for row in 0..rect.height as usize {
            let src_start = row * padded_row_bytes as usize;
            let dst_start = row * out_stride;
            let len = row_bytes as usize;
            if dst_start + len <= out.len() {
                out[dst_start..dst_start + len].copy_from_slice(&data[src_start..src_start + len]);
            }
        }
    }
    staging.unmap();
    true
}
