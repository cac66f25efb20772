//! End-to-end pipeline tests against a real adapter.
//!
//! Every test acquires its own device and skips gracefully when the host
//! has no usable GPU, so the suite stays green on headless CI runners.

use std::cell::RefCell;
use std::rc::Rc;

use scaler_wgpu::{Quality, Rect, Size, TextureScaler, YuvPlanes};

fn create_context() -> Option<(wgpu::Device, wgpu::Queue)> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default())) {
        Ok(adapter) => adapter,
        Err(_) => {
            eprintln!("no wgpu adapter available, skipping GPU test");
            return None;
        }
    };
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("scaler tests"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))
    .ok()?;
    Some((device, queue))
}

/// Synthetic gradient pattern: R ramps with x, G with y, B with both.
fn test_pattern(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((10 * x) as u8);
            data.push((10 * y) as u8);
            data.push((10 * (x + y)) as u8);
            data.push(255);
        }
    }
    data
}

fn upload_rgba(device: &wgpu::Device, queue: &wgpu::Queue, width: u32, height: u32, data: &[u8]) -> wgpu::Texture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test source"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    texture
}

fn assert_bytes_close(actual: &[u8], expected: &[u8], tolerance: i32, what: &str) {
    assert_eq!(actual.len(), expected.len(), "{what}: length mismatch");
    for (index, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let diff = (a as i32 - e as i32).abs();
        assert!(diff <= tolerance, "{what}: byte {index} differs by {diff} ({a} vs {e})");
    }
}

/// Direct-formula reference conversion of an RGBA image to 4:2:0 planes.
fn reference_yuv(rgba: &[u8], width: usize, height: usize) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let project = |r: f32, g: f32, b: f32, w: [f32; 4]| -> u8 { (r * w[0] + g * w[1] + b * w[2] + w[3] * 255.0).round().clamp(0.0, 255.0) as u8 };

    let mut y_plane = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let p = (y * width + x) * 4;
            y_plane[y * width + x] = project(
                rgba[p] as f32,
                rgba[p + 1] as f32,
                rgba[p + 2] as f32,
                scaler_wgpu::RGB_TO_Y_WEIGHTS,
            );
        }
    }

    let cw = width / 2;
    let ch = height / 2;
    let mut u_plane = vec![0u8; cw * ch];
    let mut v_plane = vec![0u8; cw * ch];
    for cy in 0..ch {
        for cx in 0..cw {
            // 2x2 block average in linear byte space.
            let (mut r, mut g, mut b) = (0.0f32, 0.0f32, 0.0f32);
            for dy in 0..2 {
                for dx in 0..2 {
                    let p = ((cy * 2 + dy) * width + cx * 2 + dx) * 4;
                    r += rgba[p] as f32;
                    g += rgba[p + 1] as f32;
                    b += rgba[p + 2] as f32;
                }
            }
            u_plane[cy * cw + cx] = project(r / 4.0, g / 4.0, b / 4.0, scaler_wgpu::RGB_TO_U_WEIGHTS);
            v_plane[cy * cw + cx] = project(r / 4.0, g / 4.0, b / 4.0, scaler_wgpu::RGB_TO_V_WEIGHTS);
        }
    }
    (y_plane, u_plane, v_plane)
}

#[test]
fn identity_scale_reproduces_source() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let (w, h) = (64, 48);
    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    for quality in [Quality::Fast, Quality::Good, Quality::Best] {
        let scaled = scaler.copy_and_scale_texture(&source_view, Size::new(w, h), Size::new(w, h), false, quality);
        let mut out = vec![0u8; (w * h * 4) as usize];
        assert!(scaler.readback_texture_sync(&scaled, Rect::new(0, 0, w, h), &mut out, wgpu::TextureFormat::Rgba8Unorm));
        assert_bytes_close(&out, &pattern, 2, quality.name());
    }
}

#[test]
fn flipped_identity_reverses_rows() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let (w, h) = (32, 16);
    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let flipped = scaler.copy_and_scale_texture(&source_view, Size::new(w, h), Size::new(w, h), true, Quality::Good);
    let mut out = vec![0u8; (w * h * 4) as usize];
    assert!(scaler.readback_texture_sync(&flipped, Rect::new(0, 0, w, h), &mut out, wgpu::TextureFormat::Rgba8Unorm));

    let row_bytes = (w * 4) as usize;
    let mut expected = Vec::with_capacity(pattern.len());
    for row in (0..h as usize).rev() {
        expected.extend_from_slice(&pattern[row * row_bytes..(row + 1) * row_bytes]);
    }
    assert_bytes_close(&out, &expected, 2, "flipped identity");
}

#[test]
fn constant_color_survives_every_quality() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    // Every resampling kernel has unit weight sum, so a constant source
    // stays constant through any stage chain, up or down.
    let (w, h) = (400, 300);
    let color = [120u8, 33, 211, 255];
    let pattern: Vec<u8> = color.iter().copied().cycle().take((w * h * 4) as usize).collect();
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    for quality in [Quality::Fast, Quality::Good, Quality::Best] {
        for dst in [Size::new(100, 75), Size::new(640, 480), Size::new(133, 77)] {
            let scaled = scaler.copy_and_scale_texture(&source_view, Size::new(w, h), dst, false, quality);
            let mut out = vec![0u8; (dst.width * dst.height * 4) as usize];
            assert!(scaler.readback_texture_sync(&scaled, Rect::of_size(dst), &mut out, wgpu::TextureFormat::Rgba8Unorm));
            for (index, chunk) in out.chunks_exact(4).enumerate() {
                for c in 0..4 {
                    let diff = (chunk[c] as i32 - color[c] as i32).abs();
                    assert!(diff <= 1, "{} {dst}: pixel {index} channel {c} drifted to {}", quality.name(), chunk[c]);
                }
            }
        }
    }
}

#[test]
fn crop_scale_readback_delivers_cropped_region() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let (w, h) = (64, 64);
    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let crop = Rect::new(16, 8, 24, 32);
    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    scaler.crop_scale_readback(
        &source_view,
        Size::new(w, h),
        crop,
        crop.size(),
        vec![0u8; (crop.width * crop.height * 4) as usize],
        wgpu::TextureFormat::Rgba8Unorm,
        Quality::Good,
        move |ok, data| {
            *slot.borrow_mut() = Some((ok, data));
        },
    );
    scaler.wait_for_completions();

    let (ok, data) = result.borrow_mut().take().expect("callback fired");
    assert!(ok);

    let mut expected = Vec::new();
    for y in crop.y..crop.bottom() {
        let start = ((y * w + crop.x) * 4) as usize;
        expected.extend_from_slice(&pattern[start..start + (crop.width * 4) as usize]);
    }
    assert_bytes_close(&data, &expected, 2, "cropped readback");
}

#[test]
fn bgra_readback_swaps_channels() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let (w, h) = (16, 8);
    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    scaler.crop_scale_readback(
        &source_view,
        Size::new(w, h),
        Rect::new(0, 0, w, h),
        Size::new(w, h),
        vec![0u8; (w * h * 4) as usize],
        wgpu::TextureFormat::Bgra8Unorm,
        Quality::Good,
        move |ok, data| {
            *slot.borrow_mut() = Some((ok, data));
        },
    );
    scaler.wait_for_completions();

    let (ok, data) = result.borrow_mut().take().expect("callback fired");
    assert!(ok);
    let expected: Vec<u8> = pattern.chunks_exact(4).flat_map(|px| [px[2], px[1], px[0], px[3]]).collect();
    assert_bytes_close(&data, &expected, 2, "bgra readback");
}

#[test]
fn unsupported_format_fails_synchronously() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let source = upload_rgba(&device, &queue, 8, 8, &test_pattern(8, 8));
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let fired = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&fired);
    scaler.crop_scale_readback(
        &source_view,
        Size::new(8, 8),
        Rect::new(0, 0, 8, 8),
        Size::new(8, 8),
        vec![0u8; 8 * 8 * 4],
        wgpu::TextureFormat::R32Float,
        Quality::Good,
        move |ok, data| {
            *slot.borrow_mut() = Some((ok, data.len()));
        },
    );

    // No polling: the rejection is synchronous and no GPU work was issued.
    assert_eq!(*fired.borrow(), Some((false, 8 * 8 * 4)));
    assert_eq!(scaler.pending_readbacks(), 0);
}

#[test]
fn readbacks_complete_in_enqueue_order() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let source = upload_rgba(&device, &queue, 32, 32, &test_pattern(32, 32));
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let order = Rc::new(RefCell::new(Vec::new()));
    // Differently sized requests so the GPU is free to finish them whenever.
    for (index, dst) in [Size::new(256, 256), Size::new(8, 8), Size::new(64, 64)].into_iter().enumerate() {
        let order = Rc::clone(&order);
        scaler.crop_scale_readback(
            &source_view,
            Size::new(32, 32),
            Rect::new(0, 0, 32, 32),
            dst,
            vec![0u8; (dst.width * dst.height * 4) as usize],
            wgpu::TextureFormat::Rgba8Unorm,
            Quality::Fast,
            move |ok, _| {
                assert!(ok);
                order.borrow_mut().push(index);
            },
        );
    }
    assert_eq!(scaler.pending_readbacks(), 3);
    scaler.wait_for_completions();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn dropping_scaler_fails_outstanding_requests_in_order() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let source = upload_rgba(&device, &queue, 16, 16, &test_pattern(16, 16));
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let outcomes = Rc::new(RefCell::new(Vec::new()));
    for index in 0..3 {
        let outcomes = Rc::clone(&outcomes);
        scaler.crop_scale_readback(
            &source_view,
            Size::new(16, 16),
            Rect::new(0, 0, 16, 16),
            Size::new(16, 16),
            vec![0u8; 16 * 16 * 4],
            wgpu::TextureFormat::Rgba8Unorm,
            Quality::Fast,
            move |ok, _| outcomes.borrow_mut().push((index, ok)),
        );
    }
    assert_eq!(scaler.pending_readbacks(), 3);

    // Teardown with requests still in flight: exactly one callback per
    // request, all false, front-to-back.
    drop(scaler);
    assert_eq!(*outcomes.borrow(), vec![(0, false), (1, false), (2, false)]);
}

fn run_yuv_round_trip(use_mrt: bool, quality: Quality, w: u32, h: u32) {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let pipeline = scaler
        .create_readback_pipeline_yuv(quality, Size::new(w, h), Rect::new(0, 0, w, h), Size::new(w, h), false, use_mrt)
        .expect("even destination");
    assert_eq!(pipeline.uses_mrt(), use_mrt);

    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    pipeline.readback(
        &mut scaler,
        &source_view,
        Rect::new(0, 0, w, h),
        YuvPlanes::allocate(Size::new(w, h)),
        (0, 0),
        move |ok, planes| {
            *slot.borrow_mut() = Some((ok, planes));
        },
    );
    scaler.wait_for_completions();

    let (ok, planes) = result.borrow_mut().take().expect("callback fired");
    assert!(ok);

    let (y_ref, u_ref, v_ref) = reference_yuv(&pattern, w as usize, h as usize);
    let label = if use_mrt { "mrt" } else { "three-pass" };
    assert_bytes_close(&planes.y, &y_ref, 2, &format!("{label} y plane"));
    assert_bytes_close(&planes.u, &u_ref, 2, &format!("{label} u plane"));
    assert_bytes_close(&planes.v, &v_ref, 2, &format!("{label} v plane"));
}

#[test]
fn yuv_round_trip_three_pass() {
    run_yuv_round_trip(false, Quality::Good, 128, 72);
}

#[test]
fn yuv_round_trip_mrt() {
    run_yuv_round_trip(true, Quality::Good, 128, 72);
}

#[test]
fn yuv_round_trip_mrt_fast_fused() {
    // Fast quality with MRT skips the separate scale pass and samples the
    // source directly from pass 1.
    run_yuv_round_trip(true, Quality::Fast, 128, 72);
}

#[test]
fn yuv_round_trip_unaligned_packing() {
    // 118 is even but not a multiple of 4 (nor 59 of the chroma packing),
    // so the last packed texel of each row carries clamped padding samples.
    run_yuv_round_trip(false, Quality::Good, 118, 62);
}

#[test]
fn yuv_paste_writes_only_the_pasted_region() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    let (w, h) = (32u32, 16u32);
    let pattern = test_pattern(w, h);
    let source = upload_rgba(&device, &queue, w, h, &pattern);
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

    let frame = Size::new(96, 64);
    let paste = (4u32, 2u32);
    let mut planes = YuvPlanes::allocate(frame);
    planes.y.fill(0x55);
    planes.u.fill(0x55);
    planes.v.fill(0x55);

    let pipeline = scaler
        .create_readback_pipeline_yuv(Quality::Good, Size::new(w, h), Rect::new(0, 0, w, h), Size::new(w, h), false, false)
        .expect("even destination");

    let result = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&result);
    pipeline.readback(&mut scaler, &source_view, Rect::of_size(frame), planes, paste, move |ok, planes| {
        *slot.borrow_mut() = Some((ok, planes));
    });
    scaler.wait_for_completions();

    let (ok, planes) = result.borrow_mut().take().expect("callback fired");
    assert!(ok);

    let (y_ref, u_ref, v_ref) = reference_yuv(&pattern, w as usize, h as usize);
    let checks = [
        (&planes.y, &y_ref, planes.y_stride, paste.0 as usize, paste.1 as usize, w as usize, h as usize, "y"),
        (&planes.u, &u_ref, planes.u_stride, paste.0 as usize / 2, paste.1 as usize / 2, w as usize / 2, h as usize / 2, "u"),
        (&planes.v, &v_ref, planes.v_stride, paste.0 as usize / 2, paste.1 as usize / 2, w as usize / 2, h as usize / 2, "v"),
    ];
    for (plane, reference, stride, px, py, rw, rh, label) in checks {
        for (row_index, row) in plane.chunks(stride).enumerate() {
            for (col_index, &byte) in row.iter().enumerate() {
                let inside = row_index >= py && row_index < py + rh && col_index >= px && col_index < px + rw;
                if inside {
                    let expected = reference[(row_index - py) * rw + (col_index - px)];
                    let diff = (byte as i32 - expected as i32).abs();
                    assert!(diff <= 2, "{label} plane ({col_index}, {row_index}): {byte} vs {expected}");
                } else {
                    assert_eq!(byte, 0x55, "{label} plane ({col_index}, {row_index}): surrounding area must stay untouched");
                }
            }
        }
    }
}

#[test]
fn yuv_rejects_bad_geometry() {
    let Some((device, queue)) = create_context() else { return };
    let mut scaler = TextureScaler::new(device.clone(), queue.clone());

    // Odd destination sizes violate the 4:2:0 contract at construction.
    assert!(
        scaler
            .create_readback_pipeline_yuv(Quality::Good, Size::new(64, 64), Rect::new(0, 0, 64, 64), Size::new(33, 17), false, false)
            .is_err()
    );

    let source = upload_rgba(&device, &queue, 64, 64, &test_pattern(64, 64));
    let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
    let pipeline = scaler
        .create_readback_pipeline_yuv(Quality::Good, Size::new(64, 64), Rect::new(0, 0, 64, 64), Size::new(32, 16), false, false)
        .expect("even destination");

    // Odd paste coordinates fail the single request, synchronously.
    let fired = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&fired);
    pipeline.readback(
        &mut scaler,
        &source_view,
        Rect::new(0, 0, 64, 64),
        YuvPlanes::allocate(Size::new(64, 64)),
        (1, 0),
        move |ok, _| {
            *slot.borrow_mut() = Some(ok);
        },
    );
    assert_eq!(*fired.borrow(), Some(false));
    assert_eq!(scaler.pending_readbacks(), 0);
}
