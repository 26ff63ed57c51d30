//! The render loop: fixed 60Hz cadence, damage-driven composition.
//!
//! Frame pacing is carried over from anyOS's `render_thread_entry`
//! (`render.rs`): sleep only the cadence remainder after the frame's own
//! work, using `Instant`/`Duration` in place of `sys::uptime_ms`. The scene
//! lock is only ever held for the composite pass itself, never across the
//! sleep, so a contended protocol thread is blocked for at most one frame's
//! worth of compositing.

use std::collections::HashMap;
use std::time::Duration;

use crate::backend::GraphicsBackend;
use crate::compositor::Compositor;
use crate::geometry::{aabb_of_rect_in_device, device_to_window, Rect};
use crate::input::{resize_from_corner, Interaction};
use crate::window::{anim_length, AnimMode, WindowId, ZTier};

pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// 64x64 footprint the cursor damages at its old and new position every
/// time it moves, centered on the pointer.
const CURSOR_FOOTPRINT: u32 = 64;

/// Per-window render parameters resolved once per composited frame: the
/// fade-envelope alpha (0..255) and, for animating middle-tier windows, the
/// `0.75 + 0.25*(frame/256)` size envelope about the window's center.
#[derive(Clone, Copy)]
struct RenderParams {
    alpha_scale: u32,
    size_scale: f64,
}

impl Default for RenderParams {
    fn default() -> Self {
        RenderParams { alpha_scale: 255, size_scale: 1.0 }
    }
}

/// Composite one frame: mark cursor/animation damage, drain it, walk paint
/// order back to front blitting each composable window through its
/// rotation/scale/fade envelope, draw the live resize box and cursor, and
/// present. `draw_cursor` is false in nested mode, where the host compositor
/// draws its own cursor over the embedded surface.
///
/// Returns `None` if there was nothing to do (no pending damage), so the
/// caller can skip the present call entirely; otherwise the damage rect
/// actually composited, so a nested host can forward just those pixels.
pub fn composite_frame(comp: &Compositor, backend: &mut dyn GraphicsBackend, draw_cursor: bool) -> Option<Rect> {
    let tick = comp.advance_tick();
    mark_cursor_damage(comp);
    mark_animation_damage(comp);

    let Some(damage) = comp.damage.drain() else { return None };

    let mut scene = comp.redraw_lock.lock();
    let order: Vec<WindowId> = scene.zorder.paint_order().collect();

    let mut params = HashMap::new();
    let mut finished_fadeout = Vec::new();
    for &wid in &order {
        let Some(window) = scene.registry.get_mut(wid) else { continue };
        if window.anim_mode == AnimMode::None {
            continue;
        }
        let length = anim_length(window.anim_mode);
        let frame = tick.saturating_sub(window.anim_start);
        if frame >= length {
            if window.anim_mode == AnimMode::FadeOut {
                finished_fadeout.push(wid);
            }
            window.anim_mode = AnimMode::None;
            continue;
        }
        let t = frame as f64 / 256.0;
        let alpha_scale = match window.anim_mode {
            AnimMode::FadeIn => (t * 255.0) as u32,
            AnimMode::FadeOut => (255.0 - t * 255.0) as u32,
            AnimMode::None => 255,
        };
        let size_scale = if window.tier == ZTier::Middle { 0.75 + 0.25 * t } else { 1.0 };
        params.insert(wid, RenderParams { alpha_scale, size_scale });
    }
    for wid in finished_fadeout {
        if !scene.windows_to_remove.contains(&wid) {
            scene.windows_to_remove.push(wid);
        }
    }

    for &wid in &order {
        let Some(window) = scene.registry.get(wid) else { continue };
        if !window.is_composable() {
            continue;
        }
        let Some(buffer) = &window.buffer else { continue };
        let p = params.get(&wid).copied().unwrap_or_default();
        let rotation = if window.tier == ZTier::Middle { window.rotation } else { 0 };

        buffer.with_pixels(|pixels| {
            let words = words_from_bytes(pixels);
            let (rotated, rw, rh, rx, ry) = if rotation % 360 != 0 {
                rotate_pixels_nn(&words, window.width, window.height, rotation)
            } else {
                (words, window.width, window.height, 0, 0)
            };
            let (scaled, sw, sh, sx, sy) = if p.size_scale != 1.0 {
                scale_pixels_nn(&rotated, rw, rh, p.size_scale)
            } else {
                (rotated, rw, rh, 0, 0)
            };
            let dst_x = window.x + rx + sx;
            let dst_y = window.y + ry + sy;
            let Some(clip) = Rect::new(dst_x, dst_y, sw, sh).intersect(&damage) else { return };

            if p.alpha_scale >= 255 {
                backend.blit(&scaled, sw, sh, dst_x, dst_y, clip);
            } else {
                let faded: Vec<u32> = scaled.iter().map(|&px| scale_alpha(px, p.alpha_scale)).collect();
                backend.blit(&faded, sw, sh, dst_x, dst_y, clip);
            }
        });
    }

    let debug = *comp.debug.lock();
    if debug.hit_shapes || debug.bounds {
        for &wid in &order {
            let Some(window) = scene.registry.get(wid) else { continue };
            if !window.is_composable() {
                continue;
            }
            if debug.bounds {
                draw_outline(backend, window.rect(), damage, OUTLINE_BOUNDS_COLOR);
            }
            if debug.hit_shapes {
                let rotation = if window.tier == ZTier::Middle { window.rotation } else { 0 };
                let footprint = aabb_of_rect_in_device(window.x, window.y, window.width, window.height, rotation, 0, 0, window.width, window.height);
                let scale = params.get(&wid).copied().unwrap_or_default().size_scale;
                draw_outline(backend, scale_rect_about_center(footprint, scale), damage, OUTLINE_HIT_SHAPE_COLOR);
            }
        }
    }

    if let Some(box_rect) = resizing_box(comp) {
        if let Some(clip) = box_rect.intersect(&damage) {
            let pixels = vec![RESIZE_BOX_COLOR; (box_rect.width * box_rect.height) as usize];
            backend.blit(&pixels, box_rect.width, box_rect.height, box_rect.x, box_rect.y, clip);
        }
    }

    if draw_cursor {
        let (cx, cy) = comp.input.lock().screen_pos();
        let cursor_rect = Rect::new(cx, cy, CURSOR_SIZE, CURSOR_SIZE);
        if let Some(clip) = cursor_rect.intersect(&damage) {
            let pixels = vec![CURSOR_COLOR; (CURSOR_SIZE * CURSOR_SIZE) as usize];
            backend.blit(&pixels, CURSOR_SIZE, CURSOR_SIZE, cx, cy, clip);
        }
    }

    drop(scene);
    backend.present(damage);
    close_removed_windows(comp);
    Some(damage)
}

/// If the cursor moved since the last composited frame, damage both its old
/// and new 64x64 footprint and record the new position.
fn mark_cursor_damage(comp: &Compositor) {
    let (cx, cy) = comp.input.lock().screen_pos();
    let mut last = comp.last_cursor.lock();
    if (cx, cy) != *last {
        comp.damage.mark(cursor_footprint(last.0, last.1));
        comp.damage.mark(cursor_footprint(cx, cy));
        *last = (cx, cy);
    }
}

fn cursor_footprint(x: i32, y: i32) -> Rect {
    let half = (CURSOR_FOOTPRINT / 2) as i32;
    Rect::new(x - half, y - half, CURSOR_FOOTPRINT, CURSOR_FOOTPRINT)
}

/// Every window with an active fade animation repaints every tick, since
/// its alpha (and, for middle-tier windows, its size) changes each frame.
fn mark_animation_damage(comp: &Compositor) {
    let scene = comp.redraw_lock.lock();
    for wid in scene.zorder.paint_order() {
        if let Some(w) = scene.registry.get(wid) {
            if w.anim_mode != AnimMode::None {
                comp.damage.mark(w.rect());
            }
        }
    }
}

/// The live resize box for the window currently being Alt+Middle-dragged,
/// in its current (not yet committed) geometry.
fn resizing_box(comp: &Compositor) -> Option<Rect> {
    let input = comp.input.lock();
    match input.interaction {
        Interaction::Resizing { start, start_mouse, .. } => {
            let (sx, sy) = input.screen_pos();
            Some(resize_from_corner(start, sx - start_mouse.0, sy - start_mouse.1))
        }
        _ => None,
    }
}

/// Drain `windows_to_remove`, closing each one (releasing its buffer and
/// clearing it from every index) now that its fade-out has finished
/// painting for the last time, and only then broadcasting `WindowClosed` —
/// subscribers see the window vanish, not merely start fading.
fn close_removed_windows(comp: &Compositor) {
    let to_remove = {
        let mut scene = comp.redraw_lock.lock();
        std::mem::take(&mut scene.windows_to_remove)
    };
    for wid in to_remove {
        let mut scene = comp.redraw_lock.lock();
        let Some(owner) = scene.registry.get(wid).map(|w| w.owner) else { continue };
        if let Ok(rect) = scene.registry.close(wid, owner) {
            scene.zorder.remove(wid);
            drop(scene);
            comp.damage.mark(rect);
            let encoded = crate::protocol::Message::WindowClosed { wid }.encode();
            comp.transport.broadcast(&encoded, comp.subscribers().into_iter());
        }
    }
}

/// `anim_start..anim_start+anim_length` maps linearly to 0..255 for FadeIn,
/// 255..0 for FadeOut; outside that window (or `AnimMode::None`) the window
/// is fully opaque. Kept separate from the per-frame envelope computed in
/// `composite_frame` (which also needs the size scale) so it stays testable
/// in isolation.
fn fade_alpha_scale(mode: AnimMode, start: u64, tick: u64) -> u32 {
    let length = anim_length(mode);
    if length == 0 || mode == AnimMode::None {
        return 255;
    }
    let elapsed = tick.saturating_sub(start);
    if elapsed >= length {
        return 255;
    }
    let t = (elapsed * 255 / length) as u32;
    match mode {
        AnimMode::FadeIn => t,
        AnimMode::FadeOut => 255 - t,
        AnimMode::None => 255,
    }
}

fn scale_alpha(pixel: u32, scale: u32) -> u32 {
    let a = (pixel >> 24) & 0xFF;
    let scaled_a = (a * scale) / 255;
    (pixel & 0x00FF_FFFF) | (scaled_a << 24)
}

/// Resample a window-local buffer through its rotation, nearest-neighbor,
/// returning the resampled pixels plus the AABB's size and its offset from
/// the window's own origin (both in device space).
fn rotate_pixels_nn(words: &[u32], w: u32, h: u32, rotation: i64) -> (Vec<u32>, u32, u32, i32, i32) {
    let aabb = aabb_of_rect_in_device(0, 0, w, h, rotation, 0, 0, w, h);
    let mut out = vec![0u32; (aabb.width * aabb.height) as usize];
    for oy in 0..aabb.height as i32 {
        for ox in 0..aabb.width as i32 {
            let (lx, ly) = device_to_window(0, 0, w, h, rotation, aabb.x + ox, aabb.y + oy);
            if lx >= 0 && ly >= 0 && (lx as u32) < w && (ly as u32) < h {
                out[(oy as u32 * aabb.width + ox as u32) as usize] = words[(ly as u32 * w + lx as u32) as usize];
            }
        }
    }
    (out, aabb.width, aabb.height, aabb.x, aabb.y)
}

/// Resample `words` to `scale` its size, nearest-neighbor, returning the new
/// buffer plus the offset that keeps it centered on the original rect.
fn scale_pixels_nn(words: &[u32], w: u32, h: u32, scale: f64) -> (Vec<u32>, u32, u32, i32, i32) {
    let new_w = ((w as f64) * scale).round().max(1.0) as u32;
    let new_h = ((h as f64) * scale).round().max(1.0) as u32;
    let mut out = vec![0u32; (new_w * new_h) as usize];
    for oy in 0..new_h {
        for ox in 0..new_w {
            let sx = ((ox as f64 / scale) as u32).min(w.saturating_sub(1));
            let sy = ((oy as f64 / scale) as u32).min(h.saturating_sub(1));
            out[(oy * new_w + ox) as usize] = words[(sy * w + sx) as usize];
        }
    }
    let offset_x = (w as i32 - new_w as i32) / 2;
    let offset_y = (h as i32 - new_h as i32) / 2;
    (out, new_w, new_h, offset_x, offset_y)
}

/// Decode a raw ARGB32 byte buffer into `u32` pixels, little-endian.
/// `ShmRegion` stores bytes because the wire/shm contract is byte-addressed;
/// composition wants words, so every frame pays one copy per composable
/// window. Fine for the software backend; a VRAM-mapped backend would blit
/// straight from the byte buffer instead.
fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// One-pixel-wide outline around `rect`, clipped to `damage`, drawn as four
/// thin edge blits since the backend has no dedicated stroke-rect primitive.
fn draw_outline(backend: &mut dyn GraphicsBackend, rect: Rect, damage: Rect, color: u32) {
    if rect.is_empty() {
        return;
    }
    let edges = [
        Rect::new(rect.x, rect.y, rect.width, 1),
        Rect::new(rect.x, rect.bottom() - 1, rect.width, 1),
        Rect::new(rect.x, rect.y, 1, rect.height),
        Rect::new(rect.right() - 1, rect.y, 1, rect.height),
    ];
    for edge in edges {
        if let Some(clip) = edge.intersect(&damage) {
            let pixels = vec![color; (edge.width * edge.height) as usize];
            backend.blit(&pixels, edge.width, edge.height, edge.x, edge.y, clip);
        }
    }
}

/// Scale `rect` about its own center, the same envelope `scale_pixels_nn`
/// applies to pixel content, but for an already-device-space rect rather
/// than a pixel buffer.
fn scale_rect_about_center(rect: Rect, scale: f64) -> Rect {
    if scale == 1.0 {
        return rect;
    }
    let new_w = ((rect.width as f64) * scale).round().max(1.0) as u32;
    let new_h = ((rect.height as f64) * scale).round().max(1.0) as u32;
    let x = rect.x + (rect.width as i32 - new_w as i32) / 2;
    let y = rect.y + (rect.height as i32 - new_h as i32) / 2;
    Rect::new(x, y, new_w, new_h)
}

const CURSOR_SIZE: u32 = 11;
const CURSOR_COLOR: u32 = 0xFFE0E0E0;
const RESIZE_BOX_COLOR: u32 = 0x803070FF;
const OUTLINE_BOUNDS_COLOR: u32 = 0xFF3070FF;
const OUTLINE_HIT_SHAPE_COLOR: u32 = 0xFFFF3030;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FramebufferBackend;
    use crate::shm::HeapShm;
    use crate::transport::ClientId;

    #[test]
    fn no_pending_damage_skips_present() {
        let comp = Compositor::new(16, 16, Box::new(HeapShm), "t");
        let mut backend = FramebufferBackend::new(16, 16);
        assert!(composite_frame(&comp, &mut backend, true).is_none());
        assert!(backend.present_history().is_empty());
    }

    #[test]
    fn composite_frame_blits_an_opaque_window() {
        let comp = Compositor::new(16, 16, Box::new(HeapShm), "t");
        {
            let mut scene = comp.redraw_lock.lock();
            let (wid, region) = scene.registry.create(ClientId(1), 4, 4, &*comp.shm, 0);
            region.with_pixels_mut(|p| {
                for px in p.chunks_exact_mut(4) {
                    px[3] = 255;
                }
            });
            scene.registry.get_mut(wid).unwrap().anim_mode = AnimMode::None;
            let tier = scene.registry.get(wid).unwrap().tier;
            scene.zorder.insert(wid, tier);
        }
        comp.damage.mark(Rect::new(0, 0, 16, 16));
        let mut backend = FramebufferBackend::new(16, 16);
        assert!(composite_frame(&comp, &mut backend, true).is_some());
        assert_eq!(backend.present_history().len(), 1);
    }

    #[test]
    fn fade_in_scales_alpha_midway() {
        let half = fade_alpha_scale(AnimMode::FadeIn, 0, 128);
        assert!(half > 100 && half < 150);
        assert_eq!(fade_alpha_scale(AnimMode::FadeIn, 0, 1000), 255);
    }

    #[test]
    fn fade_out_reaches_zero_then_stays_opaque_flag() {
        assert_eq!(fade_alpha_scale(AnimMode::FadeOut, 0, 0), 255);
        let late = fade_alpha_scale(AnimMode::FadeOut, 0, 255);
        assert!(late < 10);
    }

    #[test]
    fn cursor_move_damages_old_and_new_footprint() {
        let comp = Compositor::new(200, 200, Box::new(HeapShm), "t");
        comp.input.lock().mouse_x = 100 * crate::input::MOUSE_SCALE;
        comp.input.lock().mouse_y = 100 * crate::input::MOUSE_SCALE;
        mark_cursor_damage(&comp);
        assert!(comp.damage.has_pending());
    }

    #[test]
    fn fadeout_completion_schedules_window_for_removal_and_closes_it() {
        let comp = Compositor::new(16, 16, Box::new(HeapShm), "t");
        let wid = {
            let mut scene = comp.redraw_lock.lock();
            let (wid, _) = scene.registry.create(ClientId(1), 4, 4, &*comp.shm, 0);
            let w = scene.registry.get_mut(wid).unwrap();
            w.anim_mode = AnimMode::FadeOut;
            w.anim_start = 0;
            let tier = w.tier;
            scene.zorder.insert(wid, tier);
            wid
        };
        comp.tick.store(10_000, std::sync::atomic::Ordering::Relaxed);
        comp.damage.mark(Rect::new(0, 0, 16, 16));
        let mut backend = FramebufferBackend::new(16, 16);
        composite_frame(&comp, &mut backend, true);
        assert!(comp.redraw_lock.lock().registry.get(wid).is_none());
    }

    #[test]
    fn resize_box_is_none_outside_resizing_state() {
        let comp = Compositor::new(100, 100, Box::new(HeapShm), "t");
        assert!(resizing_box(&comp).is_none());
    }

    #[test]
    fn bounds_debug_overlay_still_presents_a_frame() {
        let comp = Compositor::new(16, 16, Box::new(HeapShm), "t");
        {
            let mut scene = comp.redraw_lock.lock();
            let (wid, _) = scene.registry.create(ClientId(1), 4, 4, &*comp.shm, 0);
            scene.registry.get_mut(wid).unwrap().anim_mode = AnimMode::None;
            let tier = scene.registry.get(wid).unwrap().tier;
            scene.zorder.insert(wid, tier);
        }
        comp.debug.lock().bounds = true;
        comp.damage.mark(Rect::new(0, 0, 16, 16));
        let mut backend = FramebufferBackend::new(16, 16);
        assert!(composite_frame(&comp, &mut backend, true).is_some());
    }
}
