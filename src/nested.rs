//! Nested-mode adapter: runs the compositor as a client of a host
//! environment — forwarding the host's input events into this compositor's
//! `InputDispatcher` and presenting composited frames via the host's own
//! client API instead of a raw framebuffer.
//!
//! The host's own transport/raster APIs are out of scope here as external
//! collaborators, so this module only defines the small trait boundary a
//! host adapter must satisfy (`NestedHost`) plus the glue that drives one
//! compositor tick from it. A real embedding supplies `NestedHost` itself
//! (e.g. backed by another compositor's own client library); tests here use
//! a recording fake.

use crate::backend::GraphicsBackend;
use crate::compositor::Compositor;
use crate::geometry::Rect;

/// A raw input event as delivered by the host environment, already
/// classified — translating host-specific wire formats into this shape is
/// the host adapter's job, not this module's.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HostEvent {
    MouseMove { dx: i32, dy: i32 },
    MouseButton { button: u32, down: bool },
    Key { key: u32, chr: u32, down: bool },
}

/// The host environment this compositor runs nested inside of.
pub trait NestedHost: Send {
    /// Non-blocking poll for the next queued host event, if any.
    fn poll_event(&mut self) -> Option<HostEvent>;

    /// Present a composited region to the host's own window.
    fn present(&mut self, pixels: &[u32], width: u32, height: u32, damage: Rect);
}

/// Drain all currently queued host events into the shared input dispatcher,
/// then composite and present one frame if anything changed. Returns the
/// number of host events processed.
pub fn pump(comp: &Compositor, host: &mut dyn NestedHost, backend: &mut dyn GraphicsBackend) -> usize {
    let mut processed = 0;
    while let Some(event) = host.poll_event() {
        processed += 1;
        match event {
            HostEvent::MouseMove { dx, dy } => {
                let mut scene = comp.redraw_lock.lock();
                let scene = &mut *scene;
                let mut input = comp.input.lock();
                input.move_mouse(dx, dy, &mut scene.registry, &scene.zorder, &comp.damage, comp.screen_w, comp.screen_h);
            }
            HostEvent::MouseButton { button, down } => {
                let mut scene = comp.redraw_lock.lock();
                let scene = &mut *scene;
                let mut input = comp.input.lock();
                input.button(button, down, &mut scene.registry, &mut scene.zorder, &comp.damage);
            }
            HostEvent::Key { key, chr, down } => {
                comp.input.lock().key(key, chr, down, comp.screen_w, comp.screen_h, 0);
            }
        }
    }

    if let Some(damage) = crate::render::composite_frame(comp, backend, false) {
        let pixels = backend.read_pixels(damage);
        host.present(&pixels, damage.width, damage.height, damage);
    }
    processed
}

/// A host-less stand-in for `NestedHost`, the same boundary role
/// `FramebufferBackend`/`HeapShm` play for their own traits: never queues an
/// event and discards every presented frame. Lets `-n`/`--nest` exercise the
/// real nested code path end to end without a genuine host environment to
/// embed in.
pub struct HeadlessNestedHost;

impl NestedHost for HeadlessNestedHost {
    fn poll_event(&mut self) -> Option<HostEvent> {
        None
    }

    fn present(&mut self, _pixels: &[u32], _width: u32, _height: u32, _damage: Rect) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FramebufferBackend;
    use crate::shm::HeapShm;
    use std::collections::VecDeque;

    struct FakeHost {
        queue: VecDeque<HostEvent>,
        presents: usize,
    }

    impl NestedHost for FakeHost {
        fn poll_event(&mut self) -> Option<HostEvent> {
            self.queue.pop_front()
        }
        fn present(&mut self, _pixels: &[u32], _width: u32, _height: u32, _damage: Rect) {
            self.presents += 1;
        }
    }

    #[test]
    fn pump_drains_all_queued_events() {
        let comp = Compositor::new(100, 100, Box::new(HeapShm), "t");
        let mut host = FakeHost { queue: VecDeque::from(vec![HostEvent::MouseMove { dx: 5, dy: 5 }]), presents: 0 };
        let mut backend = FramebufferBackend::new(100, 100);
        let n = pump(&comp, &mut host, &mut backend);
        assert_eq!(n, 1);
        assert_eq!(comp.input.lock().mouse_x, 5 * crate::input::MOUSE_SCALE);
    }

    #[test]
    fn pump_with_no_events_is_a_noop() {
        let comp = Compositor::new(100, 100, Box::new(HeapShm), "t");
        let mut host = FakeHost { queue: VecDeque::new(), presents: 0 };
        let mut backend = FramebufferBackend::new(100, 100);
        assert_eq!(pump(&comp, &mut host, &mut backend), 0);
    }

    #[test]
    fn pump_forwards_composited_pixels_to_the_host_on_damage() {
        let comp = Compositor::new(16, 16, Box::new(HeapShm), "t");
        comp.damage.mark(Rect::new(0, 0, 16, 16));
        let mut host = FakeHost { queue: VecDeque::new(), presents: 0 };
        let mut backend = FramebufferBackend::new(16, 16);
        pump(&comp, &mut host, &mut backend);
        assert_eq!(host.presents, 1);
    }

    #[test]
    fn headless_nested_host_never_queues_events() {
        let mut host = HeadlessNestedHost;
        assert!(host.poll_event().is_none());
        host.present(&[], 0, 0, Rect::new(0, 0, 0, 0));
    }
}
