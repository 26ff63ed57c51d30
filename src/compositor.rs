//! The compositor context: the single struct every thread (protocol,
//! render, input-or-nested) shares. Mirrors anyOS's `Desktop` /
//! `compositor::Compositor` pairing, generalized from its
//! single-desktop-owns-one-spinlock model to a two-lock,
//! fixed-acquisition-order scheme.
//!
//! The concurrency model here calls for exactly two non-reentrant locks,
//! always acquired `redraw_lock` before `update_list_lock` when both are
//! needed, never the other way round — that fixed order is what prevents
//! the render thread and the protocol thread from deadlocking against each
//! other. `Scene` (registry, z-order, and the `WINDOW_ADVERTISE` subscriber
//! list — everything a redraw or a broadcast needs to read) sits behind
//! `redraw_lock`. `update_list_lock` is `damage.rs`'s own internal lock: it
//! guards the damage queue, nothing else, and is only ever taken on its own.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::damage::DamageQueue;
use crate::input::InputDispatcher;
use crate::registry::WindowRegistry;
use crate::shm::ShmFacility;
use crate::transport::{ChannelTransport, ClientId};
use crate::window::WindowId;
use crate::zorder::ZOrder;

/// Debug overlays toggled by the built-in `Ctrl+Shift+V`/`Ctrl+Shift+B`
/// chords. Flipping either one damages the whole screen so the next frame
/// redraws every window with (or without) its outline.
#[derive(Default, Clone, Copy)]
pub struct DebugFlags {
    /// Outline each window's rotated/scaled on-screen footprint.
    pub hit_shapes: bool,
    /// Outline each window's unrotated logical rect.
    pub bounds: bool,
}

/// Everything a redraw needs: the window set, its stacking order, and the
/// set of clients subscribed to `WINDOW_ADVERTISE` broadcasts. Always
/// accessed together, so one lock covers all three.
pub struct Scene {
    pub registry: WindowRegistry,
    pub zorder: ZOrder,
    pub subscribers: Vec<ClientId>,
    /// Windows whose closing animation (`AnimMode::FadeOut`) has completed;
    /// the render tick drains this at the end of each frame and actually
    /// removes them from the registry only then, so the fade-out plays out
    /// against a window that's still composable.
    pub windows_to_remove: Vec<WindowId>,
}

pub struct Compositor {
    pub redraw_lock: Mutex<Scene>,
    pub damage: DamageQueue,
    pub shm: Box<dyn ShmFacility>,
    pub transport: ChannelTransport,
    pub input: Mutex<InputDispatcher>,
    pub tick: AtomicU64,
    pub screen_w: u32,
    pub screen_h: u32,
    pub server_ident: String,
    /// Screen-space cursor position as of the last composited frame, used
    /// to damage both the old and new 64x64 cursor footprint when it moves.
    pub last_cursor: Mutex<(i32, i32)>,
    pub debug: Mutex<DebugFlags>,
}

impl Compositor {
    pub fn new(screen_w: u32, screen_h: u32, shm: Box<dyn ShmFacility>, server_ident: impl Into<String>) -> Self {
        let server_ident = server_ident.into();
        Compositor {
            redraw_lock: Mutex::new(Scene {
                registry: WindowRegistry::new(server_ident.clone()),
                zorder: ZOrder::new(),
                subscribers: Vec::new(),
                windows_to_remove: Vec::new(),
            }),
            damage: DamageQueue::new(),
            shm,
            transport: ChannelTransport::new(),
            input: Mutex::new(InputDispatcher::new()),
            tick: AtomicU64::new(0),
            screen_w,
            screen_h,
            server_ident,
            last_cursor: Mutex::new((0, 0)),
            debug: Mutex::new(DebugFlags::default()),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Advance the render tick by the fixed per-frame step (10 ticks/frame
    /// at 60 Hz), returning the new count.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(10, Ordering::Relaxed) + 10
    }

    /// Register a subscriber for `WINDOW_ADVERTISE` broadcasts.
    pub fn subscribe(&self, client: ClientId) {
        let mut scene = self.redraw_lock.lock();
        if !scene.subscribers.contains(&client) {
            scene.subscribers.push(client);
        }
    }

    pub fn unsubscribe(&self, client: ClientId) {
        self.redraw_lock.lock().subscribers.retain(|&c| c != client);
    }

    pub fn subscribers(&self) -> Vec<ClientId> {
        self.redraw_lock.lock().subscribers.clone()
    }

    /// Queue a window for removal at the end of the current render tick.
    pub fn queue_remove(&self, scene: &mut Scene, wid: WindowId) {
        if !scene.windows_to_remove.contains(&wid) {
            scene.windows_to_remove.push(wid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::HeapShm;

    #[test]
    fn subscribe_is_idempotent() {
        let c = Compositor::new(800, 600, Box::new(HeapShm), "test");
        c.subscribe(ClientId(1));
        c.subscribe(ClientId(1));
        assert_eq!(c.subscribers(), vec![ClientId(1)]);
    }

    #[test]
    fn unsubscribe_removes_client() {
        let c = Compositor::new(800, 600, Box::new(HeapShm), "test");
        c.subscribe(ClientId(1));
        c.unsubscribe(ClientId(1));
        assert!(c.subscribers().is_empty());
    }

    #[test]
    fn tick_advances_by_ten_each_frame() {
        let c = Compositor::new(800, 600, Box::new(HeapShm), "test");
        assert_eq!(c.advance_tick(), 10);
        assert_eq!(c.advance_tick(), 20);
        assert_eq!(c.tick_count(), 20);
    }

    #[test]
    fn queue_remove_is_idempotent() {
        let c = Compositor::new(800, 600, Box::new(HeapShm), "test");
        let (wid, _) = {
            let mut scene = c.redraw_lock.lock();
            let (wid, region) = scene.registry.create(ClientId(1), 10, 10, &*c.shm, 0);
            (wid, region)
        };
        let mut scene = c.redraw_lock.lock();
        c.queue_remove(&mut scene, wid);
        c.queue_remove(&mut scene, wid);
        assert_eq!(scene.windows_to_remove, vec![wid]);
    }
}
