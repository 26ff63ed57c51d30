//! The damage queue: accumulates dirty device-space rects between render
//! ticks and hands the renderer one coalesced region to redraw.
//!
//! Shape is lifted from another hobby-OS compositor's queue,
//! `Fabbboy-slopos/video/src/compositor/queue.rs`'s `EventQueue`: a
//! lock-guarded collection behind an `AtomicBool` pending flag so callers can
//! skip the lock on the common "nothing to do" path, with a single
//! `drain`-style method the render loop owns exclusively. Unlike that queue,
//! entries here are merged into one running union rect rather than kept as a
//! list — the renderer wants to see one damage region, not a backlog of
//! individual events, and an upper-bounded rect union needs no capacity
//! limit.
//!
//! This queue's internal lock (`region`, below) is the `update_list_lock` of
//! the two-lock discipline described in `compositor.rs`: every thread that
//! calls `mark` takes it, always without holding `redraw_lock` at the same
//! time.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::geometry::Rect;

pub struct DamageQueue {
    region: Mutex<Option<Rect>>,
    pending: AtomicBool,
}

impl DamageQueue {
    pub fn new() -> Self {
        DamageQueue {
            region: Mutex::new(None),
            pending: AtomicBool::new(false),
        }
    }

    /// Mark `rect` (device space) dirty, merging it into the running union.
    pub fn mark(&self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut guard = self.region.lock();
        *guard = Some(match *guard {
            Some(existing) => existing.union(&rect),
            None => rect,
        });
        self.pending.store(true, Ordering::Release);
    }

    /// Lock-free hint; the authoritative check happens in `drain`.
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Take the accumulated region, leaving the queue clean. Called once per
    /// render tick, and only from the render thread.
    pub fn drain(&self) -> Option<Rect> {
        self.pending.store(false, Ordering::Release);
        self.region.lock().take()
    }
}

impl Default for DamageQueue {
    fn default() -> Self {
        Self::new()
    }
}
