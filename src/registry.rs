//! The window registry: owns every `Window`, keyed by id, and the index
//! from client to the windows it owns. Grounded in anyOS's
//! `desktop/window.rs` (`create_window` / `create_ipc_window` /
//! `destroy_window`), generalized from "one desktop, many app windows" to
//! "many clients, each owning any number of windows".
//!
//! The resize handshake fields (`newbufid` / `newbuffer` / `pending_resize_wh`)
//! and the four-message exchange they support come from ToaruOS's
//! compositor; anyOS never implements this (its windows resize in place, no
//! separate offer/accept round trip).

use std::collections::HashMap;

use crate::geometry::Rect;
use crate::shm::{window_buffer_key, ShmFacility, ShmRegion};
use crate::transport::ClientId;
use crate::window::{AnimMode, Window, WindowId, ZTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    UnknownWindow(WindowId),
    NotOwner,
    NoHandshakeInFlight,
}

pub struct WindowRegistry {
    windows: HashMap<WindowId, Window>,
    by_owner: HashMap<ClientId, Vec<WindowId>>,
    next_wid: u32,
    server_ident: String,
}

impl WindowRegistry {
    pub fn new(server_ident: impl Into<String>) -> Self {
        WindowRegistry {
            windows: HashMap::new(),
            by_owner: HashMap::new(),
            next_wid: 1,
            server_ident: server_ident.into(),
        }
    }

    /// Create a new window owned by `owner`, backed by a freshly allocated
    /// shm buffer. Returns the new id and the
    /// allocated buffer's key, so the caller can reply with both.
    pub fn create(
        &mut self,
        owner: ClientId,
        width: u32,
        height: u32,
        shm: &dyn ShmFacility,
        tick: u64,
    ) -> (WindowId, ShmRegion) {
        let wid = WindowId(self.next_wid);
        self.next_wid += 1;
        let bufid = 1;
        let key = window_buffer_key(&self.server_ident, wid.0, bufid);
        let region = shm.allocate(&key, 4 * width as usize * height as usize);
        let window = Window::new(wid, owner, width, height, region.clone(), bufid, tick);
        self.windows.insert(wid, window);
        self.by_owner.entry(owner).or_default().push(wid);
        (wid, region)
    }

    pub fn get(&self, wid: WindowId) -> Option<&Window> {
        self.windows.get(&wid)
    }

    pub fn get_mut(&mut self, wid: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&wid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    pub fn windows_of(&self, owner: ClientId) -> &[WindowId] {
        self.by_owner.get(&owner).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn check_owner(&self, wid: WindowId, owner: ClientId) -> Result<(), RegistryError> {
        match self.windows.get(&wid) {
            None => Err(RegistryError::UnknownWindow(wid)),
            Some(w) if w.owner != owner => Err(RegistryError::NotOwner),
            Some(_) => Ok(()),
        }
    }

    /// `MOVE`: absolute reposition, owner-checked.
    pub fn move_to(&mut self, wid: WindowId, owner: ClientId, x: i32, y: i32) -> Result<Rect, RegistryError> {
        self.check_owner(wid, owner)?;
        let w = self.windows.get_mut(&wid).unwrap();
        let before = w.rect();
        w.x = x;
        w.y = y;
        Ok(before.union(&w.rect()))
    }

    /// Step 1 of resize: client offers a new size and a freshly allocated
    /// buffer it has already written into; registry stages it without
    /// disturbing the currently composited buffer.
    pub fn resize_offer(
        &mut self,
        wid: WindowId,
        owner: ClientId,
        new_w: u32,
        new_h: u32,
        shm: &dyn ShmFacility,
    ) -> Result<(u32, ShmRegion), RegistryError> {
        self.check_owner(wid, owner)?;
        let w = self.windows.get_mut(&wid).unwrap();
        let newbufid = w.bufid.wrapping_add(1).max(1);
        let key = window_buffer_key(&self.server_ident, wid.0, newbufid);
        let region = shm.allocate(&key, 4 * new_w as usize * new_h as usize);
        w.newbufid = newbufid;
        w.newbuffer = Some(region.clone());
        w.pending_resize_wh = Some((new_w, new_h));
        Ok((newbufid, region))
    }

    /// Step 2: client accepted, compositor promotes the staged buffer to be
    /// the live one.
    pub fn resize_finish(&mut self, wid: WindowId, owner: ClientId) -> Result<Rect, RegistryError> {
        self.check_owner(wid, owner)?;
        let w = self.windows.get_mut(&wid).unwrap();
        if !w.in_resize_handshake() {
            return Err(RegistryError::NoHandshakeInFlight);
        }
        let before = w.rect();
        if let Some((nw, nh)) = w.pending_resize_wh.take() {
            w.width = nw;
            w.height = nh;
        }
        w.buffer = w.newbuffer.take();
        w.bufid = w.newbufid;
        w.newbufid = 0;
        Ok(before.union(&w.rect()))
    }

    /// Actual removal: drops the window and its registry indices. Called
    /// only once a window's fade-out animation has run its course — never
    /// directly from a `CLOSE` request, which only stages the window via
    /// `mark_for_close`.
    /// Returns the damage region the caller should mark before the window
    /// disappears.
    pub fn close(&mut self, wid: WindowId, owner: ClientId) -> Result<Rect, RegistryError> {
        self.check_owner(wid, owner)?;
        let w = self.windows.remove(&wid).unwrap();
        if let Some(list) = self.by_owner.get_mut(&owner) {
            list.retain(|&id| id != wid);
        }
        Ok(w.rect())
    }

    /// `CLOSE`: stages the window for its fade-out instead of removing it
    /// immediately. It drops out of the client index right away (so a
    /// second `CLOSE`/a lookup by owner no longer sees it) but stays
    /// composable under `AnimMode::FadeOut` until the render loop's
    /// `windows_to_remove` drain actually calls `close`.
    pub fn mark_for_close(&mut self, wid: WindowId, owner: ClientId, tick: u64) -> Result<(), RegistryError> {
        self.check_owner(wid, owner)?;
        if let Some(list) = self.by_owner.get_mut(&owner) {
            list.retain(|&id| id != wid);
        }
        let w = self.windows.get_mut(&wid).unwrap();
        w.anim_mode = AnimMode::FadeOut;
        w.anim_start = tick;
        Ok(())
    }

    /// A client disconnected: stage every window it owned for fade-out
    /// removal rather than dropping them immediately, the same two-phase
    /// lifecycle as `mark_for_close`.
    pub fn mark_client_closing(&mut self, owner: ClientId, tick: u64) -> Option<Rect> {
        let wids = self.by_owner.remove(&owner)?;
        let mut damage: Option<Rect> = None;
        for wid in wids {
            if let Some(w) = self.windows.get_mut(&wid) {
                w.anim_mode = AnimMode::FadeOut;
                w.anim_start = tick;
                damage = Some(match damage {
                    Some(d) => d.union(&w.rect()),
                    None => w.rect(),
                });
            }
        }
        damage
    }

    pub fn set_tier(&mut self, wid: WindowId, tier: ZTier) -> Result<(), RegistryError> {
        self.windows
            .get_mut(&wid)
            .map(|w| w.tier = tier)
            .ok_or(RegistryError::UnknownWindow(wid))
    }

    /// Rotate a window by `delta` degrees (wrapped to `[0, 360)`), as driven
    /// by the rotate-cw/ccw key chords. Not owner-checked: this is the
    /// compositor acting on the currently focused window, not a client
    /// request against a window it may not own.
    pub fn rotate_by(&mut self, wid: WindowId, delta: i64) -> Result<Rect, RegistryError> {
        let w = self.windows.get_mut(&wid).ok_or(RegistryError::UnknownWindow(wid))?;
        let before = crate::geometry::aabb_of_rect_in_device(w.x, w.y, w.width, w.height, w.rotation, 0, 0, w.width, w.height);
        w.rotation = (w.rotation + delta).rem_euclid(360);
        let after = crate::geometry::aabb_of_rect_in_device(w.x, w.y, w.width, w.height, w.rotation, 0, 0, w.width, w.height);
        Ok(before.union(&after))
    }

    /// Reset a window's rotation to 0, as driven by the reset-rotation chord.
    pub fn reset_rotation(&mut self, wid: WindowId) -> Result<Rect, RegistryError> {
        let w = self.windows.get_mut(&wid).ok_or(RegistryError::UnknownWindow(wid))?;
        let before = crate::geometry::aabb_of_rect_in_device(w.x, w.y, w.width, w.height, w.rotation, 0, 0, w.width, w.height);
        w.rotation = 0;
        Ok(before.union(&w.rect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::HeapShm;

    #[test]
    fn create_allocates_a_live_buffer() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, region) = reg.create(ClientId(1), 10, 10, &shm, 0);
        assert_eq!(region.len(), 400);
        assert_eq!(reg.get(wid).unwrap().width, 10);
        assert_eq!(reg.windows_of(ClientId(1)), &[wid]);
    }

    #[test]
    fn move_by_non_owner_is_rejected() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        assert_eq!(reg.move_to(wid, ClientId(2), 5, 5), Err(RegistryError::NotOwner));
    }

    #[test]
    fn resize_handshake_promotes_new_buffer() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        let (newbufid, _) = reg.resize_offer(wid, ClientId(1), 20, 20, &shm).unwrap();
        assert!(reg.get(wid).unwrap().in_resize_handshake());
        reg.resize_finish(wid, ClientId(1)).unwrap();
        let w = reg.get(wid).unwrap();
        assert_eq!((w.width, w.height), (20, 20));
        assert_eq!(w.bufid, newbufid);
        assert!(!w.in_resize_handshake());
    }

    #[test]
    fn finish_without_offer_errors() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        assert_eq!(reg.resize_finish(wid, ClientId(1)), Err(RegistryError::NoHandshakeInFlight));
    }

    #[test]
    fn mark_client_closing_fades_out_all_its_windows_without_removing_them() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (w1, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        let (w2, _) = reg.create(ClientId(1), 5, 5, &shm, 0);
        let damage = reg.mark_client_closing(ClientId(1), 42);
        assert!(damage.is_some());
        assert_eq!(reg.get(w1).unwrap().anim_mode, AnimMode::FadeOut);
        assert_eq!(reg.get(w2).unwrap().anim_mode, AnimMode::FadeOut);
        assert_eq!(reg.get(w1).unwrap().anim_start, 42);
        assert!(reg.windows_of(ClientId(1)).is_empty());
    }

    #[test]
    fn mark_for_close_stages_fadeout_and_drops_from_owner_index() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        reg.mark_for_close(wid, ClientId(1), 7).unwrap();
        assert_eq!(reg.get(wid).unwrap().anim_mode, AnimMode::FadeOut);
        assert!(reg.windows_of(ClientId(1)).is_empty());
    }

    #[test]
    fn close_unknown_window_errors() {
        let mut reg = WindowRegistry::new("test");
        assert_eq!(reg.close(WindowId(999), ClientId(1)), Err(RegistryError::UnknownWindow(WindowId(999))));
    }

    #[test]
    fn rotate_by_wraps_into_0_360() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        reg.rotate_by(wid, -5).unwrap();
        assert_eq!(reg.get(wid).unwrap().rotation, 355);
    }

    #[test]
    fn reset_rotation_clears_it_back_to_zero() {
        let mut reg = WindowRegistry::new("test");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 10, 10, &shm, 0);
        reg.rotate_by(wid, 40).unwrap();
        reg.reset_rotation(wid).unwrap();
        assert_eq!(reg.get(wid).unwrap().rotation, 0);
    }
}
