//! Input dispatch and the interaction FSM: NORMAL, MOVING (Alt+Left drag
//! repositions the focused window), RESIZING (Alt+Middle drag), and
//! DRAGGING — the default plain-Left gesture, which focuses whatever is
//! under the pointer and tracks whether the pointer ever actually moved
//! before release, to tell a click from a raise-and-drag.
//!
//! Modeled on anyOS's `desktop/input.rs`: mouse moves are clamped to
//! the screen, the FSM state (there: `self.dragging` / `self.resizing`
//! `Option`s, here: one `Interaction` enum) gates whether a move repositions
//! a window or just updates hover/cursor state, and button-down does a
//! reverse-z-order hit test before deciding what the click means. The
//! hover-driven `Enter`/`Leave`/`MouseMove` bookkeeping and the
//! `key_binds` steal/pass split are new: anyOS has no client-registered
//! key bindings and no separate hover-vs-focus window concept.

use std::collections::HashMap;

use crate::damage::DamageQueue;
use crate::geometry::Rect;
use crate::keys::{lookup_chord, tile, tile_params, ChordAction};
use crate::registry::WindowRegistry;
use crate::transport::ClientId;
use crate::window::{WindowId, ZTier};
use crate::zorder::ZOrder;

/// Sub-pixel multiplier applied to every relative and absolute mouse move.
/// `mouse_x`/`mouse_y` are kept in this scaled space; divide by `MOUSE_SCALE`
/// to get a screen pixel.
pub const MOUSE_SCALE: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interaction {
    Normal,
    Moving {
        wid: WindowId,
        grab_dx: i32,
        grab_dy: i32,
    },
    Resizing {
        wid: WindowId,
        start: Rect,
        start_mouse: (i32, i32),
    },
    Dragging {
        wid: WindowId,
        local: (i32, i32),
        mouse_moved: bool,
    },
}

/// An action the protocol layer should carry out as a result of dispatching
/// one input event — the FSM here never touches the transport directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEffect {
    FocusChanged(WindowId),
    WindowMoved(WindowId),
    WindowResized(WindowId),
    TileRequested(WindowId, Rect),
    RotateRequested(WindowId, i64),
    ResetRotationRequested(WindowId),
    ToggleHitShapeDebug,
    ToggleBoundsDebug,
    ForwardKey { wid: WindowId, key: u32, chr: u32, mods: u32, down: bool },
    /// A key matched a client-registered `key_binds` entry.
    KeyBound { owner: ClientId, key: u32, chr: u32, mods: u32, down: bool },
    MouseMove { wid: WindowId, x: i32, y: i32 },
    MouseEnter { wid: WindowId, x: i32, y: i32 },
    MouseLeave { wid: WindowId },
    MouseDown { wid: WindowId, x: i32, y: i32 },
    MouseDrag { wid: WindowId, x: i32, y: i32 },
    MouseClick { wid: WindowId, x: i32, y: i32 },
    MouseRaise { wid: WindowId, x: i32, y: i32 },
}

pub struct InputDispatcher {
    /// Scaled mouse position; see `MOUSE_SCALE`.
    pub mouse_x: i32,
    pub mouse_y: i32,
    pub mouse_buttons: u32,
    pub mods: u32,
    pub interaction: Interaction,
    pub focus: Option<WindowId>,
    pub hover: Option<WindowId>,
    /// Packed `(mods<<24)|key` -> `(owner, steal)`. `steal == true` means the
    /// focused window never also sees the key.
    pub key_binds: HashMap<u32, (ClientId, bool)>,
}

pub(crate) const BUTTON_LEFT: u32 = 1 << 0;
pub(crate) const BUTTON_RIGHT: u32 = 1 << 1;
pub(crate) const BUTTON_MIDDLE: u32 = 1 << 2;

impl InputDispatcher {
    pub fn new() -> Self {
        InputDispatcher {
            mouse_x: 0,
            mouse_y: 0,
            mouse_buttons: 0,
            mods: 0,
            interaction: Interaction::Normal,
            focus: None,
            hover: None,
            key_binds: HashMap::new(),
        }
    }

    pub fn screen_pos(&self) -> (i32, i32) {
        (self.mouse_x / MOUSE_SCALE, self.mouse_y / MOUSE_SCALE)
    }

    pub fn bind_key(&mut self, mods: u32, key: u32, owner: ClientId, steal: bool) {
        self.key_binds.insert(crate::keys::pack_code(mods, key), (owner, steal));
    }

    fn top_at(&self, x: i32, y: i32, registry: &WindowRegistry, zorder: &ZOrder) -> Option<WindowId> {
        for wid in zorder.hit_test_order() {
            let Some(w) = registry.get(wid) else { continue };
            let (lx, ly) = crate::geometry::device_to_window(w.x, w.y, w.width, w.height, w.rotation, x, y);
            if w.alpha_hit(lx, ly) {
                return Some(wid);
            }
        }
        None
    }

    fn local_of(&self, wid: WindowId, registry: &WindowRegistry) -> (i32, i32) {
        let (sx, sy) = self.screen_pos();
        match registry.get(wid) {
            Some(w) => crate::geometry::device_to_window(w.x, w.y, w.width, w.height, w.rotation, sx, sy),
            None => (sx, sy),
        }
    }

    /// Relative mouse move, clamped to the screen (in scaled coordinates).
    pub fn move_mouse(
        &mut self,
        dx: i32,
        dy: i32,
        registry: &mut WindowRegistry,
        zorder: &ZOrder,
        damage: &DamageQueue,
        screen_w: u32,
        screen_h: u32,
    ) -> Vec<InputEffect> {
        self.mouse_x = (self.mouse_x + dx * MOUSE_SCALE).clamp(0, screen_w as i32 * MOUSE_SCALE - 1);
        self.mouse_y = (self.mouse_y + dy * MOUSE_SCALE).clamp(0, screen_h as i32 * MOUSE_SCALE - 1);
        self.apply_move(registry, zorder, damage)
    }

    /// Absolute mouse move (e.g. from a tablet/nested host), clamped the
    /// same way as relative motion.
    pub fn move_mouse_absolute(
        &mut self,
        x: i32,
        y: i32,
        registry: &mut WindowRegistry,
        zorder: &ZOrder,
        damage: &DamageQueue,
        screen_w: u32,
        screen_h: u32,
    ) -> Vec<InputEffect> {
        self.mouse_x = (x * MOUSE_SCALE).clamp(0, screen_w as i32 * MOUSE_SCALE - 1);
        self.mouse_y = (y * MOUSE_SCALE).clamp(0, screen_h as i32 * MOUSE_SCALE - 1);
        self.apply_move(registry, zorder, damage)
    }

    fn apply_move(&mut self, registry: &mut WindowRegistry, zorder: &ZOrder, damage: &DamageQueue) -> Vec<InputEffect> {
        let mut effects = Vec::new();
        let (sx, sy) = self.screen_pos();
        match self.interaction {
            Interaction::Moving { wid, grab_dx, grab_dy } => {
                if let Some(w) = registry.get_mut(wid) {
                    let before = w.rect();
                    w.x = sx - grab_dx;
                    w.y = sy - grab_dy;
                    damage.mark(before.union(&w.rect()));
                }
            }
            Interaction::Resizing { wid, start, start_mouse } => {
                let rdx = sx - start_mouse.0;
                let rdy = sy - start_mouse.1;
                let new_rect = resize_from_corner(start, rdx, rdy);
                if let Some(w) = registry.get(wid) {
                    damage.mark(w.rect().expand(2).union(&new_rect.expand(2)));
                }
            }
            Interaction::Dragging { wid, local, mouse_moved } => {
                let new_local = self.local_of(wid, registry);
                if new_local != local || !mouse_moved {
                    self.interaction = Interaction::Dragging {
                        wid,
                        local: new_local,
                        mouse_moved: mouse_moved || new_local != local,
                    };
                    if new_local != local {
                        effects.push(InputEffect::MouseDrag { wid, x: new_local.0, y: new_local.1 });
                    }
                }
            }
            Interaction::Normal => {
                if let Some(focused) = self.focus {
                    let (lx, ly) = self.local_of(focused, registry);
                    effects.push(InputEffect::MouseMove { wid: focused, x: lx, y: ly });
                }
                let hovered = self.top_at(sx, sy, registry, zorder);
                if hovered != self.hover {
                    if let Some(old) = self.hover {
                        effects.push(InputEffect::MouseLeave { wid: old });
                    }
                    if let Some(new) = hovered {
                        let (lx, ly) = self.local_of(new, registry);
                        effects.push(InputEffect::MouseEnter { wid: new, x: lx, y: ly });
                    }
                    self.hover = hovered;
                }
                if let (Some(h), f) = (hovered, self.focus) {
                    if Some(h) != f {
                        let (lx, ly) = self.local_of(h, registry);
                        effects.push(InputEffect::MouseMove { wid: h, x: lx, y: ly });
                    }
                }
            }
        }
        effects
    }

    /// Mouse button transition.
    pub fn button(
        &mut self,
        button: u32,
        down: bool,
        registry: &mut WindowRegistry,
        zorder: &mut ZOrder,
        damage: &DamageQueue,
    ) -> Vec<InputEffect> {
        let mut effects = Vec::new();
        let (sx, sy) = self.screen_pos();
        if down {
            self.mouse_buttons |= button;
            let alt = self.mods & crate::keys::MOD_ALT != 0;
            if button == BUTTON_LEFT && alt {
                if let Some(wid) = self.focus {
                    self.make_top_and_maybe_focus(wid, registry, zorder, damage, &mut effects);
                    if let Some(w) = registry.get(wid) {
                        self.interaction = Interaction::Moving { wid, grab_dx: sx - w.x, grab_dy: sy - w.y };
                    }
                }
            } else if button == BUTTON_MIDDLE && alt {
                if let Some(wid) = self.focus {
                    if let Some(w) = registry.get(wid) {
                        self.interaction = Interaction::Resizing { wid, start: w.rect(), start_mouse: (sx, sy) };
                    }
                }
            } else if button == BUTTON_LEFT {
                if let Some(wid) = self.top_at(sx, sy, registry, zorder) {
                    self.make_top_and_maybe_focus(wid, registry, zorder, damage, &mut effects);
                    let local = self.local_of(wid, registry);
                    self.interaction = Interaction::Dragging { wid, local, mouse_moved: false };
                    effects.push(InputEffect::MouseDown { wid, x: local.0, y: local.1 });
                }
            }
        } else {
            self.mouse_buttons &= !button;
            match self.interaction {
                Interaction::Moving { wid, .. } => {
                    effects.push(InputEffect::WindowMoved(wid));
                    self.interaction = Interaction::Normal;
                }
                Interaction::Resizing { wid, start, start_mouse } => {
                    let rdx = sx - start_mouse.0;
                    let rdy = sy - start_mouse.1;
                    let final_rect = resize_from_corner(start, rdx, rdy);
                    if let Some(w) = registry.get_mut(wid) {
                        w.pending_resize_wh = Some((final_rect.width, final_rect.height));
                    }
                    effects.push(InputEffect::WindowResized(wid));
                    self.interaction = Interaction::Normal;
                }
                Interaction::Dragging { wid, local, mouse_moved } => {
                    if mouse_moved {
                        effects.push(InputEffect::MouseRaise { wid, x: local.0, y: local.1 });
                    } else {
                        effects.push(InputEffect::MouseClick { wid, x: local.0, y: local.1 });
                    }
                    self.interaction = Interaction::Normal;
                }
                Interaction::Normal => {}
            }
        }
        effects
    }

    fn make_top_and_maybe_focus(
        &mut self,
        wid: WindowId,
        registry: &WindowRegistry,
        zorder: &mut ZOrder,
        damage: &DamageQueue,
        effects: &mut Vec<InputEffect>,
    ) {
        if self.focus != Some(wid) {
            self.focus = Some(wid);
            effects.push(InputEffect::FocusChanged(wid));
        }
        if let Some(w) = registry.get(wid) {
            if w.tier == ZTier::Middle && zorder.make_top_of_tier(wid, w.tier) {
                damage.mark(w.rect());
            }
        }
    }

    /// Start a client-requested drag (`WINDOW_DRAG_START`): puts the FSM into
    /// the same `Dragging` state a plain click would, so the rest of the
    /// button-release handling (raise vs. click) applies uniformly.
    pub fn start_drag_source(&mut self, wid: WindowId, registry: &WindowRegistry) {
        let local = self.local_of(wid, registry);
        self.interaction = Interaction::Dragging { wid, local, mouse_moved: false };
    }

    /// Key event: a client-registered bind is checked first; a `steal` bind
    /// swallows the key entirely, a `pass` bind also falls through to the
    /// built-in chord table / focused-window forwarding below.
    #[allow(clippy::too_many_arguments)]
    pub fn key(
        &mut self,
        key: u32,
        chr: u32,
        down: bool,
        screen_w: u32,
        screen_h: u32,
        panel_h: u32,
    ) -> Vec<InputEffect> {
        let mut effects = Vec::new();
        let code = crate::keys::pack_code(self.mods, key);
        let mut steal = false;
        if let Some(&(owner, is_steal)) = self.key_binds.get(&code) {
            effects.push(InputEffect::KeyBound { owner, key, chr, mods: self.mods, down });
            steal = is_steal;
        }
        if steal {
            return effects;
        }
        if down {
            if let Some(action) = lookup_chord(self.mods, key) {
                self.apply_chord(action, screen_w, screen_h, panel_h, &mut effects);
                return effects;
            }
        }
        if let Some(wid) = self.focus {
            effects.push(InputEffect::ForwardKey { wid, key, chr, mods: self.mods, down });
        }
        effects
    }

    fn apply_chord(&mut self, action: ChordAction, screen_w: u32, screen_h: u32, panel_h: u32, effects: &mut Vec<InputEffect>) {
        match action {
            ChordAction::RotateCw => {
                if let Some(wid) = self.focus {
                    effects.push(InputEffect::RotateRequested(wid, 5));
                }
            }
            ChordAction::RotateCcw => {
                if let Some(wid) = self.focus {
                    effects.push(InputEffect::RotateRequested(wid, -5));
                }
            }
            ChordAction::ResetRotation => {
                if let Some(wid) = self.focus {
                    effects.push(InputEffect::ResetRotationRequested(wid));
                }
            }
            ChordAction::ToggleHitShapeDebug => effects.push(InputEffect::ToggleHitShapeDebug),
            ChordAction::ToggleBoundsDebug => effects.push(InputEffect::ToggleBoundsDebug),
            other => {
                if let (Some(wid), Some((wdiv, hdiv, cx, cy))) = (self.focus, tile_params(other)) {
                    let rect = tile(screen_w, screen_h, panel_h, wdiv, hdiv, cx, cy);
                    effects.push(InputEffect::TileRequested(wid, rect));
                }
            }
        }
    }
}

impl Default for InputDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Resize-from-bottom-right-corner geometry used while Alt+Middle-dragging:
/// the anchor (top-left) never moves, only width/height grow or shrink.
pub(crate) fn resize_from_corner(start: Rect, rdx: i32, rdy: i32) -> Rect {
    let w = (start.width as i32 + rdx).max(1) as u32;
    let h = (start.height as i32 + rdy).max(1) as u32;
    Rect::new(start.x, start.y, w, h)
}

/// `owner` is the client whose synthetic connection drives the interaction
/// thread's synthetic-client plumbing (used by callers that need to stamp
/// which client a generated window event should attribute to).
pub fn synthetic_owner_for_focus(focus: Option<WindowId>, registry: &WindowRegistry) -> Option<ClientId> {
    focus.and_then(|wid| registry.get(wid)).map(|w| w.owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::HeapShm;

    #[test]
    fn alt_left_down_starts_moving_the_focused_window() {
        let mut reg = WindowRegistry::new("t");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 50, 50, &shm, 0);
        let mut z = ZOrder::new();
        z.insert(wid, ZTier::Middle);
        let damage = DamageQueue::new();
        let mut input = InputDispatcher::new();
        input.focus = Some(wid);
        input.mods = crate::keys::MOD_ALT;
        input.button(BUTTON_LEFT, true, &mut reg, &mut z, &damage);
        assert!(matches!(input.interaction, Interaction::Moving { wid: w, .. } if w == wid));
    }

    #[test]
    fn plain_left_click_on_empty_space_stays_normal() {
        let mut reg = WindowRegistry::new("t");
        let mut z = ZOrder::new();
        let damage = DamageQueue::new();
        let mut input = InputDispatcher::new();
        let effects = input.button(BUTTON_LEFT, true, &mut reg, &mut z, &damage);
        assert!(effects.is_empty());
        assert_eq!(input.interaction, Interaction::Normal);
    }

    #[test]
    fn plain_left_click_without_movement_emits_click_on_release() {
        let mut reg = WindowRegistry::new("t");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 50, 50, &shm, 0);
        let mut z = ZOrder::new();
        z.insert(wid, ZTier::Middle);
        let damage = DamageQueue::new();
        let mut input = InputDispatcher::new();
        input.mouse_x = 10 * MOUSE_SCALE;
        input.mouse_y = 10 * MOUSE_SCALE;
        let down_effects = input.button(BUTTON_LEFT, true, &mut reg, &mut z, &damage);
        assert!(down_effects.iter().any(|e| matches!(e, InputEffect::MouseDown { wid: w, .. } if *w == wid)));
        let up_effects = input.button(BUTTON_LEFT, false, &mut reg, &mut z, &damage);
        assert!(up_effects.contains(&InputEffect::MouseClick { wid, x: 10, y: 10 }));
    }

    #[test]
    fn moving_past_threshold_then_releasing_emits_raise_not_click() {
        let mut reg = WindowRegistry::new("t");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 50, 50, &shm, 0);
        let mut z = ZOrder::new();
        z.insert(wid, ZTier::Middle);
        let damage = DamageQueue::new();
        let mut input = InputDispatcher::new();
        input.mouse_x = 10 * MOUSE_SCALE;
        input.mouse_y = 10 * MOUSE_SCALE;
        input.button(BUTTON_LEFT, true, &mut reg, &mut z, &damage);
        input.move_mouse(5, 5, &mut reg, &z, &damage, 800, 600);
        let up_effects = input.button(BUTTON_LEFT, false, &mut reg, &mut z, &damage);
        assert!(up_effects.iter().any(|e| matches!(e, InputEffect::MouseRaise { wid: w, .. } if *w == wid)));
    }

    #[test]
    fn move_while_moving_updates_window_position() {
        let mut reg = WindowRegistry::new("t");
        let shm = HeapShm;
        let (wid, _) = reg.create(ClientId(1), 50, 50, &shm, 0);
        let z = ZOrder::new();
        let damage = DamageQueue::new();
        let mut input = InputDispatcher::new();
        input.mouse_x = 10 * MOUSE_SCALE;
        input.mouse_y = 10 * MOUSE_SCALE;
        input.interaction = Interaction::Moving { wid, grab_dx: 5, grab_dy: 5 };
        input.move_mouse(20, 20, &mut reg, &z, &damage, 800, 600);
        let w = reg.get(wid).unwrap();
        assert_eq!((w.x, w.y), (25, 25));
        assert!(damage.has_pending());
    }

    #[test]
    fn resize_corner_drag_grows_from_the_anchor() {
        let start = Rect::new(0, 0, 100, 100);
        let r = resize_from_corner(start, 10, 20);
        assert_eq!(r, Rect::new(0, 0, 110, 120));
    }

    #[test]
    fn alt_f10_maximize_emits_tile_to_full_usable_area() {
        let mut input = InputDispatcher::new();
        input.focus = Some(WindowId(1));
        input.mods = crate::keys::MOD_ALT;
        let effects = input.key(crate::keys::KEY_F10, 0, true, 1000, 600, 20);
        assert_eq!(effects, vec![InputEffect::TileRequested(WindowId(1), Rect::new(0, 20, 1000, 580))]);
    }

    #[test]
    fn steal_bind_consumes_the_key_entirely() {
        let mut input = InputDispatcher::new();
        input.focus = Some(WindowId(7));
        input.bind_key(0, 65, ClientId(9), true);
        let effects = input.key(65, b'A' as u32, true, 0, 0, 0);
        assert_eq!(effects, vec![InputEffect::KeyBound { owner: ClientId(9), key: 65, chr: b'A' as u32, mods: 0, down: true }]);
    }

    #[test]
    fn pass_bind_also_forwards_to_the_focused_window() {
        let mut input = InputDispatcher::new();
        input.focus = Some(WindowId(7));
        input.bind_key(0, 65, ClientId(9), false);
        let effects = input.key(65, b'A' as u32, true, 0, 0, 0);
        assert!(effects.contains(&InputEffect::KeyBound { owner: ClientId(9), key: 65, chr: b'A' as u32, mods: 0, down: true }));
        assert!(effects.contains(&InputEffect::ForwardKey { wid: WindowId(7), key: 65, chr: b'A' as u32, mods: 0, down: true }));
    }

    #[test]
    fn unbound_key_forwards_to_focused_window() {
        let mut input = InputDispatcher::new();
        input.focus = Some(WindowId(7));
        let effects = input.key(65, b'A' as u32, true, 0, 0, 0);
        assert_eq!(
            effects,
            vec![InputEffect::ForwardKey { wid: WindowId(7), key: 65, chr: b'A' as u32, mods: 0, down: true }]
        );
    }
}
