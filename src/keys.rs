//! Keyboard modifier/keycode packing and the built-in keybinding table.
//! Scancode constants and `encode_scancode` are carried over
//! from anyOS's `keys.rs` almost unchanged — translating raw scancodes
//! into wire-stable `KEY_*` codes is exactly what both crates need; anyOS
//! just never had to also track held modifiers for chord matching or pack
//! them into a single lookup code for client key bindings.

use crate::geometry::Rect;

pub const KEY_ENTER: u32 = 0x100;
pub const KEY_BACKSPACE: u32 = 0x101;
pub const KEY_TAB: u32 = 0x102;
pub const KEY_ESCAPE: u32 = 0x103;
pub const KEY_SPACE: u32 = 0x104;
pub const KEY_UP: u32 = 0x105;
pub const KEY_DOWN: u32 = 0x106;
pub const KEY_LEFT: u32 = 0x107;
pub const KEY_RIGHT: u32 = 0x108;

pub const KEY_DELETE: u32 = 0x120;
pub const KEY_HOME: u32 = 0x121;
pub const KEY_END: u32 = 0x122;
pub const KEY_PAGE_UP: u32 = 0x123;
pub const KEY_PAGE_DOWN: u32 = 0x124;

pub const KEY_F1: u32 = 0x140;
pub const KEY_F2: u32 = 0x141;
pub const KEY_F3: u32 = 0x142;
pub const KEY_F4: u32 = 0x143;
pub const KEY_F10: u32 = 0x149;

pub const KEY_Z: u32 = b'z' as u32;
pub const KEY_X: u32 = b'x' as u32;
pub const KEY_C: u32 = b'c' as u32;
pub const KEY_V: u32 = b'v' as u32;
pub const KEY_B: u32 = b'b' as u32;

/// Translate a raw PS/2-style scancode into a wire-stable `KEY_*` code.
/// Everything not named here passes through unchanged — clients read the
/// accompanying `chr` field for ordinary character keys.
pub fn encode_scancode(scancode: u32) -> u32 {
    match scancode {
        0x1C => KEY_ENTER,
        0x0E => KEY_BACKSPACE,
        0x0F => KEY_TAB,
        0x01 => KEY_ESCAPE,
        0x39 => KEY_SPACE,
        0x48 => KEY_UP,
        0x50 => KEY_DOWN,
        0x4B => KEY_LEFT,
        0x4D => KEY_RIGHT,
        0x53 => KEY_DELETE,
        0x47 => KEY_HOME,
        0x4F => KEY_END,
        0x49 => KEY_PAGE_UP,
        0x51 => KEY_PAGE_DOWN,
        0x3B => KEY_F1,
        0x3C => KEY_F2,
        0x3D => KEY_F3,
        0x3E => KEY_F4,
        0x44 => KEY_F10,
        other => other,
    }
}

pub const MOD_SHIFT: u32 = 1 << 0;
pub const MOD_CTRL: u32 = 1 << 1;
pub const MOD_ALT: u32 = 1 << 2;
pub const MOD_SUPER: u32 = 1 << 3;

/// Pack a held-modifiers set and a keycode into the single `u32` code used
/// as the key for both the built-in chord table and the client-registered
/// `key_binds` map.
pub fn pack_code(mods: u32, key: u32) -> u32 {
    (mods << 24) | (key & 0x00FF_FFFF)
}

/// A held-modifiers + keycode chord, matched against incoming key-down
/// events before they're forwarded to the focused window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chord {
    pub mods: u32,
    pub key: u32,
}

impl Chord {
    pub const fn new(mods: u32, key: u32) -> Self {
        Chord { mods, key }
    }

    pub fn matches(&self, mods: u32, key: u32) -> bool {
        self.mods == mods && self.key == key
    }
}

/// What a matched built-in chord tells the caller to do. The compositor
/// owns executing these; this module only matches and classifies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChordAction {
    RotateCw,
    RotateCcw,
    ResetRotation,
    ToggleHitShapeDebug,
    ToggleBoundsDebug,
    Maximize,
    TileLeftHalf,
    TileRightHalf,
    TileTopHalf,
    TileBottomHalf,
    TileTopLeftQuarter,
    TileTopRightQuarter,
    TileBottomLeftQuarter,
    TileBottomRightQuarter,
}

const CHORD_TABLE: &[(Chord, ChordAction)] = &[
    (Chord::new(MOD_CTRL | MOD_SHIFT, KEY_Z), ChordAction::RotateCcw),
    (Chord::new(MOD_CTRL | MOD_SHIFT, KEY_X), ChordAction::RotateCw),
    (Chord::new(MOD_CTRL | MOD_SHIFT, KEY_C), ChordAction::ResetRotation),
    (Chord::new(MOD_CTRL | MOD_SHIFT, KEY_V), ChordAction::ToggleHitShapeDebug),
    (Chord::new(MOD_CTRL | MOD_SHIFT, KEY_B), ChordAction::ToggleBoundsDebug),
    (Chord::new(MOD_ALT, KEY_F10), ChordAction::Maximize),
    (Chord::new(MOD_SUPER, KEY_LEFT), ChordAction::TileLeftHalf),
    (Chord::new(MOD_SUPER, KEY_RIGHT), ChordAction::TileRightHalf),
    (Chord::new(MOD_SUPER, KEY_UP), ChordAction::TileTopHalf),
    (Chord::new(MOD_SUPER, KEY_DOWN), ChordAction::TileBottomHalf),
    (Chord::new(MOD_SUPER | MOD_SHIFT, KEY_LEFT), ChordAction::TileTopLeftQuarter),
    (Chord::new(MOD_SUPER | MOD_SHIFT, KEY_RIGHT), ChordAction::TileTopRightQuarter),
    (Chord::new(MOD_SUPER | MOD_CTRL, KEY_LEFT), ChordAction::TileBottomLeftQuarter),
    (Chord::new(MOD_SUPER | MOD_CTRL, KEY_RIGHT), ChordAction::TileBottomRightQuarter),
];

/// Look up the built-in action bound to a currently-held modifier set and
/// keycode, if any of the built-in chords match. Checked only after the
/// client-registered `key_binds` map misses, so a client can shadow one of
/// these by binding the same code itself.
pub fn lookup_chord(mods: u32, key: u32) -> Option<ChordAction> {
    CHORD_TABLE
        .iter()
        .find(|(c, _)| c.matches(mods, key))
        .map(|(_, action)| *action)
}

/// Compute the tiled geometry for a tiling chord against the current screen
/// size and the height already claimed by a top-tier panel window.
/// `wdiv`/`hdiv` divide the usable area into a grid; `cx`/`cy` pick which
/// cell. Half-screen tiles use `(2, 1, ..)` or `(1, 2, ..)`; quarter tiles
/// use `(2, 2, ..)`; maximize uses `(1, 1, 0, 0)`.
pub fn tile(screen_w: u32, screen_h: u32, panel_h: u32, wdiv: u32, hdiv: u32, cx: u32, cy: u32) -> Rect {
    let w = screen_w / wdiv;
    let h = (screen_h - panel_h) / hdiv;
    Rect::new((w * cx) as i32, (panel_h + h * cy) as i32, w, h)
}

/// Resolve a matched chord into the `tile()` grid parameters it should
/// apply, or `None` for chords that aren't tiling actions.
pub fn tile_params(action: ChordAction) -> Option<(u32, u32, u32, u32)> {
    match action {
        ChordAction::Maximize => Some((1, 1, 0, 0)),
        ChordAction::TileLeftHalf => Some((2, 1, 0, 0)),
        ChordAction::TileRightHalf => Some((2, 1, 1, 0)),
        ChordAction::TileTopHalf => Some((1, 2, 0, 0)),
        ChordAction::TileBottomHalf => Some((1, 2, 0, 1)),
        ChordAction::TileTopLeftQuarter => Some((2, 2, 0, 0)),
        ChordAction::TileTopRightQuarter => Some((2, 2, 1, 0)),
        ChordAction::TileBottomLeftQuarter => Some((2, 2, 0, 1)),
        ChordAction::TileBottomRightQuarter => Some((2, 2, 1, 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scancode_translates_known_keys() {
        assert_eq!(encode_scancode(0x1C), KEY_ENTER);
        assert_eq!(encode_scancode(0x99), 0x99);
    }

    #[test]
    fn alt_f10_matches_maximize() {
        assert_eq!(lookup_chord(MOD_ALT, KEY_F10), Some(ChordAction::Maximize));
    }

    #[test]
    fn unbound_chord_is_none() {
        assert_eq!(lookup_chord(MOD_CTRL, KEY_SPACE), None);
    }

    #[test]
    fn pack_code_round_trips_distinct_chords() {
        assert_ne!(pack_code(MOD_SUPER, KEY_LEFT), pack_code(MOD_SUPER, KEY_RIGHT));
        assert_ne!(pack_code(MOD_SUPER, KEY_LEFT), pack_code(MOD_ALT, KEY_LEFT));
    }

    #[test]
    fn maximize_takes_the_whole_usable_area() {
        let r = tile(1000, 600, 20, 1, 1, 0, 0);
        assert_eq!(r, Rect::new(0, 20, 1000, 580));
    }

    #[test]
    fn left_and_right_half_tiles_split_width_exactly() {
        let l = tile(1000, 600, 0, 2, 1, 0, 0);
        let r = tile(1000, 600, 0, 2, 1, 1, 0);
        assert_eq!(l.width + r.width, 1000);
        assert_eq!(r.x, 500);
    }

    #[test]
    fn quarter_tiles_stack_below_the_panel() {
        let tl = tile(1000, 600, 20, 2, 2, 0, 0);
        let br = tile(1000, 600, 20, 2, 2, 1, 1);
        assert_eq!(tl.y, 20);
        assert_eq!(br.y, 20 + 290);
        assert_eq!(br.x, 500);
    }
}
