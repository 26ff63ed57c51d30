//! The `Window` record — one per logical client surface.
//!
//! anyOS's `WindowInfo`
//! (`desktop/window.rs`) is the shape template: id/owner/geometry/flags/
//! event-queue-ish metadata living in one struct, with small helper methods
//! for the state a window can be in (`is_borderless`, `is_resizable` there;
//! `is_composable`, `in_resize_handshake` here).

use std::ops::Range;

use crate::shm::ShmRegion;
use crate::transport::ClientId;

/// Monotonic window identifier. Never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

/// Reserved z-tier sentinels, kept numerically distinct from any ordinal
/// middle-tier rank so the wire protocol can carry a single `z: u32` field.
pub const Z_BOTTOM: u32 = 0xFFFF;
pub const Z_TOP: u32 = 0xFFFE;

/// Which of the three stacking tiers a window currently lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZTier {
    Bottom,
    Middle,
    Top,
}

/// Active per-window animation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnimMode {
    None,
    FadeIn,
    FadeOut,
}

/// Ticks an animation runs for before it completes. Indexed by `AnimMode`;
/// 256 ticks (at 10 ticks/frame) is the default for both.
pub fn anim_length(mode: AnimMode) -> u64 {
    match mode {
        AnimMode::None => 0,
        AnimMode::FadeIn => 256,
        AnimMode::FadeOut => 256,
    }
}

/// Client-advertised metadata (icon name, title, …) forwarded to
/// subscribers verbatim. ToaruOS's `compositor.c` packs these as a
/// flat byte blob with up to 5 string ranges; we keep that shape rather
/// than modeling named fields, since the protocol never interprets them.
#[derive(Clone, Debug, Default)]
pub struct ClientStrings {
    pub flags: u32,
    pub data: Vec<u8>,
    pub offsets: [Range<usize>; 5],
}

impl ClientStrings {
    pub fn empty() -> Self {
        ClientStrings::default()
    }

    pub fn string(&self, idx: usize) -> Option<&str> {
        let r = self.offsets.get(idx)?;
        self.data.get(r.clone()).and_then(|b| std::str::from_utf8(b).ok())
    }
}

pub struct Window {
    pub wid: WindowId,
    pub owner: ClientId,

    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,

    pub tier: ZTier,
    /// Ordinal position within the middle sequence; meaningless outside it.
    pub mid_rank: u64,

    pub rotation: i64,
    pub alpha_threshold: u8,

    pub bufid: u32,
    pub buffer: Option<ShmRegion>,

    pub newbufid: u32,
    pub newbuffer: Option<ShmRegion>,
    pub pending_resize_wh: Option<(u32, u32)>,

    pub anim_mode: AnimMode,
    pub anim_start: u64,

    pub client_strings: ClientStrings,
}

impl Window {
    pub fn new(wid: WindowId, owner: ClientId, width: u32, height: u32, buffer: ShmRegion, bufid: u32, tick: u64) -> Self {
        Window {
            wid,
            owner,
            x: 0,
            y: 0,
            width,
            height,
            tier: ZTier::Middle,
            mid_rank: 0,
            rotation: 0,
            alpha_threshold: 0,
            bufid,
            buffer: Some(buffer),
            newbufid: 0,
            newbuffer: None,
            pending_resize_wh: None,
            anim_mode: AnimMode::FadeIn,
            anim_start: tick,
            client_strings: ClientStrings::empty(),
        }
    }

    /// A pixel at `(wx, wy)` (window-local, post-rotation-undo) "belongs" to
    /// this window iff its alpha is >= the threshold. Default threshold 0
    /// means fully opaque hit-testing (every in-bounds pixel hits).
    pub fn alpha_hit(&self, wx: i32, wy: i32) -> bool {
        if wx < 0 || wy < 0 || wx as u32 >= self.width || wy as u32 >= self.height {
            return false;
        }
        let Some(buffer) = &self.buffer else { return false };
        let alpha = buffer.read_alpha(wx as u32, wy as u32, self.width);
        alpha >= self.alpha_threshold
    }

    pub fn is_composable(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn in_resize_handshake(&self) -> bool {
        self.newbufid != 0
    }

    pub fn rect(&self) -> crate::geometry::Rect {
        crate::geometry::Rect::new(self.x, self.y, self.width, self.height)
    }
}
