//! Wire protocol: framed messages exchanged between clients and the
//! compositor over a `Transport`.
//!
//! Framing is `magic(u32) | type(u32) | size(u32) | body[size]`, directly
//! analogous to anyOS's fixed `[CMD/RESP/EVT, a, b, c, d]` five-word
//! events in `ipc_protocol.rs` — we just allow a variable-size body instead
//! of always exactly four `u32` payload words, since `WINDOW_NEW` and
//! `WINDOW_ADVERTISE` messages carry a variable-length title/icon-name
//! blob (anyOS's `pack_title`/`unpack_title` 12-ASCII-char scheme is
//! the fixed-width special case we generalize away from).
//!
//! The resize handshake is five distinct messages rather than anyOS's
//! resize-in-place single write: `ResizeRequest`/`ResizeOffer` just forward
//! to the window's owner with no registry mutation, `ResizeAccept` is what
//! actually allocates the new buffer (replied to with `ResizeBufid`), and
//! `ResizeDone` promotes it.
//!
//! `KeyEvent`/`MouseEvent` are where the mouse/keyboard reader threads (or,
//! nested, the host) hand raw input to the compositor: like anyOS's own
//! input-device threads, they're treated as ordinary synthetic clients
//! sending messages over this same transport rather than a separate
//! code path, which is what lets the interaction FSM in `input.rs` run
//! without its own cross-thread lock. `handle`'s arms for these two run the
//! FSM and hand its `InputEffect`s to `apply_input_effects`, which is to
//! input what the rest of this match is to a single wire message: resolve
//! the registry mutation and damage each effect needs, then translate it
//! into outbound messages.

use crate::compositor::{Compositor, Scene};
use crate::geometry::Rect;
use crate::input::{InputEffect, BUTTON_LEFT, BUTTON_MIDDLE, BUTTON_RIGHT};
use crate::transport::ClientId;
use crate::window::{WindowId, ZTier};

pub const WIRE_MAGIC: u32 = 0x5957_4332; // "WYC2"

/// Which gesture a server -> client `WindowMouseEvent` reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    Enter,
    Leave,
    Down,
    Drag,
    Click,
    Raise,
}

impl MouseEventKind {
    fn from_u32(v: u32) -> Option<Self> {
        use MouseEventKind::*;
        Some(match v {
            0 => Move,
            1 => Enter,
            2 => Leave,
            3 => Down,
            4 => Drag,
            5 => Click,
            6 => Raise,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgType {
    Hello = 1,
    Welcome = 2,
    WindowNew = 3,
    WindowInit = 4,
    Move = 5,
    Close = 6,
    Focus = 7,
    FocusChanged = 8,
    Subscribe = 9,
    Unsubscribe = 10,
    WindowAdvertise = 11,
    WindowClosed = 12,
    ResizeRequest = 13,
    ResizeOffer = 14,
    ResizeAccept = 15,
    ResizeBufid = 16,
    ResizeDone = 17,
    KeyEvent = 18,
    MouseEvent = 19,
    WindowMouseEvent = 20,
    WindowStack = 21,
    QueryWindows = 22,
    Notify = 23,
    SessionEnd = 24,
    KeyBind = 25,
    WindowDragStart = 26,
    WindowUpdateShape = 27,
    SetTitle = 31,
}

impl MsgType {
    fn from_u32(v: u32) -> Option<Self> {
        use MsgType::*;
        Some(match v {
            1 => Hello,
            2 => Welcome,
            3 => WindowNew,
            4 => WindowInit,
            5 => Move,
            6 => Close,
            7 => Focus,
            8 => FocusChanged,
            9 => Subscribe,
            10 => Unsubscribe,
            11 => WindowAdvertise,
            12 => WindowClosed,
            13 => ResizeRequest,
            14 => ResizeOffer,
            15 => ResizeAccept,
            16 => ResizeBufid,
            17 => ResizeDone,
            18 => KeyEvent,
            19 => MouseEvent,
            20 => WindowMouseEvent,
            21 => WindowStack,
            22 => QueryWindows,
            23 => Notify,
            24 => SessionEnd,
            25 => KeyBind,
            26 => WindowDragStart,
            27 => WindowUpdateShape,
            31 => SetTitle,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Hello,
    Welcome { server_ident: String, screen_w: u32, screen_h: u32 },
    WindowNew { width: u32, height: u32 },
    WindowInit { wid: WindowId, bufid: u32, key: String },
    Move { wid: WindowId, x: i32, y: i32 },
    Close { wid: WindowId },
    Focus { wid: WindowId },
    FocusChanged { wid: WindowId },
    Subscribe,
    Unsubscribe,
    WindowAdvertise { wid: WindowId, owner: ClientId, x: i32, y: i32, width: u32, height: u32, title: String },
    WindowClosed { wid: WindowId },
    ResizeRequest { wid: WindowId, width: u32, height: u32 },
    ResizeOffer { wid: WindowId, width: u32, height: u32 },
    ResizeAccept { wid: WindowId, width: u32, height: u32 },
    ResizeBufid { wid: WindowId, width: u32, height: u32, bufid: u32, key: String },
    ResizeDone { wid: WindowId },
    KeyEvent { key: u32, chr: u32, mods: u32, down: bool },
    MouseEvent { dx: i32, dy: i32, buttons: u32, absolute: bool },
    WindowMouseEvent { wid: WindowId, x: i32, y: i32, buttons: u32, kind: MouseEventKind },
    /// Client-requested reorder: pulls `wid` out of its current tier and
    /// inserts it at `z`. `z == Z_BOTTOM`/`Z_TOP` targets the Bottom/Top
    /// singleton tier (demoting any previous occupant to Middle); any other
    /// value targets Middle.
    WindowStack { wid: WindowId, z: u32 },
    QueryWindows,
    Notify { text: String },
    SessionEnd,
    KeyBind { key: u32, mods: u32, steal: bool },
    WindowDragStart { wid: WindowId },
    WindowUpdateShape { wid: WindowId, alpha_threshold: u8 },
    SetTitle { wid: WindowId, title: String },
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Truncated;

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn u32(&mut self) -> Result<u32, Truncated> {
        let bytes = self.data.get(self.pos..self.pos + 4).ok_or(Truncated)?;
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, Truncated> {
        Ok(self.u32()? as i32)
    }

    fn string(&mut self) -> Result<String, Truncated> {
        let len = self.u32()? as usize;
        let bytes = self.data.get(self.pos..self.pos + len).ok_or(Truncated)?;
        self.pos += len;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Hello => MsgType::Hello,
            Message::Welcome { .. } => MsgType::Welcome,
            Message::WindowNew { .. } => MsgType::WindowNew,
            Message::WindowInit { .. } => MsgType::WindowInit,
            Message::Move { .. } => MsgType::Move,
            Message::Close { .. } => MsgType::Close,
            Message::Focus { .. } => MsgType::Focus,
            Message::FocusChanged { .. } => MsgType::FocusChanged,
            Message::Subscribe => MsgType::Subscribe,
            Message::Unsubscribe => MsgType::Unsubscribe,
            Message::WindowAdvertise { .. } => MsgType::WindowAdvertise,
            Message::WindowClosed { .. } => MsgType::WindowClosed,
            Message::ResizeRequest { .. } => MsgType::ResizeRequest,
            Message::ResizeOffer { .. } => MsgType::ResizeOffer,
            Message::ResizeAccept { .. } => MsgType::ResizeAccept,
            Message::ResizeBufid { .. } => MsgType::ResizeBufid,
            Message::ResizeDone { .. } => MsgType::ResizeDone,
            Message::KeyEvent { .. } => MsgType::KeyEvent,
            Message::MouseEvent { .. } => MsgType::MouseEvent,
            Message::WindowMouseEvent { .. } => MsgType::WindowMouseEvent,
            Message::WindowStack { .. } => MsgType::WindowStack,
            Message::QueryWindows => MsgType::QueryWindows,
            Message::Notify { .. } => MsgType::Notify,
            Message::SessionEnd => MsgType::SessionEnd,
            Message::KeyBind { .. } => MsgType::KeyBind,
            Message::WindowDragStart { .. } => MsgType::WindowDragStart,
            Message::WindowUpdateShape { .. } => MsgType::WindowUpdateShape,
            Message::SetTitle { .. } => MsgType::SetTitle,
        }
    }

    /// Encode `magic | type | size | body` into a fresh framed packet.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Message::Hello | Message::Subscribe | Message::Unsubscribe | Message::QueryWindows | Message::SessionEnd => {}
            Message::Welcome { server_ident, screen_w, screen_h } => {
                put_str(&mut body, server_ident);
                put_u32(&mut body, *screen_w);
                put_u32(&mut body, *screen_h);
            }
            Message::WindowNew { width, height } => {
                put_u32(&mut body, *width);
                put_u32(&mut body, *height);
            }
            Message::WindowInit { wid, bufid, key } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, *bufid);
                put_str(&mut body, key);
            }
            Message::Move { wid, x, y } => {
                put_u32(&mut body, wid.0);
                put_i32(&mut body, *x);
                put_i32(&mut body, *y);
            }
            Message::Close { wid } | Message::Focus { wid } | Message::FocusChanged { wid }
            | Message::WindowClosed { wid } | Message::ResizeDone { wid } | Message::WindowDragStart { wid } => {
                put_u32(&mut body, wid.0);
            }
            Message::WindowAdvertise { wid, owner, x, y, width, height, title } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, owner.0 as u32);
                put_i32(&mut body, *x);
                put_i32(&mut body, *y);
                put_u32(&mut body, *width);
                put_u32(&mut body, *height);
                put_str(&mut body, title);
            }
            Message::ResizeRequest { wid, width, height }
            | Message::ResizeOffer { wid, width, height }
            | Message::ResizeAccept { wid, width, height } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, *width);
                put_u32(&mut body, *height);
            }
            Message::ResizeBufid { wid, width, height, bufid, key } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, *width);
                put_u32(&mut body, *height);
                put_u32(&mut body, *bufid);
                put_str(&mut body, key);
            }
            Message::KeyEvent { key, chr, mods, down } => {
                put_u32(&mut body, *key);
                put_u32(&mut body, *chr);
                put_u32(&mut body, *mods);
                put_u32(&mut body, if *down { 1 } else { 0 });
            }
            Message::MouseEvent { dx, dy, buttons, absolute } => {
                put_i32(&mut body, *dx);
                put_i32(&mut body, *dy);
                put_u32(&mut body, *buttons);
                put_u32(&mut body, if *absolute { 1 } else { 0 });
            }
            Message::WindowMouseEvent { wid, x, y, buttons, kind } => {
                put_u32(&mut body, wid.0);
                put_i32(&mut body, *x);
                put_i32(&mut body, *y);
                put_u32(&mut body, *buttons);
                put_u32(&mut body, *kind as u32);
            }
            Message::WindowStack { wid, z } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, *z);
            }
            Message::Notify { text } => put_str(&mut body, text),
            Message::KeyBind { key, mods, steal } => {
                put_u32(&mut body, *key);
                put_u32(&mut body, *mods);
                put_u32(&mut body, if *steal { 1 } else { 0 });
            }
            Message::WindowUpdateShape { wid, alpha_threshold } => {
                put_u32(&mut body, wid.0);
                put_u32(&mut body, *alpha_threshold as u32);
            }
            Message::SetTitle { wid, title } => {
                put_u32(&mut body, wid.0);
                put_str(&mut body, title);
            }
        }

        let mut packet = Vec::with_capacity(12 + body.len());
        put_u32(&mut packet, WIRE_MAGIC);
        put_u32(&mut packet, self.msg_type() as u32);
        put_u32(&mut packet, body.len() as u32);
        packet.extend_from_slice(&body);
        packet
    }

    /// Decode one framed packet. Any framing violation (bad magic, unknown
    /// type, truncated body) is reported via `ProtocolViolation` rather than
    /// panicking — the caller logs and drops the message.
    pub fn decode(packet: &[u8]) -> Result<Message, crate::error::ProtocolViolation> {
        let mut r = Reader::new(packet);
        let magic = r.u32().map_err(|_| crate::error::ProtocolViolation("truncated header".into()))?;
        if magic != WIRE_MAGIC {
            return Err(crate::error::ProtocolViolation(format!("bad magic {magic:#x}")));
        }
        let ty = r.u32().map_err(|_| crate::error::ProtocolViolation("truncated header".into()))?;
        let Some(ty) = MsgType::from_u32(ty) else {
            return Err(crate::error::ProtocolViolation(format!("unknown message type {ty}")));
        };
        let size = r.u32().map_err(|_| crate::error::ProtocolViolation("truncated header".into()))? as usize;
        if r.data.len() - r.pos != size {
            return Err(crate::error::ProtocolViolation("body size mismatch".into()));
        }

        let bad = |_| crate::error::ProtocolViolation("truncated body".to_string());
        Ok(match ty {
            MsgType::Hello => Message::Hello,
            MsgType::Welcome => Message::Welcome {
                server_ident: r.string().map_err(bad)?,
                screen_w: r.u32().map_err(bad)?,
                screen_h: r.u32().map_err(bad)?,
            },
            MsgType::WindowNew => Message::WindowNew { width: r.u32().map_err(bad)?, height: r.u32().map_err(bad)? },
            MsgType::WindowInit => Message::WindowInit {
                wid: WindowId(r.u32().map_err(bad)?),
                bufid: r.u32().map_err(bad)?,
                key: r.string().map_err(bad)?,
            },
            MsgType::Move => Message::Move {
                wid: WindowId(r.u32().map_err(bad)?),
                x: r.i32().map_err(bad)?,
                y: r.i32().map_err(bad)?,
            },
            MsgType::Close => Message::Close { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::Focus => Message::Focus { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::FocusChanged => Message::FocusChanged { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::Subscribe => Message::Subscribe,
            MsgType::Unsubscribe => Message::Unsubscribe,
            MsgType::WindowAdvertise => Message::WindowAdvertise {
                wid: WindowId(r.u32().map_err(bad)?),
                owner: ClientId(r.u32().map_err(bad)? as u64),
                x: r.i32().map_err(bad)?,
                y: r.i32().map_err(bad)?,
                width: r.u32().map_err(bad)?,
                height: r.u32().map_err(bad)?,
                title: r.string().map_err(bad)?,
            },
            MsgType::WindowClosed => Message::WindowClosed { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::ResizeRequest => Message::ResizeRequest {
                wid: WindowId(r.u32().map_err(bad)?),
                width: r.u32().map_err(bad)?,
                height: r.u32().map_err(bad)?,
            },
            MsgType::ResizeOffer => Message::ResizeOffer {
                wid: WindowId(r.u32().map_err(bad)?),
                width: r.u32().map_err(bad)?,
                height: r.u32().map_err(bad)?,
            },
            MsgType::ResizeAccept => Message::ResizeAccept {
                wid: WindowId(r.u32().map_err(bad)?),
                width: r.u32().map_err(bad)?,
                height: r.u32().map_err(bad)?,
            },
            MsgType::ResizeBufid => Message::ResizeBufid {
                wid: WindowId(r.u32().map_err(bad)?),
                width: r.u32().map_err(bad)?,
                height: r.u32().map_err(bad)?,
                bufid: r.u32().map_err(bad)?,
                key: r.string().map_err(bad)?,
            },
            MsgType::ResizeDone => Message::ResizeDone { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::KeyEvent => Message::KeyEvent {
                key: r.u32().map_err(bad)?,
                chr: r.u32().map_err(bad)?,
                mods: r.u32().map_err(bad)?,
                down: r.u32().map_err(bad)? != 0,
            },
            MsgType::MouseEvent => Message::MouseEvent {
                dx: r.i32().map_err(bad)?,
                dy: r.i32().map_err(bad)?,
                buttons: r.u32().map_err(bad)?,
                absolute: r.u32().map_err(bad)? != 0,
            },
            MsgType::WindowMouseEvent => {
                let wid = WindowId(r.u32().map_err(bad)?);
                let x = r.i32().map_err(bad)?;
                let y = r.i32().map_err(bad)?;
                let buttons = r.u32().map_err(bad)?;
                let kind = MouseEventKind::from_u32(r.u32().map_err(bad)?)
                    .ok_or_else(|| crate::error::ProtocolViolation("bad mouse event kind".into()))?;
                Message::WindowMouseEvent { wid, x, y, buttons, kind }
            }
            MsgType::WindowStack => {
                Message::WindowStack { wid: WindowId(r.u32().map_err(bad)?), z: r.u32().map_err(bad)? }
            }
            MsgType::QueryWindows => Message::QueryWindows,
            MsgType::Notify => Message::Notify { text: r.string().map_err(bad)? },
            MsgType::SessionEnd => Message::SessionEnd,
            MsgType::KeyBind => Message::KeyBind {
                key: r.u32().map_err(bad)?,
                mods: r.u32().map_err(bad)?,
                steal: r.u32().map_err(bad)? != 0,
            },
            MsgType::WindowDragStart => Message::WindowDragStart { wid: WindowId(r.u32().map_err(bad)?) },
            MsgType::WindowUpdateShape => Message::WindowUpdateShape {
                wid: WindowId(r.u32().map_err(bad)?),
                alpha_threshold: r.u32().map_err(bad)? as u8,
            },
            MsgType::SetTitle => Message::SetTitle { wid: WindowId(r.u32().map_err(bad)?), title: r.string().map_err(bad)? },
        })
    }
}

/// Where a reply or broadcast should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Client(ClientId),
    Subscribers,
}

/// Handle one decoded message from `from` against the shared compositor
/// state, producing zero or more outbound messages. Mirrors
/// the shape of anyOS's per-command `match` in `desktop/ipc.rs`, one
/// arm per `CMD_*`/`EVT_*`, except replies are returned rather than written
/// directly to a channel, so the protocol thread owns the one place that
/// actually touches the transport.
pub fn handle(comp: &Compositor, from: ClientId, msg: Message) -> Vec<(Dest, Message)> {
    match msg {
        Message::Hello => vec![(
            Dest::Client(from),
            Message::Welcome { server_ident: comp.server_ident.clone(), screen_w: comp.screen_w, screen_h: comp.screen_h },
        )],
        Message::WindowNew { width, height } => {
            let (wid, title) = {
                let mut scene = comp.redraw_lock.lock();
                let (wid, region) = scene.registry.create(from, width, height, &*comp.shm, comp.tick_count());
                scene.zorder.insert(wid, ZTier::Middle);
                comp.damage.mark(scene.registry.get(wid).unwrap().rect());
                (wid, region.key().to_string())
            };
            let mut out = vec![(Dest::Client(from), Message::WindowInit { wid, bufid: 1, key: title })];
            if let Some((x, y, w, h)) = comp
                .redraw_lock
                .lock()
                .registry
                .get(wid)
                .map(|win| (win.x, win.y, win.width, win.height))
            {
                out.push((
                    Dest::Subscribers,
                    Message::WindowAdvertise { wid, owner: from, x, y, width: w, height: h, title: String::new() },
                ));
            }
            out
        }
        Message::Move { wid, x, y } => {
            let mut scene = comp.redraw_lock.lock();
            if let Ok(damage) = scene.registry.move_to(wid, from, x, y) {
                comp.damage.mark(damage);
            }
            Vec::new()
        }
        // Stages the window for its fade-out instead of removing it outright:
        // it drops out of the owner's window list immediately but stays
        // composable under `AnimMode::FadeOut` until the render loop's
        // `windows_to_remove` drain performs the actual removal (and sends
        // `WindowClosed`) once the animation finishes.
        Message::Close { wid } => {
            let mut scene = comp.redraw_lock.lock();
            let Some(rect) = scene.registry.get(wid).map(|w| w.rect()) else { return Vec::new() };
            let tick = comp.tick_count();
            if scene.registry.mark_for_close(wid, from, tick).is_ok() {
                comp.damage.mark(rect);
            }
            Vec::new()
        }
        Message::Focus { wid } => {
            let mut scene = comp.redraw_lock.lock();
            let Some(tier) = scene.registry.get(wid).map(|w| w.tier) else { return Vec::new() };
            if scene.zorder.make_top_of_tier(wid, tier) {
                if let Some(w) = scene.registry.get(wid) {
                    comp.damage.mark(w.rect());
                }
                drop(scene);
                return vec![(Dest::Subscribers, Message::FocusChanged { wid })];
            }
            Vec::new()
        }
        // Reorder: pull `wid` out of whatever tier it's in and insert it at
        // the tier `z` maps to, demoting whoever already held a singleton
        // Bottom/Top slot to Middle first.
        Message::WindowStack { wid, z } => {
            let mut scene = comp.redraw_lock.lock();
            if scene.registry.get(wid).is_none() {
                return Vec::new();
            }
            let tier = tier_from_z(z);
            let mut damage = scene.registry.get(wid).unwrap().rect();
            if tier != ZTier::Middle {
                if let Some(prev) = scene.zorder.occupant_of(tier) {
                    if prev != wid {
                        if let Some(w) = scene.registry.get(prev) {
                            damage = damage.union(&w.rect());
                        }
                        let _ = scene.registry.set_tier(prev, ZTier::Middle);
                        scene.zorder.insert(prev, ZTier::Middle);
                    }
                }
            }
            let _ = scene.registry.set_tier(wid, tier);
            scene.zorder.insert(wid, tier);
            comp.damage.mark(damage);
            Vec::new()
        }
        Message::Subscribe => {
            comp.subscribe(from);
            Vec::new()
        }
        Message::Unsubscribe => {
            comp.unsubscribe(from);
            Vec::new()
        }
        // One advertise per window in paint order, then a terminating empty
        // advertise (`WindowId(0)` is never a real id, since ids start at 1).
        Message::QueryWindows => {
            let scene = comp.redraw_lock.lock();
            let mut out: Vec<(Dest, Message)> = scene
                .zorder
                .paint_order()
                .filter_map(|wid| scene.registry.get(wid).map(|w| (wid, w)))
                .map(|(wid, w)| {
                    (
                        Dest::Client(from),
                        Message::WindowAdvertise {
                            wid,
                            owner: w.owner,
                            x: w.x,
                            y: w.y,
                            width: w.width,
                            height: w.height,
                            title: String::new(),
                        },
                    )
                })
                .collect();
            out.push((
                Dest::Client(from),
                Message::WindowAdvertise {
                    wid: WindowId(0),
                    owner: from,
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                    title: String::new(),
                },
            ));
            out
        }
        // REQUEST/OFFER only forward the resize ask to the window's owner;
        // neither one mutates the registry.
        Message::ResizeRequest { wid, width, height } => {
            let owner = comp.redraw_lock.lock().registry.get(wid).map(|w| w.owner);
            match owner {
                Some(owner) => vec![(Dest::Client(owner), Message::ResizeOffer { wid, width, height })],
                None => Vec::new(),
            }
        }
        Message::ResizeAccept { wid, width, height } => {
            let mut scene = comp.redraw_lock.lock();
            match scene.registry.resize_offer(wid, from, width, height, &*comp.shm) {
                Ok((bufid, region)) => {
                    vec![(Dest::Client(from), Message::ResizeBufid { wid, width, height, bufid, key: region.key().to_string() })]
                }
                Err(_) => Vec::new(),
            }
        }
        Message::ResizeDone { wid } => {
            let mut scene = comp.redraw_lock.lock();
            match scene.registry.resize_finish(wid, from) {
                Ok(damage) => {
                    comp.damage.mark(damage);
                    drop(scene);
                    vec![(Dest::Subscribers, Message::ResizeDone { wid })]
                }
                Err(_) => Vec::new(),
            }
        }
        Message::KeyBind { key, mods, steal } => {
            comp.input.lock().bind_key(mods, key, from, steal);
            Vec::new()
        }
        Message::WindowDragStart { wid } => {
            let owner_matches = comp.redraw_lock.lock().registry.get(wid).map(|w| w.owner) == Some(from);
            if owner_matches {
                let scene = comp.redraw_lock.lock();
                comp.input.lock().start_drag_source(wid, &scene.registry);
            }
            Vec::new()
        }
        Message::WindowUpdateShape { wid, alpha_threshold } => {
            let mut scene = comp.redraw_lock.lock();
            if let Some(w) = scene.registry.get_mut(wid) {
                if w.owner == from {
                    w.alpha_threshold = alpha_threshold;
                }
            }
            Vec::new()
        }
        Message::Notify { text } => {
            let subs = comp.subscribers();
            subs.into_iter().map(|c| (Dest::Client(c), Message::Notify { text: text.clone() })).collect()
        }
        Message::SessionEnd => vec![(Dest::Subscribers, Message::SessionEnd)],
        // Raw device input, whether from a real mouse/keyboard reader thread
        // or a nested host, arrives as messages from a synthetic client like
        // any other — this is the one place the interaction FSM actually
        // runs, keeping every state mutation serialized through this loop.
        Message::KeyEvent { key, chr, mods, down } => {
            let mut scene = comp.redraw_lock.lock();
            let panel_h = panel_height(&scene);
            let mut input = comp.input.lock();
            input.mods = mods;
            let effects = input.key(key, chr, down, comp.screen_w, comp.screen_h, panel_h);
            drop(input);
            apply_input_effects(comp, &mut scene, effects)
        }
        Message::MouseEvent { dx, dy, buttons, absolute } => {
            let mut scene = comp.redraw_lock.lock();
            let mut input = comp.input.lock();
            let mut effects = {
                let scene = &mut *scene;
                if absolute {
                    input.move_mouse_absolute(dx, dy, &mut scene.registry, &scene.zorder, &comp.damage, comp.screen_w, comp.screen_h)
                } else {
                    input.move_mouse(dx, dy, &mut scene.registry, &scene.zorder, &comp.damage, comp.screen_w, comp.screen_h)
                }
            };
            let changed = input.mouse_buttons ^ buttons;
            for button in [BUTTON_LEFT, BUTTON_RIGHT, BUTTON_MIDDLE] {
                if changed & button != 0 {
                    let down = buttons & button != 0;
                    let scene = &mut *scene;
                    effects.extend(input.button(button, down, &mut scene.registry, &mut scene.zorder, &comp.damage));
                }
            }
            drop(input);
            apply_input_effects(comp, &mut scene, effects)
        }
        Message::SetTitle { wid, title } => {
            let mut scene = comp.redraw_lock.lock();
            let Some(w) = scene.registry.get_mut(wid) else { return Vec::new() };
            if w.owner != from {
                return Vec::new();
            }
            let (x, y, width, height) = (w.x, w.y, w.width, w.height);
            drop(scene);
            vec![(Dest::Subscribers, Message::WindowAdvertise { wid, owner: from, x, y, width, height, title })]
        }
        // Replies/broadcasts the compositor only ever sends, never receives.
        Message::Welcome { .. }
        | Message::WindowInit { .. }
        | Message::FocusChanged { .. }
        | Message::WindowAdvertise { .. }
        | Message::WindowClosed { .. }
        | Message::ResizeOffer { .. }
        | Message::ResizeBufid { .. }
        | Message::WindowMouseEvent { .. } => Vec::new(),
    }
}

/// Maps a wire `z` value to the tier it targets: the two reserved sentinels
/// address the Bottom/Top singleton tiers, anything else lands in Middle.
fn tier_from_z(z: u32) -> ZTier {
    match z {
        crate::window::Z_BOTTOM => ZTier::Bottom,
        crate::window::Z_TOP => ZTier::Top,
        _ => ZTier::Middle,
    }
}

/// Height reserved at the top of the screen by the current top-tier (panel)
/// window, used to keep tiled/maximized geometry from running under it.
/// Zero if no top-tier window exists.
fn panel_height(scene: &Scene) -> u32 {
    scene
        .zorder
        .paint_order()
        .filter_map(|wid| scene.registry.get(wid))
        .filter(|w| w.tier == ZTier::Top)
        .map(|w| w.height)
        .max()
        .unwrap_or(0)
}

/// Turn the `InputEffect`s produced by one FSM dispatch into outbound
/// messages, applying whatever registry mutation and damage each one needs
/// first. This is the input-side counterpart of the per-`Message` arms
/// above — same job, driven by FSM output instead of a single wire message.
fn apply_input_effects(comp: &Compositor, scene: &mut Scene, effects: Vec<InputEffect>) -> Vec<(Dest, Message)> {
    let mut out = Vec::new();
    for effect in effects {
        match effect {
            InputEffect::FocusChanged(wid) => out.push((Dest::Subscribers, Message::FocusChanged { wid })),
            // Geometry already changed and damage already marked by the FSM
            // itself (`apply_move`/`button`); nothing left to send.
            InputEffect::WindowMoved(_) | InputEffect::WindowResized(_) => {}
            InputEffect::TileRequested(wid, rect) => {
                let Some(owner) = scene.registry.get(wid).map(|w| w.owner) else { continue };
                if let Ok(damage) = scene.registry.move_to(wid, owner, rect.x, rect.y) {
                    comp.damage.mark(damage);
                }
                out.push((Dest::Client(owner), Message::ResizeRequest { wid, width: rect.width, height: rect.height }));
            }
            InputEffect::RotateRequested(wid, delta) => {
                if let Ok(damage) = scene.registry.rotate_by(wid, delta) {
                    comp.damage.mark(damage);
                }
            }
            InputEffect::ResetRotationRequested(wid) => {
                if let Ok(damage) = scene.registry.reset_rotation(wid) {
                    comp.damage.mark(damage);
                }
            }
            InputEffect::ToggleHitShapeDebug => {
                comp.debug.lock().hit_shapes ^= true;
                comp.damage.mark(Rect::new(0, 0, comp.screen_w, comp.screen_h));
            }
            InputEffect::ToggleBoundsDebug => {
                comp.debug.lock().bounds ^= true;
                comp.damage.mark(Rect::new(0, 0, comp.screen_w, comp.screen_h));
            }
            InputEffect::ForwardKey { wid, key, chr, mods, down } => {
                if let Some(owner) = scene.registry.get(wid).map(|w| w.owner) {
                    out.push((Dest::Client(owner), Message::KeyEvent { key, chr, mods, down }));
                }
            }
            InputEffect::KeyBound { owner, key, chr, mods, down } => {
                out.push((Dest::Client(owner), Message::KeyEvent { key, chr, mods, down }));
            }
            InputEffect::MouseMove { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Move),
            InputEffect::MouseEnter { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Enter),
            InputEffect::MouseLeave { wid } => push_mouse(&mut out, scene, wid, 0, 0, MouseEventKind::Leave),
            InputEffect::MouseDown { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Down),
            InputEffect::MouseDrag { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Drag),
            InputEffect::MouseClick { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Click),
            InputEffect::MouseRaise { wid, x, y } => push_mouse(&mut out, scene, wid, x, y, MouseEventKind::Raise),
        }
    }
    out
}

/// `buttons` is always reported as 0 here: the FSM effect that triggered
/// this carries the gesture's position, not the held-button mask, and by
/// the time this runs the input lock guarding that state has already been
/// released to avoid a lock-order conflict with the scene lock held above.
fn push_mouse(out: &mut Vec<(Dest, Message)>, scene: &Scene, wid: WindowId, x: i32, y: i32, kind: MouseEventKind) {
    let Some(w) = scene.registry.get(wid) else { return };
    out.push((Dest::Client(w.owner), Message::WindowMouseEvent { wid, x, y, buttons: 0, kind }));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(m: Message) {
        let encoded = m.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, m);
    }

    #[test]
    fn round_trips_every_fixed_width_variant() {
        round_trip(Message::WindowNew { width: 100, height: 50 });
        round_trip(Message::Move { wid: WindowId(3), x: -5, y: 10 });
        round_trip(Message::Close { wid: WindowId(1) });
        round_trip(Message::Subscribe);
        round_trip(Message::ResizeDone { wid: WindowId(2) });
        round_trip(Message::KeyEvent { key: 65, chr: 97, mods: 0, down: true });
        round_trip(Message::KeyBind { key: 65, mods: 8, steal: true });
        round_trip(Message::WindowMouseEvent { wid: WindowId(1), x: 1, y: 2, buttons: 1, kind: MouseEventKind::Click });
        round_trip(Message::WindowStack { wid: WindowId(1), z: crate::window::Z_TOP });
    }

    #[test]
    fn round_trips_variants_with_strings() {
        round_trip(Message::WindowInit { wid: WindowId(1), bufid: 1, key: "sys.c.buf.1.1".into() });
        round_trip(Message::SetTitle { wid: WindowId(1), title: "hello world".into() });
        round_trip(Message::Welcome { server_ident: "compositor".into(), screen_w: 800, screen_h: 600 });
        round_trip(Message::WindowAdvertise {
            wid: WindowId(4),
            owner: ClientId(9),
            x: 0,
            y: 0,
            width: 10,
            height: 20,
            title: "term".into(),
        });
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut packet = Message::Close { wid: WindowId(1) }.encode();
        packet[0] ^= 0xFF;
        assert!(Message::decode(&packet).is_err());
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut packet = Message::Move { wid: WindowId(1), x: 1, y: 2 }.encode();
        packet.truncate(packet.len() - 2);
        assert!(Message::decode(&packet).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut packet = Message::Subscribe.encode();
        packet[4] = 0xFF;
        assert!(Message::decode(&packet).is_err());
    }

    fn new_test_compositor() -> Compositor {
        Compositor::new(200, 200, Box::new(crate::shm::HeapShm), "test")
    }

    #[test]
    fn window_new_replies_with_init_and_advertises() {
        let comp = new_test_compositor();
        let out = handle(&comp, ClientId(1), Message::WindowNew { width: 10, height: 10 });
        assert!(matches!(out[0], (Dest::Client(ClientId(1)), Message::WindowInit { .. })));
        assert!(matches!(out[1], (Dest::Subscribers, Message::WindowAdvertise { .. })));
    }

    #[test]
    fn move_by_non_owner_produces_no_effect() {
        let comp = new_test_compositor();
        let out = handle(&comp, ClientId(1), Message::WindowNew { width: 10, height: 10 });
        let Message::WindowInit { wid, .. } = &out[0].1 else { panic!() };
        let result = handle(&comp, ClientId(2), Message::Move { wid: *wid, x: 5, y: 5 });
        assert!(result.is_empty());
        assert_eq!(comp.redraw_lock.lock().registry.get(*wid).unwrap().x, 0);
    }

    #[test]
    fn resize_handshake_round_trips_through_all_five_messages() {
        let comp = new_test_compositor();
        let out = handle(&comp, ClientId(1), Message::WindowNew { width: 10, height: 10 });
        let Message::WindowInit { wid, .. } = &out[0].1 else { panic!() };
        let offer = handle(&comp, ClientId(1), Message::ResizeRequest { wid: *wid, width: 20, height: 20 });
        assert!(matches!(offer[0], (Dest::Client(ClientId(1)), Message::ResizeOffer { .. })));
        let bufid = handle(&comp, ClientId(1), Message::ResizeAccept { wid: *wid, width: 20, height: 20 });
        assert!(matches!(bufid[0], (Dest::Client(ClientId(1)), Message::ResizeBufid { .. })));
        let done = handle(&comp, ClientId(1), Message::ResizeDone { wid: *wid });
        assert!(matches!(done[0], (Dest::Subscribers, Message::ResizeDone { .. })));
        assert_eq!(comp.redraw_lock.lock().registry.get(*wid).unwrap().width, 20);
    }

    #[test]
    fn key_bind_is_recorded_on_the_shared_dispatcher() {
        let comp = new_test_compositor();
        handle(&comp, ClientId(3), Message::KeyBind { key: 65, mods: 0, steal: true });
        let effects = comp.input.lock().key(65, b'A' as u32, true, 0, 0, 0);
        assert!(effects.iter().any(|e| matches!(e, crate::input::InputEffect::KeyBound { owner: ClientId(3), .. })));
    }

    #[test]
    fn query_windows_replies_with_one_advertise_per_window_plus_terminator() {
        let comp = new_test_compositor();
        let out = handle(&comp, ClientId(1), Message::WindowNew { width: 10, height: 10 });
        let Message::WindowInit { wid, .. } = &out[0].1 else { panic!() };
        let reply = handle(&comp, ClientId(1), Message::QueryWindows);
        assert_eq!(reply.len(), 2);
        assert!(matches!(&reply[0], (Dest::Client(ClientId(1)), Message::WindowAdvertise { wid: w, .. }) if w == wid));
        assert_eq!(reply[1], (Dest::Client(ClientId(1)), Message::WindowAdvertise {
            wid: WindowId(0),
            owner: ClientId(1),
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            title: String::new(),
        }));
    }

    #[test]
    fn window_stack_to_top_demotes_the_previous_top_occupant() {
        let comp = new_test_compositor();
        let a = new_window(&comp, ClientId(1));
        let b = new_window(&comp, ClientId(2));
        handle(&comp, ClientId(1), Message::WindowStack { wid: a, z: crate::window::Z_TOP });
        assert_eq!(comp.redraw_lock.lock().registry.get(a).unwrap().tier, ZTier::Top);
        handle(&comp, ClientId(2), Message::WindowStack { wid: b, z: crate::window::Z_TOP });
        assert_eq!(comp.redraw_lock.lock().registry.get(b).unwrap().tier, ZTier::Top);
        assert_eq!(comp.redraw_lock.lock().registry.get(a).unwrap().tier, ZTier::Middle);
    }

    #[test]
    fn window_stack_to_an_ordinary_z_lands_in_middle() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        handle(&comp, ClientId(1), Message::WindowStack { wid, z: crate::window::Z_TOP });
        handle(&comp, ClientId(1), Message::WindowStack { wid, z: 0 });
        assert_eq!(comp.redraw_lock.lock().registry.get(wid).unwrap().tier, ZTier::Middle);
    }

    #[test]
    fn close_stages_fadeout_instead_of_removing_immediately() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        handle(&comp, ClientId(1), Message::Close { wid });
        let scene = comp.redraw_lock.lock();
        assert_eq!(scene.registry.get(wid).unwrap().anim_mode, crate::window::AnimMode::FadeOut);
        assert!(scene.registry.windows_of(ClientId(1)).is_empty());
    }

    const INPUT_THREAD: ClientId = ClientId(99);

    fn new_window(comp: &Compositor, owner: ClientId) -> WindowId {
        let out = handle(comp, owner, Message::WindowNew { width: 10, height: 10 });
        let Message::WindowInit { wid, .. } = out[0].1 else { panic!() };
        wid
    }

    #[test]
    fn mouse_event_down_focuses_and_reports_down_to_the_owner() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        let out = handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 1, absolute: true });
        assert!(out.contains(&(Dest::Subscribers, Message::FocusChanged { wid })));
        assert!(out.iter().any(
            |m| matches!(m, (Dest::Client(ClientId(1)), Message::WindowMouseEvent { kind: MouseEventKind::Down, .. }))
        ));
    }

    #[test]
    fn mouse_event_click_without_movement_reaches_the_owner() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 1, absolute: true });
        let out = handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 0, absolute: true });
        assert!(out.contains(&(Dest::Client(ClientId(1)), Message::WindowMouseEvent { wid, x: 5, y: 5, buttons: 0, kind: MouseEventKind::Click })));
    }

    #[test]
    fn key_event_forwards_to_the_focused_window() {
        let comp = new_test_compositor();
        new_window(&comp, ClientId(1));
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 1, absolute: true });
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 0, absolute: true });
        let out = handle(&comp, INPUT_THREAD, Message::KeyEvent { key: 65, chr: 97, mods: 0, down: true });
        assert!(out.contains(&(Dest::Client(ClientId(1)), Message::KeyEvent { key: 65, chr: 97, mods: 0, down: true })));
    }

    #[test]
    fn rotate_chord_rotates_the_focused_window_and_marks_damage() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 1, absolute: true });
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 0, absolute: true });
        comp.damage.drain();
        let mods = crate::keys::MOD_CTRL | crate::keys::MOD_SHIFT;
        handle(&comp, INPUT_THREAD, Message::KeyEvent { key: crate::keys::KEY_X, chr: 0, mods, down: true });
        assert_eq!(comp.redraw_lock.lock().registry.get(wid).unwrap().rotation, 5);
        assert!(comp.damage.has_pending());
    }

    #[test]
    fn debug_toggle_chord_flips_the_shared_flag() {
        let comp = new_test_compositor();
        let mods = crate::keys::MOD_CTRL | crate::keys::MOD_SHIFT;
        handle(&comp, INPUT_THREAD, Message::KeyEvent { key: crate::keys::KEY_V, chr: 0, mods, down: true });
        assert!(comp.debug.lock().hit_shapes);
    }

    #[test]
    fn maximize_chord_repositions_and_requests_a_resize() {
        let comp = new_test_compositor();
        let wid = new_window(&comp, ClientId(1));
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 1, absolute: true });
        handle(&comp, INPUT_THREAD, Message::MouseEvent { dx: 5, dy: 5, buttons: 0, absolute: true });
        let out = handle(&comp, INPUT_THREAD, Message::KeyEvent { key: crate::keys::KEY_F10, chr: 0, mods: crate::keys::MOD_ALT, down: true });
        assert!(out.iter().any(|m| matches!(m, (Dest::Client(ClientId(1)), Message::ResizeRequest { wid: w, .. }) if *w == wid)));
        assert_eq!(comp.redraw_lock.lock().registry.get(wid).unwrap().y, 0);
    }
}
