//! The point-to-point message transport — an out-of-scope external
//! collaborator that the protocol server treats as a framed,
//! addressed message bus. The only contract the core relies on:
//!
//!   - `listen` blocks until a message (or a peer's death, signaled by a
//!     zero-length packet) arrives, and reports who it came from.
//!   - `send` delivers a framed message to a specific peer address.
//!
//! anyOS funnels input-device and render-thread events into the
//! protocol loop by having those threads act as synthetic clients over this
//! same transport, to eliminate cross-thread locks on the interaction FSM —
//! we preserve that: `ChannelTransport::connect` hands back a `ClientHandle`
//! an input-reader thread can use to push messages into the same receive
//! loop real client connections feed, indistinguishable on the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

/// Opaque client address. Both real client connections and in-process
/// synthetic clients (input readers, the render thread) get one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

pub enum Inbound {
    Message(ClientId, Vec<u8>),
    /// Zero-length packet from a peer: it is dead.
    PeerDied(ClientId),
}

/// A handle a client (real or synthetic) uses to push messages toward the
/// server and to receive messages addressed to it.
pub struct ClientHandle {
    pub id: ClientId,
    to_server: Sender<(ClientId, Vec<u8>)>,
    inbox: Receiver<Vec<u8>>,
    registry: Arc<Mutex<HashMap<ClientId, Sender<Vec<u8>>>>>,
}

impl ClientHandle {
    pub fn send_to_server(&self, body: Vec<u8>) {
        let _ = self.to_server.send((self.id, body));
    }

    /// Blocks for the next message addressed to this client.
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.inbox.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.inbox.try_recv().ok()
    }

    /// Disconnects: the server will observe a zero-length packet next time
    /// it polls this peer's slot.
    pub fn close(self) {
        let _ = self.to_server.send((self.id, Vec::new()));
        self.registry.lock().remove(&self.id);
    }
}

/// In-process transport backed by `std::sync::mpsc`. Good enough for nested
/// mode, nested-adapter testing, and all of this crate's integration tests;
/// a real multi-process deployment swaps the inbound/outbound plumbing for
/// a socket or ring-buffer transport without the protocol server noticing.
pub struct ChannelTransport {
    next_id: AtomicU64,
    inbound_tx: Sender<(ClientId, Vec<u8>)>,
    inbound_rx: Mutex<Receiver<(ClientId, Vec<u8>)>>,
    outboxes: Arc<Mutex<HashMap<ClientId, Sender<Vec<u8>>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        ChannelTransport {
            next_id: AtomicU64::new(1),
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
            outboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new client (real or synthetic) and get back its handle.
    pub fn connect(&self) -> ClientHandle {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (out_tx, out_rx) = mpsc::channel();
        self.outboxes.lock().insert(id, out_tx);
        ClientHandle {
            id,
            to_server: self.inbound_tx.clone(),
            inbox: out_rx,
            registry: self.outboxes.clone(),
        }
    }

    /// Blocks until the next inbound message or peer death is observed.
    pub fn listen(&self) -> Inbound {
        let (id, body) = self
            .inbound_rx
            .lock()
            .recv()
            .expect("transport sender half never fully drops while server runs");
        if body.is_empty() {
            self.outboxes.lock().remove(&id);
            Inbound::PeerDied(id)
        } else {
            Inbound::Message(id, body)
        }
    }

    /// Send a framed message to `to`. Silently dropped if the peer has
    /// already disconnected — the protocol layer treats unknown/gone peers
    /// as a no-op, never an error.
    pub fn send(&self, to: ClientId, body: Vec<u8>) {
        if let Some(tx) = self.outboxes.lock().get(&to) {
            let _ = tx.send(body);
        }
    }

    pub fn broadcast(&self, body: &[u8], to: impl Iterator<Item = ClientId>) {
        for id in to {
            self.send(id, body.to_vec());
        }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}
