//! Binary entry point: parses CLI args, stands up the compositor context,
//! spawns the render (or, nested, the host-pump) thread, and runs the
//! protocol server on the main thread — the same management/render split as
//! anyOS's own thread roster. A real mouse/keyboard driver feeding
//! `Message::KeyEvent`/`MouseEvent` as a synthetic client is still an
//! external collaborator this crate doesn't ship a concrete implementation
//! of in native mode; `-n`/`--nest` instead drives `nested::pump` against
//! `HeadlessNestedHost`, the boundary stand-in `nested.rs` ships for the
//! host environment a real nested embedding would supply.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use log::{error, info, warn};

use wincomp::backend::FramebufferBackend;
use wincomp::compositor::Compositor;
use wincomp::config::{resolve_geometry, Cli};
use wincomp::nested::{self, HeadlessNestedHost};
use wincomp::protocol::{self, Dest, Message};
use wincomp::render::{composite_frame, FRAME_INTERVAL};
use wincomp::shm::HeapShm;
use wincomp::transport::Inbound;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let geometry = match resolve_geometry(&cli) {
        Ok(g) => g,
        Err(e) => {
            error!("wincomp: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("wincomp: starting at {}x{} (nested={})", geometry.width, geometry.height, cli.nest);

    let server_ident = if cli.nest { format!("compositor-nest-{}", std::process::id()) } else { "compositor".to_string() };
    let comp = Arc::new(Compositor::new(geometry.width, geometry.height, Box::new(HeapShm), server_ident.clone()));

    {
        let comp = comp.clone();
        let (w, h) = (geometry.width, geometry.height);
        if cli.nest {
            thread::spawn(move || nested_thread_entry(comp, w, h));
        } else {
            thread::spawn(move || render_thread_entry(comp, w, h));
        }
    }

    let shell = cli.session_shell.as_deref().unwrap_or("/bin/glogin");
    spawn_session_shell(shell, &server_ident);

    // Runs until the process is killed — the protocol server is the
    // compositor's reason to keep living.
    protocol_thread_entry(&comp);
    ExitCode::SUCCESS
}

/// Render thread: fixed ~60Hz cadence via `composite_frame`, sleeping only
/// the cadence remainder — ported from anyOS's `render_thread_entry`
/// frame-pacing loop, with `parking_lot::Mutex::try_lock` standing in for
/// its spinlock `try_lock`/`release_lock` pair.
fn render_thread_entry(comp: Arc<Compositor>, width: u32, height: u32) {
    let mut backend = FramebufferBackend::new(width, height);
    let mut frame: u64 = 0;
    loop {
        let t0 = Instant::now();
        if comp.damage.has_pending() {
            composite_frame(&comp, &mut backend, true);
        }
        frame = frame.wrapping_add(1);
        let elapsed = t0.elapsed();
        if elapsed < FRAME_INTERVAL {
            thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }
}

/// Nested-mode counterpart of `render_thread_entry`: the same fixed-cadence
/// loop, but driving `nested::pump` against `HeadlessNestedHost` instead of
/// compositing unconditionally against a raw framebuffer — `pump` itself
/// decides whether there's a frame worth presenting.
fn nested_thread_entry(comp: Arc<Compositor>, width: u32, height: u32) {
    let mut backend = FramebufferBackend::new(width, height);
    let mut host = HeadlessNestedHost;
    loop {
        let t0 = Instant::now();
        nested::pump(&comp, &mut host, &mut backend);
        let elapsed = t0.elapsed();
        if elapsed < FRAME_INTERVAL {
            thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }
}

/// Protocol server loop: the main thread owns the transport exclusively
/// and is the only place that actually calls `send`/`listen`.
fn protocol_thread_entry(comp: &Arc<Compositor>) {
    loop {
        match comp.transport.listen() {
            Inbound::PeerDied(client) => {
                let tick = comp.tick_count();
                let damage = comp.redraw_lock.lock().registry.mark_client_closing(client, tick);
                if let Some(rect) = damage {
                    comp.damage.mark(rect);
                }
                comp.unsubscribe(client);
                warn!("wincomp: client {client:?} disconnected");
            }
            Inbound::Message(client, bytes) => {
                let msg = match Message::decode(&bytes) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("wincomp: dropping malformed message from {client:?}: {e}");
                        continue;
                    }
                };
                for (dest, out) in protocol::handle(comp, client, msg) {
                    dispatch(comp, client, dest, out);
                }
            }
        }
    }
}

fn dispatch(comp: &Compositor, from: wincomp::transport::ClientId, dest: Dest, msg: Message) {
    let encoded = msg.encode();
    match dest {
        Dest::Client(to) => comp.transport.send(to, encoded),
        Dest::Subscribers => {
            let subs = comp.subscribers();
            comp.transport.broadcast(&encoded, subs.into_iter().filter(|&c| c != from));
        }
    }
}

/// Launch the session shell with `DISPLAY` pointed at this compositor's
/// server identity, the same way an X server or Wayland compositor hands a
/// freshly spawned shell its connection string. With no shell named on the
/// command line this is `/bin/glogin`, anyOS's own login/session manager.
fn spawn_session_shell(shell: &str, server_ident: &str) {
    match std::process::Command::new(shell).env("DISPLAY", server_ident).spawn() {
        Ok(_) => info!("wincomp: spawned session shell '{shell}'"),
        Err(e) => error!("wincomp: failed to spawn session shell '{shell}': {e}"),
    }
}
