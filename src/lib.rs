//! A damage-driven window compositor core: window registry, three-tier
//! z-order, a fixed-cadence render loop, an input dispatcher with an
//! interaction FSM, and a framed client protocol server.
//!
//! Raster backends, shared memory, client transport, and process launching
//! are all boundary traits (`backend::GraphicsBackend`, `shm::ShmFacility`,
//! `transport::ChannelTransport`) — this crate supplies one in-process
//! implementation of each, good enough for nested mode and for every test
//! here, and treats anything fancier as an external collaborator's problem.

pub mod backend;
pub mod compositor;
pub mod config;
pub mod damage;
pub mod error;
pub mod geometry;
pub mod input;
pub mod keys;
pub mod nested;
pub mod protocol;
pub mod registry;
pub mod render;
pub mod shm;
pub mod transport;
pub mod window;
pub mod zorder;
