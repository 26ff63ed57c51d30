//! The shared-memory facility — an out-of-scope external collaborator.
//! The compositor core only needs named, resizable byte regions keyed by
//! `sys.<server-ident>.buf.<wid>.<bufid>`; it never needs to know how the
//! region is actually backed.
//!
//! anyOS maps shm directly into its single address space as raw
//! `*mut u32` pointers (`desktop/window.rs`'s `shm_ptr`) because compositor
//! and client share a kernel and address space. A hosted process instead
//! holds an RAII handle (`ShmRegion`) so a window's buffer is unmapped
//! automatically on close or on resize promotion — a buffer stays mapped
//! for exactly `4*width*height` bytes for its whole lifetime.

use std::sync::Arc;

use parking_lot::RwLock;

/// Implemented by whatever shared-memory backend the host provides.
/// The in-process `HeapShm` below is the only implementation this crate
/// ships; a real deployment would back this with POSIX shm_open or a
/// platform equivalent, entirely outside the compositor's concern.
pub trait ShmFacility: Send + Sync {
    fn allocate(&self, key: &str, len: usize) -> ShmRegion;
}

/// A mapped byte region, ARGB32 pixels when used as a window buffer
/// (stride = 4*width).
#[derive(Clone)]
pub struct ShmRegion {
    key: String,
    data: Arc<RwLock<Vec<u8>>>,
}

impl ShmRegion {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the alpha channel of pixel `(x, y)` given a buffer `stride_w`.
    /// ARGB32, little-endian word, alpha in the high byte.
    pub fn read_alpha(&self, x: u32, y: u32, stride_w: u32) -> u8 {
        let data = self.data.read();
        let idx = ((y * stride_w + x) * 4) as usize;
        data.get(idx + 3).copied().unwrap_or(0)
    }

    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.read();
        f(&data)
    }

    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.write();
        f(&mut data)
    }
}

/// In-process shm: a named, ref-counted, zero-filled byte vector. Good
/// enough for nested mode and for tests; a real multi-process deployment
/// swaps this for a POSIX-backed implementation without touching anything
/// above `ShmFacility`.
pub struct HeapShm;

impl ShmFacility for HeapShm {
    fn allocate(&self, key: &str, len: usize) -> ShmRegion {
        ShmRegion {
            key: key.to_string(),
            data: Arc::new(RwLock::new(vec![0u8; len])),
        }
    }
}

/// Build the shm key for a window buffer.
pub fn window_buffer_key(server_ident: &str, wid: u32, bufid: u32) -> String {
    format!("sys.{server_ident}.buf.{wid}.{bufid}")
}

/// Build the shm key for a preloaded font blob.
pub fn font_key(server_ident: &str, family: &str) -> String {
    format!("sys.{server_ident}.fonts.{family}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_zero_filled() {
        let shm = HeapShm;
        let region = shm.allocate("sys.compositor.buf.1.1", 4 * 4 * 4);
        assert_eq!(region.len(), 64);
        assert_eq!(region.read_alpha(0, 0, 4), 0);
    }

    #[test]
    fn alpha_read_reflects_write() {
        let shm = HeapShm;
        let region = shm.allocate("k", 4 * 2 * 2);
        region.with_pixels_mut(|p| p[3] = 200);
        assert_eq!(region.read_alpha(0, 0, 2), 200);
    }

    #[test]
    fn key_formats() {
        assert_eq!(window_buffer_key("compositor", 3, 1), "sys.compositor.buf.3.1");
        assert_eq!(font_key("compositor", "sans"), "sys.compositor.fonts.sans");
    }
}
