//! Cached pages.

use crate::{config::PAGE_SIZE, sync::SpinLock};

/// A cached page belonging to exactly one [`MemObject`](super::mobj::MemObject)
/// at a given page number.
///
/// Carries the bytes that, on real hardware, would live at some kernel
/// virtual address; a dirty bit; and the lock acquired while the page is
/// filled or flushed (§3 "Page Frame").
pub struct PFrame {
    pagenum: usize,
    inner: SpinLock<PFrameInner>,
}

struct PFrameInner {
    data: Box<[u8; PAGE_SIZE]>,
    dirty: bool,
}

impl PFrame {
    /// Allocates a fresh, zero-filled frame for `pagenum`.
    pub fn new(pagenum: usize) -> Self {
        PFrame {
            pagenum,
            inner: SpinLock::new(PFrameInner {
                data: Box::new([0u8; PAGE_SIZE]),
                dirty: false,
            }),
        }
    }

    /// The page number this frame is cached under.
    pub fn pagenum(&self) -> usize {
        self.pagenum
    }

    /// Runs `f` with read access to the frame's bytes.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> R {
        f(&self.inner.lock().data)
    }

    /// Runs `f` with write access to the frame's bytes, marking it dirty.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> R {
        let mut guard = self.inner.lock();
        let r = f(&mut guard.data);
        guard.dirty = true;
        r
    }

    /// Copies `src` into this frame without marking it dirty.
    ///
    /// Used by `fill_pframe` implementations, which populate a freshly
    /// created frame from its backing store or parent shadow — that is not
    /// a write by the consumer of the frame.
    pub fn fill_from(&self, src: &[u8; PAGE_SIZE]) {
        let mut guard = self.inner.lock();
        guard.data.copy_from_slice(src);
    }

    /// Whether the frame has unflushed writes.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Clears the dirty bit, e.g. after a successful flush.
    pub fn clear_dirty(&self) {
        self.inner.lock().dirty = false;
    }
}
