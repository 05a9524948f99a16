//! Memory objects — the abstract page-producing entities behind a [`VMArea`].
//!
//! [`VMArea`]: super::vmmap::VMArea

use super::pframe::PFrame;
use crate::{config::PAGE_SIZE, sync::SpinLock, KernelError};
use std::{collections::BTreeMap, sync::Arc};

/// Shared handle to a memory object.
///
/// `Arc::clone`/`drop` *is* `mobj_ref`/`mobj_put`: refcounting is the
/// ownership model the specification calls for (§3 "Ownership summary"), so
/// there is no separate counter to keep in sync by hand.
pub type MobjRef = Arc<dyn MemObject>;

/// The concrete flavor of a memory object, used where the specification
/// needs to tell variants apart (e.g. a shadow's `bottom.type != SHADOW`
/// invariant).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MobjKind {
    /// Backed by a vnode's bytes.
    VnodeBacked,
    /// Zero-filled, never backed by a file.
    Anonymous,
    /// Copy-on-write overlay over another mobj.
    Shadow,
    /// Backed by a character/block device (`null`, `zero`, …).
    Device,
}

/// A page-producing entity: the abstract interface every region of a
/// [`VMArea`] is ultimately bound to (§4.1).
///
/// [`VMArea`]: super::vmmap::VMArea
pub trait MemObject: Send + Sync + std::any::Any {
    /// This object's variant tag.
    fn kind(&self) -> MobjKind;

    /// Gives access to `self` as `dyn Any`, so code that must special-case
    /// shadow objects (chain walks, `shadow_collapse`) can downcast safely
    /// instead of reaching for unsafe pointer casts.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Returns a pinned frame for `pagenum`. When `forwrite` is set the
    /// returned frame must be safely writable without further copying.
    fn get_pframe(self: Arc<Self>, pagenum: usize, forwrite: bool) -> Result<Arc<PFrame>, KernelError>;

    /// Populates a freshly allocated, still-empty frame.
    fn fill_pframe(&self, pf: &PFrame) -> Result<(), KernelError>;

    /// Writes a dirty frame back to its backing store. A no-op for
    /// anonymous and shadow objects.
    fn flush_pframe(&self, _pf: &PFrame) -> Result<(), KernelError> {
        Ok(())
    }
}

/// Page cache shared by the concrete (non-shadow) memory object kinds.
///
/// Protects both the map of cached frames and is the lock the specification
/// calls "mobj mutex" in its lock-rank list (§5).
pub struct PageCache {
    frames: SpinLock<BTreeMap<usize, Arc<PFrame>>>,
}

impl Default for PageCache {
    fn default() -> Self {
        PageCache {
            frames: SpinLock::new(BTreeMap::new()),
        }
    }
}

impl PageCache {
    /// Implements the *default* `get_pframe` described in §4.1: look up the
    /// frame; if absent, allocate one and call `fill_pframe` to populate it.
    pub fn default_get_pframe(
        &self,
        pagenum: usize,
        fill: impl FnOnce(&PFrame) -> Result<(), KernelError>,
    ) -> Result<Arc<PFrame>, KernelError> {
        let mut frames = self.frames.lock();
        if let Some(pf) = frames.get(&pagenum) {
            return Ok(pf.clone());
        }
        let pf = Arc::new(PFrame::new(pagenum));
        fill(&pf)?;
        frames.insert(pagenum, pf.clone());
        Ok(pf)
    }

    /// Looks up a cached frame without allocating.
    pub fn lookup(&self, pagenum: usize) -> Option<Arc<PFrame>> {
        self.frames.lock().get(&pagenum).cloned()
    }

    /// Inserts a frame obtained by some other path (e.g. a shadow's
    /// write-side `get_pframe`, which must cache into *its own* store).
    pub fn insert(&self, pagenum: usize, pf: Arc<PFrame>) {
        self.frames.lock().insert(pagenum, pf);
    }

    /// Page numbers currently cached, for chain-collapse traversal.
    pub fn cached_pagenums(&self) -> Vec<usize> {
        self.frames.lock().keys().copied().collect()
    }

    /// Flushes every dirty frame, as the default destructor does before a
    /// mobj's refcount-triggered teardown (§4.1 "destructor").
    pub fn flush_all(&self, flush_one: impl Fn(&PFrame) -> Result<(), KernelError>) -> Result<(), KernelError> {
        for pf in self.frames.lock().values() {
            if pf.is_dirty() {
                flush_one(pf)?;
                pf.clear_dirty();
            }
        }
        Ok(())
    }
}

/// A zero-filled anonymous memory object: backs private, file-less `mmap`
/// regions and the `brk` heap.
pub struct AnonymousObject {
    cache: PageCache,
}

impl AnonymousObject {
    /// Creates a fresh anonymous object.
    pub fn new() -> Arc<Self> {
        Arc::new(AnonymousObject {
            cache: PageCache::default(),
        })
    }
}

impl MemObject for AnonymousObject {
    fn kind(&self) -> MobjKind {
        MobjKind::Anonymous
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_pframe(self: Arc<Self>, pagenum: usize, _forwrite: bool) -> Result<Arc<PFrame>, KernelError> {
        self.cache.default_get_pframe(pagenum, |pf| self.fill_pframe(pf))
    }

    fn fill_pframe(&self, _pf: &PFrame) -> Result<(), KernelError> {
        // Freshly allocated frames already read as zero; nothing to do.
        Ok(())
    }
}

/// A memory object whose pages always read as all-zero and discard writes
/// made through a non-mmap path, used by the `zero` device's mmap (§4.8).
pub struct ZeroObject {
    cache: PageCache,
}

impl ZeroObject {
    /// Creates a fresh zero object.
    pub fn new() -> Arc<Self> {
        Arc::new(ZeroObject {
            cache: PageCache::default(),
        })
    }
}

impl MemObject for ZeroObject {
    fn kind(&self) -> MobjKind {
        MobjKind::Device
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_pframe(self: Arc<Self>, pagenum: usize, _forwrite: bool) -> Result<Arc<PFrame>, KernelError> {
        self.cache.default_get_pframe(pagenum, |pf| self.fill_pframe(pf))
    }

    fn fill_pframe(&self, _pf: &PFrame) -> Result<(), KernelError> {
        Ok(())
    }
}

/// What a vnode-backed memory object needs from its vnode: paging a 4 KiB
/// block in or out. Implemented by the filesystem's regular-file vnodes, so
/// `mm` never has to name a concrete vnode type.
pub trait PageBackingFile: Send + Sync {
    /// Reads the page at `pagenum` into `buf`. Pages past the current file
    /// length read as zero.
    fn read_page(&self, pagenum: usize, buf: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError>;

    /// Writes `buf` back to the page at `pagenum`, growing the file if
    /// necessary.
    fn write_page(&self, pagenum: usize, buf: &[u8; PAGE_SIZE]) -> Result<(), KernelError>;
}

/// A memory object backed by a vnode's bytes (§3 "Memory Object").
pub struct VnodeBackedObject {
    file: Arc<dyn PageBackingFile>,
    cache: PageCache,
}

impl VnodeBackedObject {
    /// Creates an object paging through `file`.
    pub fn new(file: Arc<dyn PageBackingFile>) -> Arc<Self> {
        Arc::new(VnodeBackedObject {
            file,
            cache: PageCache::default(),
        })
    }
}

impl MemObject for VnodeBackedObject {
    fn kind(&self) -> MobjKind {
        MobjKind::VnodeBacked
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_pframe(self: Arc<Self>, pagenum: usize, _forwrite: bool) -> Result<Arc<PFrame>, KernelError> {
        self.cache.default_get_pframe(pagenum, |pf| self.fill_pframe(pf))
    }

    fn fill_pframe(&self, pf: &PFrame) -> Result<(), KernelError> {
        let mut buf = [0u8; PAGE_SIZE];
        self.file.read_page(pf.pagenum(), &mut buf)?;
        pf.fill_from(&buf);
        Ok(())
    }

    fn flush_pframe(&self, pf: &PFrame) -> Result<(), KernelError> {
        pf.with_bytes(|bytes| self.file.write_page(pf.pagenum(), bytes))
    }
}

impl Drop for VnodeBackedObject {
    fn drop(&mut self) {
        // Default destructor semantics (§4.1): flush dirty frames back to
        // the vnode before the cache and its frames are released.
        let _ = self.cache.flush_all(|pf| self.flush_pframe(pf));
    }
}
