//! Copy-on-write shadow objects and chain collapsing (§4.2).

use super::{
    mobj::{MemObject, MobjKind, MobjRef, PageCache},
    pframe::PFrame,
};
use crate::{sync::SpinLock, KernelError};
use std::sync::Arc;

/// A copy-on-write overlay over another memory object.
///
/// Holds exactly two strong references: `shadowed`, the immediate parent
/// (itself possibly a shadow), and `bottom`, the non-shadow object the whole
/// chain ultimately reads through. `bottom` is cached on every shadow so
/// walking to it is O(1) rather than O(chain length).
pub struct ShadowObject {
    own_cache: PageCache,
    links: SpinLock<Links>,
}

struct Links {
    shadowed: MobjRef,
    bottom: MobjRef,
}

impl ShadowObject {
    /// Creates a new, singly-referenced shadow over `m`.
    ///
    /// If `m` is itself a shadow, the new shadow inherits `m`'s cached
    /// `bottom`; otherwise `m` becomes the bottom.
    pub fn create(m: MobjRef) -> Arc<Self> {
        let bottom = match m.as_any().downcast_ref::<ShadowObject>() {
            Some(s) => s.bottom(),
            None => m.clone(),
        };
        Arc::new(ShadowObject {
            own_cache: PageCache::default(),
            links: SpinLock::new(Links { shadowed: m, bottom }),
        })
    }

    /// The bottom (non-shadow) object this chain ultimately reads through.
    pub fn bottom(&self) -> MobjRef {
        self.links.lock().bottom.clone()
    }

    /// The immediate parent in the chain.
    pub fn shadowed(&self) -> MobjRef {
        self.links.lock().shadowed.clone()
    }

    /// Shortens a chain that has become singly-referenced.
    ///
    /// While `self.shadowed` is itself a shadow: migrate every frame cached
    /// in it that `self` does not already have, then drop `self.shadowed`
    /// (dropping its last `Arc` destroys it) and advance to the next link.
    /// If the walk reaches `bottom`, `shadowed` is pinned there.
    ///
    /// Requires every intermediate shadow to have refcount 1: collapsing a
    /// shadow still referenced elsewhere (e.g. by a sibling after fork)
    /// would silently steal pages another owner still needs.
    pub fn collapse(self: &Arc<Self>) {
        loop {
            let shadowed = self.links.lock().shadowed.clone();
            let next = {
                let mid = match shadowed.as_any().downcast_ref::<ShadowObject>() {
                    Some(mid) if Arc::strong_count(&shadowed) == 1 => mid,
                    _ => break,
                };
                for pagenum in mid.own_cache.cached_pagenums() {
                    if self.own_cache.lookup(pagenum).is_none()
                        && let Some(pf) = mid.own_cache.lookup(pagenum)
                    {
                        self.own_cache.insert(pagenum, pf);
                    }
                }
                mid.links.lock().shadowed.clone()
            };
            self.links.lock().shadowed = next;
        }
        let mut links = self.links.lock();
        if links.shadowed.kind() != MobjKind::Shadow {
            let bottom = links.bottom.clone();
            links.shadowed = bottom;
        }
    }
}

impl MemObject for ShadowObject {
    fn kind(&self) -> MobjKind {
        MobjKind::Shadow
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn get_pframe(self: Arc<Self>, pagenum: usize, forwrite: bool) -> Result<Arc<PFrame>, KernelError> {
        if forwrite {
            // Writes always diverge into this shadow's own cache.
            return self.own_cache.default_get_pframe(pagenum, |pf| self.fill_pframe(pf));
        }
        // Reads walk the chain non-recursively looking for a cached copy.
        if let Some(pf) = self.own_cache.lookup(pagenum) {
            return Ok(pf);
        }
        let mut cur = self.links.lock().shadowed.clone();
        while let Some(s) = cur.as_any().downcast_ref::<ShadowObject>() {
            if let Some(pf) = s.own_cache.lookup(pagenum) {
                return Ok(pf);
            }
            let next = s.links.lock().shadowed.clone();
            cur = next;
        }
        cur.get_pframe(pagenum, false)
    }

    fn fill_pframe(&self, pf: &PFrame) -> Result<(), KernelError> {
        let pagenum = pf.pagenum();
        let mut cur = self.links.lock().shadowed.clone();
        while let Some(s) = cur.as_any().downcast_ref::<ShadowObject>() {
            if let Some(src) = s.own_cache.lookup(pagenum) {
                src.with_bytes(|bytes| pf.fill_from(bytes));
                return Ok(());
            }
            let next = s.links.lock().shadowed.clone();
            cur = next;
        }
        let bottom_pf = cur.get_pframe(pagenum, false)?;
        bottom_pf.with_bytes(|bytes| pf.fill_from(bytes));
        Ok(())
    }

    fn flush_pframe(&self, _pf: &PFrame) -> Result<(), KernelError> {
        // Shadows never back to disk.
        Ok(())
    }
}

impl Drop for ShadowObject {
    fn drop(&mut self) {
        // Default destructor semantics: flush owned frames (a no-op for
        // shadows) before `Links` drops, releasing `shadowed` and `bottom`.
        let _ = self.own_cache.flush_all(|pf| self.flush_pframe(pf));
    }
}
