//! Address-space map: an ordered set of [`VMArea`]s (§4.3).

use super::{
    mobj::{AnonymousObject, MobjRef},
    shadow::ShadowObject,
};
use crate::{
    config::{PAGE_SIZE, USER_MEM_HIGH_PN, USER_MEM_LOW_PN},
    KernelError,
};

bitflags::bitflags! {
    /// Page protection bits.
    pub struct Prot: u8 {
        /// No access.
        const NONE = 0;
        /// Readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXEC = 1 << 2;
    }
}

bitflags::bitflags! {
    /// `mmap` sharing/placement flags.
    pub struct MapFlags: u8 {
        /// Changes are visible to other mappers of the same object.
        const SHARED = 1 << 0;
        /// Changes are copy-on-write, private to this address space.
        const PRIVATE = 1 << 1;
        /// Map at exactly `lopage`, clobbering any overlap.
        const FIXED = 1 << 2;
        /// Not backed by any file.
        const ANON = 1 << 3;
    }
}

/// Search direction for [`VMMap::find_range`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SearchDir {
    /// Search from `USER_MEM_LOW_PN` upward.
    LoHi,
    /// Search from `USER_MEM_HIGH_PN` downward.
    HiLo,
}

/// A marker distinguishing the single `brk` heap area from ordinary `mmap`
/// areas, mirroring how the original kernel tracks its heap area apart from
/// the rest of the map.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AreaTag {
    /// An area created by `mmap`.
    Mapped,
    /// The process's single heap area, grown/shrunk by `brk`.
    Heap,
}

/// A contiguous run of virtual pages bound to one backing memory object
/// (§3 "VMArea").
pub struct VMArea {
    /// Start page number (inclusive).
    pub start: usize,
    /// End page number (exclusive).
    pub end: usize,
    /// Backing memory object.
    pub mobj: MobjRef,
    /// Offset into `mobj`, in pages.
    pub off: usize,
    pub prot: Prot,
    pub flags: MapFlags,
    pub tag: AreaTag,
}

impl VMArea {
    /// Number of pages this area spans.
    pub fn npages(&self) -> usize {
        self.end - self.start
    }
}

/// An ordered, disjoint set of [`VMArea`]s (§3 "VMMap").
#[derive(Default)]
pub struct VMMap {
    areas: Vec<VMArea>,
}

impl VMMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// All areas, in ascending `start` order.
    pub fn areas(&self) -> &[VMArea] {
        &self.areas
    }

    /// Inserts `new_vma` keeping the list sorted by `start`.
    ///
    /// Panics (an assertion, not a user-facing error — see §7 "Invariant
    /// violations") if `new_vma` overlaps an existing area.
    pub fn insert(&mut self, new_vma: VMArea) {
        let pos = self.areas.partition_point(|a| a.start < new_vma.start);
        if let Some(before) = pos.checked_sub(1).and_then(|i| self.areas.get(i)) {
            assert!(before.end <= new_vma.start, "overlapping vmarea insert");
        }
        if let Some(after) = self.areas.get(pos) {
            assert!(new_vma.end <= after.start, "overlapping vmarea insert");
        }
        self.areas.insert(pos, new_vma);
    }

    /// First-fit search for `n` consecutive free pages in
    /// `[USER_MEM_LOW_PN, USER_MEM_HIGH_PN)`.
    pub fn find_range(&self, n: usize, dir: SearchDir) -> Option<usize> {
        match dir {
            SearchDir::LoHi => {
                let mut cursor = USER_MEM_LOW_PN;
                for a in &self.areas {
                    if a.start >= cursor && a.start - cursor >= n {
                        return Some(cursor);
                    }
                    cursor = cursor.max(a.end);
                }
                if USER_MEM_HIGH_PN.checked_sub(cursor)? >= n {
                    Some(cursor)
                } else {
                    None
                }
            }
            SearchDir::HiLo => {
                let mut cursor = USER_MEM_HIGH_PN;
                for a in self.areas.iter().rev() {
                    if cursor >= a.end && cursor - a.end >= n {
                        return Some(cursor - n);
                    }
                    cursor = cursor.min(a.start);
                }
                if cursor.checked_sub(USER_MEM_LOW_PN)? >= n {
                    Some(cursor - n)
                } else {
                    None
                }
            }
        }
    }

    /// Returns the area containing page `vfn`, if any.
    pub fn lookup(&self, vfn: usize) -> Option<&VMArea> {
        let pos = self.areas.partition_point(|a| a.start <= vfn);
        pos.checked_sub(1)
            .and_then(|i| self.areas.get(i))
            .filter(|a| a.start <= vfn && vfn < a.end)
    }

    /// Returns the area containing page `vfn`, mutably.
    pub fn lookup_mut(&mut self, vfn: usize) -> Option<&mut VMArea> {
        let pos = self.areas.partition_point(|a| a.start <= vfn);
        pos.checked_sub(1)
            .and_then(move |i| self.areas.get_mut(i))
            .filter(|a| a.start <= vfn && vfn < a.end)
    }

    /// True iff no existing area intersects `[start, start+n)`.
    pub fn is_range_empty(&self, start: usize, n: usize) -> bool {
        let end = start + n;
        !self.areas.iter().any(|a| a.start < end && a.end > start)
    }

    /// Maps `n` pages backed by `mobj` (already acquired by the caller — an
    /// anonymous object, or a vnode's `mmap` result), wrapping it in a fresh
    /// shadow when `flags` is `PRIVATE` (§4.3 "map").
    #[allow(clippy::too_many_arguments)]
    pub fn map(
        &mut self,
        mobj: MobjRef,
        lopage: usize,
        n: usize,
        off_pages: usize,
        prot: Prot,
        flags: MapFlags,
        dir: SearchDir,
    ) -> Result<usize, KernelError> {
        let start = if lopage == 0 {
            self.find_range(n, dir).ok_or(KernelError::NoMemory)?
        } else {
            lopage
        };
        if flags.contains(MapFlags::FIXED) && !self.is_range_empty(start, n) {
            self.remove(start, n)?;
        }
        if !flags.contains(MapFlags::FIXED) && !self.is_range_empty(start, n) {
            return Err(KernelError::InvalidArgument);
        }
        let area_mobj = if flags.contains(MapFlags::PRIVATE) {
            ShadowObject::create(mobj)
        } else {
            mobj
        };
        self.insert(VMArea {
            start,
            end: start + n,
            mobj: area_mobj,
            off: off_pages,
            prot,
            flags,
            tag: AreaTag::Mapped,
        });
        Ok(start)
    }

    /// Unmaps `[lopage, lopage+n)`, splitting or trimming overlapping areas
    /// as needed (§4.3 "remove").
    pub fn remove(&mut self, lopage: usize, n: usize) -> Result<(), KernelError> {
        let e = lopage + n;
        let mut i = 0;
        let mut to_insert = Vec::new();
        while i < self.areas.len() {
            let remove_whole;
            {
                let a = &mut self.areas[i];
                if a.end <= lopage || a.start >= e {
                    i += 1;
                    continue;
                }
                if a.start < lopage && a.end > e {
                    // Contained: split into two areas.
                    let tail_off = a.off + (e - a.start);
                    to_insert.push(VMArea {
                        start: e,
                        end: a.end,
                        mobj: a.mobj.clone(),
                        off: tail_off,
                        prot: a.prot,
                        flags: a.flags,
                        tag: a.tag,
                    });
                    a.end = lopage;
                    remove_whole = false;
                } else if a.start >= lopage && a.end > e {
                    // Right-overlap: raise start.
                    a.off += e - a.start;
                    a.start = e;
                    remove_whole = false;
                } else if a.start < lopage && a.end <= e {
                    // Left-overlap: lower end.
                    a.end = lopage;
                    remove_whole = false;
                } else {
                    // Covered entirely.
                    remove_whole = true;
                }
            }
            if remove_whole {
                self.areas.remove(i);
            } else {
                i += 1;
            }
        }
        for a in to_insert {
            self.insert(a);
        }
        Ok(())
    }

    /// Clones this map for `fork`: shared areas keep their mobj (ref++);
    /// private areas get a fresh shadow pair, one replacing this map's area
    /// and one for the child (§4.3 "clone").
    pub fn clone_for_fork(&mut self) -> VMMap {
        let mut child = VMMap::new();
        for a in &mut self.areas {
            let (parent_mobj, child_mobj) = if a.flags.contains(MapFlags::SHARED) {
                (a.mobj.clone(), a.mobj.clone())
            } else {
                let parent_shadow = ShadowObject::create(a.mobj.clone());
                let child_shadow = ShadowObject::create(a.mobj.clone());
                (parent_shadow as MobjRef, child_shadow as MobjRef)
            };
            child.insert(VMArea {
                start: a.start,
                end: a.end,
                mobj: child_mobj,
                off: a.off,
                prot: a.prot,
                flags: a.flags,
                tag: a.tag,
            });
            a.mobj = parent_mobj;
        }
        child
    }

    /// Reads `count` bytes starting at byte address `vaddr` into `buf`.
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        self.copy(vaddr, buf.len(), |area, off, chunk, dst_off| {
            let pf = area.mobj.clone().get_pframe(off, false)?;
            pf.with_bytes(|bytes| buf[dst_off..dst_off + chunk.len()].copy_from_slice(&bytes[chunk.clone()]));
            Ok(())
        })
    }

    /// Writes `buf` starting at byte address `vaddr`, marking touched
    /// frames dirty.
    pub fn write(&self, vaddr: usize, buf: &[u8]) -> Result<(), KernelError> {
        self.copy(vaddr, buf.len(), |area, off, chunk, src_off| {
            let pf = area.mobj.clone().get_pframe(off, true)?;
            pf.with_bytes_mut(|bytes| bytes[chunk.clone()].copy_from_slice(&buf[src_off..src_off + chunk.len()]));
            Ok(())
        })
    }

    fn copy(
        &self,
        vaddr: usize,
        count: usize,
        mut per_page: impl FnMut(&VMArea, usize, std::ops::Range<usize>, usize) -> Result<(), KernelError>,
    ) -> Result<(), KernelError> {
        let mut remaining = count;
        let mut cur = vaddr;
        let mut dst_off = 0;
        while remaining > 0 {
            let pn = cur / PAGE_SIZE;
            let area = self.lookup(pn).ok_or(KernelError::BadAddress)?;
            let page_off = cur % PAGE_SIZE;
            let chunk_len = remaining.min(PAGE_SIZE - page_off);
            let off = area.off + (pn - area.start);
            per_page(area, off, page_off..page_off + chunk_len, dst_off)?;
            cur += chunk_len;
            dst_off += chunk_len;
            remaining -= chunk_len;
        }
        Ok(())
    }

    /// Grows or shrinks the single heap area to end at page `new_brk_pn`,
    /// creating it on first growth (§4.9 "Heap break").
    pub fn brk(&mut self, start_brk_pn: usize, new_brk_pn: usize) -> Result<(), KernelError> {
        if new_brk_pn > super::config_user_mem_high_pn() {
            return Err(KernelError::NoMemory);
        }
        if new_brk_pn < start_brk_pn {
            return Err(KernelError::InvalidArgument);
        }
        let heap_idx = self.areas.iter().position(|a| a.tag == AreaTag::Heap);
        match heap_idx {
            None if new_brk_pn == start_brk_pn => Ok(()),
            None => {
                let mobj = AnonymousObject::new() as MobjRef;
                self.insert(VMArea {
                    start: start_brk_pn,
                    end: new_brk_pn,
                    mobj,
                    off: 0,
                    prot: Prot::READ | Prot::WRITE,
                    flags: MapFlags::PRIVATE | MapFlags::ANON,
                    tag: AreaTag::Heap,
                });
                Ok(())
            }
            Some(idx) => {
                if new_brk_pn == start_brk_pn {
                    self.areas.remove(idx);
                } else if new_brk_pn > self.areas[idx].end {
                    self.areas[idx].end = new_brk_pn;
                } else if new_brk_pn < self.areas[idx].end {
                    let start = self.areas[idx].start;
                    self.remove(new_brk_pn, self.areas[idx].end - new_brk_pn)?;
                    if new_brk_pn > start {
                        // area still exists with shrunk end; nothing else to do.
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::AnonymousObject;

    fn rw() -> Prot {
        Prot::READ | Prot::WRITE
    }

    fn priv_anon() -> MapFlags {
        MapFlags::PRIVATE | MapFlags::ANON
    }

    #[test]
    fn disjoint_after_map_and_remove() {
        let mut m = VMMap::new();
        let s1 = m
            .map(AnonymousObject::new(), 0, 16, 0, rw(), priv_anon(), SearchDir::LoHi)
            .unwrap();
        let s2 = m
            .map(AnonymousObject::new(), 0, 16, 0, rw(), priv_anon(), SearchDir::LoHi)
            .unwrap();
        m.remove(s1 + 4, 4).unwrap();
        let areas = m.areas();
        for i in 0..areas.len() {
            for j in 0..areas.len() {
                if i != j {
                    assert!(areas[i].end <= areas[j].start || areas[j].end <= areas[i].start);
                }
            }
        }
        assert!(s2 >= s1);
    }

    #[test]
    fn split_round_trip() {
        let mut m = VMMap::new();
        let s = USER_MEM_LOW_PN;
        m.map(
            AnonymousObject::new(),
            s,
            32,
            0,
            rw(),
            priv_anon() | MapFlags::FIXED,
            SearchDir::LoHi,
        )
        .unwrap();
        m.remove(s + 8, 16).unwrap();
        let areas = m.areas();
        assert_eq!(areas.len(), 2);
        assert_eq!((areas[0].start, areas[0].end), (s, s + 8));
        assert_eq!((areas[1].start, areas[1].end), (s + 24, s + 32));
        assert_eq!(areas[1].off, 24);
    }

    #[test]
    fn find_range_direction() {
        let m = VMMap::new();
        assert_eq!(m.find_range(16, SearchDir::LoHi), Some(USER_MEM_LOW_PN));
        assert_eq!(
            m.find_range(16, SearchDir::HiLo),
            Some(USER_MEM_HIGH_PN - 16)
        );
    }

    #[test]
    fn read_after_write() {
        let mut m = VMMap::new();
        let s = m
            .map(AnonymousObject::new(), 0, 1, 0, rw(), priv_anon(), SearchDir::LoHi)
            .unwrap();
        let vaddr = s * PAGE_SIZE + 10;
        m.write(vaddr, b"hello").unwrap();
        let mut buf = [0u8; 5];
        m.read(vaddr, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }
}
