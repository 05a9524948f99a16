//! Page-fault resolution (§4.4).

use super::vmmap::{Prot, VMMap};
use crate::{config::PAGE_SIZE, KernelError};

/// Why a fault was raised, mirroring the bits a real `#PF` handler reads off
/// the error code on the stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FaultCause {
    /// The fault was a write attempt.
    pub write: bool,
    /// The faulting access came from user mode.
    pub user: bool,
}

/// Resolves a fault at byte address `vaddr` against `map`, returning the
/// frame to install were this a real page table (here, just pinning it in
/// the backing mobj's cache is the entire "resolution").
///
/// Looks up the containing [`VMArea`](super::vmmap::VMArea), checks `cause`
/// against its protection bits, and calls `get_pframe` with `forwrite` set
/// iff the fault is a write (§4.4). On a successful write fault the
/// returned frame is marked dirty, since there is no hardware page table
/// whose own dirty bit would otherwise record the store.
pub fn resolve(map: &VMMap, vaddr: usize, cause: FaultCause) -> Result<(), KernelError> {
    let pn = vaddr / PAGE_SIZE;
    let area = map.lookup(pn).ok_or_else(|| {
        crate::warning!("page fault at {:#x}: no mapping covers it", vaddr);
        KernelError::BadAddress
    })?;
    if cause.write && !area.prot.contains(Prot::WRITE) {
        crate::warning!("page fault at {:#x}: write to read-only mapping", vaddr);
        return Err(KernelError::InvalidAccess);
    }
    if !cause.write && !area.prot.contains(Prot::READ) {
        crate::warning!("page fault at {:#x}: read from unreadable mapping", vaddr);
        return Err(KernelError::InvalidAccess);
    }
    let off = area.off + (pn - area.start);
    let pf = area.mobj.clone().get_pframe(off, cause.write)?;
    if cause.write {
        // No hardware page table to dirty on the next store, so the
        // resolver itself is the only place that can record the write.
        pf.with_bytes_mut(|_| ());
    }
    Ok(())
}
