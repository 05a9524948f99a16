//! Memory management: memory objects, page frames, and address-space maps.
//!
//! The hardware-facing pieces of the original kernel — the physical frame
//! allocator, page tables, and the TLB shootdown protocol — sit below the
//! boundary this crate specifies (see the crate root's scope note). What's
//! modeled here is everything above that boundary: the object graph a page
//! fault walks to decide what bytes belong at a given address.

pub mod fault;
pub mod mobj;
pub mod pframe;
pub mod shadow;
pub mod vmmap;

pub use mobj::{
    AnonymousObject, MemObject, MobjKind, MobjRef, PageBackingFile, PageCache, VnodeBackedObject,
    ZeroObject,
};
pub use pframe::PFrame;
pub use shadow::ShadowObject;
pub use vmmap::{AreaTag, MapFlags, Prot, SearchDir, VMArea, VMMap};

pub(crate) fn config_user_mem_high_pn() -> usize {
    crate::config::USER_MEM_HIGH_PN
}
