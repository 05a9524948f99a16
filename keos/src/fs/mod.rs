//! Virtual file system: vnodes, pathname resolution, and the syscall layer
//! bound to a per-process descriptor table.

pub mod devices;
pub mod namev;
pub mod syscall;
pub mod vnode;

pub use vnode::{Dirent, FileType, Stat, Vnode, VnodeOps, VnodeRef};
