//! VFS syscall layer: validates descriptors, locks the target vnode, and
//! delegates to its operations (§4.6).

use super::vnode::{FileType, VnodeRef};
use crate::{config::NFILES, sync::SpinLock, KernelError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

bitflags::bitflags! {
    /// Per-open-file mode flags (§3 "File").
    pub struct OpenFlags: u8 {
        /// Open for reading.
        const READ = 1 << 0;
        /// Open for writing.
        const WRITE = 1 << 1;
        /// Create the file if it does not exist.
        const CREAT = 1 << 2;
        /// Every write seeks to the end first.
        const APPEND = 1 << 3;
        /// Truncate an existing regular file to zero length.
        const TRUNC = 1 << 4;
    }
}

/// Where [`lseek`](FdTable::lseek) measures its offset from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Whence {
    /// From the start of the file.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the file.
    End,
}

/// Per-open-file state: the vnode, byte position, and mode (§3 "File").
/// Shared by every descriptor created from it via `dup`/`dup2`.
pub struct OpenFile {
    vnode: VnodeRef,
    pos: AtomicUsize,
    flags: OpenFlags,
}

impl OpenFile {
    fn new(vnode: VnodeRef, flags: OpenFlags) -> Arc<Self> {
        Arc::new(OpenFile {
            vnode,
            pos: AtomicUsize::new(0),
            flags,
        })
    }
}

/// A process's fixed-size `fd -> file` table (§3 "Descriptor Table").
pub struct FdTable {
    slots: SpinLock<Vec<Option<Arc<OpenFile>>>>,
}

impl Default for FdTable {
    fn default() -> Self {
        let mut slots = Vec::with_capacity(NFILES);
        slots.resize_with(NFILES, || None);
        FdTable {
            slots: SpinLock::new(slots),
        }
    }
}

impl FdTable {
    /// Creates an empty descriptor table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones the table for `fork`: each descriptor shares its [`OpenFile`]
    /// (incrementing its refcount) with the parent.
    pub fn clone_for_fork(&self) -> FdTable {
        let slots = self.slots.lock().clone();
        FdTable {
            slots: SpinLock::new(slots),
        }
    }

    fn get(&self, fd: usize) -> Result<Arc<OpenFile>, KernelError> {
        self.slots
            .lock()
            .get(fd)
            .and_then(|s| s.clone())
            .ok_or(KernelError::BadFileDescriptor)
    }

    fn lowest_free(slots: &[Option<Arc<OpenFile>>]) -> Result<usize, KernelError> {
        slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::TooManyOpenFile)
    }

    /// Opens `vnode` with `flags`, installing it at the lowest free
    /// descriptor.
    pub fn open(&self, vnode: VnodeRef, flags: OpenFlags) -> Result<usize, KernelError> {
        let mut slots = self.slots.lock();
        let fd = Self::lowest_free(&slots)?;
        slots[fd] = Some(OpenFile::new(vnode, flags));
        Ok(fd)
    }

    /// Closes descriptor `fd`.
    pub fn close(&self, fd: usize) -> Result<(), KernelError> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
        slot.take().ok_or(KernelError::BadFileDescriptor)?;
        Ok(())
    }

    /// `read(fd, buf)` (§4.6 "read": `EISDIR` on directories, `EBADF`
    /// without `READ`).
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let file = self.get(fd)?;
        if !file.flags.contains(OpenFlags::READ) {
            return Err(KernelError::BadFileDescriptor);
        }
        if file.vnode.file_type() == FileType::Directory {
            return Err(KernelError::IsDirectory);
        }
        let pos = file.pos.load(Ordering::Acquire);
        let n = file.vnode.read(pos, buf)?;
        file.pos.fetch_add(n, Ordering::AcqRel);
        Ok(n)
    }

    /// `write(fd, buf)` (§4.6 "write": `APPEND` seeks to the vnode's
    /// length before writing).
    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let file = self.get(fd)?;
        if !file.flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::BadFileDescriptor);
        }
        if file.flags.contains(OpenFlags::APPEND) {
            file.pos.store(file.vnode.len(), Ordering::Release);
        }
        let pos = file.pos.load(Ordering::Acquire);
        let n = file.vnode.write(pos, buf)?;
        file.pos.fetch_add(n, Ordering::AcqRel);
        Ok(n)
    }

    /// `dup(fd)`: shares the file at the lowest free descriptor.
    pub fn dup(&self, fd: usize) -> Result<usize, KernelError> {
        let file = self.get(fd)?;
        let mut slots = self.slots.lock();
        let newfd = Self::lowest_free(&slots)?;
        slots[newfd] = Some(file);
        Ok(newfd)
    }

    /// `dup2(oldfd, newfd)`: a no-op when `oldfd == newfd`; otherwise
    /// closes `newfd` first, then shares.
    pub fn dup2(&self, oldfd: usize, newfd: usize) -> Result<usize, KernelError> {
        if oldfd == newfd {
            self.get(oldfd)?;
            return Ok(newfd);
        }
        let file = self.get(oldfd)?;
        let mut slots = self.slots.lock();
        if newfd >= slots.len() {
            return Err(KernelError::BadFileDescriptor);
        }
        slots[newfd] = Some(file);
        Ok(newfd)
    }

    /// `lseek(fd, offset, whence)` (§4.6: negative result is `EINVAL`).
    pub fn lseek(&self, fd: usize, offset: isize, whence: Whence) -> Result<usize, KernelError> {
        let file = self.get(fd)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.pos.load(Ordering::Acquire) as isize,
            Whence::End => file.vnode.len() as isize,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            return Err(KernelError::InvalidArgument);
        }
        file.pos.store(new_pos as usize, Ordering::Release);
        Ok(new_pos as usize)
    }

    /// `getdent(fd, &mut dirent)`: advances the file position by one entry
    /// per call (§4.6).
    pub fn getdent(&self, fd: usize) -> Result<Option<super::vnode::Dirent>, KernelError> {
        let file = self.get(fd)?;
        if file.vnode.file_type() != FileType::Directory {
            return Err(KernelError::NotDirectory);
        }
        let index = file.pos.load(Ordering::Acquire);
        let entry = file.vnode.readdir(index)?;
        if entry.is_some() {
            file.pos.fetch_add(1, Ordering::AcqRel);
        }
        Ok(entry)
    }

    /// The vnode behind `fd`, e.g. for `mmap`/`stat`.
    pub fn vnode(&self, fd: usize) -> Result<VnodeRef, KernelError> {
        Ok(self.get(fd)?.vnode.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::vnode::InMemoryDirectory;

    fn file() -> (FdTable, usize) {
        let root = InMemoryDirectory::new();
        let f = root.mknod("f", FileType::Regular).unwrap();
        let table = FdTable::new();
        let fd = table
            .open(f, OpenFlags::READ | OpenFlags::WRITE)
            .unwrap();
        (table, fd)
    }

    #[test]
    fn dup2_is_idempotent_on_same_fd() {
        let (table, fd) = file();
        assert_eq!(table.dup2(fd, fd).unwrap(), fd);
    }

    #[test]
    fn lseek_boundaries() {
        let (table, fd) = file();
        assert_eq!(
            table.lseek(fd, -1, Whence::Set).unwrap_err(),
            KernelError::InvalidArgument
        );
        table.write(fd, b"hello").unwrap();
        assert_eq!(table.lseek(fd, 0, Whence::End).unwrap(), 5);
    }

    #[test]
    fn append_always_writes_at_end() {
        let root = InMemoryDirectory::new();
        let f = root.mknod("f", FileType::Regular).unwrap();
        let table = FdTable::new();
        let fd = table
            .open(f, OpenFlags::WRITE | OpenFlags::APPEND)
            .unwrap();
        table.write(fd, b"abc").unwrap();
        table.lseek(fd, 0, Whence::Set).unwrap();
        table.write(fd, b"def").unwrap();
        assert_eq!(table.lseek(fd, 0, Whence::Cur).unwrap(), 6);
    }
}
