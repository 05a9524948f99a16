//! Process-level state: the address-space map, descriptor table, and
//! current-working-directory each syscall is scoped to (§2 item 10, §5).
//!
//! The real kernel threads this through a global mutable "current process"
//! pointer set by the scheduler; we instead give each caller an explicit
//! [`Process`] handle (§9 "Global mutable current-thread / current-process"
//! redesign note).

use crate::{
    config::PAGE_SIZE,
    fs::{
        namev,
        syscall::{FdTable, OpenFlags, Whence},
        vnode::{FileType, VnodeRef},
        Dirent,
    },
    mm::{
        fault::{self, FaultCause},
        vmmap::{MapFlags, Prot, SearchDir},
        AnonymousObject, MobjRef, VMMap,
    },
    KernelError,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

/// A process's address space, open files, and working directory — enough
/// of the process/thread lifecycle to specify `fork` (§1 "Out of scope":
/// scheduling and thread structures proper are external collaborators).
pub struct Process {
    vmmap: Mutex<VMMap>,
    fdtable: FdTable,
    root: VnodeRef,
    cwd: Mutex<VnodeRef>,
    start_brk_pn: AtomicUsize,
    brk_pn: AtomicUsize,
    brk_initialized: AtomicBool,
    /// Set by a sibling thread's `sched_cancellable_sleep_on` wakeup path
    /// to interrupt this process's next blocking read (§5 "Cancellation").
    pub cancelled: AtomicBool,
}

impl Process {
    /// Creates a fresh process rooted at `root`, with `cwd` starting at
    /// the root and an empty address space.
    pub fn new(root: VnodeRef) -> Self {
        crate::info!("initializing address space for a fresh process");
        Process {
            vmmap: Mutex::new(VMMap::new()),
            fdtable: FdTable::new(),
            cwd: Mutex::new(root.clone()),
            root,
            start_brk_pn: AtomicUsize::new(0),
            brk_pn: AtomicUsize::new(0),
            brk_initialized: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The process's open-file table.
    pub fn fdtable(&self) -> &FdTable {
        &self.fdtable
    }

    /// `fork()`: clones the address space (private areas get fresh shadow
    /// pairs, §4.3 "clone") and the descriptor table (shared `OpenFile`s,
    /// §3 "File"). Atomic from the parent's perspective — either this
    /// fully succeeds or the parent's map is left untouched, since
    /// `clone_for_fork` only ever replaces areas' mobjs in place.
    pub fn fork(&self) -> Process {
        let child_map = self.vmmap.lock().unwrap().clone_for_fork();
        Process {
            vmmap: Mutex::new(child_map),
            fdtable: self.fdtable.clone_for_fork(),
            cwd: Mutex::new(self.cwd.lock().unwrap().clone()),
            root: self.root.clone(),
            start_brk_pn: AtomicUsize::new(self.start_brk_pn.load(Ordering::Relaxed)),
            brk_pn: AtomicUsize::new(self.brk_pn.load(Ordering::Relaxed)),
            brk_initialized: AtomicBool::new(self.brk_initialized.load(Ordering::Relaxed)),
            cancelled: AtomicBool::new(false),
        }
    }

    /// `mmap(addr, len, prot, flags, fd, off)` (§4.3 "map").
    #[allow(clippy::too_many_arguments)]
    pub fn mmap(
        &self,
        addr: usize,
        len: usize,
        prot: Prot,
        flags: MapFlags,
        fd: Option<usize>,
        off: usize,
    ) -> Result<usize, KernelError> {
        if len == 0 || !off.is_multiple_of(PAGE_SIZE) {
            return Err(KernelError::InvalidArgument);
        }
        let npages = len.div_ceil(PAGE_SIZE);
        let mobj: MobjRef = match fd {
            Some(fd) => self.fdtable.vnode(fd)?.mmap()?,
            None => AnonymousObject::new(),
        };
        self.vmmap.lock().unwrap().map(
            mobj,
            addr / PAGE_SIZE,
            npages,
            off / PAGE_SIZE,
            prot,
            flags,
            SearchDir::LoHi,
        )
    }

    /// `munmap(addr, len)`.
    pub fn munmap(&self, addr: usize, len: usize) -> Result<(), KernelError> {
        let npages = len.div_ceil(PAGE_SIZE);
        self.vmmap.lock().unwrap().remove(addr / PAGE_SIZE, npages)
    }

    /// `brk(addr)`: grows or shrinks the heap area to end at `addr`
    /// (§4.9). The first call establishes `start_brk` at `addr` and is a
    /// no-op.
    pub fn brk(&self, addr: usize) -> Result<usize, KernelError> {
        let pn = addr.div_ceil(PAGE_SIZE);
        if !self.brk_initialized.swap(true, Ordering::Relaxed) {
            self.start_brk_pn.store(pn, Ordering::Relaxed);
            self.brk_pn.store(pn, Ordering::Relaxed);
            return Ok(addr);
        }
        let start = self.start_brk_pn.load(Ordering::Relaxed);
        self.vmmap.lock().unwrap().brk(start, pn)?;
        self.brk_pn.store(pn, Ordering::Relaxed);
        Ok(pn * PAGE_SIZE)
    }

    /// Resolves a page fault at `vaddr` against this process's map
    /// (§4.4). A failure here means the caller must kill the process with
    /// fault status `EFAULT`.
    pub fn handle_fault(&self, vaddr: usize, cause: FaultCause) -> Result<(), KernelError> {
        fault::resolve(&self.vmmap.lock().unwrap(), vaddr, cause)
    }

    /// Reads `buf.len()` bytes from user memory at `vaddr`.
    pub fn read_mem(&self, vaddr: usize, buf: &mut [u8]) -> Result<(), KernelError> {
        self.vmmap.lock().unwrap().read(vaddr, buf)
    }

    /// Writes `buf` to user memory at `vaddr`.
    pub fn write_mem(&self, vaddr: usize, buf: &[u8]) -> Result<(), KernelError> {
        self.vmmap.lock().unwrap().write(vaddr, buf)
    }

    /// `open(path, flags)`.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<usize, KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let vnode = namev::open(&self.root, &cwd, path, flags.contains(OpenFlags::CREAT))?;
        self.fdtable.open(vnode, flags)
    }

    /// `close(fd)`.
    pub fn close(&self, fd: usize) -> Result<(), KernelError> {
        self.fdtable.close(fd)
    }

    /// `read(fd, buf)`.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.fdtable.read(fd, buf)
    }

    /// `write(fd, buf)`.
    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.fdtable.write(fd, buf)
    }

    /// `dup(fd)`.
    pub fn dup(&self, fd: usize) -> Result<usize, KernelError> {
        self.fdtable.dup(fd)
    }

    /// `dup2(oldfd, newfd)`.
    pub fn dup2(&self, oldfd: usize, newfd: usize) -> Result<usize, KernelError> {
        self.fdtable.dup2(oldfd, newfd)
    }

    /// `lseek(fd, offset, whence)`.
    pub fn lseek(&self, fd: usize, offset: isize, whence: Whence) -> Result<usize, KernelError> {
        self.fdtable.lseek(fd, offset, whence)
    }

    /// `getdent(fd)`.
    pub fn getdent(&self, fd: usize) -> Result<Option<Dirent>, KernelError> {
        self.fdtable.getdent(fd)
    }

    /// `mkdir(path)` (§4.6: only after confirming the name doesn't exist).
    pub fn mkdir(&self, path: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let (parent, name) = namev::dir(&self.root, &cwd, path)?;
        match namev::lookup(&parent, name) {
            Ok(_) => Err(KernelError::FileExist),
            Err(KernelError::NoSuchEntry) => parent.mkdir(name).map(|_| ()),
            Err(e) => Err(e),
        }
    }

    /// `rmdir(path)` (§4.6: `.` is `EINVAL`, `..` is `ENOTEMPTY`).
    pub fn rmdir(&self, path: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let (parent, name) = namev::dir(&self.root, &cwd, path)?;
        parent.rmdir(name)
    }

    /// `unlink(path)`.
    pub fn unlink(&self, path: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let (parent, name) = namev::dir(&self.root, &cwd, path)?;
        parent.unlink(name)
    }

    /// `mknod(path, file_type)`.
    pub fn mknod(&self, path: &str, file_type: FileType) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let (parent, name) = namev::dir(&self.root, &cwd, path)?;
        parent.mknod(name, file_type).map(|_| ())
    }

    /// `link(old, new)`: prohibits linking a directory (`EPERM`, §4.6).
    pub fn link(&self, old: &str, new: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let target = namev::resolve(&self.root, &cwd, old)?;
        let (new_parent, new_name) = namev::dir(&self.root, &cwd, new)?;
        new_parent.link(new_name, &target)
    }

    /// `rename(old, new)`.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let (old_parent, old_name) = namev::dir(&self.root, &cwd, old)?;
        let (new_parent, new_name) = namev::dir(&self.root, &cwd, new)?;
        old_parent.rename(old_name, &new_parent, new_name)
    }

    /// `chdir(path)`: must resolve to a directory.
    pub fn chdir(&self, path: &str) -> Result<(), KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        let target = namev::resolve(&self.root, &cwd, path)?;
        if target.file_type() != FileType::Directory {
            return Err(KernelError::NotDirectory);
        }
        *self.cwd.lock().unwrap() = target;
        Ok(())
    }

    /// `stat(path)`.
    pub fn stat(&self, path: &str) -> Result<crate::fs::Stat, KernelError> {
        let cwd = self.cwd.lock().unwrap().clone();
        Ok(namev::resolve(&self.root, &cwd, path)?.stat())
    }
}

/// Creates a fresh root directory, for tests and standalone setup.
pub fn new_root() -> VnodeRef {
    crate::fs::vnode::InMemoryDirectory::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::config_user_mem_high_pn;

    fn process() -> Process {
        Process::new(crate::fs::vnode::InMemoryDirectory::new())
    }

    #[test]
    fn fork_is_copy_on_write() {
        let p = process();
        let addr = p
            .mmap(
                0,
                PAGE_SIZE,
                Prot::READ | Prot::WRITE,
                MapFlags::PRIVATE | MapFlags::ANON,
                None,
                0,
            )
            .unwrap()
            * PAGE_SIZE;
        p.write_mem(addr, b"X").unwrap();
        let child = p.fork();
        p.write_mem(addr, b"Y").unwrap();
        let mut buf = [0u8; 1];
        child.read_mem(addr, &mut buf).unwrap();
        assert_eq!(buf[0], b'X');
        let mut buf2 = [0u8; 1];
        p.read_mem(addr, &mut buf2).unwrap();
        assert_eq!(buf2[0], b'Y');
    }

    #[test]
    fn brk_grows_and_shrinks() {
        let p = process();
        p.brk(0).unwrap();
        let start_pn = p.start_brk_pn.load(Ordering::Relaxed);
        p.brk((start_pn + 1) * PAGE_SIZE).unwrap();
        assert_eq!(p.vmmap.lock().unwrap().areas().len(), 1);
        p.brk(start_pn * PAGE_SIZE).unwrap();
        assert_eq!(p.vmmap.lock().unwrap().areas().len(), 0);
        assert_eq!(
            p.brk((config_user_mem_high_pn() + 1) * PAGE_SIZE)
                .unwrap_err(),
            KernelError::NoMemory
        );
    }

    #[test]
    fn rename_within_same_directory() {
        let p = process();
        p.mknod("/a", FileType::Regular).unwrap();
        p.rename("/a", "/b").unwrap();
        assert!(p.stat("/a").is_err());
        assert_eq!(p.stat("/b").unwrap().file_type, FileType::Regular);
    }

    #[test]
    fn rename_across_directories_does_not_deadlock() {
        let p = process();
        p.mkdir("/src").unwrap();
        p.mkdir("/dst").unwrap();
        p.mknod("/src/f", FileType::Regular).unwrap();
        p.rename("/src/f", "/dst/f").unwrap();
        assert!(p.stat("/src/f").is_err());
        assert_eq!(p.stat("/dst/f").unwrap().file_type, FileType::Regular);
    }

    #[test]
    fn rename_can_move_a_directory() {
        let p = process();
        p.mkdir("/src").unwrap();
        p.mkdir("/dst").unwrap();
        p.mkdir("/src/child").unwrap();
        p.rename("/src/child", "/dst/child").unwrap();
        assert!(p.stat("/src/child").is_err());
        assert_eq!(p.stat("/dst/child").unwrap().file_type, FileType::Directory);
    }
}
