//! Vnodes: the in-memory handle for an inode (§3 "Vnode").

use crate::{
    mm::{MobjRef, VnodeBackedObject},
    sync::SpinLock,
    KernelError,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

/// A vnode's file-type tag (part of its mode bits, §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// A regular, byte-addressable file.
    Regular,
    /// A directory of named entries.
    Directory,
    /// A character device (e.g. `null`, `zero`, a TTY).
    CharDevice,
}

/// Fields a `stat()` syscall needs to describe a vnode (§6 "Stat",
/// supplemented per SPEC_FULL §2).
#[derive(Clone, Copy, Debug)]
pub struct Stat {
    /// Inode number.
    pub ino: u64,
    /// File-type tag, standing in for POSIX mode bits.
    pub file_type: FileType,
    /// Size in bytes.
    pub size: usize,
    /// Hard-link count.
    pub nlink: u32,
    /// Count of 512-byte blocks backing the file.
    pub blocks: u64,
}

/// One directory entry (§6 "Directory entry").
#[derive(Clone, Debug)]
pub struct Dirent {
    /// The entry's inode number.
    pub d_ino: u64,
    /// The entry's name.
    pub d_name: String,
}

/// The capability set a vnode may expose, keyed by [`FileType`] (§9
/// "Function-pointer tables on objects" redesign note): every vnode
/// implements the full trait, and inapplicable operations return
/// [`KernelError::NotSupportedOperation`] by default.
#[allow(clippy::len_without_is_empty)]
pub trait VnodeOps: Send + Sync {
    /// Stable identifier within this filesystem.
    fn ino(&self) -> u64;
    /// This vnode's file-type tag.
    fn file_type(&self) -> FileType;
    /// Current byte length.
    fn len(&self) -> usize;
    /// Hard-link count.
    fn nlink(&self) -> u32 {
        1
    }

    /// Reads `buf.len()` bytes starting at `pos`.
    fn read(&self, _pos: usize, _buf: &mut [u8]) -> Result<usize, KernelError> {
        Err(KernelError::NotSupportedOperation)
    }
    /// Writes `buf` starting at `pos`, returning bytes written.
    fn write(&self, _pos: usize, _buf: &[u8]) -> Result<usize, KernelError> {
        Err(KernelError::NotSupportedOperation)
    }
    /// Produces a memory object backing this vnode's bytes for `mmap`.
    fn mmap(&self) -> Result<MobjRef, KernelError> {
        Err(KernelError::NotSupportedOperation)
    }

    /// Looks up `name` among this directory's entries.
    fn lookup(&self, _name: &str) -> Result<VnodeRef, KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Creates a regular file or device node named `name`.
    fn mknod(&self, _name: &str, _file_type: FileType) -> Result<VnodeRef, KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Creates a subdirectory named `name`.
    fn mkdir(&self, _name: &str) -> Result<VnodeRef, KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Removes the (empty) subdirectory named `name`.
    fn rmdir(&self, _name: &str) -> Result<(), KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Removes the non-directory entry named `name`.
    fn unlink(&self, _name: &str) -> Result<(), KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Adds `name` as a new hard link to `target` in this directory.
    fn link(&self, _name: &str, _target: &VnodeRef) -> Result<(), KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Moves the entry `name` to `new_name` under `new_parent`.
    fn rename(
        &self,
        _name: &str,
        _new_parent: &VnodeRef,
        _new_name: &str,
    ) -> Result<(), KernelError> {
        Err(KernelError::NotDirectory)
    }
    /// Returns the `index`-th directory entry, or `None` past the end.
    fn readdir(&self, _index: usize) -> Result<Option<Dirent>, KernelError> {
        Err(KernelError::NotDirectory)
    }
}

/// A reference-counted handle to a vnode (§3 "Ownership summary": shared by
/// the filesystem's inode cache, descriptor tables, and cwd slots).
pub type VnodeRef = Arc<Vnode>;

/// In-memory handle for an inode: identity, mode, length, and an
/// operations table, guarded by a mutex per the data model's invariant that
/// every mutating or reading operation holds it (§3 "Vnode").
pub struct Vnode {
    ops: Arc<dyn VnodeOps>,
    lock: SpinLock<()>,
}

impl std::fmt::Debug for Vnode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vnode")
            .field("ino", &self.ops.ino())
            .field("file_type", &self.ops.file_type())
            .finish()
    }
}

/// The global rename mutex (§5 lock rank 1): coarsest of all locks in the
/// crate, held outermost, around the ancestor-ordered parent locks taken by
/// a cross-parent `rename`.
static RENAME_MUTEX: SpinLock<()> = SpinLock::new(());

impl Vnode {
    /// Wraps a concrete implementation as a vnode handle.
    pub fn new(ops: impl VnodeOps + 'static) -> VnodeRef {
        Arc::new(Vnode {
            ops: Arc::new(ops),
            lock: SpinLock::new(()),
        })
    }

    /// Inode number.
    pub fn ino(&self) -> u64 {
        self.ops.ino()
    }

    /// File-type tag.
    pub fn file_type(&self) -> FileType {
        self.ops.file_type()
    }

    /// Current byte length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// `stat()` fields for this vnode (SPEC_FULL §2).
    pub fn stat(&self) -> Stat {
        let _g = self.lock.lock();
        Stat {
            ino: self.ops.ino(),
            file_type: self.ops.file_type(),
            size: self.ops.len(),
            nlink: self.ops.nlink(),
            blocks: self.ops.len().div_ceil(512) as u64,
        }
    }

    /// Reads `buf.len()` bytes at `pos`, holding the vnode mutex.
    pub fn read(&self, pos: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let _g = self.lock.lock();
        self.ops.read(pos, buf)
    }

    /// Writes `buf` at `pos`, holding the vnode mutex.
    pub fn write(&self, pos: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let _g = self.lock.lock();
        self.ops.write(pos, buf)
    }

    /// Backing memory object for `mmap`.
    pub fn mmap(&self) -> Result<MobjRef, KernelError> {
        let _g = self.lock.lock();
        self.ops.mmap()
    }

    /// Looks up `name`. `"."` returns `self` re-referenced (§4.5 "lookup");
    /// any other name delegates to the concrete directory implementation.
    pub fn lookup(self: &VnodeRef, name: &str) -> Result<VnodeRef, KernelError> {
        if self.ops.file_type() != FileType::Directory {
            return Err(KernelError::NotDirectory);
        }
        if name == "." {
            return Ok(self.clone());
        }
        let _g = self.lock.lock();
        self.ops.lookup(name)
    }

    /// Creates a non-directory entry `name` with type `file_type`.
    pub fn mknod(&self, name: &str, file_type: FileType) -> Result<VnodeRef, KernelError> {
        let _g = self.lock.lock();
        self.ops.mknod(name, file_type)
    }

    /// Creates a subdirectory `name`.
    pub fn mkdir(&self, name: &str) -> Result<VnodeRef, KernelError> {
        let _g = self.lock.lock();
        self.ops.mkdir(name)
    }

    /// Removes the empty subdirectory `name`.
    pub fn rmdir(&self, name: &str) -> Result<(), KernelError> {
        let _g = self.lock.lock();
        self.ops.rmdir(name)
    }

    /// Removes the non-directory entry `name`.
    pub fn unlink(&self, name: &str) -> Result<(), KernelError> {
        let _g = self.lock.lock();
        self.ops.unlink(name)
    }

    /// Links `target` into this directory as `name`. Directories may not be
    /// linked (§4.6 "link": `EPERM`).
    pub fn link(&self, name: &str, target: &VnodeRef) -> Result<(), KernelError> {
        if target.file_type() == FileType::Directory {
            return Err(KernelError::OperationNotPermitted);
        }
        let _g = self.lock.lock();
        self.ops.link(name, target)
    }

    /// Moves entry `name` to `new_name` under `new_parent`. Locks both
    /// parents in ancestor (inode-number-ascending) order (§4.6 "rename",
    /// §5 `vlock_in_order`) to avoid AB-BA deadlock against a concurrent
    /// rename moving an entry the other way between the same two
    /// directories. A cross-parent rename additionally holds the global
    /// rename mutex (§5 lock rank 1, coarsest, outermost), which serializes
    /// renames that move a directory between disjoint parent pairs — a case
    /// `vlock_in_order` alone never contends, since the two renames share no
    /// vnode, but which could otherwise interleave their `entries.remove`/
    /// `link` steps and leave a directory unreachable.
    pub fn rename(
        &self,
        name: &str,
        new_parent: &VnodeRef,
        new_name: &str,
    ) -> Result<(), KernelError> {
        if std::ptr::eq(self, new_parent.as_ref()) {
            let _g = self.lock.lock();
            return self.ops.rename(name, new_parent, new_name);
        }
        let _rename_g = RENAME_MUTEX.lock();
        let _g = crate::sync::lock_in_order(
            &self.lock,
            self.ino(),
            &new_parent.lock,
            new_parent.ino(),
        );
        self.ops.rename(name, new_parent, new_name)
    }

    /// Returns directory entry `index`, or `None` past the end.
    pub fn readdir(&self, index: usize) -> Result<Option<Dirent>, KernelError> {
        let _g = self.lock.lock();
        self.ops.readdir(index)
    }
}

static NEXT_INO: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh inode number for an in-memory vnode.
pub fn alloc_ino() -> u64 {
    NEXT_INO.fetch_add(1, Ordering::Relaxed)
}

/// A directory entry as stored by [`InMemoryDirectory`].
struct Entry {
    name: String,
    vnode: VnodeRef,
}

/// A directory whose entries live entirely in memory, standing in for a
/// real on-disk directory inode (the on-disk format is out of scope, §1).
pub struct InMemoryDirectory {
    ino: u64,
    entries: SpinLock<Vec<Entry>>,
}

impl InMemoryDirectory {
    /// Creates a fresh, empty directory.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> VnodeRef {
        Vnode::new(InMemoryDirectory {
            ino: alloc_ino(),
            entries: SpinLock::new(Vec::new()),
        })
    }
}

impl VnodeOps for InMemoryDirectory {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn file_type(&self) -> FileType {
        FileType::Directory
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn nlink(&self) -> u32 {
        2 + self
            .entries
            .lock()
            .iter()
            .filter(|e| e.vnode.file_type() == FileType::Directory)
            .count() as u32
    }

    fn lookup(&self, name: &str) -> Result<VnodeRef, KernelError> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.vnode.clone())
            .ok_or(KernelError::NoSuchEntry)
    }

    fn mknod(&self, name: &str, file_type: FileType) -> Result<VnodeRef, KernelError> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name == name) {
            return Err(KernelError::FileExist);
        }
        let vnode = match file_type {
            FileType::Regular => Vnode::new(InMemoryFile::new()),
            FileType::Directory => return Err(KernelError::InvalidArgument),
            FileType::CharDevice => return Err(KernelError::InvalidArgument),
        };
        entries.push(Entry {
            name: name.to_string(),
            vnode: vnode.clone(),
        });
        Ok(vnode)
    }

    fn mkdir(&self, name: &str) -> Result<VnodeRef, KernelError> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name == name) {
            return Err(KernelError::FileExist);
        }
        let vnode = InMemoryDirectory::new();
        entries.push(Entry {
            name: name.to_string(),
            vnode: vnode.clone(),
        });
        Ok(vnode)
    }

    fn rmdir(&self, name: &str) -> Result<(), KernelError> {
        if name == "." {
            return Err(KernelError::InvalidArgument);
        }
        if name == ".." {
            return Err(KernelError::DirectoryNotEmpty);
        }
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(KernelError::NoSuchEntry)?;
        if entries[idx].vnode.file_type() != FileType::Directory {
            return Err(KernelError::NotDirectory);
        }
        if entries[idx].vnode.len() != 0 {
            return Err(KernelError::DirectoryNotEmpty);
        }
        entries.remove(idx);
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<(), KernelError> {
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|e| e.name == name)
            .ok_or(KernelError::NoSuchEntry)?;
        if entries[idx].vnode.file_type() == FileType::Directory {
            return Err(KernelError::OperationNotPermitted);
        }
        entries.remove(idx);
        Ok(())
    }

    fn link(&self, name: &str, target: &VnodeRef) -> Result<(), KernelError> {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.name == name) {
            return Err(KernelError::FileExist);
        }
        entries.push(Entry {
            name: name.to_string(),
            vnode: target.clone(),
        });
        Ok(())
    }

    fn rename(&self, name: &str, new_parent: &VnodeRef, new_name: &str) -> Result<(), KernelError> {
        let vnode = {
            let mut entries = self.entries.lock();
            let idx = entries
                .iter()
                .position(|e| e.name == name)
                .ok_or(KernelError::NoSuchEntry)?;
            entries.remove(idx).vnode
        };
        // Calls the target directory's op directly rather than going
        // through `Vnode::link`: the caller (`Vnode::rename`) already holds
        // `new_parent`'s vnode mutex, and unlike a hard link, renaming a
        // directory between parents is allowed.
        new_parent.ops.link(new_name, &vnode).inspect_err(|_| {
            self.entries.lock().push(Entry {
                name: name.to_string(),
                vnode: vnode.clone(),
            });
        })
    }

    fn readdir(&self, index: usize) -> Result<Option<Dirent>, KernelError> {
        Ok(self
            .entries
            .lock()
            .get(index)
            .map(|e| Dirent {
                d_ino: e.vnode.ino(),
                d_name: e.name.clone(),
            }))
    }
}

/// A regular file whose bytes live entirely in memory.
pub struct InMemoryFile {
    ino: u64,
    data: SpinLock<Vec<u8>>,
    size: AtomicUsize,
}

impl InMemoryFile {
    /// Creates a fresh, empty file.
    pub fn new() -> Self {
        InMemoryFile {
            ino: alloc_ino(),
            data: SpinLock::new(Vec::new()),
            size: AtomicUsize::new(0),
        }
    }
}

impl Default for InMemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl VnodeOps for InMemoryFile {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn file_type(&self) -> FileType {
        FileType::Regular
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn read(&self, pos: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }

    fn write(&self, pos: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.data.lock();
        if data.len() < pos + buf.len() {
            data.resize(pos + buf.len(), 0);
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        self.size.store(data.len(), Ordering::Release);
        Ok(buf.len())
    }

    fn mmap(&self) -> Result<MobjRef, KernelError> {
        Err(KernelError::NotSupportedOperation)
    }
}

/// Page-backed variant of [`InMemoryFile`], pageable through [`VnodeBackedObject`]
/// (§3 "Memory Object": regular files carry a memory-object pointer).
pub struct PageableFile {
    ino: u64,
    pages: SpinLock<BTreeMap<usize, [u8; crate::config::PAGE_SIZE]>>,
    size: AtomicUsize,
}

impl PageableFile {
    /// Creates a fresh, empty pageable file.
    pub fn new() -> Arc<Self> {
        Arc::new(PageableFile {
            ino: alloc_ino(),
            pages: SpinLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        })
    }
}

impl Default for PageableFile {
    fn default() -> Self {
        Arc::try_unwrap(Self::new()).unwrap_or_else(|_| unreachable!())
    }
}

impl crate::mm::PageBackingFile for PageableFile {
    fn read_page(
        &self,
        pagenum: usize,
        buf: &mut [u8; crate::config::PAGE_SIZE],
    ) -> Result<(), KernelError> {
        if let Some(page) = self.pages.lock().get(&pagenum) {
            buf.copy_from_slice(page);
        } else {
            buf.fill(0);
        }
        Ok(())
    }

    fn write_page(
        &self,
        pagenum: usize,
        buf: &[u8; crate::config::PAGE_SIZE],
    ) -> Result<(), KernelError> {
        self.pages.lock().insert(pagenum, *buf);
        let end = (pagenum + 1) * crate::config::PAGE_SIZE;
        self.size.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }
}

impl VnodeOps for Arc<PageableFile> {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn file_type(&self) -> FileType {
        FileType::Regular
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn mmap(&self) -> Result<MobjRef, KernelError> {
        Ok(VnodeBackedObject::new(self.clone()))
    }
}
