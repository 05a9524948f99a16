//! Memory devices: the trivial reference character drivers (§4.8).

use super::vnode::{FileType, Vnode, VnodeOps, VnodeRef};
use crate::{
    mm::{MobjRef, ZeroObject},
    KernelError,
};

/// The `null` device: reads as EOF, discards writes, no `mmap`.
pub struct NullDevice {
    ino: u64,
}

impl NullDevice {
    /// Creates a handle to the `null` device.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> VnodeRef {
        Vnode::new(NullDevice {
            ino: super::vnode::alloc_ino(),
        })
    }
}

impl VnodeOps for NullDevice {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn file_type(&self) -> FileType {
        FileType::CharDevice
    }

    fn len(&self) -> usize {
        0
    }

    fn read(&self, _pos: usize, _buf: &mut [u8]) -> Result<usize, KernelError> {
        Ok(0)
    }

    fn write(&self, _pos: usize, buf: &[u8]) -> Result<usize, KernelError> {
        Ok(buf.len())
    }
}

/// The `zero` device: reads as an infinite zero stream, discards writes,
/// and `mmap`s a fresh anonymous-like zero-filled object.
pub struct ZeroDevice {
    ino: u64,
}

impl ZeroDevice {
    /// Creates a handle to the `zero` device.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> VnodeRef {
        Vnode::new(ZeroDevice {
            ino: super::vnode::alloc_ino(),
        })
    }
}

impl VnodeOps for ZeroDevice {
    fn ino(&self) -> u64 {
        self.ino
    }

    fn file_type(&self) -> FileType {
        FileType::CharDevice
    }

    fn len(&self) -> usize {
        0
    }

    fn read(&self, _pos: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, _pos: usize, buf: &[u8]) -> Result<usize, KernelError> {
        Ok(buf.len())
    }

    fn mmap(&self) -> Result<MobjRef, KernelError> {
        Ok(ZeroObject::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reads_empty_and_sinks_writes() {
        let dev = NullDevice::new();
        let mut buf = [0xffu8; 8];
        assert_eq!(dev.read(0, &mut buf).unwrap(), 0);
        assert_eq!(dev.write(0, &buf).unwrap(), 8);
    }

    #[test]
    fn zero_reads_zero_and_has_no_file_mmap() {
        let dev = ZeroDevice::new();
        let mut buf = [0xffu8; 8];
        assert_eq!(dev.read(0, &mut buf).unwrap(), 8);
        assert_eq!(buf, [0u8; 8]);
        assert!(dev.mmap().is_ok());
        assert!(NullDevice::new().mmap().is_err());
    }
}
