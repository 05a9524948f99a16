//! Kernel-wide tunables.
//!
//! KeOS has no runtime configuration file: the values below are compiled in,
//! the same way the original kernel fixes its address-space layout and
//! per-process limits at build time.

/// Bytes per page.
pub const PAGE_SIZE: usize = 0x1000;

/// Lowest page number of the user address space.
pub const USER_MEM_LOW_PN: usize = 0x10;
/// Highest (exclusive) page number of the user address space.
pub const USER_MEM_HIGH_PN: usize = 0x8000_0000;
/// Lowest byte address of the user address space.
pub const USER_MEM_LOW: usize = USER_MEM_LOW_PN * PAGE_SIZE;
/// Highest (exclusive) byte address of the user address space.
pub const USER_MEM_HIGH: usize = USER_MEM_HIGH_PN * PAGE_SIZE;

/// Maximum length of a single pathname component.
pub const NAME_LEN: usize = 255;

/// Number of descriptor slots in a process's file table.
pub const NFILES: usize = 256;

/// Capacity, in bytes, of a line discipline's circular buffer.
pub const LDISC_BUFFER_SIZE: usize = 256;

/// End-of-transmission control byte (Ctrl-D).
pub const EOT: u8 = 0x04;
/// End-of-text control byte (Ctrl-C).
pub const ETX: u8 = 0x03;
/// Backspace control byte.
pub const BS: u8 = 0x08;
