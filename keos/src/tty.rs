//! TTY line discipline: a circular buffer turning raw keystrokes into
//! cooked lines (§4.7).

use crate::{
    config::{BS, EOT, ETX, LDISC_BUFFER_SIZE},
    sync::SpinLock,
    KernelError,
};
use crossbeam_queue::SegQueue;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

const N: usize = LDISC_BUFFER_SIZE;

struct Buffer {
    data: [u8; N],
    tail: usize,
    cooked: usize,
    head: usize,
    full: bool,
}

impl Buffer {
    fn new() -> Self {
        Buffer {
            data: [0u8; N],
            tail: 0,
            cooked: 0,
            head: 0,
            full: false,
        }
    }

    fn advance(i: usize) -> usize {
        (i + 1) % N
    }

    /// Whether advancing `head` by one would collide with `tail` (the
    /// buffer always reserves at least one free slot unless `full`).
    fn would_collide_with_tail(&self) -> bool {
        Self::advance(self.head) == self.tail
    }

    fn push_raw(&mut self, c: u8) {
        self.data[self.head] = c;
        self.head = Self::advance(self.head);
    }
}

/// A cancellable wakeup source for readers blocked on empty input.
struct WaitQueue {
    waiters: SegQueue<Arc<AtomicBool>>,
}

impl WaitQueue {
    fn new() -> Self {
        WaitQueue {
            waiters: SegQueue::new(),
        }
    }

    fn wake_all(&self) {
        while let Some(flag) = self.waiters.pop() {
            flag.store(true, Ordering::Release);
        }
    }
}

/// The line discipline: fixed-size circular buffer plus the wait queue
/// readers block on when no cooked data is available (§3 "Line-discipline
/// buffer").
pub struct LineDiscipline {
    buf: SpinLock<Buffer>,
    waitq: WaitQueue,
}

impl Default for LineDiscipline {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDiscipline {
    /// Creates an empty line discipline.
    pub fn new() -> Self {
        LineDiscipline {
            buf: SpinLock::new(Buffer::new()),
            waitq: WaitQueue::new(),
        }
    }

    /// Feeds one input character from the keyboard ISR (§4.7 table),
    /// returning the bytes to echo back to the terminal, if any.
    pub fn input(&self, c: u8) -> Option<Vec<u8>> {
        let mut b = self.buf.lock();
        if b.full && c != ETX && c != BS {
            crate::warning!("line discipline buffer full, dropping input byte {:#x}", c);
            return None;
        }
        match c {
            b'\n' => {
                let collide = b.would_collide_with_tail();
                b.push_raw(c);
                b.cooked = b.head;
                if collide {
                    b.full = true;
                }
                drop(b);
                self.waitq.wake_all();
                Some(vec![b'\n'])
            }
            EOT => {
                b.push_raw(c);
                b.cooked = b.head;
                drop(b);
                self.waitq.wake_all();
                None
            }
            ETX => {
                b.head = b.cooked;
                let collide = b.would_collide_with_tail();
                b.push_raw(b'\n');
                b.cooked = b.head;
                if collide {
                    b.full = true;
                }
                None
            }
            BS => {
                if b.head == b.cooked {
                    None
                } else {
                    b.head = (b.head + N - 1) % N;
                    Some(vec![BS])
                }
            }
            _ => {
                if b.would_collide_with_tail() {
                    None
                } else {
                    b.push_raw(c);
                    Some(vec![c])
                }
            }
        }
    }

    /// Whether there is cooked data available to a reader.
    pub fn has_cooked_data(&self) -> bool {
        let b = self.buf.lock();
        b.tail != b.cooked
    }

    /// Blocks until cooked data is available, or the cancellation flag is
    /// set (§4.7 "wait_read"). Returns `EINTR` on cancellation.
    pub fn wait_read(&self, cancelled: &AtomicBool) -> Result<(), KernelError> {
        loop {
            if self.has_cooked_data() {
                return Ok(());
            }
            if cancelled.load(Ordering::Acquire) {
                return Err(KernelError::Interrupted);
            }
            let flag = Arc::new(AtomicBool::new(false));
            self.waitq.waiters.push(flag.clone());
            while !flag.load(Ordering::Acquire) {
                if cancelled.load(Ordering::Acquire) {
                    return Err(KernelError::Interrupted);
                }
                std::thread::yield_now();
            }
        }
    }

    /// Copies cooked bytes into `buf`, stopping at whichever comes first:
    /// `buf` fills, a newline is copied, an EOT is consumed (but excluded),
    /// or cooked data runs out (§4.7 "Read").
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut b = self.buf.lock();
        let mut n = 0;
        while n < buf.len() && b.tail != b.cooked {
            let c = b.data[b.tail];
            b.tail = Buffer::advance(b.tail);
            if c == EOT {
                break;
            }
            buf[n] = c;
            n += 1;
            if c == b'\n' {
                break;
            }
        }
        if n > 0 || b.tail != b.cooked {
            b.full = false;
        }
        n
    }

    /// Copies the in-progress raw line `[cooked, head)` into `s`, for
    /// terminal redraw (§4.7 "get_current_line_raw").
    pub fn get_current_line_raw(&self, s: &mut [u8]) -> usize {
        let b = self.buf.lock();
        let mut i = b.cooked;
        let mut n = 0;
        while i != b.head && n < s.len() {
            s[n] = b.data[i];
            i = Buffer::advance(i);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ld: &LineDiscipline, s: &[u8]) {
        for &c in s {
            ld.input(c);
        }
    }

    #[test]
    fn newline_commit() {
        let ld = LineDiscipline::new();
        feed(&ld, b"t\n");
        let mut buf = [0u8; 10];
        let n = ld.read(&mut buf);
        assert_eq!(&buf[..n], b"t\n");
    }

    #[test]
    fn backspace() {
        let ld = LineDiscipline::new();
        feed(&ld, &[b'a', b'b', BS, b'\n']);
        let mut buf = [0u8; 10];
        let n = ld.read(&mut buf);
        assert_eq!(&buf[..n], b"a\n");
    }

    #[test]
    fn etx_discards_uncooked_line() {
        let ld = LineDiscipline::new();
        feed(&ld, &[b'a', b'b', ETX, b'\n']);
        let mut buf = [0u8; 10];
        let n1 = ld.read(&mut buf);
        assert_eq!(&buf[..n1], b"\n");
        let n2 = ld.read(&mut buf);
        assert_eq!(&buf[..n2], b"\n");
    }

    #[test]
    fn eot_excluded_from_count() {
        let ld = LineDiscipline::new();
        feed(&ld, b"abc");
        ld.input(EOT);
        let mut buf = [0u8; 100];
        let n = ld.read(&mut buf);
        assert_eq!(n, 3);
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn overflow_reserves_last_slot() {
        let ld = LineDiscipline::new();
        for _ in 0..N * 4 {
            ld.input(b'x');
        }
        let b = ld.buf.lock();
        assert_eq!(b.head, N - 1);
        assert_eq!(b.data[N - 1], 0);
    }

    #[test]
    fn cancellable_wait_returns_eintr() {
        let ld = LineDiscipline::new();
        let cancelled = AtomicBool::new(true);
        assert_eq!(
            ld.wait_read(&cancelled).unwrap_err(),
            KernelError::Interrupted
        );
    }
}
