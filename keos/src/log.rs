//! Minimal logging sink.
//!
//! The original kernel wires `info!`/`warning!`/`println!` to a 16550A serial
//! port through `abyss`. Here those macros write to stderr so the same call
//! sites work unmodified on the host during development and testing.

/// Logs an informational message. Mirrors the teacher's `info!` macro.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        eprintln!("[info] {}", format!($($arg)*))
    };
}

/// Logs a warning. Mirrors the teacher's `warning!` macro.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        eprintln!("[warn] {}", format!($($arg)*))
    };
}
