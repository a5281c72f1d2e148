// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests
//! PUBLIC API: log_* macros, emit(level,target,args), set_max_level(), recent_contains()
//! DEPENDS_ON: uart::KernelUart (OS builds), spin::Mutex
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission; bounded memory
//!
//! Every emitted line is `[LEVEL target] message`. Lines go to the boot UART on the
//! riscv64 bare-metal target and always into a small ring of recent lines, which hosted
//! builds and tests use to observe diagnostics.

use core::fmt::{self, Arguments, Write};
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    fn enabled(self) -> bool {
        if self as u8 > MAX_LEVEL.load(Ordering::Relaxed) {
            return false;
        }
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Debug as u8);

/// Sets the most verbose level that is still emitted.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

const RING_LINES: usize = 64;
const LINE_BYTES: usize = 160;

#[derive(Clone, Copy)]
struct Line {
    buf: [u8; LINE_BYTES],
    len: usize,
}

impl Line {
    const EMPTY: Self = Self { buf: [0; LINE_BYTES], len: 0 };

    fn as_str(&self) -> &str {
        // Writers only ever cut on char boundaries.
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for Line {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_BYTES - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

struct Ring {
    lines: [Line; RING_LINES],
    next: usize,
}

impl Ring {
    const fn new() -> Self {
        Self { lines: [Line::EMPTY; RING_LINES], next: 0 }
    }

    fn push(&mut self, line: Line) {
        self.lines[self.next] = line;
        self.next = (self.next + 1) % RING_LINES;
    }
}

static RECENT: Mutex<Ring> = Mutex::new(Ring::new());

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }

    let mut line = Line::EMPTY;
    let _ = write!(line, "[{} {}] ", level.tag(), target);
    let _ = line.write_fmt(args);

    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let mut uart = crate::uart::KernelUart::lock();
        let _ = uart.write_str(line.as_str());
        let _ = uart.write_char('\n');
    }

    RECENT.lock().push(line);
}

/// Returns true when one of the recently emitted lines contains `needle`.
pub fn recent_contains(needle: &str) -> bool {
    RECENT.lock().lines.iter().any(|line| line.len != 0 && line.as_str().contains(needle))
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
