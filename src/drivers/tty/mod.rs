//! Per-terminal line discipline over the VGA screen.
//!
//! Keystrokes always go to the foreground terminal: they are echoed and
//! collected until enter completes the line, which the next `read` of a
//! process on that terminal consumes. Output from a terminal that is not
//! shown is held back and replayed when it comes to the front.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::Console;
use crate::memory::layout::{MAX_COMMAND_LEN, NUM_TERMINALS};
use crate::terminal::{TerminalId, SCREEN_CELLS};
use crate::vga::Writer;

pub const LINE_CAPACITY: usize = MAX_COMMAND_LEN;
const BACKLOG_CAPACITY: usize = SCREEN_CELLS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Char(u8),
    Backspace,
    Enter,
    ClearScreen,
}

/// One terminal's pending input line.
#[derive(Clone, Copy)]
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
    complete: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        LineBuffer { bytes: [0; LINE_CAPACITY], len: 0, complete: false }
    }

    /// Returns whether the byte was taken; the last slot is kept for the newline.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.complete || self.len + 1 >= LINE_CAPACITY {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.complete || self.len == 0 {
            return false;
        }
        self.len -= 1;
        true
    }

    pub fn enter(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.bytes[self.len] = b'\n';
        self.len += 1;
        self.complete = true;
        true
    }

    /// Hand out a completed line. Whatever does not fit `out` is dropped.
    pub fn take(&mut self, out: &mut [u8]) -> Option<usize> {
        if !self.complete {
            return None;
        }
        let n = self.len.min(out.len());
        out[..n].copy_from_slice(&self.bytes[..n]);
        self.len = 0;
        self.complete = false;
        Some(n)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Output written to a hidden terminal, oldest bytes dropped first.
#[derive(Clone, Copy)]
pub struct Backlog {
    bytes: [u8; BACKLOG_CAPACITY],
    start: usize,
    len: usize,
}

impl Backlog {
    pub const fn new() -> Self {
        Backlog { bytes: [0; BACKLOG_CAPACITY], start: 0, len: 0 }
    }

    pub fn push(&mut self, data: &[u8]) {
        for &byte in data {
            let end = (self.start + self.len) % BACKLOG_CAPACITY;
            self.bytes[end] = byte;
            if self.len == BACKLOG_CAPACITY {
                self.start = (self.start + 1) % BACKLOG_CAPACITY;
            } else {
                self.len += 1;
            }
        }
    }

    /// Pass the held bytes to `sink` in order, in at most two pieces.
    pub fn drain(&mut self, mut sink: impl FnMut(&[u8])) {
        let first = self.len.min(BACKLOG_CAPACITY - self.start);
        sink(&self.bytes[self.start..self.start + first]);
        if first < self.len {
            sink(&self.bytes[..self.len - first]);
        }
        self.start = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Backlog {
    fn default() -> Self {
        Self::new()
    }
}

const EMPTY_LINE: LineBuffer = LineBuffer::new();
const EMPTY_BACKLOG: Backlog = Backlog::new();

pub struct Tty<'a> {
    screen: &'a Mutex<Writer>,
    foreground: AtomicUsize,
    lines: Mutex<[LineBuffer; NUM_TERMINALS]>,
    backlog: Mutex<[Backlog; NUM_TERMINALS]>,
}

impl<'a> Tty<'a> {
    pub const fn new(screen: &'a Mutex<Writer>) -> Self {
        Tty {
            screen,
            foreground: AtomicUsize::new(0),
            lines: Mutex::new([EMPTY_LINE; NUM_TERMINALS]),
            backlog: Mutex::new([EMPTY_BACKLOG; NUM_TERMINALS]),
        }
    }

    pub fn foreground(&self) -> TerminalId {
        TerminalId(self.foreground.load(Ordering::Acquire))
    }

    /// Apply a keystroke to the foreground terminal and echo it.
    pub fn key(&self, input: Input) {
        critical(|| {
            let terminal = self.foreground();
            let mut lines = self.lines.lock();
            let line = &mut lines[terminal.0];
            let mut screen = self.screen.lock();
            match input {
                Input::Char(byte) => {
                    if line.push(byte) {
                        screen.write_bytes(&[byte]);
                    }
                }
                Input::Backspace => {
                    if line.backspace() {
                        screen.backspace();
                    }
                }
                Input::Enter => {
                    if line.enter() {
                        screen.write_bytes(b"\n");
                    }
                }
                Input::ClearScreen => {
                    screen.clear_screen();
                    screen.write_bytes(line.as_bytes());
                }
            }
        })
    }
}

impl Console for Tty<'_> {
    fn read_line(&self, terminal: TerminalId, buf: &mut [u8]) -> usize {
        loop {
            if let Some(n) = critical(|| self.lines.lock()[terminal.0].take(buf)) {
                return n;
            }
            wait_for_input();
        }
    }

    fn write_bytes(&self, terminal: TerminalId, bytes: &[u8]) -> usize {
        critical(|| {
            if terminal == self.foreground() {
                self.screen.lock().write_bytes(bytes);
            } else {
                self.backlog.lock()[terminal.0].push(bytes);
            }
        });
        bytes.len()
    }

    fn focus(&self, terminal: TerminalId) {
        critical(|| {
            self.foreground.store(terminal.0, Ordering::Release);
            let mut screen = self.screen.lock();
            self.backlog.lock()[terminal.0].drain(|chunk| screen.write_bytes(chunk));
        })
    }
}

fn critical<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(target_os = "none")]
    return x86_64::instructions::interrupts::without_interrupts(f);
    #[cfg(not(target_os = "none"))]
    f()
}

fn wait_for_input() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::enable_and_hlt();
    #[cfg(not(target_os = "none"))]
    core::hint::spin_loop();
}

#[cfg(target_os = "none")]
lazy_static::lazy_static! {
    pub static ref TTY: Tty<'static> = Tty::new(&crate::vga::WRITER);
}
