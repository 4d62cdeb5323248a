pub mod keyboard;
pub mod rtc;
pub mod tty;

use crate::fs::FileSystem;
use crate::terminal::{Screen, TerminalId};

/// Line-buffered terminal I/O.
pub trait Console: Sync {
    /// Block until `terminal` has a complete line, then copy up to
    /// `buf.len()` bytes of it, newline included.
    fn read_line(&self, terminal: TerminalId, buf: &mut [u8]) -> usize;

    fn write_bytes(&self, terminal: TerminalId, bytes: &[u8]) -> usize;

    /// `terminal` is now the one shown and receiving keystrokes.
    fn focus(&self, _terminal: TerminalId) {}
}

/// The real-time clock behind the "rtc" file.
pub trait Rtc: Sync {
    /// Reset to the default rate.
    fn open(&self);

    /// Block until the next periodic interrupt.
    fn wait_tick(&self);

    /// Accepts powers of two from 2 to 1024 Hz.
    fn set_frequency(&self, hz: u32) -> bool;

    fn close(&self);
}

/// The collaborators the process core reaches through descriptors and the
/// terminal switch.
#[derive(Clone, Copy)]
pub struct Devices {
    pub fs: &'static dyn FileSystem,
    pub console: &'static dyn Console,
    pub screen: &'static dyn Screen,
    pub rtc: Option<&'static dyn Rtc>,
}

pub fn init() {
    keyboard::init();
    #[cfg(target_os = "none")]
    rtc::init();
    crate::log_info!("Drivers subsystem initialized.");
}
