//! Fixed memory layout and table sizes.
//!
//! Every process owns one 4 MiB slice of physical memory above 8 MiB, but
//! only the current process's slice is visible, always at the same virtual
//! window. Nothing here is allocated at run time.

use x86_64::{PhysAddr, VirtAddr};

use crate::process::ProcessId;

pub const MIB: u64 = 1024 * 1024;
pub const PAGE_SIZE: u64 = 4096;
pub const HUGE_PAGE_SIZE: u64 = 2 * MIB;

pub const MAX_PROCESSES: usize = 6;
pub const MAX_FILES: usize = 8;
pub const NUM_TERMINALS: usize = 3;
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_COMMAND_LEN: usize = 128;
pub const DEFAULT_PROGRAM: &[u8] = b"shell";

pub const PROGRAM_WINDOW_BASE: u64 = 128 * MIB;
pub const PROGRAM_WINDOW_SIZE: u64 = 4 * MIB;
pub const PROGRAM_WINDOW_END: u64 = PROGRAM_WINDOW_BASE + PROGRAM_WINDOW_SIZE;
pub const PROGRAM_PHYS_BASE: u64 = 8 * MIB;

/// Images are linked to run at 0x0804_8000.
pub const PROGRAM_LOAD_OFFSET: u64 = 0x48000;
pub const PROGRAM_LOAD_ADDR: u64 = PROGRAM_WINDOW_BASE + PROGRAM_LOAD_OFFSET;
pub const PROGRAM_IMAGE_MAX: usize = (PROGRAM_WINDOW_SIZE - PROGRAM_LOAD_OFFSET) as usize;
pub const USER_STACK_TOP: u64 = PROGRAM_WINDOW_END - 16;

pub const DISPLAY_WINDOW_BASE: u64 = PROGRAM_WINDOW_END;
pub const VGA_BUFFER: u64 = 0xB8000;

/// Physical memory backing `pid`'s program window.
pub fn program_region(pid: ProcessId) -> PhysAddr {
    PhysAddr::new(PROGRAM_PHYS_BASE + pid.0 as u64 * PROGRAM_WINDOW_SIZE)
}

/// Where `pid` sees the text buffer after `vidmap`.
pub fn display_window(pid: ProcessId) -> VirtAddr {
    VirtAddr::new(DISPLAY_WINDOW_BASE + pid.0 as u64 * PAGE_SIZE)
}

/// Whether `[addr, addr + len)` lies entirely inside the program window.
pub fn in_program_window(addr: u64, len: usize) -> bool {
    match addr.checked_add(len as u64) {
        Some(end) => addr >= PROGRAM_WINDOW_BASE && end <= PROGRAM_WINDOW_END,
        None => false,
    }
}
