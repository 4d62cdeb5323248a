//! Validation for pointers handed to the kernel by user programs.
//!
//! A user program can only name memory inside its own program window, so
//! that is the only range a [`UserSlice`] may describe. Validation does not
//! make the memory accessible; [`AddressSpace::user_bytes`] resolves it
//! through the current mapping.
//!
//! [`AddressSpace::user_bytes`]: super::paging::AddressSpace::user_bytes

use x86_64::VirtAddr;

use super::layout::in_program_window;
use crate::error::{KResult, KernelError};

/// A validated user byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSlice {
    addr: VirtAddr,
    len: usize,
}

impl UserSlice {
    /// Rejects ranges that leave the program window or wrap around.
    pub fn new(addr: u64, len: usize) -> KResult<Self> {
        if !in_program_window(addr, len) {
            return Err(KernelError::BadAddress);
        }
        Ok(UserSlice { addr: VirtAddr::new(addr), len })
    }

    /// A user-supplied `u64` slot the kernel writes a result into.
    pub fn out_u64(addr: u64) -> KResult<Self> {
        if addr % 8 != 0 {
            return Err(KernelError::BadAddress);
        }
        Self::new(addr, core::mem::size_of::<u64>())
    }

    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
