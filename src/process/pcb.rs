use core::fmt;

use x86_64::VirtAddr;

use super::command::Arguments;
use super::context::Context;
use crate::fs::fd::FileTable;
use crate::terminal::TerminalId;

/// Index of a process slot; also selects the process's kernel stack and
/// its 4 MiB of program memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot claimed, image not yet in place.
    Loading,
    /// Owns its terminal's chain, either on the CPU or waiting for a child.
    Running,
    Halting,
    /// Slot free for the next `execute`.
    Reclaimed,
}

/// Process control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcb {
    pub pid: ProcessId,
    /// `None` for the session root of a terminal.
    pub parent: Option<ProcessId>,
    pub terminal: TerminalId,
    pub files: FileTable,
    /// Caller's trap context at `execute`; resumed by this process's halt.
    pub saved: Context,
    pub entry: VirtAddr,
    pub args: Arguments,
    pub state: ProcessState,
    pub active: bool,
    pub available: bool,
}

impl Pcb {
    pub fn vacant(pid: ProcessId) -> Self {
        Pcb {
            pid,
            parent: None,
            terminal: TerminalId(0),
            files: FileTable::new(),
            saved: Context::empty(),
            entry: VirtAddr::zero(),
            args: Arguments::empty(),
            state: ProcessState::Reclaimed,
            active: false,
            available: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
