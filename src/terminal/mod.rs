//! Terminal sessions and the handoff between them.
//!
//! Each of the three terminals owns one process chain, a copy of the text
//! screen and the trap context its chain was suspended at. Two things are
//! tracked separately: which terminal is shown (`foreground`) and which
//! terminal's chain owns the CPU (`running`).

use core::fmt;
use core::ops::{Index, IndexMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::VirtAddr;

use crate::drivers::Devices;
use crate::error::{KResult, KernelError};
use crate::machine::Machine;
use crate::memory::layout::{DEFAULT_PROGRAM, NUM_TERMINALS};
use crate::process::{Command, Context, Kernel, ProcessId, State, Transfer};
use crate::{log_info, log_warn};

pub const SCREEN_COLS: usize = 80;
pub const SCREEN_ROWS: usize = 25;
pub const SCREEN_CELLS: usize = SCREEN_COLS * SCREEN_ROWS;

/// Space on light gray over black.
pub const BLANK_CELL: u16 = 0x0720;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalId(pub usize);

impl TerminalId {
    pub fn new(index: usize) -> KResult<Self> {
        if index < NUM_TERMINALS {
            Ok(TerminalId(index))
        } else {
            Err(KernelError::InvalidTerminal(index))
        }
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub col: usize,
    pub row: usize,
}

/// Saved contents of the text screen: attribute/character cells plus cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub cells: [u16; SCREEN_CELLS],
    pub cursor: Cursor,
}

impl Snapshot {
    pub const fn blank() -> Self {
        Snapshot { cells: [BLANK_CELL; SCREEN_CELLS], cursor: Cursor { col: 0, row: 0 } }
    }
}

/// The physical display.
pub trait Screen: Sync {
    fn save(&self, into: &mut Snapshot);
    fn restore(&self, from: &Snapshot);
}

/// Session record of one terminal.
pub struct Terminal {
    pub initialized: bool,
    /// Foreground process of this terminal's chain.
    pub current: Option<ProcessId>,
    pub snapshot: Snapshot,
    /// Where the chain trapped when it last lost the CPU.
    pub context: Context,
    /// RSP0 the chain was using at that moment.
    pub kernel_stack: VirtAddr,
}

impl Terminal {
    fn new() -> Self {
        Terminal {
            initialized: false,
            current: None,
            snapshot: Snapshot::blank(),
            context: Context::empty(),
            kernel_stack: VirtAddr::zero(),
        }
    }
}

pub struct Terminals {
    records: [Terminal; NUM_TERMINALS],
    foreground: TerminalId,
    running: TerminalId,
}

impl Terminals {
    pub fn new() -> Self {
        Terminals {
            records: [Terminal::new(), Terminal::new(), Terminal::new()],
            foreground: TerminalId(0),
            running: TerminalId(0),
        }
    }

    pub fn foreground(&self) -> TerminalId {
        self.foreground
    }

    pub fn running(&self) -> TerminalId {
        self.running
    }
}

impl Default for Terminals {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<TerminalId> for Terminals {
    type Output = Terminal;

    fn index(&self, id: TerminalId) -> &Terminal {
        &self.records[id.0]
    }
}

impl IndexMut<TerminalId> for Terminals {
    fn index_mut(&mut self, id: TerminalId) -> &mut Terminal {
        &mut self.records[id.0]
    }
}

const NO_REQUEST: usize = usize::MAX;

static PENDING_SWITCH: AtomicUsize = AtomicUsize::new(NO_REQUEST);

/// Ask for `target` to be brought to the foreground at the next tick.
/// Safe to call from interrupt context; a newer request replaces an older one.
pub fn request_switch(target: usize) {
    PENDING_SWITCH.store(target, Ordering::Release);
}

pub fn take_switch_request() -> Option<usize> {
    match PENDING_SWITCH.swap(NO_REQUEST, Ordering::AcqRel) {
        NO_REQUEST => None,
        target => Some(target),
    }
}

impl<M: Machine> Kernel<M> {
    pub fn foreground(&self) -> TerminalId {
        self.state.lock().terminals.foreground
    }

    /// Show terminal `target` and give its chain the CPU. `here` is the trap
    /// context of the chain being left.
    pub fn switch_terminal(&self, target: usize, here: Context) -> KResult<Transfer> {
        let target = TerminalId::new(target)?;
        self.machine.without_interrupts(|| {
            let mut state = self.state.lock();
            let leaving = state.terminals.foreground;
            if leaving == target {
                return Ok(Transfer::Return(0));
            }

            let screen = self.devices.screen;
            screen.save(&mut state.terminals[leaving].snapshot);
            screen.restore(&state.terminals[target].snapshot);
            state.terminals.foreground = target;
            self.devices.console.focus(target);

            let handoff = state.run_terminal(&self.machine, &self.devices, target, here);
            match handoff {
                Ok(_) => log_info!("terminal {} -> {}", leaving, target),
                Err(err) => {
                    log_warn!("terminal {} -> {} failed: {}", leaving, target, err);
                    screen.save(&mut state.terminals[target].snapshot);
                    screen.restore(&state.terminals[leaving].snapshot);
                    state.terminals.foreground = leaving;
                    self.devices.console.focus(leaving);
                }
            }
            handoff
        })
    }

    /// Hand the CPU to `target`'s chain without changing what is shown.
    pub fn run_terminal(&self, target: usize, here: Context) -> KResult<Transfer> {
        let target = TerminalId::new(target)?;
        self.machine.without_interrupts(|| {
            self.state.lock().run_terminal(&self.machine, &self.devices, target, here)
        })
    }
}

impl State {
    pub(crate) fn run_terminal<M: Machine>(
        &mut self,
        machine: &M,
        devices: &Devices,
        target: TerminalId,
        here: Context,
    ) -> KResult<Transfer> {
        let leaving = self.terminals.running;
        if leaving == target {
            return Ok(Transfer::Return(0));
        }

        let resume = &self.terminals[target];
        if resume.initialized && resume.current.is_none() {
            return Err(KernelError::NoCurrentProcess);
        }

        let current = self.table.current();
        let record = &mut self.terminals[leaving];
        record.context = here;
        record.kernel_stack = machine.kernel_stack();
        record.current = current;
        if let Some(pid) = current {
            self.table.get_mut(pid)?.active = false;
        }
        self.terminals.running = target;

        if !self.terminals[target].initialized {
            let shell = Command::parse(DEFAULT_PROGRAM)?;
            let launched = self.launch(machine, devices, &shell, Context::empty());
            if launched.is_err() {
                self.terminals.running = leaving;
                if let Some(pid) = current {
                    self.table.get_mut(pid)?.active = true;
                }
            }
            return launched;
        }

        let record = &self.terminals[target];
        let (context, kernel_stack) = (record.context, record.kernel_stack);
        let pid = record.current.ok_or(KernelError::NoCurrentProcess)?;
        self.space.switch_program_window(machine, pid);
        self.table.select(pid)?.active = true;
        machine.set_kernel_stack(kernel_stack);
        Ok(Transfer::Resume { context, value: None })
    }
}
