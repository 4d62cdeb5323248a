//! Process lifecycle: `execute` and `halt`.
//!
//! A process moves `Loading -> Running -> Halting -> Reclaimed`. Control
//! never returns through Rust frames across these calls; every operation
//! instead answers with a [`Transfer`] telling the trap glue where the CPU
//! goes next.

pub mod command;
pub mod context;
pub mod pcb;
pub mod table;

pub use command::{Arguments, Command};
pub use context::Context;
pub use pcb::{Pcb, ProcessId, ProcessState};
pub use table::ProcessTable;

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

use crate::drivers::Devices;
use crate::error::{Fault, KResult, KernelError};
use crate::fs::fd::{FileTable, FIRST_USER_FD};
use crate::machine::Machine;
use crate::memory::layout::{DEFAULT_PROGRAM, MAX_FILES, USER_STACK_TOP};
use crate::memory::AddressSpace;
use crate::terminal::Terminals;
use crate::{log_error, log_info, log_warn};

/// Parent-visible result of a process killed by an exception.
pub const KILLED_STATUS: i32 = 256;

/// How a process ended, as its parent sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(u8),
    Killed,
}

impl From<u8> for ExitStatus {
    /// Status byte 255 is reserved for processes killed by an exception.
    fn from(code: u8) -> Self {
        match code {
            255 => ExitStatus::Killed,
            code => ExitStatus::Exited(code),
        }
    }
}

impl ExitStatus {
    pub fn value(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code as i32,
            ExitStatus::Killed => KILLED_STATUS,
        }
    }
}

/// Where the CPU goes when a kernel operation is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Back to the code that trapped, with this system call result.
    Return(i32),
    /// Start a freshly loaded program in ring 3.
    EnterUser { entry: VirtAddr, user_stack: VirtAddr },
    /// Unwind onto a suspended chain's trap frame, optionally handing it a
    /// system call result.
    Resume { context: Context, value: Option<i32> },
}

/// Everything execute, halt and the terminal switch mutate together.
pub struct State {
    pub(crate) table: ProcessTable,
    pub(crate) space: AddressSpace,
    pub(crate) terminals: Terminals,
}

pub struct Kernel<M: Machine> {
    pub(crate) machine: M,
    pub(crate) devices: Devices,
    pub(crate) state: Mutex<State>,
}

impl<M: Machine> Kernel<M> {
    /// `stacks_top` is the upper end of the per-process kernel stack region.
    pub fn new(machine: M, devices: Devices, stacks_top: VirtAddr) -> Self {
        Kernel {
            machine,
            devices,
            state: Mutex::new(State {
                table: ProcessTable::new(stacks_top),
                space: AddressSpace::new(),
                terminals: Terminals::new(),
            }),
        }
    }

    pub fn directory_address(&self) -> PhysAddr {
        self.state.lock().space.directory_address()
    }

    pub fn current(&self) -> Option<ProcessId> {
        self.state.lock().table.current()
    }

    /// Start the session root of the first terminal.
    pub fn boot(&self) -> KResult<Transfer> {
        self.execute(DEFAULT_PROGRAM, Context::empty())
    }

    /// Load and start `line`'s program as a child of the current process.
    /// `caller` is where the caller resumes once the child halts.
    pub fn execute(&self, line: &[u8], caller: Context) -> KResult<Transfer> {
        let command = Command::parse(line)?;
        self.machine.without_interrupts(|| {
            self.state.lock().launch(&self.machine, &self.devices, &command, caller)
        })
    }

    pub fn halt(&self, status: u8) -> KResult<Transfer> {
        self.terminate(ExitStatus::from(status))
    }

    /// Forced halt of the current process after a CPU exception in user mode.
    pub fn kill_current(&self, fault: Fault) -> KResult<Transfer> {
        log_error!("{} in pid {:?}, killing it", fault, self.current());
        self.terminate(ExitStatus::Killed)
    }

    fn terminate(&self, status: ExitStatus) -> KResult<Transfer> {
        self.machine.without_interrupts(|| {
            self.state.lock().terminate(&self.machine, &self.devices, status)
        })
    }

    /// Run `f` on the current process's control block.
    pub(crate) fn with_current<R>(&self, f: impl FnOnce(&mut Pcb) -> KResult<R>) -> KResult<R> {
        self.machine.without_interrupts(|| f(self.state.lock().table.current_mut()?))
    }
}

impl State {
    pub(crate) fn launch<M: Machine>(
        &mut self,
        machine: &M,
        devices: &Devices,
        command: &Command,
        caller: Context,
    ) -> KResult<Transfer> {
        let exe = devices.fs.lookup_executable(command.name())?;
        let pid = self.table.allocate()?;

        let terminal = self.terminals.running();
        let parent = if self.terminals[terminal].initialized {
            self.table.current()
        } else {
            None
        };

        let entry = match self.space.install_program(machine, devices.fs, pid, &exe) {
            Ok(entry) => entry,
            Err(err) => {
                self.table.release(pid)?;
                return Err(err);
            }
        };

        if let Some(previous) = self.table.current() {
            self.table.get_mut(previous)?.active = false;
        }
        let pcb = self.table.select(pid)?;
        pcb.parent = parent;
        pcb.terminal = terminal;
        pcb.files = FileTable::new();
        pcb.args = command.args;
        pcb.saved = caller;
        pcb.entry = entry;
        pcb.state = ProcessState::Running;
        pcb.active = true;

        let session = &mut self.terminals[terminal];
        session.initialized = true;
        session.current = Some(pid);
        machine.set_kernel_stack(self.table.kernel_stack_top(pid));

        log_info!(
            "pid {} started '{}' on terminal {} (parent {:?})",
            pid,
            command.display_name(),
            terminal,
            parent
        );
        Ok(Transfer::EnterUser { entry, user_stack: VirtAddr::new(USER_STACK_TOP) })
    }

    pub(crate) fn terminate<M: Machine>(
        &mut self,
        machine: &M,
        devices: &Devices,
        status: ExitStatus,
    ) -> KResult<Transfer> {
        let pcb = self.table.current_mut()?;
        let pid = pcb.pid;
        pcb.state = ProcessState::Halting;
        for fd in FIRST_USER_FD..MAX_FILES {
            if let Ok(file) = pcb.files.remove(fd) {
                if let Err(err) = file.close(devices) {
                    log_warn!("pid {}: closing fd {} failed: {}", pid, fd, err);
                }
            }
        }
        let (parent, terminal, saved) = (pcb.parent, pcb.terminal, pcb.saved);
        self.table.release(pid)?;
        log_info!("pid {} halted with status {}", pid, status.value());

        let Some(parent) = parent else {
            let session = &mut self.terminals[terminal];
            session.initialized = false;
            session.current = None;
            log_info!("session root of terminal {} exited, restarting", terminal);
            let shell = Command::parse(DEFAULT_PROGRAM)?;
            return self.launch(machine, devices, &shell, Context::empty());
        };

        machine.set_kernel_stack(self.table.kernel_stack_top(parent));
        self.space.switch_program_window(machine, parent);
        let resumed = self.table.select(parent)?;
        resumed.active = true;
        self.terminals[terminal].current = Some(parent);
        Ok(Transfer::Resume { context: saved, value: Some(status.value()) })
    }
}
