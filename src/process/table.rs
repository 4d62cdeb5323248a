use x86_64::VirtAddr;

use super::pcb::{Pcb, ProcessId, ProcessState};
use crate::error::{KResult, KernelError};
use crate::memory::layout::{KERNEL_STACK_SIZE, MAX_PROCESSES};

/// Fixed arena of process control blocks, indexed by process id.
///
/// Each slot owns an 8 KiB block of the kernel stack region, counted down
/// from `stacks_top`: slot N spans `[top - 8K*(N+1), top - 8K*N)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTable {
    slots: [Pcb; MAX_PROCESSES],
    current: Option<ProcessId>,
    stacks_top: VirtAddr,
}

impl ProcessTable {
    pub fn new(stacks_top: VirtAddr) -> Self {
        ProcessTable {
            slots: core::array::from_fn(|index| Pcb::vacant(ProcessId(index))),
            current: None,
            stacks_top,
        }
    }

    /// Lowest slot a new process would get.
    pub fn find_available(&self) -> Option<ProcessId> {
        self.slots.iter().position(|pcb| pcb.available).map(ProcessId)
    }

    /// Claim the lowest free slot. Only identity and state are touched; the
    /// caller fills in the rest once the program is in place.
    pub fn allocate(&mut self) -> KResult<ProcessId> {
        let pid = self.find_available().ok_or(KernelError::NoFreeProcess)?;
        let pcb = &mut self.slots[pid.0];
        pcb.pid = pid;
        pcb.available = false;
        pcb.state = ProcessState::Loading;
        Ok(pid)
    }

    /// Return a slot to the free pool. Its contents stay until reused.
    pub fn release(&mut self, pid: ProcessId) -> KResult<()> {
        let pcb = self.slot_mut(pid)?;
        pcb.available = true;
        pcb.active = false;
        pcb.state = ProcessState::Reclaimed;
        if self.current == Some(pid) {
            self.current = None;
        }
        Ok(())
    }

    /// Make `pid` the process all descriptor operations act on.
    pub fn select(&mut self, pid: ProcessId) -> KResult<&mut Pcb> {
        self.slot_mut(pid)?;
        self.current = Some(pid);
        Ok(&mut self.slots[pid.0])
    }

    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn current_mut(&mut self) -> KResult<&mut Pcb> {
        let pid = self.current.ok_or(KernelError::NoCurrentProcess)?;
        self.slot_mut(pid)
    }

    pub fn get(&self, pid: ProcessId) -> KResult<&Pcb> {
        self.slots.get(pid.0).ok_or(KernelError::InvalidProcess(pid.0))
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> KResult<&mut Pcb> {
        self.slot_mut(pid)
    }

    fn slot_mut(&mut self, pid: ProcessId) -> KResult<&mut Pcb> {
        self.slots.get_mut(pid.0).ok_or(KernelError::InvalidProcess(pid.0))
    }

    pub fn live(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().filter(|pcb| !pcb.available)
    }

    pub fn available_count(&self) -> usize {
        self.slots.iter().filter(|pcb| pcb.available).count()
    }

    /// Base of the kernel block that belongs to `pid`.
    pub fn slot_address(&self, pid: ProcessId) -> VirtAddr {
        self.stacks_top - (KERNEL_STACK_SIZE * (pid.0 + 1)) as u64
    }

    /// Initial RSP0 for `pid`: the top of its kernel block.
    pub fn kernel_stack_top(&self, pid: ProcessId) -> VirtAddr {
        self.slot_address(pid) + KERNEL_STACK_SIZE as u64
    }
}
