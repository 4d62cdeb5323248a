/// Where a suspended process chain trapped into the kernel.
///
/// `rsp` points at the register frame pushed by the trap entry on that
/// chain's kernel stack; resuming pops the frame and `iretq`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Context {
    pub rsp: u64,
    pub rbp: u64,
}

impl Context {
    /// Context of the boot path, which is never resumed.
    pub const fn empty() -> Self {
        Context { rsp: 0, rbp: 0 }
    }

    pub const fn new(rsp: u64, rbp: u64) -> Self {
        Context { rsp, rbp }
    }
}

/// Unwind onto `context`'s trap frame and return from the trap, storing
/// `value` in the frame's RAX slot when one is given.
///
/// # Safety
/// `context` must have been captured by the trap entry of a chain that is
/// still suspended, and its address space must be the current one.
#[cfg(target_os = "none")]
pub unsafe fn resume(context: Context, value: Option<i32>) -> ! {
    let (value, store) = match value {
        Some(v) => (v as i64 as u64, 1),
        None => (0, 0),
    };
    resume_trap_frame(context.rsp, context.rbp, value, store)
}

#[cfg(target_os = "none")]
#[unsafe(naked)]
unsafe extern "C" fn resume_trap_frame(rsp: u64, rbp: u64, value: u64, store: u64) -> ! {
    core::arch::naked_asm!(
        "mov rsp, rdi",
        "mov rbp, rsi",
        "test rcx, rcx",
        "jz 2f",
        "mov [rsp + {rax_slot}], rdx",
        "2:",
        "jmp {exit}",
        rax_slot = const crate::interrupts::usermode::TrapFrame::RAX_OFFSET,
        exit = sym crate::interrupts::usermode::trap_return,
    );
}
