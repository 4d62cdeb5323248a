//! Ring 3 entry and exit: the `int 0x80` gate, the shared trap frame and
//! the code that carries out a [`Transfer`].

use core::arch::naked_asm;

use super::gdt;
use crate::process::{context, Context, Transfer};

/// Registers saved by a trap entry, lowest address first, followed by the
/// frame the CPU pushed.
#[derive(Debug)]
#[repr(C)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    pub const RAX_OFFSET: usize = 14 * 8;

    /// The context that resumes this trap.
    pub fn context(&self) -> Context {
        Context::new(self as *const TrapFrame as u64, self.rbp)
    }
}

/// Push the registers in `TrapFrame` order and call `$entry(&mut TrapFrame)`.
/// 15 pushes on top of the CPU's 5 keep the stack 16-byte aligned.
macro_rules! trap_entry {
    ($entry:path) => {
        core::arch::naked_asm!(
            "push rax",
            "push rcx",
            "push rdx",
            "push rbx",
            "push rbp",
            "push rsi",
            "push rdi",
            "push r8",
            "push r9",
            "push r10",
            "push r11",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "mov rdi, rsp",
            "call {entry}",
            "jmp {exit}",
            entry = sym $entry,
            exit = sym $crate::interrupts::usermode::trap_return,
        )
    };
}
pub(crate) use trap_entry;

/// Pop a `TrapFrame` starting at `rsp` and return from the trap.
#[unsafe(naked)]
pub unsafe extern "C" fn trap_return() -> ! {
    naked_asm!(
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rdi",
        "pop rsi",
        "pop rbp",
        "pop rbx",
        "pop rdx",
        "pop rcx",
        "pop rax",
        "iretq",
    );
}

/// The int 0x80 gate. RAX holds the call number, RDI/RSI/RDX the arguments;
/// the result comes back in RAX.
#[unsafe(naked)]
pub extern "C" fn syscall_handler_asm() {
    trap_entry!(syscall_entry)
}

extern "C" fn syscall_entry(frame: &mut TrapFrame) {
    let Some(kernel) = crate::kernel() else {
        frame.rax = crate::error::SYSCALL_FAILURE as i64 as u64;
        return;
    };
    let transfer = kernel.dispatch(frame.rax, [frame.rdi, frame.rsi, frame.rdx], frame.context());
    unsafe { finish(frame, transfer) }
}

/// Carry out `transfer` for the trap that produced `frame`. Only
/// `Return` comes back here; the other two leave this stack for good.
///
/// # Safety
/// `frame` must be the live trap frame on the current kernel stack.
pub unsafe fn finish(frame: &mut TrapFrame, transfer: Transfer) {
    match transfer {
        Transfer::Return(value) => frame.rax = value as i64 as u64,
        other => leave(other),
    }
}

/// Abandon the current kernel stack for the destination of `transfer`.
///
/// # Safety
/// A `Resume` context must still be suspended on its kernel stack.
pub unsafe fn leave(transfer: Transfer) -> ! {
    match transfer {
        Transfer::EnterUser { entry, user_stack } => jump_to_usermode(entry.as_u64(), user_stack.as_u64()),
        Transfer::Resume { context, value } => context::resume(context, value),
        Transfer::Return(value) => panic!("no trap frame to return {} to", value),
    }
}

/// Start ring 3 code at `entry` on `user_stack_top` with interrupts enabled.
pub fn jump_to_usermode(entry: u64, user_stack_top: u64) -> ! {
    let user_cs = gdt::user_code_selector().0 as u64;
    let user_ss = gdt::user_data_selector().0 as u64;
    unsafe {
        core::arch::asm!(
            "cli",
            "push rax",
            "push rcx",
            "pushfq",
            "pop r11",
            "or r11, 0x200",
            "push r11",
            "push rdx",
            "push rdi",
            "iretq",
            in("rdi") entry,
            in("rcx") user_stack_top,
            in("rdx") user_cs,
            in("rax") user_ss,
            options(noreturn),
        );
    }
}
