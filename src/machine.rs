//! The boundary between the process core and privileged hardware state.

use x86_64::{PhysAddr, VirtAddr};

/// Privileged operations the process core needs from the CPU.
pub trait Machine: Sync {
    /// Run `f` with maskable interrupts disabled, restoring the previous
    /// interrupt state afterwards. Calls may nest.
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R;

    /// Drop every cached non-global translation.
    fn flush_tlb(&self);

    /// Stack the CPU switches to on a ring 3 → ring 0 transition (TSS RSP0).
    fn kernel_stack(&self) -> VirtAddr;

    fn set_kernel_stack(&self, top: VirtAddr);

    /// Kernel view of `len` bytes of physical memory starting at `base`.
    ///
    /// # Safety
    /// The caller must not hold two overlapping views at once and must not
    /// keep the slice past the mapping it was obtained for.
    #[allow(clippy::mut_from_ref)]
    unsafe fn physical_memory(&self, base: PhysAddr, len: usize) -> &mut [u8];
}

/// The real CPU: interrupts via `cli`/`sti`, RSP0 in the TSS, and the
/// first GiB of physical memory identity-mapped for the kernel.
#[cfg(target_os = "none")]
pub struct X86Machine;

#[cfg(target_os = "none")]
impl Machine for X86Machine {
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R {
        x86_64::instructions::interrupts::without_interrupts(f)
    }

    fn flush_tlb(&self) {
        x86_64::instructions::tlb::flush_all();
    }

    fn kernel_stack(&self) -> VirtAddr {
        crate::interrupts::gdt::tss_rsp0()
    }

    fn set_kernel_stack(&self, top: VirtAddr) {
        crate::interrupts::gdt::set_tss_rsp0(top);
    }

    unsafe fn physical_memory(&self, base: PhysAddr, len: usize) -> &mut [u8] {
        core::slice::from_raw_parts_mut(base.as_u64() as *mut u8, len)
    }
}
