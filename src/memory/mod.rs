pub mod layout;
pub mod paging;
pub mod user;

pub use paging::AddressSpace;
pub use user::UserSlice;

/// Hook `directory` into the boot page tables so it covers the first GiB,
/// replacing the boot stub's identity mapping.
///
/// # Safety
/// `directory` must identity-map everything the kernel uses, and the boot
/// tables must be identity-mapped themselves.
#[cfg(target_os = "none")]
pub unsafe fn install(directory: x86_64::PhysAddr) {
    use x86_64::registers::control::Cr3;
    use x86_64::structures::paging::{PageTable, PageTableFlags as Flags};

    let (level_4_frame, _) = Cr3::read();
    let level_4 = &mut *(level_4_frame.start_address().as_u64() as *mut PageTable);
    let user = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE;

    let level_3_addr = level_4[0].addr();
    level_4[0].set_flags(level_4[0].flags() | Flags::USER_ACCESSIBLE);
    let level_3 = &mut *(level_3_addr.as_u64() as *mut PageTable);
    level_3[0].set_addr(directory, user);

    x86_64::instructions::tlb::flush_all();
    crate::log_info!("Kernel page directory installed at {:#x}.", directory.as_u64());
}
