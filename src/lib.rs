#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

pub mod drivers;
pub mod error;
pub mod fs;
#[cfg(target_os = "none")]
pub mod interrupts;
pub mod loader;
pub mod machine;
pub mod memory;
pub mod process;
pub mod serial;
pub mod syscalls;
pub mod terminal;
pub mod vga;

#[cfg(test)]
mod testing;

#[cfg(target_os = "none")]
pub use boot::kernel;

#[cfg(target_os = "none")]
mod boot {
    use core::mem::size_of;
    use core::ptr::addr_of;

    use multiboot2::{BootInformation, BootInformationHeader};
    use spin::Once;
    use x86_64::VirtAddr;

    use crate::drivers::{self, rtc, tty, Devices};
    use crate::fs::{FileSystem, FlatFs};
    use crate::machine::X86Machine;
    use crate::memory::layout::{KERNEL_STACK_SIZE, MAX_PROCESSES};
    use crate::process::Kernel;
    use crate::{interrupts, log_info, memory, serial, syscalls, vga};

    static FILESYSTEM: Once<FlatFs> = Once::new();
    static KERNEL: Once<Kernel<X86Machine>> = Once::new();

    #[repr(C, align(16))]
    struct ProcessStacks([u8; KERNEL_STACK_SIZE * MAX_PROCESSES]);

    // Process `n` owns the n-th slot counted down from the top.
    static mut PROCESS_STACKS: ProcessStacks = ProcessStacks([0; KERNEL_STACK_SIZE * MAX_PROCESSES]);

    /// The running kernel, once boot has built it.
    pub fn kernel() -> Option<&'static Kernel<X86Machine>> {
        KERNEL.get()
    }

    /// Mount the first boot module as the filesystem image.
    fn mount(multiboot_info_addr: usize) -> &'static FlatFs {
        let boot_info = unsafe { BootInformation::load(multiboot_info_addr as *const BootInformationHeader) }
            .expect("Failed to load Multiboot2 info!");
        let module = boot_info.module_tags().next().expect("no filesystem module was loaded");
        let image = unsafe {
            core::slice::from_raw_parts(module.start_address() as usize as *const u8, module.module_size() as usize)
        };
        FILESYSTEM.call_once(|| match FlatFs::new(image) {
            Ok(fs) => fs,
            Err(err) => panic!("filesystem image rejected: {}", err),
        })
    }

    #[no_mangle]
    pub extern "C" fn _start(multiboot_info_addr: usize) -> ! {
        vga::init();
        serial::init();
        interrupts::init();
        log_info!("Kernel started.");

        drivers::init();
        syscalls::init();
        let fs = mount(multiboot_info_addr);
        log_info!("{} mounted with {} entries.", fs.name(), fs.dir_count());

        let stacks_top = VirtAddr::from_ptr(addr_of!(PROCESS_STACKS)) + size_of::<ProcessStacks>() as u64;
        let devices = Devices { fs, console: &*tty::TTY, screen: &vga::SCREEN, rtc: Some(&rtc::RTC) };
        let kernel = KERNEL.call_once(|| Kernel::new(X86Machine, devices, stacks_top));
        unsafe { memory::install(kernel.directory_address()) };

        match kernel.boot() {
            Ok(transfer) => unsafe { interrupts::usermode::leave(transfer) },
            Err(err) => panic!("could not start the shell: {}", err),
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("{}", info);
    log_error!("{}", info);
    loop {
        x86_64::instructions::hlt();
    }
}
