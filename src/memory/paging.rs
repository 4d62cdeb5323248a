use x86_64::structures::paging::{PageTable, PageTableFlags as Flags};
use x86_64::{PhysAddr, VirtAddr};

use super::layout::{
    self, DISPLAY_WINDOW_BASE, HUGE_PAGE_SIZE, PAGE_SIZE, PROGRAM_IMAGE_MAX, PROGRAM_LOAD_ADDR,
    PROGRAM_WINDOW_BASE, PROGRAM_WINDOW_SIZE, VGA_BUFFER,
};
use super::user::UserSlice;
use crate::error::{KResult, KernelError};
use crate::fs::{Executable, FileSystem, FsError};
use crate::loader::elf;
use crate::machine::Machine;
use crate::process::ProcessId;

const PROGRAM_ENTRY: usize = (PROGRAM_WINDOW_BASE / HUGE_PAGE_SIZE) as usize;
const PROGRAM_ENTRIES: usize = (PROGRAM_WINDOW_SIZE / HUGE_PAGE_SIZE) as usize;
const DISPLAY_ENTRY: usize = (DISPLAY_WINDOW_BASE / HUGE_PAGE_SIZE) as usize;
const DIRECTORY_SPAN: u64 = 512 * HUGE_PAGE_SIZE;

type WindowEntries = [(PhysAddr, Flags); PROGRAM_ENTRIES];

/// The kernel's page directory: a level-2 table covering the first GiB.
///
/// Everything is identity-mapped for the kernel in 2 MiB pages except two
/// user windows: the program window, re-pointed at the current process's
/// physical region, and the display window, backed by a level-1 table whose
/// entry N exposes the text buffer to process N.
pub struct AddressSpace {
    directory: PageTable,
    display: PageTable,
}

impl AddressSpace {
    pub fn new() -> Self {
        let mut directory = PageTable::new();
        let kernel = Flags::PRESENT | Flags::WRITABLE | Flags::HUGE_PAGE;
        for (index, entry) in directory.iter_mut().enumerate() {
            if Self::is_user_entry(index) {
                continue;
            }
            entry.set_addr(PhysAddr::new(index as u64 * HUGE_PAGE_SIZE), kernel);
        }
        AddressSpace { directory, display: PageTable::new() }
    }

    fn is_user_entry(index: usize) -> bool {
        (PROGRAM_ENTRY..PROGRAM_ENTRY + PROGRAM_ENTRIES).contains(&index) || index == DISPLAY_ENTRY
    }

    /// Physical address to load into the level-3 entry covering this GiB.
    pub fn directory_address(&self) -> PhysAddr {
        PhysAddr::new(&self.directory as *const PageTable as u64)
    }

    /// Point the program window at `pid`'s physical region.
    pub fn switch_program_window<M: Machine>(&mut self, machine: &M, pid: ProcessId) {
        let base = layout::program_region(pid);
        let user = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE | Flags::HUGE_PAGE;
        machine.without_interrupts(|| {
            for half in 0..PROGRAM_ENTRIES {
                self.directory[PROGRAM_ENTRY + half].set_addr(base + half as u64 * HUGE_PAGE_SIZE, user);
            }
            machine.flush_tlb();
        });
    }

    /// Map `pid`'s window, copy `exe` to the load address and return the
    /// entry point read from the loaded header. On failure the previous
    /// window mapping is put back.
    pub fn install_program<M: Machine>(
        &mut self,
        machine: &M,
        fs: &dyn FileSystem,
        pid: ProcessId,
        exe: &Executable,
    ) -> KResult<VirtAddr> {
        if exe.len > PROGRAM_IMAGE_MAX {
            return Err(KernelError::ImageTooLarge);
        }
        let mut header = [0u8; elf::HEADER_LEN];
        let read = fs.read(exe.inode, 0, &mut header)?;
        if !elf::has_signature(&header[..read]) {
            return Err(FsError::NotExecutable.into());
        }

        machine.without_interrupts(|| {
            let previous = self.program_entries();
            self.switch_program_window(machine, pid);
            let loaded = self.copy_image(machine, fs, exe);
            if loaded.is_err() {
                self.restore_program_entries(machine, previous);
            }
            loaded
        })
    }

    fn copy_image<M: Machine>(&self, machine: &M, fs: &dyn FileSystem, exe: &Executable) -> KResult<VirtAddr> {
        let load = UserSlice::new(PROGRAM_LOAD_ADDR, exe.len)?;
        let image = unsafe { self.user_bytes(machine, &load)? };
        let copied = fs.read(exe.inode, 0, image)?;
        if copied != exe.len {
            return Err(FsError::CorruptImage.into());
        }
        elf::entry_point(image).ok_or(KernelError::Fs(FsError::NotExecutable))
    }

    fn program_entries(&self) -> WindowEntries {
        core::array::from_fn(|half| {
            let entry = &self.directory[PROGRAM_ENTRY + half];
            (entry.addr(), entry.flags())
        })
    }

    fn restore_program_entries<M: Machine>(&mut self, machine: &M, previous: WindowEntries) {
        machine.without_interrupts(|| {
            for (half, (addr, flags)) in previous.into_iter().enumerate() {
                let entry = &mut self.directory[PROGRAM_ENTRY + half];
                if flags.is_empty() {
                    entry.set_unused();
                } else {
                    entry.set_addr(addr, flags);
                }
            }
            machine.flush_tlb();
        });
    }

    /// Give `pid` a user mapping of the text buffer and return its address.
    pub fn map_display_window<M: Machine>(&mut self, machine: &M, pid: ProcessId) -> VirtAddr {
        let page = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE | Flags::NO_CACHE;
        let table = Flags::PRESENT | Flags::WRITABLE | Flags::USER_ACCESSIBLE;
        machine.without_interrupts(|| {
            self.display[pid.0].set_addr(PhysAddr::new(VGA_BUFFER), page);
            let display = PhysAddr::new(&self.display as *const PageTable as u64);
            self.directory[DISPLAY_ENTRY].set_addr(display, table);
            machine.flush_tlb();
        });
        layout::display_window(pid)
    }

    /// Resolve `addr` through the directory.
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        let addr = addr.as_u64();
        if addr >= DIRECTORY_SPAN {
            return None;
        }
        let index = (addr / HUGE_PAGE_SIZE) as usize;
        let entry = &self.directory[index];
        if !entry.flags().contains(Flags::PRESENT) {
            return None;
        }
        if index == DISPLAY_ENTRY {
            let page = &self.display[((addr - DISPLAY_WINDOW_BASE) / PAGE_SIZE) as usize];
            if !page.flags().contains(Flags::PRESENT) {
                return None;
            }
            return Some(page.addr() + addr % PAGE_SIZE);
        }
        Some(entry.addr() + addr % HUGE_PAGE_SIZE)
    }

    /// Kernel view of a validated user range under the current mapping.
    ///
    /// # Safety
    /// The returned slice aliases user memory; it must be dropped before the
    /// program window is re-pointed and must not overlap another live view.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn user_bytes<'m, M: Machine>(&self, machine: &'m M, range: &UserSlice) -> KResult<&'m mut [u8]> {
        if range.is_empty() {
            return Ok(&mut []);
        }
        // The window is physically contiguous, so one lookup covers the range.
        let base = self.translate(range.addr()).ok_or(KernelError::BadAddress)?;
        Ok(machine.physical_memory(base, range.len()))
    }

    /// Current `(address, flags)` of every directory entry.
    #[cfg(test)]
    pub(crate) fn directory_snapshot(&self) -> Vec<(u64, u64)> {
        self.directory.iter().map(|e| (e.addr().as_u64(), e.flags().bits())).collect()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::flat::ImageBuilder;
    use crate::memory::layout::PROGRAM_PHYS_BASE;
    use crate::testing::{program_image, MockMachine};

    #[test]
    fn program_window_starts_unmapped() {
        let space = AddressSpace::new();
        assert_eq!(space.translate(VirtAddr::new(PROGRAM_LOAD_ADDR)), None);
        assert_eq!(space.translate(VirtAddr::new(0x10_0000)), Some(PhysAddr::new(0x10_0000)));
    }

    #[test]
    fn switching_windows_flushes_with_interrupts_off() {
        let machine = MockMachine::new();
        let mut space = AddressSpace::new();
        space.switch_program_window(&machine, ProcessId(2));
        assert_eq!(machine.flushes(), 1);
        assert!(!machine.flushed_with_interrupts_enabled());
        let expected = PROGRAM_PHYS_BASE + 2 * PROGRAM_WINDOW_SIZE + 0x48000;
        assert_eq!(space.translate(VirtAddr::new(PROGRAM_LOAD_ADDR)), Some(PhysAddr::new(expected)));
        let last = VirtAddr::new(PROGRAM_WINDOW_BASE + PROGRAM_WINDOW_SIZE - 1);
        assert_eq!(
            space.translate(last),
            Some(PhysAddr::new(PROGRAM_PHYS_BASE + 3 * PROGRAM_WINDOW_SIZE - 1))
        );
    }

    #[test]
    fn install_copies_image_into_the_process_region() {
        let machine = MockMachine::new();
        let fs = ImageBuilder::new().file(b"hello", &program_image(0x0804_8123, 6000)).build();
        let exe = fs.lookup_executable(b"hello").unwrap();
        let mut space = AddressSpace::new();

        let entry = space.install_program(&machine, fs, ProcessId(1), &exe).unwrap();
        assert_eq!(entry.as_u64(), 0x0804_8123);

        let base = layout::program_region(ProcessId(1)) + 0x48000u64;
        let loaded = machine.read_physical(base, 6000);
        assert_eq!(loaded, program_image(0x0804_8123, 6000));
    }

    #[test]
    fn failed_install_restores_previous_window() {
        let machine = MockMachine::new();
        let fs = ImageBuilder::new().file(b"hello", &program_image(0x0804_8000, 64)).build();
        let mut exe = fs.lookup_executable(b"hello").unwrap();
        let mut space = AddressSpace::new();
        space.switch_program_window(&machine, ProcessId(0));
        let before = space.directory_snapshot();

        // Claim more bytes than the file holds so the copy comes up short.
        exe.len = 128;
        assert_eq!(
            space.install_program(&machine, fs, ProcessId(3), &exe),
            Err(KernelError::Fs(FsError::CorruptImage))
        );
        assert_eq!(space.directory_snapshot(), before);
        assert!(!machine.flushed_with_interrupts_enabled());
    }

    #[test]
    fn oversized_images_are_rejected_before_remapping() {
        let machine = MockMachine::new();
        let fs = ImageBuilder::new().file(b"hello", &program_image(0x0804_8000, 64)).build();
        let mut exe = fs.lookup_executable(b"hello").unwrap();
        exe.len = PROGRAM_IMAGE_MAX + 1;
        let mut space = AddressSpace::new();
        let before = space.directory_snapshot();
        assert_eq!(space.install_program(&machine, fs, ProcessId(0), &exe), Err(KernelError::ImageTooLarge));
        assert_eq!(space.directory_snapshot(), before);
        assert_eq!(machine.flushes(), 0);
    }

    #[test]
    fn display_window_maps_text_buffer_per_process() {
        let machine = MockMachine::new();
        let mut space = AddressSpace::new();
        let addr = space.map_display_window(&machine, ProcessId(4));
        assert_eq!(addr, layout::display_window(ProcessId(4)));
        assert_eq!(space.translate(addr + 0x10u64), Some(PhysAddr::new(VGA_BUFFER + 0x10)));
        assert_eq!(space.translate(layout::display_window(ProcessId(0))), None);
        assert_eq!(machine.flushes(), 1);
    }
}
