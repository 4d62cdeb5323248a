use core::ptr::{addr_of, addr_of_mut};

use lazy_static::lazy_static;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::{PrivilegeLevel, VirtAddr};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

const DF_STACK_SIZE: usize = 4096 * 5;
static mut DF_STACK: [u8; DF_STACK_SIZE] = [0; DF_STACK_SIZE];

// RSP0 is rewritten on every process switch, so the TSS cannot live
// behind a lazy_static reference.
static mut TSS: TaskStateSegment = TaskStateSegment::new();

fn tss() -> &'static TaskStateSegment {
    unsafe { &*addr_of!(TSS) }
}

lazy_static! {
    pub static ref GDT: (GlobalDescriptorTable, Selectors) = {
        unsafe {
            let df_stack = VirtAddr::from_ptr(addr_of!(DF_STACK));
            (*addr_of_mut!(TSS)).interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
                df_stack + DF_STACK_SIZE as u64;
        }
        let mut gdt = GlobalDescriptorTable::new();
        let kernel_code = gdt.add_entry(Descriptor::kernel_code_segment());
        let kernel_data = gdt.add_entry(Descriptor::kernel_data_segment());
        let user_data = gdt.add_entry(Descriptor::user_data_segment());
        let user_code = gdt.add_entry(Descriptor::user_code_segment());
        let tss = gdt.add_entry(Descriptor::tss_segment(tss()));
        (gdt, Selectors { kernel_code, kernel_data, user_code, user_data, tss })
    };
}

pub struct Selectors {
    pub kernel_code: SegmentSelector,
    pub kernel_data: SegmentSelector,
    pub user_code: SegmentSelector,
    pub user_data: SegmentSelector,
    pub tss: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS, SS};
    use x86_64::instructions::tables::load_tss;

    GDT.0.load();
    unsafe {
        CS::set_reg(GDT.1.kernel_code);
        DS::set_reg(GDT.1.kernel_data);
        SS::set_reg(GDT.1.kernel_data);
        load_tss(GDT.1.tss);
    }
}

pub fn user_code_selector() -> SegmentSelector {
    SegmentSelector::new(GDT.1.user_code.index(), PrivilegeLevel::Ring3)
}

pub fn user_data_selector() -> SegmentSelector {
    SegmentSelector::new(GDT.1.user_data.index(), PrivilegeLevel::Ring3)
}

pub fn tss_rsp0() -> VirtAddr {
    tss().privilege_stack_table[0]
}

/// Point RSP0 at `top`, the stack the next ring 3 trap will run on.
/// Callers hold interrupts off.
pub fn set_tss_rsp0(top: VirtAddr) {
    unsafe { (*addr_of_mut!(TSS)).privilege_stack_table[0] = top };
}
