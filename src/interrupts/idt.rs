use lazy_static::lazy_static;
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};

use super::gdt;
use super::usermode::{self, trap_entry, TrapFrame};
use crate::error::Fault;
use crate::process::Transfer;
use crate::{log_error, log_warn};

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;
pub const SYSCALL_VECTOR: usize = 0x80;

pub static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
    Keyboard = PIC_1_OFFSET + 1,
    Rtc = PIC_2_OFFSET,
}

impl InterruptIndex {
    fn as_u8(self) -> u8 {
        self as u8
    }

    fn as_usize(self) -> usize {
        usize::from(self.as_u8())
    }
}

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.debug.set_handler_fn(debug_handler);
        idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.overflow.set_handler_fn(overflow_handler);
        idt.bound_range_exceeded.set_handler_fn(bound_range_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.device_not_available.set_handler_fn(device_not_available_handler);
        unsafe {
            idt.double_fault.set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.invalid_tss.set_handler_fn(invalid_tss_handler);
        idt.segment_not_present.set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault.set_handler_fn(stack_segment_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.x87_floating_point.set_handler_fn(x87_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.simd_floating_point.set_handler_fn(simd_handler);

        unsafe {
            idt[InterruptIndex::Timer.as_usize()]
                .set_handler_addr(VirtAddr::new(timer_handler_asm as usize as u64));
            idt[SYSCALL_VECTOR]
                .set_handler_addr(VirtAddr::new(usermode::syscall_handler_asm as usize as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }
        idt[InterruptIndex::Keyboard.as_usize()].set_handler_fn(keyboard_interrupt_handler);
        idt[InterruptIndex::Rtc.as_usize()].set_handler_fn(rtc_interrupt_handler);
        idt
    };
}

pub fn init() {
    IDT.load();
}

/// A user-mode exception kills the current process; in the kernel it is fatal.
fn fault(stack_frame: InterruptStackFrame, fault: Fault) {
    let from_user = stack_frame.code_segment & 3 == 3;
    if let (true, Some(kernel)) = (from_user, crate::kernel()) {
        match kernel.kill_current(fault) {
            Ok(Transfer::Return(_)) => {}
            Ok(transfer) => unsafe { usermode::leave(transfer) },
            Err(err) => log_error!("could not kill the faulting process: {}", err),
        }
    }
    panic!("EXCEPTION: {}\n{:#?}", fault, stack_frame);
}

macro_rules! exception {
    ($name:ident, $fault:expr) => {
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
            fault(stack_frame, $fault)
        }
    };
    ($name:ident, $fault:expr, error_code) => {
        extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame, _error_code: u64) {
            fault(stack_frame, $fault)
        }
    };
}

exception!(divide_error_handler, Fault::DivideError);
exception!(debug_handler, Fault::Debug);
exception!(nmi_handler, Fault::NonMaskableInterrupt);
exception!(breakpoint_handler, Fault::Breakpoint);
exception!(overflow_handler, Fault::Overflow);
exception!(bound_range_handler, Fault::BoundRangeExceeded);
exception!(invalid_opcode_handler, Fault::InvalidOpcode);
exception!(device_not_available_handler, Fault::DeviceNotAvailable);
exception!(invalid_tss_handler, Fault::InvalidTss, error_code);
exception!(segment_not_present_handler, Fault::SegmentNotPresent, error_code);
exception!(stack_segment_handler, Fault::StackSegmentFault, error_code);
exception!(general_protection_fault_handler, Fault::GeneralProtectionFault, error_code);
exception!(x87_handler, Fault::X87FloatingPoint);
exception!(alignment_check_handler, Fault::AlignmentCheck, error_code);
exception!(simd_handler, Fault::SimdFloatingPoint);

extern "x86-interrupt" fn page_fault_handler(stack_frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
    use x86_64::registers::control::Cr2;
    log_error!("Accessed Address: {:?}", Cr2::read());
    log_error!("Error Code: {:?}", error_code);
    fault(stack_frame, Fault::PageFault)
}

extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, _error_code: u64) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

#[unsafe(naked)]
extern "C" fn timer_handler_asm() {
    trap_entry!(timer_entry)
}

/// Acknowledge the tick, then carry out a terminal switch if one is pending.
extern "C" fn timer_entry(frame: &mut TrapFrame) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(InterruptIndex::Timer.as_u8());
    }
    let (Some(kernel), Some(target)) = (crate::kernel(), crate::terminal::take_switch_request()) else {
        return;
    };
    match kernel.switch_terminal(target, frame.context()) {
        // The interrupted code's RAX is not ours to overwrite.
        Ok(Transfer::Return(_)) => {}
        Ok(transfer) => unsafe { usermode::leave(transfer) },
        Err(err) => log_warn!("switch to terminal {} refused: {}", target, err),
    }
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::keyboard::handle_interrupt();
    unsafe {
        PICS.lock().notify_end_of_interrupt(InterruptIndex::Keyboard.as_u8());
    }
}

extern "x86-interrupt" fn rtc_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::rtc::RTC.handle_interrupt();
    unsafe {
        PICS.lock().notify_end_of_interrupt(InterruptIndex::Rtc.as_u8());
    }
}
