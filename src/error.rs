use core::fmt;

use crate::fs::error::FsError;

/// Value handed back to user space for every failed system call.
pub const SYSCALL_FAILURE: i32 = -1;

/// Everything a kernel operation can refuse to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    NoFreeProcess,
    NoFreeDescriptor,
    EmptyCommand,
    CommandTooLong,
    NameTooLong,
    ImageTooLarge,
    BadDescriptor,
    BadAddress,
    NoArguments,
    EmptyBuffer,
    InvalidArgument,
    NoCurrentProcess,
    InvalidProcess(usize),
    InvalidTerminal(usize),
    Unsupported,
    Fs(FsError),
}

impl KernelError {
    /// The value a failed system call leaves in the caller's return register.
    pub fn as_return(self) -> i32 {
        SYSCALL_FAILURE
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        KernelError::Fs(err)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::NoFreeProcess => write!(f, "No free process slot"),
            KernelError::NoFreeDescriptor => write!(f, "No free file descriptor"),
            KernelError::EmptyCommand => write!(f, "Empty command line"),
            KernelError::CommandTooLong => write!(f, "Command line too long"),
            KernelError::NameTooLong => write!(f, "Program name too long"),
            KernelError::ImageTooLarge => write!(f, "Program image does not fit the program window"),
            KernelError::BadDescriptor => write!(f, "Bad file descriptor"),
            KernelError::BadAddress => write!(f, "Address outside the program window"),
            KernelError::NoArguments => write!(f, "No arguments were passed"),
            KernelError::EmptyBuffer => write!(f, "Empty buffer"),
            KernelError::InvalidArgument => write!(f, "Invalid argument"),
            KernelError::NoCurrentProcess => write!(f, "No process is running"),
            KernelError::InvalidProcess(pid) => write!(f, "Invalid process id {}", pid),
            KernelError::InvalidTerminal(id) => write!(f, "Invalid terminal {}", id),
            KernelError::Unsupported => write!(f, "Operation not supported"),
            KernelError::Fs(err) => write!(f, "{}", err),
        }
    }
}

pub type KResult<T> = Result<T, KernelError>;

/// CPU exceptions that take a user process down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    DivideError,
    Debug,
    NonMaskableInterrupt,
    Breakpoint,
    Overflow,
    BoundRangeExceeded,
    InvalidOpcode,
    DeviceNotAvailable,
    InvalidTss,
    SegmentNotPresent,
    StackSegmentFault,
    GeneralProtectionFault,
    PageFault,
    X87FloatingPoint,
    AlignmentCheck,
    SimdFloatingPoint,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Fault::DivideError => "Divide Error",
            Fault::Debug => "Debug",
            Fault::NonMaskableInterrupt => "Non-Maskable Interrupt",
            Fault::Breakpoint => "Breakpoint",
            Fault::Overflow => "Overflow",
            Fault::BoundRangeExceeded => "Bound Range Exceeded",
            Fault::InvalidOpcode => "Invalid Opcode",
            Fault::DeviceNotAvailable => "Device Not Available",
            Fault::InvalidTss => "Invalid TSS",
            Fault::SegmentNotPresent => "Segment Not Present",
            Fault::StackSegmentFault => "Stack-Segment Fault",
            Fault::GeneralProtectionFault => "General Protection Fault",
            Fault::PageFault => "Page Fault",
            Fault::X87FloatingPoint => "x87 Floating-Point Exception",
            Fault::AlignmentCheck => "Alignment Check",
            Fault::SimdFloatingPoint => "SIMD Floating-Point Exception",
        };
        write!(f, "{}", name)
    }
}
