use crate::error::{KResult, KernelError};
use crate::fs::fd::OpenFile;
use crate::log_warn;
use crate::machine::Machine;
use crate::memory::layout::{MAX_COMMAND_LEN, PROGRAM_WINDOW_END};
use crate::memory::UserSlice;
use crate::process::{Context, Kernel, Transfer};

/// Syscall numbers (passed in RAX from userland).
pub const SYS_HALT: u64 = 1;
pub const SYS_EXECUTE: u64 = 2;
pub const SYS_READ: u64 = 3;
pub const SYS_WRITE: u64 = 4;
pub const SYS_OPEN: u64 = 5;
pub const SYS_CLOSE: u64 = 6;
pub const SYS_GETARGS: u64 = 7;
pub const SYS_VIDMAP: u64 = 8;
pub const SYS_SET_HANDLER: u64 = 9;
pub const SYS_SIGRETURN: u64 = 10;

impl<M: Machine> Kernel<M> {
    /// Central syscall dispatcher, called from the int 0x80 handler.
    /// Arguments come from RDI, RSI and RDX; `caller` is the trap context
    /// of the calling process. Failures become `Return(-1)`.
    pub fn dispatch(&self, number: u64, args: [u64; 3], caller: Context) -> Transfer {
        let result = match number {
            SYS_HALT => match self.halt(args[0] as u8) {
                Ok(transfer) => return transfer,
                Err(err) => panic!("halt could not complete: {}", err),
            },
            SYS_EXECUTE => self.sys_execute(args[0], caller),
            SYS_READ => self.sys_read(args[0], args[1], args[2]).map(returned),
            SYS_WRITE => self.sys_write(args[0], args[1], args[2]).map(returned),
            SYS_OPEN => self.sys_open(args[0]).map(returned),
            SYS_CLOSE => descriptor(args[0]).and_then(|fd| self.close(fd)).map(|()| Transfer::Return(0)),
            SYS_GETARGS => self.sys_getargs(args[0], args[1]).map(|()| Transfer::Return(0)),
            SYS_VIDMAP => self.vidmap(args[0]).map(|_| Transfer::Return(0)),
            SYS_SET_HANDLER => self.set_handler(args[0] as i32, args[1]).map(|()| Transfer::Return(0)),
            SYS_SIGRETURN => self.sigreturn().map(|()| Transfer::Return(0)),
            _ => Err(KernelError::Unsupported),
        };
        match result {
            Ok(transfer) => transfer,
            Err(err) => {
                log_warn!("syscall {} failed: {}", number, err);
                Transfer::Return(err.as_return())
            }
        }
    }

    fn sys_execute(&self, command: u64, caller: Context) -> KResult<Transfer> {
        // One byte past the limit, so an overlong line is seen as such.
        let mut line = [0u8; MAX_COMMAND_LEN + 1];
        let line = self.copy_user_string(command, &mut line)?;
        self.execute(line, caller)
    }

    fn sys_read(&self, fd: u64, buf: u64, len: u64) -> KResult<usize> {
        let fd = descriptor(fd)?;
        let range = UserSlice::new(buf, byte_count(len)?)?;
        let buf = unsafe { self.user_buffer(&range)? };
        self.read(fd, buf)
    }

    fn sys_write(&self, fd: u64, buf: u64, len: u64) -> KResult<usize> {
        let fd = descriptor(fd)?;
        let range = UserSlice::new(buf, byte_count(len)?)?;
        let buf = unsafe { self.user_buffer(&range)? };
        self.write(fd, buf)
    }

    fn sys_open(&self, name: u64) -> KResult<usize> {
        let mut buf = [0u8; MAX_COMMAND_LEN];
        let name = self.copy_user_string(name, &mut buf)?;
        self.open(name)
    }

    fn sys_getargs(&self, buf: u64, len: u64) -> KResult<()> {
        let range = UserSlice::new(buf, byte_count(len)?)?;
        let buf = unsafe { self.user_buffer(&range)? };
        self.getargs(buf)
    }

    /// Copy a NUL-terminated string out of the program window into `out`,
    /// stopping at the terminator or the end of the window. A string that
    /// fills `out` without a terminator is too long.
    fn copy_user_string<'b>(&self, addr: u64, out: &'b mut [u8]) -> KResult<&'b [u8]> {
        let available = PROGRAM_WINDOW_END.checked_sub(addr).ok_or(KernelError::BadAddress)?;
        let len = out.len().min(available as usize);
        let range = UserSlice::new(addr, len)?;
        let src = unsafe { self.user_buffer(&range)? };
        out[..len].copy_from_slice(src);
        match out[..len].iter().position(|&b| b == 0) {
            Some(end) => Ok(&out[..end]),
            None if (len as u64) < available => Err(KernelError::CommandTooLong),
            None => Ok(&out[..len]),
        }
    }

    /// # Safety
    /// See [`AddressSpace::user_bytes`](crate::memory::AddressSpace::user_bytes).
    #[allow(clippy::mut_from_ref)]
    unsafe fn user_buffer(&self, range: &UserSlice) -> KResult<&mut [u8]> {
        self.machine.without_interrupts(|| {
            let state = self.state.lock();
            unsafe { state.space.user_bytes(&self.machine, range) }
        })
    }

    pub fn open(&self, name: &[u8]) -> KResult<usize> {
        self.with_current(|pcb| {
            let file = OpenFile::open(&self.devices, name)?;
            pcb.files.insert(file)
        })
    }

    /// Descriptors 0 and 1 can never be closed.
    pub fn close(&self, fd: usize) -> KResult<()> {
        let file = self.with_current(|pcb| pcb.files.remove(fd))?;
        file.close(&self.devices)
    }

    /// Runs the descriptor's read operation without holding the kernel
    /// lock, since terminal and rtc reads block.
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> KResult<usize> {
        let (mut file, terminal) = self.with_current(|pcb| Ok((pcb.files.get(fd)?, pcb.terminal)))?;
        let read = file.read(&self.devices, terminal, buf)?;
        self.with_current(|pcb| pcb.files.update(fd, file))?;
        Ok(read)
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> KResult<usize> {
        let (mut file, terminal) = self.with_current(|pcb| Ok((pcb.files.get(fd)?, pcb.terminal)))?;
        let written = file.write(&self.devices, terminal, buf)?;
        self.with_current(|pcb| pcb.files.update(fd, file))?;
        Ok(written)
    }

    /// Copy the current process's argument string into `buf`, followed by
    /// a NUL when there is room for one.
    pub fn getargs(&self, buf: &mut [u8]) -> KResult<()> {
        if buf.is_empty() {
            return Err(KernelError::EmptyBuffer);
        }
        let args = self.with_current(|pcb| Ok(pcb.args))?;
        if args.is_empty() {
            return Err(KernelError::NoArguments);
        }
        let bytes = args.as_bytes();
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        if len < buf.len() {
            buf[len] = 0;
        }
        Ok(())
    }

    /// Map the text buffer for the current process and store its address
    /// in the `u64` at `out`, which must lie in the program window.
    pub fn vidmap(&self, out: u64) -> KResult<x86_64::VirtAddr> {
        let slot = UserSlice::out_u64(out)?;
        self.machine.without_interrupts(|| {
            let mut state = self.state.lock();
            let pid = state.table.current().ok_or(KernelError::NoCurrentProcess)?;
            let addr = state.space.map_display_window(&self.machine, pid);
            let out = unsafe { state.space.user_bytes(&self.machine, &slot)? };
            out.copy_from_slice(&addr.as_u64().to_le_bytes());
            Ok(addr)
        })
    }

    /// Signals are not delivered; always fails.
    pub fn set_handler(&self, _signum: i32, _handler: u64) -> KResult<()> {
        Err(KernelError::Unsupported)
    }

    pub fn sigreturn(&self) -> KResult<()> {
        Err(KernelError::Unsupported)
    }
}

fn returned(count: usize) -> Transfer {
    Transfer::Return(count as i32)
}

/// Descriptors arrive as 32-bit signed values in a 64-bit register.
fn descriptor(raw: u64) -> KResult<usize> {
    usize::try_from(raw as i32).map_err(|_| KernelError::BadDescriptor)
}

fn byte_count(raw: u64) -> KResult<usize> {
    let count = i32::try_from(raw).map_err(|_| KernelError::InvalidArgument)?;
    usize::try_from(count).map_err(|_| KernelError::InvalidArgument)
}

pub fn init() {
    crate::log_info!("Syscall interface initialized.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layout::{display_window, PROGRAM_WINDOW_BASE};
    use crate::process::ProcessId;
    use crate::terminal::TerminalId;
    use crate::testing::{fixture, Fixture, FRAME0};

    const SCRATCH: u64 = PROGRAM_WINDOW_BASE + 0x1000;
    const NAME: u64 = PROGRAM_WINDOW_BASE + 0x2000;

    fn call(fx: &Fixture, number: u64, args: [u64; 3]) -> Transfer {
        fx.kernel.dispatch(number, args, Context::new(0x7F_F000, 0x7F_F100))
    }

    fn ret(fx: &Fixture, number: u64, args: [u64; 3]) -> i32 {
        match call(fx, number, args) {
            Transfer::Return(value) => value,
            other => panic!("expected a plain return, got {:?}", other),
        }
    }

    fn running(program: &[u8]) -> Fixture {
        let fx = fixture();
        fx.kernel.boot().unwrap();
        fx.poke(NAME, program);
        fx.poke(NAME + program.len() as u64, b"\0");
        assert!(matches!(call(&fx, SYS_EXECUTE, [NAME, 0, 0]), Transfer::EnterUser { .. }));
        fx
    }

    fn open(fx: &Fixture, name: &[u8]) -> i32 {
        fx.poke(NAME, name);
        fx.poke(NAME + name.len() as u64, b"\0");
        ret(fx, SYS_OPEN, [NAME, 0, 0])
    }

    #[test]
    fn execute_reads_the_command_from_user_memory() {
        let fx = running(b"cat frame0.txt");
        assert_eq!(fx.kernel.current(), Some(ProcessId(1)));
        let state = fx.kernel.state.lock();
        assert_eq!(state.table.get(ProcessId(1)).unwrap().args.as_bytes(), b"frame0.txt");
    }

    #[test]
    fn execute_of_missing_program_returns_failure() {
        let fx = fixture();
        fx.kernel.boot().unwrap();
        fx.poke(NAME, b"badprog\0");
        assert_eq!(ret(&fx, SYS_EXECUTE, [NAME, 0, 0]), -1);
        assert_eq!(ret(&fx, SYS_EXECUTE, [0x1000, 0, 0]), -1);
    }

    #[test]
    fn execute_rejects_unterminated_long_lines() {
        let fx = fixture();
        fx.kernel.boot().unwrap();
        let mut line = b"cat ".to_vec();
        line.extend_from_slice(&[b'a'; 200]);
        line.push(0);
        fx.poke(NAME, &line);
        assert_eq!(ret(&fx, SYS_EXECUTE, [NAME, 0, 0]), -1);
        assert_eq!(fx.kernel.current(), Some(ProcessId(0)));

        let mut line = b"cat ".to_vec();
        line.extend_from_slice(&[b'a'; MAX_COMMAND_LEN - 4]);
        line.push(0);
        fx.poke(NAME, &line);
        assert!(matches!(call(&fx, SYS_EXECUTE, [NAME, 0, 0]), Transfer::EnterUser { .. }));
        let state = fx.kernel.state.lock();
        assert_eq!(state.table.get(ProcessId(1)).unwrap().args.as_bytes().len(), MAX_COMMAND_LEN - 4);
    }

    #[test]
    fn halt_resumes_the_parent_with_the_status() {
        let fx = running(b"ls");
        let transfer = call(&fx, SYS_HALT, [7, 0, 0]);
        assert_eq!(
            transfer,
            Transfer::Resume { context: Context::new(0x7F_F000, 0x7F_F100), value: Some(7) }
        );
    }

    #[test]
    fn reads_a_file_in_pieces() {
        let fx = running(b"cat");
        let fd = open(&fx, b"frame0.txt");
        assert_eq!(fd, 2);
        assert_eq!(ret(&fx, SYS_READ, [2, SCRATCH, 10]), 10);
        assert_eq!(fx.peek(SCRATCH, 10), &FRAME0[..10]);
        let rest = (FRAME0.len() - 10) as i32;
        assert_eq!(ret(&fx, SYS_READ, [2, SCRATCH, 4096]), rest);
        assert_eq!(fx.peek(SCRATCH, rest as usize), &FRAME0[10..]);
        assert_eq!(ret(&fx, SYS_READ, [2, SCRATCH, 4096]), 0);
    }

    #[test]
    fn directory_reads_one_name_per_call() {
        let fx = running(b"ls");
        let fd = open(&fx, b".") as u64;
        assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, 32]), 1);
        assert_eq!(fx.peek(SCRATCH, 1), b".");
        assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, 32]), 5);
        assert_eq!(fx.peek(SCRATCH, 5), b"shell");
        let mut calls = 2;
        while ret(&fx, SYS_READ, [fd, SCRATCH, 32]) > 0 {
            calls += 1;
        }
        assert_eq!(calls, fx.fs.dir_count());
    }

    #[test]
    fn stdout_and_stdin_go_through_the_console() {
        let fx = running(b"shell");
        fx.poke(SCRATCH, b"hello");
        assert_eq!(ret(&fx, SYS_WRITE, [1, SCRATCH, 5]), 5);
        assert_eq!(fx.console.output(TerminalId(0)), b"hello");

        fx.console.type_line(TerminalId(0), b"ls\n");
        assert_eq!(ret(&fx, SYS_READ, [0, SCRATCH, 128]), 3);
        assert_eq!(fx.peek(SCRATCH, 3), b"ls\n");
    }

    #[test]
    fn wrong_direction_and_read_only_writes_fail() {
        let fx = running(b"cat");
        assert_eq!(ret(&fx, SYS_READ, [1, SCRATCH, 4]), -1);
        assert_eq!(ret(&fx, SYS_WRITE, [0, SCRATCH, 4]), -1);
        let fd = open(&fx, b"frame0.txt") as u64;
        assert_eq!(ret(&fx, SYS_WRITE, [fd, SCRATCH, 4]), -1);
    }

    #[test]
    fn invalid_descriptors_fail() {
        let fx = running(b"cat");
        for fd in [2u64, 7, 8, 100, u64::MAX] {
            assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, 4]), -1);
            assert_eq!(ret(&fx, SYS_WRITE, [fd, SCRATCH, 4]), -1);
            assert_eq!(ret(&fx, SYS_CLOSE, [fd, 0, 0]), -1);
        }
    }

    #[test]
    fn close_policy() {
        let fx = running(b"cat");
        assert_eq!(ret(&fx, SYS_CLOSE, [0, 0, 0]), -1);
        assert_eq!(ret(&fx, SYS_CLOSE, [1, 0, 0]), -1);
        let fd = open(&fx, b"frame0.txt") as u64;
        assert_eq!(ret(&fx, SYS_CLOSE, [fd, 0, 0]), 0);
        assert_eq!(ret(&fx, SYS_CLOSE, [fd, 0, 0]), -1);
        assert_eq!(ret(&fx, SYS_WRITE, [1, SCRATCH, 0]), 0);
    }

    #[test]
    fn open_fails_for_missing_files_and_full_tables() {
        let fx = running(b"cat");
        assert_eq!(open(&fx, b"missing"), -1);
        for expected in 2..8 {
            assert_eq!(open(&fx, b"frame0.txt"), expected);
        }
        assert_eq!(open(&fx, b"frame0.txt"), -1);
    }

    #[test]
    fn buffers_outside_the_window_are_rejected() {
        let fx = running(b"cat");
        let fd = open(&fx, b"frame0.txt") as u64;
        assert_eq!(ret(&fx, SYS_READ, [fd, 0x10_0000, 16]), -1);
        assert_eq!(ret(&fx, SYS_READ, [fd, PROGRAM_WINDOW_END - 8, 16]), -1);
        assert_eq!(ret(&fx, SYS_WRITE, [1, 0xB8000, 16]), -1);
        assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, u64::MAX]), -1);
        assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, 0x1_0000_0010]), -1);
    }

    #[test]
    fn getargs_copies_and_terminates() {
        let fx = running(b"cat frame0.txt");
        assert_eq!(ret(&fx, SYS_GETARGS, [SCRATCH, 32, 0]), 0);
        assert_eq!(fx.peek(SCRATCH, 11), b"frame0.txt\0");
        assert_eq!(ret(&fx, SYS_GETARGS, [SCRATCH, 0, 0]), -1);
        fx.poke(SCRATCH, &[0xAA; 8]);
        assert_eq!(ret(&fx, SYS_GETARGS, [SCRATCH, 5, 0]), 0);
        assert_eq!(fx.peek(SCRATCH, 6), b"frame\xAA");
    }

    #[test]
    fn getargs_without_arguments_fails() {
        let fx = running(b"shell");
        assert_eq!(ret(&fx, SYS_GETARGS, [SCRATCH, 32, 0]), -1);
    }

    #[test]
    fn vidmap_writes_the_display_address() {
        let fx = running(b"fish");
        assert_eq!(ret(&fx, SYS_VIDMAP, [SCRATCH, 0, 0]), 0);
        let expected = display_window(ProcessId(1)).as_u64();
        assert_eq!(fx.peek(SCRATCH, 8), expected.to_le_bytes());
    }

    #[test]
    fn vidmap_rejects_addresses_outside_the_window() {
        let fx = running(b"fish");
        for out in [0u64, 0x40_0000, PROGRAM_WINDOW_END, display_window(ProcessId(1)).as_u64()] {
            assert_eq!(ret(&fx, SYS_VIDMAP, [out, 0, 0]), -1);
        }
        let state = fx.kernel.state.lock();
        assert_eq!(state.space.translate(display_window(ProcessId(1))), None);
    }

    #[test]
    fn rtc_frequency_writes_take_four_bytes() {
        let fx = running(b"pingpong");
        let fd = open(&fx, b"rtc") as u64;
        fx.poke(SCRATCH, &32u32.to_le_bytes());
        assert_eq!(ret(&fx, SYS_WRITE, [fd, SCRATCH, 4]), 4);
        assert_eq!(fx.rtc.frequency(), 32);
        assert_eq!(ret(&fx, SYS_WRITE, [fd, SCRATCH, 2]), -1);
        fx.poke(SCRATCH, &33u32.to_le_bytes());
        assert_eq!(ret(&fx, SYS_WRITE, [fd, SCRATCH, 4]), -1);
        assert_eq!(ret(&fx, SYS_READ, [fd, SCRATCH, 4]), 0);
        assert_eq!(fx.rtc.ticks(), 1);
    }

    #[test]
    fn signal_calls_and_unknown_numbers_fail() {
        let fx = running(b"shell");
        assert_eq!(ret(&fx, SYS_SET_HANDLER, [2, SCRATCH, 0]), -1);
        assert_eq!(ret(&fx, SYS_SIGRETURN, [0, 0, 0]), -1);
        assert_eq!(ret(&fx, 0, [0, 0, 0]), -1);
        assert_eq!(ret(&fx, 11, [0, 0, 0]), -1);
    }
}
