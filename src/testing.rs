//! Host stand-ins for the hardware and the collaborators, shared by tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

use crate::drivers::{rtc, Console, Devices, Rtc};
use crate::fs::flat::ImageBuilder;
use crate::fs::{DirEntry, FileSystem, FlatFs, FsResult};
use crate::loader::elf;
use crate::machine::Machine;
use crate::memory::layout::{MAX_PROCESSES, NUM_TERMINALS, PROGRAM_PHYS_BASE, PROGRAM_WINDOW_SIZE};
use crate::process::Kernel;
use crate::terminal::{Screen, Snapshot, TerminalId, SCREEN_COLS};

pub const SHELL_ENTRY: u32 = 0x0804_8094;
pub const FRAME0: &[u8] = b"/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\\/\n\
    o\n      o    o\n   o\n        _ o\n  |\\ /   \\\n  | X  @  >\n  |/ \\_-_/\n";

const MEMORY_LEN: usize = MAX_PROCESSES * PROGRAM_WINDOW_SIZE as usize;

/// A CPU whose physical memory is the program regions of every process.
pub struct MockMachine {
    memory: *mut u8,
    interrupts_off: AtomicUsize,
    flushes: AtomicUsize,
    unsafe_flushes: AtomicUsize,
    kernel_stack: AtomicU64,
}

// Memory is only handed out through `physical_memory`, whose callers
// uphold the no-overlap contract.
unsafe impl Send for MockMachine {}
unsafe impl Sync for MockMachine {}

impl MockMachine {
    pub fn new() -> Self {
        let memory = Box::into_raw(vec![0u8; MEMORY_LEN].into_boxed_slice()) as *mut u8;
        MockMachine {
            memory,
            interrupts_off: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            unsafe_flushes: AtomicUsize::new(0),
            kernel_stack: AtomicU64::new(0),
        }
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Whether any flush happened outside `without_interrupts`.
    pub fn flushed_with_interrupts_enabled(&self) -> bool {
        self.unsafe_flushes.load(Ordering::SeqCst) > 0
    }

    fn offset(base: PhysAddr, len: usize) -> usize {
        let start = base.as_u64().checked_sub(PROGRAM_PHYS_BASE).expect("below program memory") as usize;
        assert!(start + len <= MEMORY_LEN, "{:?}+{:#x} outside program memory", base, len);
        start
    }

    pub fn read_physical(&self, base: PhysAddr, len: usize) -> Vec<u8> {
        let start = Self::offset(base, len);
        unsafe { std::slice::from_raw_parts(self.memory.add(start), len).to_vec() }
    }

    pub fn write_physical(&self, base: PhysAddr, bytes: &[u8]) {
        let start = Self::offset(base, bytes.len());
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.memory.add(start), bytes.len()) }
    }
}

impl Drop for MockMachine {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.memory, MEMORY_LEN))) }
    }
}

impl Machine for MockMachine {
    fn without_interrupts<R, F: FnOnce() -> R>(&self, f: F) -> R {
        self.interrupts_off.fetch_add(1, Ordering::SeqCst);
        let result = f();
        self.interrupts_off.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn flush_tlb(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.interrupts_off.load(Ordering::SeqCst) == 0 {
            self.unsafe_flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn kernel_stack(&self) -> VirtAddr {
        VirtAddr::new(self.kernel_stack.load(Ordering::SeqCst))
    }

    fn set_kernel_stack(&self, top: VirtAddr) {
        self.kernel_stack.store(top.as_u64(), Ordering::SeqCst);
    }

    unsafe fn physical_memory(&self, base: PhysAddr, len: usize) -> &mut [u8] {
        let start = Self::offset(base, len);
        std::slice::from_raw_parts_mut(self.memory.add(start), len)
    }
}

/// Records output per terminal and serves queued input lines.
pub struct FakeConsole {
    output: Mutex<Vec<Vec<u8>>>,
    input: Mutex<Vec<VecDeque<Vec<u8>>>>,
    focused: Mutex<Vec<TerminalId>>,
}

impl FakeConsole {
    pub fn new() -> Self {
        FakeConsole {
            output: Mutex::new(vec![Vec::new(); NUM_TERMINALS]),
            input: Mutex::new(vec![VecDeque::new(); NUM_TERMINALS]),
            focused: Mutex::new(Vec::new()),
        }
    }

    pub fn output(&self, terminal: TerminalId) -> Vec<u8> {
        self.output.lock()[terminal.0].clone()
    }

    pub fn type_line(&self, terminal: TerminalId, line: &[u8]) {
        self.input.lock()[terminal.0].push_back(line.to_vec());
    }

    pub fn focus_history(&self) -> Vec<TerminalId> {
        self.focused.lock().clone()
    }
}

impl Console for FakeConsole {
    /// Never blocks: with nothing queued the read comes back empty.
    fn read_line(&self, terminal: TerminalId, buf: &mut [u8]) -> usize {
        match self.input.lock()[terminal.0].pop_front() {
            Some(line) => {
                let n = line.len().min(buf.len());
                buf[..n].copy_from_slice(&line[..n]);
                n
            }
            None => 0,
        }
    }

    fn write_bytes(&self, terminal: TerminalId, bytes: &[u8]) -> usize {
        self.output.lock()[terminal.0].extend_from_slice(bytes);
        bytes.len()
    }

    fn focus(&self, terminal: TerminalId) {
        self.focused.lock().push(terminal);
    }
}

/// The display as a plain snapshot.
pub struct FakeScreen {
    shown: Mutex<Snapshot>,
}

impl FakeScreen {
    pub fn new() -> Self {
        FakeScreen { shown: Mutex::new(Snapshot::blank()) }
    }

    /// Print `text` at the top-left and leave the cursor after it.
    pub fn draw(&self, text: &[u8]) {
        let mut shown = self.shown.lock();
        for (cell, &byte) in shown.cells.iter_mut().zip(text) {
            *cell = 0x0700 | byte as u16;
        }
        shown.cursor.col = text.len() % SCREEN_COLS;
        shown.cursor.row = text.len() / SCREEN_COLS;
    }

    pub fn shown(&self) -> Snapshot {
        self.shown.lock().clone()
    }
}

impl Screen for FakeScreen {
    fn save(&self, into: &mut Snapshot) {
        *into = self.shown.lock().clone();
    }

    fn restore(&self, from: &Snapshot) {
        *self.shown.lock() = from.clone();
    }
}

pub struct FakeRtc {
    opens: AtomicUsize,
    closes: AtomicUsize,
    ticks: AtomicUsize,
    frequency: AtomicU32,
}

impl FakeRtc {
    pub fn new() -> Self {
        FakeRtc {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            ticks: AtomicUsize::new(0),
            frequency: AtomicU32::new(rtc::DEFAULT_HZ),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::SeqCst)
    }
}

impl Rtc for FakeRtc {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.frequency.store(rtc::DEFAULT_HZ, Ordering::SeqCst);
    }

    fn wait_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }

    fn set_frequency(&self, hz: u32) -> bool {
        if rtc::rate_for(hz).is_none() {
            return false;
        }
        self.frequency.store(hz, Ordering::SeqCst);
        true
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// An executable of `len` bytes: header, then a recognizable fill pattern.
pub fn program_image(entry: u32, len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
    bytes[..4].copy_from_slice(&elf::ELF_MAGIC);
    bytes[elf::ENTRY_OFFSET..elf::HEADER_LEN].copy_from_slice(&entry.to_le_bytes());
    bytes
}

/// The fixture image, except that "truncated" claims a page more than it
/// holds, so loading it comes up short.
struct FixtureFs {
    inner: &'static FlatFs,
}

impl FileSystem for FixtureFs {
    fn name(&self) -> &str {
        "fixture"
    }

    fn lookup(&self, name: &[u8]) -> FsResult<DirEntry> {
        self.inner.lookup(name)
    }

    fn entry_at(&self, index: usize) -> FsResult<DirEntry> {
        self.inner.entry_at(index)
    }

    fn file_len(&self, inode: u32) -> FsResult<usize> {
        let len = self.inner.file_len(inode)?;
        match self.inner.lookup(b"truncated") {
            Ok(entry) if entry.inode == inode => Ok(len + 4096),
            _ => Ok(len),
        }
    }

    fn read(&self, inode: u32, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        self.inner.read(inode, offset, buf)
    }
}

pub struct Fixture {
    pub kernel: Kernel<MockMachine>,
    pub fs: &'static FlatFs,
    pub console: &'static FakeConsole,
    pub screen: &'static FakeScreen,
    pub rtc: &'static FakeRtc,
}

impl Fixture {
    fn physical(&self, addr: u64) -> PhysAddr {
        let state = self.kernel.state.lock();
        state.space.translate(VirtAddr::new(addr)).expect("address is mapped")
    }

    /// Write into the current process's memory.
    pub fn poke(&self, addr: u64, bytes: &[u8]) {
        self.kernel.machine.write_physical(self.physical(addr), bytes);
    }

    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        self.kernel.machine.read_physical(self.physical(addr), len)
    }
}

fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

/// A kernel over the mock machine with the usual programs installed and
/// nothing running yet.
pub fn fixture() -> Fixture {
    let fs = ImageBuilder::new()
        .directory(b".")
        .file(b"shell", &program_image(SHELL_ENTRY, 5_000))
        .file(b"ls", &program_image(0x0804_80a0, 3_000))
        .file(b"cat", &program_image(0x0804_80b0, 3_200))
        .file(b"counter", &program_image(0x0804_80c0, 2_600))
        .file(b"fish", &program_image(0x0804_80d0, 5_400))
        .file(b"pingpong", &program_image(0x0804_80e0, 2_900))
        .file(b"frame0.txt", FRAME0)
        .rtc(b"rtc")
        .file(b"truncated", &program_image(0x0804_80f0, 700))
        .build();
    let console = leak(FakeConsole::new());
    let screen = leak(FakeScreen::new());
    let rtc = leak(FakeRtc::new());
    let devices = Devices { fs: leak(FixtureFs { inner: fs }), console, screen, rtc: Some(rtc) };
    Fixture {
        kernel: Kernel::new(MockMachine::new(), devices, VirtAddr::new(0x80_0000)),
        fs,
        console,
        screen,
        rtc,
    }
}
