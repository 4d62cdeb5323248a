use super::dentry::EntryType;
use super::error::FsError;
use crate::drivers::{Devices, Rtc};
use crate::error::{KResult, KernelError};
use crate::memory::layout::MAX_FILES;
use crate::terminal::TerminalId;

pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;
/// Lowest descriptor `open` hands out; everything below is pre-bound.
pub const FIRST_USER_FD: usize = 2;

/// Selects the operation table an open descriptor dispatches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Stdin,
    Stdout,
    Regular,
    Directory,
    Rtc,
}

/// One in-use descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    pub file_type: FileType,
    pub inode: u32,
    /// Byte offset for regular files, entry index for the directory.
    pub offset: usize,
}

impl OpenFile {
    pub const fn stdin() -> Self {
        OpenFile { file_type: FileType::Stdin, inode: 0, offset: 0 }
    }

    pub const fn stdout() -> Self {
        OpenFile { file_type: FileType::Stdout, inode: 0, offset: 0 }
    }

    /// Resolve `name` and run the open operation of its file type.
    pub fn open(devices: &Devices, name: &[u8]) -> KResult<Self> {
        let entry = devices.fs.lookup(name)?;
        let file_type = match entry.entry_type {
            EntryType::Regular => FileType::Regular,
            EntryType::Directory => FileType::Directory,
            EntryType::Rtc => {
                rtc(devices)?.open();
                FileType::Rtc
            }
        };
        Ok(OpenFile { file_type, inode: entry.inode, offset: 0 })
    }

    /// May block: stdin waits for a full line and the rtc for its next tick.
    pub fn read(&mut self, devices: &Devices, terminal: TerminalId, buf: &mut [u8]) -> KResult<usize> {
        match self.file_type {
            FileType::Stdin => Ok(devices.console.read_line(terminal, buf)),
            FileType::Stdout => Err(KernelError::Unsupported),
            FileType::Regular => {
                let read = devices.fs.read(self.inode, self.offset, buf)?;
                self.offset += read;
                Ok(read)
            }
            FileType::Directory => match devices.fs.entry_at(self.offset) {
                Ok(entry) => {
                    let name = entry.name();
                    let len = name.len().min(buf.len());
                    buf[..len].copy_from_slice(&name[..len]);
                    self.offset += 1;
                    Ok(len)
                }
                Err(FsError::NotFound) => Ok(0),
                Err(err) => Err(err.into()),
            },
            FileType::Rtc => {
                rtc(devices)?.wait_tick();
                Ok(0)
            }
        }
    }

    pub fn write(&mut self, devices: &Devices, terminal: TerminalId, buf: &[u8]) -> KResult<usize> {
        match self.file_type {
            FileType::Stdout => Ok(devices.console.write_bytes(terminal, buf)),
            FileType::Stdin => Err(KernelError::Unsupported),
            FileType::Regular | FileType::Directory => Ok(devices.fs.write(self.inode, self.offset, buf)?),
            FileType::Rtc => {
                let hz: [u8; 4] = buf.try_into().map_err(|_| KernelError::InvalidArgument)?;
                if rtc(devices)?.set_frequency(u32::from_le_bytes(hz)) {
                    Ok(hz.len())
                } else {
                    Err(KernelError::InvalidArgument)
                }
            }
        }
    }

    pub fn close(&self, devices: &Devices) -> KResult<()> {
        match self.file_type {
            FileType::Stdin | FileType::Stdout => Err(KernelError::BadDescriptor),
            FileType::Rtc => {
                rtc(devices)?.close();
                Ok(())
            }
            FileType::Regular | FileType::Directory => Ok(()),
        }
    }
}

fn rtc(devices: &Devices) -> KResult<&'static dyn Rtc> {
    devices.rtc.ok_or(KernelError::Unsupported)
}

/// Per-process descriptor table. Slots 0 and 1 stay bound to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTable {
    slots: [Option<OpenFile>; MAX_FILES],
}

impl FileTable {
    pub fn new() -> Self {
        let mut slots = [None; MAX_FILES];
        slots[STDIN] = Some(OpenFile::stdin());
        slots[STDOUT] = Some(OpenFile::stdout());
        FileTable { slots }
    }

    pub fn get(&self, fd: usize) -> KResult<OpenFile> {
        self.slots.get(fd).copied().flatten().ok_or(KernelError::BadDescriptor)
    }

    /// Store `file` in the lowest free slot and return its descriptor.
    pub fn insert(&mut self, file: OpenFile) -> KResult<usize> {
        let fd = (FIRST_USER_FD..MAX_FILES)
            .find(|&fd| self.slots[fd].is_none())
            .ok_or(KernelError::NoFreeDescriptor)?;
        self.slots[fd] = Some(file);
        Ok(fd)
    }

    /// Write back a descriptor's state after an operation moved its offset.
    pub fn update(&mut self, fd: usize, file: OpenFile) -> KResult<()> {
        match self.slots.get_mut(fd) {
            Some(slot @ Some(_)) => {
                *slot = Some(file);
                Ok(())
            }
            _ => Err(KernelError::BadDescriptor),
        }
    }

    pub fn remove(&mut self, fd: usize) -> KResult<OpenFile> {
        if fd < FIRST_USER_FD {
            return Err(KernelError::BadDescriptor);
        }
        self.slots.get_mut(fd).and_then(Option::take).ok_or(KernelError::BadDescriptor)
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
