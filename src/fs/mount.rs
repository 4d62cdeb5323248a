use x86_64::VirtAddr;

use super::dentry::{DirEntry, EntryType};
use super::error::{FsError, FsResult};
use crate::loader::elf;
use crate::memory::layout::PROGRAM_IMAGE_MAX;

/// A program that passed the executable checks and may be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executable {
    pub inode: u32,
    pub entry: VirtAddr,
    pub len: usize,
}

/// The read-only store programs and data files come from.
pub trait FileSystem: Sync {
    /// Name of this filesystem (e.g. "flatfs").
    fn name(&self) -> &str;

    /// Find the entry called exactly `name`.
    fn lookup(&self, name: &[u8]) -> FsResult<DirEntry>;

    /// The `index`-th directory entry, in image order.
    fn entry_at(&self, index: usize) -> FsResult<DirEntry>;

    fn file_len(&self, inode: u32) -> FsResult<usize>;

    /// Read up to `buf.len()` bytes starting at `offset`. Reads are clamped
    /// to the file length; an offset at or past the end reads nothing.
    fn read(&self, inode: u32, offset: usize, buf: &mut [u8]) -> FsResult<usize>;

    fn write(&self, _inode: u32, _offset: usize, _data: &[u8]) -> FsResult<usize> {
        Err(FsError::ReadOnly)
    }

    /// Look up `name` and check it can be run: a regular file carrying the
    /// executable magic, a complete header and an image that fits the
    /// program window.
    fn lookup_executable(&self, name: &[u8]) -> FsResult<Executable> {
        let entry = self.lookup(name)?;
        if entry.entry_type != EntryType::Regular {
            return Err(FsError::NotExecutable);
        }
        let len = self.file_len(entry.inode)?;
        if len > PROGRAM_IMAGE_MAX {
            return Err(FsError::NotExecutable);
        }
        let mut header = [0u8; elf::HEADER_LEN];
        let read = self.read(entry.inode, 0, &mut header)?;
        let start = elf::entry_point(&header[..read]).ok_or(FsError::NotExecutable)?;
        Ok(Executable { inode: entry.inode, entry: start, len })
    }
}
