use super::error::{FsError, FsResult};
use crate::memory::layout::MAX_NAME_LEN;

/// Kind of object a directory entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Rtc,
    Directory,
    Regular,
}

impl EntryType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(EntryType::Rtc),
            1 => Some(EntryType::Directory),
            2 => Some(EntryType::Regular),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            EntryType::Rtc => 0,
            EntryType::Directory => 1,
            EntryType::Regular => 2,
        }
    }
}

/// A directory entry: maps a name to an inode.
///
/// Names are at most 32 bytes and are not NUL-terminated when they use the
/// full width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; MAX_NAME_LEN],
    pub entry_type: EntryType,
    pub inode: u32,
}

impl DirEntry {
    pub fn new(name: &[u8], entry_type: EntryType, inode: u32) -> FsResult<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let mut stored = [0u8; MAX_NAME_LEN];
        stored[..name.len()].copy_from_slice(name);
        Ok(DirEntry { name: stored, entry_type, inode })
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.name[..len]
    }
}
