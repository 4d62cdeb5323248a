//! The boot-module filesystem: a flat, read-only image of 4 KiB blocks.
//!
//! Block 0 holds the counts and up to 63 directory entries, the next
//! `inode_count` blocks hold one inode each (length plus data-block
//! indices), and the remaining blocks hold file data.

use super::dentry::{DirEntry, EntryType};
use super::error::{FsError, FsResult};
use super::mount::FileSystem;
use crate::memory::layout::MAX_NAME_LEN;

pub const BLOCK_SIZE: usize = 4096;
pub const MAX_DENTRIES: usize = 63;

const DENTRY_SIZE: usize = 64;
const DENTRY_TABLE: usize = 64;
const DENTRY_TYPE: usize = MAX_NAME_LEN;
const DENTRY_INODE: usize = MAX_NAME_LEN + 4;
const BLOCKS_PER_INODE: usize = BLOCK_SIZE / 4 - 1;

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

pub struct FlatFs {
    image: &'static [u8],
    dir_count: usize,
    inode_count: usize,
    data_count: usize,
}

impl FlatFs {
    /// Validate the boot block and wrap `image`.
    pub fn new(image: &'static [u8]) -> FsResult<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(FsError::CorruptImage);
        }
        let dir_count = u32_at(image, 0) as usize;
        let inode_count = u32_at(image, 4) as usize;
        let data_count = u32_at(image, 8) as usize;
        if dir_count > MAX_DENTRIES {
            return Err(FsError::CorruptImage);
        }
        let blocks = inode_count
            .checked_add(data_count)
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(BLOCK_SIZE))
            .ok_or(FsError::CorruptImage)?;
        if image.len() < blocks {
            return Err(FsError::CorruptImage);
        }
        Ok(FlatFs { image, dir_count, inode_count, data_count })
    }

    pub fn dir_count(&self) -> usize {
        self.dir_count
    }

    fn block(&self, index: usize) -> &'static [u8] {
        let start = index * BLOCK_SIZE;
        &self.image[start..start + BLOCK_SIZE]
    }

    fn inode_block(&self, inode: u32) -> FsResult<&'static [u8]> {
        let inode = inode as usize;
        if inode >= self.inode_count {
            return Err(FsError::InvalidInode);
        }
        Ok(self.block(1 + inode))
    }

    fn data_block(&self, inode: &[u8], nth: usize) -> FsResult<&'static [u8]> {
        if nth >= BLOCKS_PER_INODE {
            return Err(FsError::CorruptImage);
        }
        let index = u32_at(inode, 4 + nth * 4) as usize;
        if index >= self.data_count {
            return Err(FsError::CorruptImage);
        }
        Ok(self.block(1 + self.inode_count + index))
    }
}

impl FileSystem for FlatFs {
    fn name(&self) -> &str {
        "flatfs"
    }

    fn lookup(&self, name: &[u8]) -> FsResult<DirEntry> {
        if name.is_empty() {
            return Err(FsError::NotFound);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        (0..self.dir_count)
            .filter_map(|index| self.entry_at(index).ok())
            .find(|entry| entry.name() == name)
            .ok_or(FsError::NotFound)
    }

    fn entry_at(&self, index: usize) -> FsResult<DirEntry> {
        if index >= self.dir_count {
            return Err(FsError::NotFound);
        }
        let start = DENTRY_TABLE + index * DENTRY_SIZE;
        let raw = &self.image[start..start + DENTRY_SIZE];
        let entry_type = EntryType::from_raw(u32_at(raw, DENTRY_TYPE)).ok_or(FsError::CorruptImage)?;
        DirEntry::new(&raw[..MAX_NAME_LEN], entry_type, u32_at(raw, DENTRY_INODE))
    }

    fn file_len(&self, inode: u32) -> FsResult<usize> {
        Ok(u32_at(self.inode_block(inode)?, 0) as usize)
    }

    fn read(&self, inode: u32, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let node = self.inode_block(inode)?;
        let len = u32_at(node, 0) as usize;
        if offset >= len {
            return Ok(0);
        }
        let total = buf.len().min(len - offset);
        let mut copied = 0;
        while copied < total {
            let position = offset + copied;
            let block = self.data_block(node, position / BLOCK_SIZE)?;
            let within = position % BLOCK_SIZE;
            let chunk = (BLOCK_SIZE - within).min(total - copied);
            buf[copied..copied + chunk].copy_from_slice(&block[within..within + chunk]);
            copied += chunk;
        }
        Ok(total)
    }
}

/// Builds images in the on-disk format for tests.
#[cfg(test)]
pub(crate) struct ImageBuilder {
    entries: Vec<(Vec<u8>, EntryType, Option<Vec<u8>>)>,
}

#[cfg(test)]
impl ImageBuilder {
    pub fn new() -> Self {
        ImageBuilder { entries: Vec::new() }
    }

    pub fn directory(mut self, name: &[u8]) -> Self {
        self.entries.push((name.to_vec(), EntryType::Directory, None));
        self
    }

    pub fn rtc(mut self, name: &[u8]) -> Self {
        self.entries.push((name.to_vec(), EntryType::Rtc, None));
        self
    }

    pub fn file(mut self, name: &[u8], contents: &[u8]) -> Self {
        self.entries.push((name.to_vec(), EntryType::Regular, Some(contents.to_vec())));
        self
    }

    pub fn image(&self) -> Vec<u8> {
        let files: Vec<&Vec<u8>> = self.entries.iter().filter_map(|(_, _, data)| data.as_ref()).collect();
        let inode_count = files.len().max(1);
        let data_count: usize = files.iter().map(|f| f.len().div_ceil(BLOCK_SIZE)).sum();
        let mut image = vec![0u8; (1 + inode_count + data_count) * BLOCK_SIZE];

        image[0..4].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        image[4..8].copy_from_slice(&(inode_count as u32).to_le_bytes());
        image[8..12].copy_from_slice(&(data_count as u32).to_le_bytes());

        let mut next_inode = 0u32;
        let mut next_block = 0usize;
        for (index, (name, entry_type, data)) in self.entries.iter().enumerate() {
            let inode = if data.is_some() { next_inode } else { 0 };
            let at = DENTRY_TABLE + index * DENTRY_SIZE;
            image[at..at + name.len()].copy_from_slice(name);
            image[at + DENTRY_TYPE..at + DENTRY_TYPE + 4].copy_from_slice(&entry_type.as_raw().to_le_bytes());
            image[at + DENTRY_INODE..at + DENTRY_INODE + 4].copy_from_slice(&inode.to_le_bytes());

            if let Some(data) = data {
                let node = (1 + next_inode as usize) * BLOCK_SIZE;
                image[node..node + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                for (nth, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                    let slot = node + 4 + nth * 4;
                    image[slot..slot + 4].copy_from_slice(&(next_block as u32).to_le_bytes());
                    let start = (1 + inode_count + next_block) * BLOCK_SIZE;
                    image[start..start + chunk.len()].copy_from_slice(chunk);
                    next_block += 1;
                }
                next_inode += 1;
            }
        }
        image
    }

    pub fn build(&self) -> &'static FlatFs {
        let image: &'static [u8] = Box::leak(self.image().into_boxed_slice());
        Box::leak(Box::new(FlatFs::new(image).expect("valid image")))
    }
}
