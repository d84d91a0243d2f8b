//! The image session: one owned byte arena standing in for the mapped image.
//!
//! All typed views (superblock, group descriptor, inodes, blocks, pointer
//! slots) are bounds-checked accessors over the arena. A session is consumed
//! by [`Image::close`], so one live value per image is the exclusive-access
//! rule.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::error::{FsError, Result};
use crate::fs_layout::*;

pub struct Image {
    bytes: Vec<u8>,
    file: Option<File>,
    path: Option<PathBuf>,
    /// Session clock, captured once; stamps every timestamp written.
    clock: u32,
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(1)
        .max(1)
}

impl Image {
    /// Opens an image file for a read/write session.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut bytes = Vec::with_capacity(IMAGE_SIZE);
        file.read_to_end(&mut bytes)?;

        let mut image = Self::from_bytes(bytes)?;
        image.file = Some(file);
        image.path = Some(path.to_path_buf());

        info!("opened image {}", path.display());
        Ok(image)
    }

    /// Wraps an in-memory image. Nothing is written anywhere on close.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != IMAGE_SIZE {
            return Err(FsError::BadImage(format!(
                "expected {} bytes, found {}",
                IMAGE_SIZE,
                bytes.len()
            )));
        }

        let sb: Superblock = read_struct(&bytes, SB_OFFSET);
        if sb.s_magic != EXT2_MAGIC {
            return Err(FsError::BadImage(format!("bad magic {:#06x}", sb.s_magic)));
        }
        if sb.s_log_block_size != 0 || sb.s_inode_size != INODE_SIZE {
            return Err(FsError::BadImage(
                "only 1 KiB blocks and 128-byte inodes are supported".into(),
            ));
        }
        if sb.s_blocks_count != BLOCK_COUNT || sb.s_inodes_count != INODE_COUNT {
            return Err(FsError::BadImage(format!(
                "expected {} blocks and {} inodes, found {} and {}",
                BLOCK_COUNT, INODE_COUNT, sb.s_blocks_count, sb.s_inodes_count
            )));
        }

        Ok(Image {
            bytes,
            file: None,
            path: None,
            clock: now(),
        })
    }

    /// Ends the session. With `changed`, stamps the write time and writes the
    /// arena back to the file it came from.
    pub fn close(mut self, changed: bool) -> Result<()> {
        if !changed {
            debug!("closing image without changes");
            return Ok(());
        }

        let clock = self.clock;
        self.update_superblock(|sb| sb.s_wtime = clock);

        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&self.bytes)?;
            file.sync_all()?;
        }
        if let Some(path) = &self.path {
            info!("wrote image {}", path.display());
        }
        Ok(())
    }

    pub fn clock(&self) -> u32 {
        self.clock
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /* ---------------- SUPERBLOCK / GROUP ---------------- */

    pub fn superblock(&self) -> Superblock {
        read_struct(&self.bytes, SB_OFFSET)
    }

    pub(crate) fn update_superblock(&mut self, f: impl FnOnce(&mut Superblock)) {
        let mut sb = self.superblock();
        f(&mut sb);
        write_struct(&mut self.bytes, SB_OFFSET, &sb);
    }

    pub fn group_desc(&self) -> GroupDesc {
        read_struct(&self.bytes, GD_OFFSET)
    }

    pub(crate) fn update_group_desc(&mut self, f: impl FnOnce(&mut GroupDesc)) {
        let mut gd = self.group_desc();
        f(&mut gd);
        write_struct(&mut self.bytes, GD_OFFSET, &gd);
    }

    /* ---------------- BLOCKS ---------------- */

    fn block_offset(index: u32) -> usize {
        assert!(
            index < BLOCK_COUNT,
            "block {} lies outside the image",
            index
        );
        index as usize * BLOCK_SIZE
    }

    pub fn block(&self, index: u32) -> &[u8] {
        let off = Self::block_offset(index);
        &self.bytes[off..off + BLOCK_SIZE]
    }

    pub(crate) fn block_mut(&mut self, index: u32) -> &mut [u8] {
        let off = Self::block_offset(index);
        &mut self.bytes[off..off + BLOCK_SIZE]
    }

    /// Pointer `slot` of an index block.
    pub(crate) fn pointer_at(&self, block: u32, slot: usize) -> u32 {
        assert!(slot < PTRS_PER_BLOCK);
        let b = self.block(block);
        let at = slot * 4;
        u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    pub(crate) fn set_pointer_at(&mut self, block: u32, slot: usize, value: u32) {
        assert!(slot < PTRS_PER_BLOCK);
        let at = slot * 4;
        self.block_mut(block)[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /* ---------------- INODES ---------------- */

    /// True for indices that name an inode the engine may touch: the root or
    /// any non-reserved inode of the group.
    pub fn is_addressable_inode(&self, index: u32) -> bool {
        let sb = self.superblock();
        index > 0 && index <= sb.s_inodes_count && (index >= sb.s_first_ino || index == ROOT_INO)
    }

    fn inode_offset(&self, index: u32) -> usize {
        assert!(
            self.is_addressable_inode(index),
            "inode {} is reserved or out of range",
            index
        );
        let table = self.group_desc().bg_inode_table as usize * BLOCK_SIZE;
        table + self.superblock().s_inode_size as usize * (index as usize - 1)
    }

    /// Raw inode record, valid or not.
    pub fn inode(&self, index: u32) -> Inode {
        read_struct(&self.bytes, self.inode_offset(index))
    }

    pub(crate) fn put_inode(&mut self, index: u32, inode: &Inode) {
        let off = self.inode_offset(index);
        write_struct(&mut self.bytes, off, inode);
    }

    pub(crate) fn update_inode<R>(&mut self, index: u32, f: impl FnOnce(&mut Inode) -> R) -> R {
        let mut inode = self.inode(index);
        let r = f(&mut inode);
        self.put_inode(index, &inode);
        r
    }
}
