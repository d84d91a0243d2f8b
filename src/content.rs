//! Reading and writing whole-file content.

use log::debug;

use crate::block_tree::BlockKind;
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

/// Blocks a file of `len` bytes occupies: data blocks plus the index blocks
/// that address them.
pub fn blocks_needed(len: usize) -> u32 {
    let data = len.div_ceil(BLOCK_SIZE);
    let mut rest = data.saturating_sub(N_DIRECT);
    let mut index = 0;

    // Single indirect.
    if rest > 0 {
        index += 1;
        rest = rest.saturating_sub(PTRS_PER_BLOCK);
    }
    // Double indirect.
    if rest > 0 {
        let covered = rest.min(PTRS_PER_BLOCK * PTRS_PER_BLOCK);
        index += 1 + covered.div_ceil(PTRS_PER_BLOCK);
        rest -= covered;
    }
    // Triple indirect.
    if rest > 0 {
        let per_mid = PTRS_PER_BLOCK * PTRS_PER_BLOCK;
        index += 1 + rest.div_ceil(per_mid) + rest.div_ceil(PTRS_PER_BLOCK);
    }

    (data + index) as u32
}

impl Image {
    /// Replaces the content of `ino` with `data`.
    ///
    /// A symlink target shorter than `FAST_SYMLINK_MAX` is kept inline in the
    /// pointer array. Anything else goes into freshly allocated blocks, one
    /// block at a time. `block_hint` is the caller's own block estimate; the
    /// write is refused up front unless both it and the real need fit.
    pub fn write_content(&mut self, ino: u32, block_hint: u32, data: &[u8]) -> Result<()> {
        let inode = self.valid_inode(ino).ok_or(FsError::NotFound)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory);
        }

        let clock = self.clock();

        if inode.is_symlink() && data.len() < FAST_SYMLINK_MAX {
            self.truncate(ino)?;
            self.update_inode(ino, |n| {
                n.set_inline_bytes(data);
                n.i_size = data.len() as u32;
                n.i_mtime = clock;
            });
            debug!("inode {}: {} bytes stored inline", ino, data.len());
            return Ok(());
        }

        // Blocks released by the truncation below count as available.
        let owned = if inode.is_fast_symlink() {
            0
        } else {
            inode.i_blocks / SECTORS_PER_BLOCK
        };
        let needed = blocks_needed(data.len()).max(block_hint);
        if !self.has_capacity(0, needed.saturating_sub(owned)) {
            return Err(FsError::NoSpace);
        }

        self.truncate(ino)?;
        for chunk in data.chunks(BLOCK_SIZE) {
            let block = self.grow(ino, BlockKind::Data)?;
            self.block_mut(block)[..chunk.len()].copy_from_slice(chunk);
        }

        self.update_inode(ino, |n| {
            n.i_size = data.len() as u32;
            n.i_mtime = clock;
        });
        debug!("inode {}: wrote {} bytes", ino, data.len());
        Ok(())
    }

    /// The exact `i_size` bytes stored for `ino`. Stamps the access time.
    pub fn read_content(&mut self, ino: u32) -> Result<Vec<u8>> {
        let inode = self.valid_inode(ino).ok_or(FsError::NotFound)?;
        let clock = self.clock();
        self.update_inode(ino, |n| n.i_atime = clock);

        let size = inode.i_size as usize;
        if inode.is_fast_symlink() {
            return Ok(inode.inline_bytes()[..size].to_vec());
        }

        let mut out = Vec::with_capacity(size);
        for block in self.leaf_blocks(ino) {
            if out.len() >= size {
                break;
            }
            let take = (size - out.len()).min(BLOCK_SIZE);
            out.extend_from_slice(&self.block(block)[..take]);
        }
        Ok(out)
    }

    /// Drops all content of `ino`: every data and index block, or the inline
    /// target of a fast symlink. The size becomes 0.
    pub fn truncate(&mut self, ino: u32) -> Result<()> {
        let inode = self.valid_inode(ino).ok_or(FsError::NotFound)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory);
        }

        if inode.is_fast_symlink() {
            self.update_inode(ino, |n| n.i_block = [0; N_BLOCK_PTRS]);
        } else {
            self.release_all_blocks(ino);
        }

        let clock = self.clock();
        self.update_inode(ino, |n| {
            n.i_size = 0;
            n.i_mtime = clock;
        });
        Ok(())
    }
}
