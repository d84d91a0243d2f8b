//! Packed directory entries inside leaf directory blocks.
//!
//! Entries chain end to end through `rec_len` and always cover their block
//! exactly. Inserting splits an entry's slack off into a new record; removing
//! folds the record back into its predecessor in the same block.

use log::debug;

use crate::block_tree::{BlockKind, EntryPos, SlotTest, Traversal};
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

fn round_up(n: usize) -> usize {
    (n + DIR_ALIGN - 1) & !(DIR_ALIGN - 1)
}

impl Image {
    pub fn entry_header(&self, pos: EntryPos) -> DirEntryHeader {
        read_struct(self.block(pos.block), pos.offset)
    }

    pub(crate) fn set_entry_header(&mut self, pos: EntryPos, header: &DirEntryHeader) {
        write_struct(self.block_mut(pos.block), pos.offset, header);
    }

    pub fn entry_name(&self, pos: EntryPos) -> &[u8] {
        let len = self.entry_header(pos).name_len as usize;
        let start = pos.offset + DIR_HEADER_SIZE;
        &self.block(pos.block)[start..start + len]
    }

    /// First entry in `block` whose slack can hold a `size`-byte record.
    pub fn find_free_slot(&self, block: u32, size: usize) -> Option<EntryPos> {
        let needed = round_up(size);
        let mut offset = 0;

        while offset + DIR_HEADER_SIZE <= BLOCK_SIZE {
            let pos = EntryPos { block, offset };
            let entry = self.entry_header(pos);
            let rec_len = entry.rec_len as usize;
            if rec_len < DIR_HEADER_SIZE {
                return None;
            }
            if rec_len >= dir_entry_footprint(entry.name_len as usize) + needed {
                return Some(pos);
            }
            offset += rec_len;
        }
        None
    }

    pub fn has_free_slot(&self, block: u32, size: usize) -> bool {
        self.find_free_slot(block, size).is_some()
    }

    /// Links `child` into directory `parent` under `name`, growing the
    /// directory by a block when no existing block has room. Names longer
    /// than `NAME_MAX` are cut to that length. Bumps the child's link count.
    pub fn insert_dir_entry(&mut self, parent: u32, child: u32, file_type: u8, name: &str) -> Result<()> {
        assert!(
            self.valid_inode(parent).map_or(false, |p| p.is_dir()),
            "inode {} is not a live directory",
            parent
        );

        let name = &name.as_bytes()[..name.len().min(NAME_MAX)];
        let size = dir_entry_footprint(name.len());

        let slot = self
            .find_slot(parent, SlotTest::DirSlack(size))
            .ok_or(FsError::NoSpace)?;
        let mut block = self.read_pointer(parent, slot.loc);
        if block == 0 {
            block = self.materialize(parent, slot, BlockKind::Directory)?;
        }

        let Some(pos) = self.find_free_slot(block, size) else {
            panic!("directory block {} lost its slack", block);
        };
        let found = self.entry_header(pos);

        let new_pos = if found.inode == 0 {
            // Unused record: take it whole.
            pos
        } else {
            let own = dir_entry_footprint(found.name_len as usize);
            self.set_entry_header(
                pos,
                &DirEntryHeader {
                    rec_len: own as u16,
                    ..found
                },
            );
            EntryPos {
                block,
                offset: pos.offset + own,
            }
        };
        let rec_len = if new_pos == pos {
            found.rec_len
        } else {
            found.rec_len - (new_pos.offset - pos.offset) as u16
        };

        self.set_entry_header(
            new_pos,
            &DirEntryHeader {
                inode: child,
                rec_len,
                name_len: name.len() as u8,
                file_type,
            },
        );
        let start = new_pos.offset + DIR_HEADER_SIZE;
        self.block_mut(block)[start..start + name.len()].copy_from_slice(name);

        let clock = self.clock();
        self.update_inode(child, |n| {
            n.i_links_count += 1;
            n.i_mtime = clock;
        });
        self.update_inode(parent, |n| n.i_mtime = clock);

        debug!(
            "dir {}: entry {:?} -> inode {} at block {} offset {}",
            parent,
            String::from_utf8_lossy(name),
            child,
            block,
            new_pos.offset
        );
        Ok(())
    }

    /// Unlinks `name` from `dir`. The child's link count is left to the caller.
    ///
    /// A removed record with a predecessor in its block is absorbed into it.
    /// The first record of a block has no predecessor and keeps its span.
    pub fn remove_dir_entry(&mut self, dir: u32, name: &str) -> bool {
        let Some(hit) = self.traverse(dir, &mut Traversal::lookup(name.as_bytes())) else {
            return false;
        };
        let removed = self.entry_header(hit.entry);

        if let Some(prev) = hit.prev {
            let before = self.entry_header(prev);
            self.set_entry_header(
                prev,
                &DirEntryHeader {
                    rec_len: before.rec_len + removed.rec_len,
                    ..before
                },
            );
        }

        let start = hit.entry.offset + DIR_HEADER_SIZE;
        let len = removed.name_len as usize;
        self.block_mut(hit.entry.block)[start..start + len].fill(0);
        self.set_entry_header(
            hit.entry,
            &DirEntryHeader {
                inode: 0,
                rec_len: removed.rec_len,
                name_len: 0,
                file_type: FT_UNKNOWN,
            },
        );

        let clock = self.clock();
        self.update_inode(dir, |n| n.i_mtime = clock);
        debug!("dir {}: removed entry {:?}", dir, name);
        true
    }

    /// Names of the live entries of directory `ino`, in on-disk order.
    /// "." and ".." are included only with `all`.
    pub fn list_directory(&mut self, ino: u32, all: bool) -> Result<Vec<String>> {
        match self.valid_inode(ino) {
            Some(inode) if inode.is_dir() => {}
            Some(_) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }

        let mut names = Vec::new();
        let mut collect = |img: &mut Image, _dir: u32, pos: EntryPos| {
            let name = String::from_utf8_lossy(img.entry_name(pos)).into_owned();
            if all || (name != "." && name != "..") {
                names.push(name);
            }
        };
        self.traverse(ino, &mut Traversal::each_entry(&mut collect));
        Ok(names)
    }
}
