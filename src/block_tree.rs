//! Walking an inode's 15 block pointers.
//!
//! Slots 0..12 point straight at data blocks. Slots 12, 13 and 14 head trees
//! of indirection depth 1, 2 and 3: at depth `d > 0` a block is an array of
//! `PTRS_PER_BLOCK` pointers to depth `d - 1`. Pointers are prefix-packed, so
//! the first zero pointer ends the meaningful part of any array.

use log::{debug, warn};

use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

/// Indirection depth below inode pointer `slot`.
pub fn slot_depth(slot: usize) -> u32 {
    if slot < N_DIRECT {
        0
    } else {
        (slot - N_DIRECT + 1) as u32
    }
}

/// Location of one directory entry: the leaf block and the byte offset in it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntryPos {
    pub block: u32,
    pub offset: usize,
}

/// A matching entry and the entry just before it in the same block, if any.
#[derive(Copy, Clone, Debug)]
pub struct Hit {
    pub entry: EntryPos,
    pub prev: Option<EntryPos>,
}

/// Where a block pointer is stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerLoc {
    Inode(usize),
    Indirect { block: u32, slot: usize },
}

/// A pointer whose subtree satisfied a [`SlotTest`], with the number of index
/// levels that still hang below it.
#[derive(Copy, Clone, Debug)]
pub struct FreeSlot {
    pub loc: PointerLoc,
    pub depth: u32,
}

/// What a free-slot search is looking for.
#[derive(Copy, Clone, Debug)]
pub enum SlotTest {
    /// An empty pointer, to grow the inode by one block.
    Unallocated,
    /// An empty pointer, or a leaf directory block with room for an entry of this size.
    DirSlack(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Data,
    Directory,
    Index,
}

pub type BlockVisitor<'a> = &'a mut dyn FnMut(&mut Image, u32);
/// Called with the directory being walked and a live entry in it.
pub type EntryVisitor<'a> = &'a mut dyn FnMut(&mut Image, u32, EntryPos);

/// What one walk over an inode's pointer tree does.
#[derive(Default)]
pub struct Traversal<'a> {
    /// Called once per leaf block reached.
    pub on_block: Option<BlockVisitor<'a>>,
    /// Free every block reached, leaves first, then the index blocks above them.
    pub release_blocks: bool,
    /// Only entries with exactly this name match.
    pub name: Option<&'a [u8]>,
    /// Called for every matching live entry. Without it the walk stops at the
    /// first match and returns it.
    pub on_entry: Option<EntryVisitor<'a>>,
}

impl<'a> Traversal<'a> {
    pub fn lookup(name: &'a [u8]) -> Self {
        Traversal {
            name: Some(name),
            ..Default::default()
        }
    }

    pub fn each_entry(visitor: EntryVisitor<'a>) -> Self {
        Traversal {
            on_entry: Some(visitor),
            ..Default::default()
        }
    }

    pub fn each_block(visitor: BlockVisitor<'a>) -> Self {
        Traversal {
            on_block: Some(visitor),
            ..Default::default()
        }
    }

    pub fn release() -> Self {
        Traversal {
            release_blocks: true,
            ..Default::default()
        }
    }
}

impl Image {
    /// Walks every pointer group of `ino` in order, stopping at the first zero
    /// top-level pointer. Returns the first match of a name lookup.
    pub fn traverse(&mut self, ino: u32, t: &mut Traversal<'_>) -> Option<Hit> {
        let is_dir = self.inode(ino).is_dir();

        for slot in 0..N_BLOCK_PTRS {
            let ptr = self.inode(ino).i_block[slot];
            if ptr == 0 {
                break;
            }
            if let Some(hit) = self.traverse_block(ino, is_dir, ptr, slot_depth(slot), t) {
                return Some(hit);
            }
        }
        None
    }

    fn traverse_block(
        &mut self,
        ino: u32,
        is_dir: bool,
        block: u32,
        depth: u32,
        t: &mut Traversal<'_>,
    ) -> Option<Hit> {
        if !self.block_in_use(block) {
            warn!("inode {} points at unallocated block {}", ino, block);
            return None;
        }

        if depth == 0 {
            if let Some(f) = t.on_block.as_deref_mut() {
                f(self, block);
            }
            if t.release_blocks {
                self.release_block(ino, block);
                return None;
            }
            if is_dir && (t.name.is_some() || t.on_entry.is_some()) {
                return self.scan_entries(ino, block, t);
            }
            return None;
        }

        for i in 0..PTRS_PER_BLOCK {
            let ptr = self.pointer_at(block, i);
            if ptr == 0 {
                break;
            }
            if let Some(hit) = self.traverse_block(ino, is_dir, ptr, depth - 1, t) {
                return Some(hit);
            }
        }

        if t.release_blocks {
            self.release_block(ino, block);
        }
        None
    }

    /// Scans one leaf directory block entry by entry.
    fn scan_entries(&mut self, dir: u32, block: u32, t: &mut Traversal<'_>) -> Option<Hit> {
        let mut offset = 0;
        let mut prev = None;

        while offset + DIR_HEADER_SIZE <= BLOCK_SIZE {
            let pos = EntryPos { block, offset };
            let entry = self.entry_header(pos);
            let mut span = entry.rec_len as usize;

            if span < DIR_HEADER_SIZE + entry.name_len as usize || offset + span > BLOCK_SIZE {
                // Wiped or never written; nothing past here can be trusted.
                debug!("block {}: no record at offset {}", block, offset);
                return None;
            }

            let live = entry.inode != 0 && self.valid_inode(entry.inode).is_some();
            if live && t.name.map_or(true, |n| self.entry_name(pos) == n) {
                match t.on_entry.as_deref_mut() {
                    Some(f) => f(self, dir, pos),
                    None => return Some(Hit { entry: pos, prev }),
                }
            }

            // The visitor may have rewritten this entry.
            let rec_len = self.entry_header(pos).rec_len as usize;
            if rec_len > 0 {
                span = rec_len;
                prev = Some(pos);
            }
            offset += span;
        }
        None
    }

    /// Leaf blocks of `ino` in logical order.
    pub fn leaf_blocks(&mut self, ino: u32) -> Vec<u32> {
        let mut leaves = Vec::new();
        let mut push = |_: &mut Image, block: u32| leaves.push(block);
        self.traverse(ino, &mut Traversal::each_block(&mut push));
        leaves
    }

    /* ---------------- POINTER SLOTS ---------------- */

    pub fn read_pointer(&self, ino: u32, loc: PointerLoc) -> u32 {
        match loc {
            PointerLoc::Inode(slot) => self.inode(ino).i_block[slot],
            PointerLoc::Indirect { block, slot } => self.pointer_at(block, slot),
        }
    }

    pub(crate) fn write_pointer(&mut self, ino: u32, loc: PointerLoc, value: u32) {
        match loc {
            PointerLoc::Inode(slot) => self.update_inode(ino, |n| n.i_block[slot] = value),
            PointerLoc::Indirect { block, slot } => self.set_pointer_at(block, slot, value),
        }
    }

    /// First pointer slot of `ino` whose subtree passes `test`. Allocates nothing;
    /// if the returned slot is empty the caller must [`materialize`](Self::materialize) it.
    pub fn find_slot(&mut self, ino: u32, test: SlotTest) -> Option<FreeSlot> {
        (0..N_BLOCK_PTRS).find_map(|slot| self.probe(ino, PointerLoc::Inode(slot), slot_depth(slot), test))
    }

    fn probe(&mut self, ino: u32, loc: PointerLoc, depth: u32, test: SlotTest) -> Option<FreeSlot> {
        let mut ptr = self.read_pointer(ino, loc);
        if ptr != 0 && !self.block_in_use(ptr) {
            warn!("inode {}: clearing pointer to unallocated block {}", ino, ptr);
            self.write_pointer(ino, loc, 0);
            ptr = 0;
        }

        if ptr == 0 {
            return Some(FreeSlot { loc, depth });
        }

        if depth == 0 {
            return match test {
                SlotTest::DirSlack(size) if self.has_free_slot(ptr, size) => {
                    Some(FreeSlot { loc, depth })
                }
                _ => None,
            };
        }

        (0..PTRS_PER_BLOCK).find_map(|slot| {
            self.probe(ino, PointerLoc::Indirect { block: ptr, slot }, depth - 1, test)
        })
    }

    /// Fills an empty slot: allocates the missing index blocks down to the
    /// leaf, then the leaf itself. Capacity for all of them is checked first,
    /// so on `NoSpace` nothing has been allocated.
    pub fn materialize(&mut self, ino: u32, slot: FreeSlot, kind: BlockKind) -> Result<u32> {
        assert_eq!(self.read_pointer(ino, slot.loc), 0, "slot already populated");

        if !self.has_capacity(0, slot.depth + 1) {
            return Err(FsError::NoSpace);
        }

        let mut loc = slot.loc;
        for _ in 0..slot.depth {
            let index_block = self.claim_block(ino, BlockKind::Index)?;
            self.write_pointer(ino, loc, index_block);
            loc = PointerLoc::Indirect {
                block: index_block,
                slot: 0,
            };
        }

        let leaf = self.claim_block(ino, kind)?;
        self.write_pointer(ino, loc, leaf);
        Ok(leaf)
    }

    /// Adds one block of `kind` at the end of `ino`'s pointer tree.
    pub fn grow(&mut self, ino: u32, kind: BlockKind) -> Result<u32> {
        let slot = self
            .find_slot(ino, SlotTest::Unallocated)
            .ok_or(FsError::NoSpace)?;
        self.materialize(ino, slot, kind)
    }

    /* ---------------- BLOCK OWNERSHIP ---------------- */

    /// Takes a free block for `ino`: zero-filled, marked used, counted in
    /// `i_blocks`. A directory block starts as one empty entry spanning it,
    /// and grows the directory's size by a block.
    pub(crate) fn claim_block(&mut self, ino: u32, kind: BlockKind) -> Result<u32> {
        let block = self.find_free_block().ok_or(FsError::NoSpace)?;

        self.block_mut(block).fill(0);
        self.set_block_bit(block, true);

        let clock = self.clock();
        self.update_inode(ino, |n| {
            n.i_blocks += SECTORS_PER_BLOCK;
            n.i_mtime = clock;
            if kind == BlockKind::Directory {
                n.i_size += BLOCK_SIZE as u32;
            }
        });

        if kind == BlockKind::Directory {
            self.set_entry_header(
                EntryPos { block, offset: 0 },
                &DirEntryHeader {
                    inode: 0,
                    rec_len: BLOCK_SIZE as u16,
                    name_len: 0,
                    file_type: FT_UNKNOWN,
                },
            );
        }

        debug!("inode {}: claimed {:?} block {}", ino, kind, block);
        Ok(block)
    }

    /// Zero-fills a block of `ino` and marks it free.
    pub(crate) fn release_block(&mut self, ino: u32, block: u32) {
        self.block_mut(block).fill(0);
        self.set_block_bit(block, false);

        let clock = self.clock();
        self.update_inode(ino, |n| {
            n.i_blocks = n.i_blocks.saturating_sub(SECTORS_PER_BLOCK);
            n.i_mtime = clock;
        });
        debug!("inode {}: released block {}", ino, block);
    }

    /// Frees every data and index block of `ino` and empties its pointer array.
    pub(crate) fn release_all_blocks(&mut self, ino: u32) {
        self.traverse(ino, &mut Traversal::release());
        self.update_inode(ino, |n| n.i_block = [0; N_BLOCK_PTRS]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{build_image, FormatOptions};

    fn scratch_file(img: &mut Image) -> u32 {
        img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "scratch").unwrap()
    }

    #[test]
    fn depths_follow_the_slot_groups() {
        assert_eq!(slot_depth(0), 0);
        assert_eq!(slot_depth(11), 0);
        assert_eq!(slot_depth(12), 1);
        assert_eq!(slot_depth(13), 2);
        assert_eq!(slot_depth(14), 3);
    }

    #[test]
    fn growth_fills_direct_slots_then_indirects() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        let ino = scratch_file(&mut img);
        let free_before = img.superblock().s_free_blocks_count;

        for _ in 0..N_DIRECT {
            img.grow(ino, BlockKind::Data).unwrap();
        }
        assert!(img.inode(ino).i_block[..N_DIRECT].iter().all(|&b| b != 0));
        assert_eq!(img.inode(ino).i_block[N_DIRECT], 0);

        // The thirteenth block brings a single-indirect block with it.
        let leaf = img.grow(ino, BlockKind::Data).unwrap();
        let index = img.inode(ino).i_block[N_DIRECT];
        assert_ne!(index, 0);
        assert_eq!(img.pointer_at(index, 0), leaf);
        assert_eq!(img.superblock().s_free_blocks_count, free_before - 14);
        assert_eq!(img.leaf_blocks(ino).len(), 13);
        assert_eq!(img.inode(ino).i_blocks, 14 * SECTORS_PER_BLOCK);
    }

    #[test]
    fn release_frees_index_blocks_too() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        let ino = scratch_file(&mut img);
        let free_before = img.superblock().s_free_blocks_count;

        for _ in 0..20 {
            img.grow(ino, BlockKind::Data).unwrap();
        }
        img.release_all_blocks(ino);

        assert_eq!(img.superblock().s_free_blocks_count, free_before);
        assert_eq!(img.inode(ino).i_block, [0; N_BLOCK_PTRS]);
        assert_eq!(img.inode(ino).i_blocks, 0);
    }

    #[test]
    fn materialize_allocates_nothing_without_room() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        let ino = scratch_file(&mut img);
        for _ in 0..N_DIRECT {
            img.grow(ino, BlockKind::Data).unwrap();
        }
        // Leave exactly one free block: not enough for index + leaf.
        while img.group_desc().bg_free_blocks_count > 1 {
            let b = img.find_free_block().unwrap();
            img.set_block_bit(b, true);
        }
        assert!(matches!(img.grow(ino, BlockKind::Data), Err(FsError::NoSpace)));
        assert_eq!(img.group_desc().bg_free_blocks_count, 1);
        assert_eq!(img.inode(ino).i_block[N_DIRECT], 0);
    }

    #[test]
    fn stale_pointers_are_treated_as_empty() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        let ino = scratch_file(&mut img);
        let b = img.grow(ino, BlockKind::Data).unwrap();
        img.set_block_bit(b, false);

        let slot = img.find_slot(ino, SlotTest::Unallocated).unwrap();
        assert_eq!(slot.loc, PointerLoc::Inode(0));
        assert_eq!(img.inode(ino).i_block[0], 0);
    }
}
