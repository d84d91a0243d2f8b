//! Block and inode usage bitmaps.
//!
//! Both bitmaps are 1-indexed: object `i` is bit `i - 1`. Every bit flip
//! moves the superblock and group-descriptor free counters by one in the
//! same call, so the counters always equal the number of clear bits.

use log::debug;

use crate::fs_layout::BLOCK_COUNT;
use crate::image::Image;

pub fn test_bit(bm: &[u8], idx: u32) -> bool {
    let b = ((idx - 1) / 8) as usize;
    let i = ((idx - 1) % 8) as u8;
    bm[b] & (1 << i) != 0
}

pub fn set_bit(bm: &mut [u8], idx: u32) {
    let b = ((idx - 1) / 8) as usize;
    let i = ((idx - 1) % 8) as u8;
    bm[b] |= 1 << i;
}

pub fn clear_bit(bm: &mut [u8], idx: u32) {
    let b = ((idx - 1) / 8) as usize;
    let i = ((idx - 1) % 8) as u8;
    bm[b] &= !(1 << i);
}

impl Image {
    /// True iff the group has at least `inodes` free inodes and `blocks` free blocks.
    pub fn has_capacity(&self, inodes: u32, blocks: u32) -> bool {
        let gd = self.group_desc();
        gd.bg_free_inodes_count as u32 >= inodes && gd.bg_free_blocks_count as u32 >= blocks
    }

    pub fn block_in_use(&self, index: u32) -> bool {
        assert!(
            index > 0 && index <= self.superblock().s_blocks_count,
            "block {} has no bitmap bit",
            index
        );
        test_bit(self.block(self.group_desc().bg_block_bitmap), index)
    }

    pub fn inode_in_use(&self, index: u32) -> bool {
        assert!(
            index > 0 && index <= self.superblock().s_inodes_count,
            "inode {} has no bitmap bit",
            index
        );
        test_bit(self.block(self.group_desc().bg_inode_bitmap), index)
    }

    /// First free block, or `None` when the group has none left.
    pub fn find_free_block(&self) -> Option<u32> {
        if !self.has_capacity(0, 1) {
            return None;
        }
        // Bits past the end of the image are padding and always set.
        (1..BLOCK_COUNT).find(|&i| !self.block_in_use(i))
    }

    /// First free non-reserved inode, or `None` when the group has none left.
    pub fn find_free_inode(&self) -> Option<u32> {
        if !self.has_capacity(1, 0) {
            return None;
        }
        let sb = self.superblock();
        (sb.s_first_ino..=sb.s_inodes_count).find(|&i| !self.inode_in_use(i))
    }

    /// Marks a block used or free and moves both free counters.
    ///
    /// The call must be a real transition; flipping a bit to the state it is
    /// already in means the image and the caller disagree, and aborts.
    pub fn set_block_bit(&mut self, index: u32, used: bool) {
        assert_ne!(
            self.block_in_use(index),
            used,
            "block {} bitmap bit already {}",
            index,
            used
        );

        let bitmap = self.group_desc().bg_block_bitmap;
        let bm = self.block_mut(bitmap);
        if used {
            set_bit(bm, index);
        } else {
            clear_bit(bm, index);
        }

        self.update_group_desc(|gd| {
            gd.bg_free_blocks_count = if used {
                gd.bg_free_blocks_count - 1
            } else {
                gd.bg_free_blocks_count + 1
            };
        });
        self.update_superblock(|sb| {
            sb.s_free_blocks_count = if used {
                sb.s_free_blocks_count - 1
            } else {
                sb.s_free_blocks_count + 1
            };
        });
        debug!("block {} -> {}", index, if used { "used" } else { "free" });
    }

    /// Marks an inode used or free and moves both free counters.
    pub fn set_inode_bit(&mut self, index: u32, used: bool) {
        assert_ne!(
            self.inode_in_use(index),
            used,
            "inode {} bitmap bit already {}",
            index,
            used
        );

        let bitmap = self.group_desc().bg_inode_bitmap;
        let bm = self.block_mut(bitmap);
        if used {
            set_bit(bm, index);
        } else {
            clear_bit(bm, index);
        }

        self.update_group_desc(|gd| {
            gd.bg_free_inodes_count = if used {
                gd.bg_free_inodes_count - 1
            } else {
                gd.bg_free_inodes_count + 1
            };
        });
        self.update_superblock(|sb| {
            sb.s_free_inodes_count = if used {
                sb.s_free_inodes_count - 1
            } else {
                sb.s_free_inodes_count + 1
            };
        });
        debug!("inode {} -> {}", index, if used { "used" } else { "free" });
    }

    /// Clear bits in the block bitmap, counted directly.
    pub fn count_free_blocks(&self) -> u32 {
        let blocks = self.superblock().s_blocks_count;
        (1..=blocks).filter(|&i| !self.block_in_use(i)).count() as u32
    }

    /// Clear bits in the inode bitmap, counted directly.
    pub fn count_free_inodes(&self) -> u32 {
        let inodes = self.superblock().s_inodes_count;
        (1..=inodes).filter(|&i| !self.inode_in_use(i)).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{build_image, FormatOptions};

    fn counters(img: &Image) -> (u32, u32, u16, u16) {
        let sb = img.superblock();
        let gd = img.group_desc();
        (
            sb.s_free_blocks_count,
            sb.s_free_inodes_count,
            gd.bg_free_blocks_count,
            gd.bg_free_inodes_count,
        )
    }

    #[test]
    fn bits_are_one_indexed() {
        let mut bm = [0u8; 2];
        set_bit(&mut bm, 1);
        set_bit(&mut bm, 9);
        assert_eq!(bm, [0b1, 0b1]);
        assert!(test_bit(&bm, 9));
        clear_bit(&mut bm, 1);
        assert!(!test_bit(&bm, 1));
    }

    #[test]
    fn set_then_clear_restores_bit_and_counters() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        for i in 1..BLOCK_COUNT {
            if img.block_in_use(i) {
                continue;
            }
            let before = counters(&img);
            img.set_block_bit(i, true);
            assert!(img.block_in_use(i));
            assert_eq!(counters(&img).0, before.0 - 1);
            img.set_block_bit(i, false);
            assert!(!img.block_in_use(i));
            assert_eq!(counters(&img), before);
        }
    }

    #[test]
    fn counters_match_clear_bits() {
        let img = build_image(&FormatOptions::default()).unwrap();
        let (sb_blocks, sb_inodes, gd_blocks, gd_inodes) = counters(&img);
        assert_eq!(sb_blocks, img.count_free_blocks());
        assert_eq!(sb_inodes, img.count_free_inodes());
        assert_eq!(gd_blocks as u32, sb_blocks);
        assert_eq!(gd_inodes as u32, sb_inodes);
    }

    #[test]
    fn free_inode_search_skips_reserved() {
        let img = build_image(&FormatOptions {
            lost_and_found: false,
            ..FormatOptions::default()
        })
        .unwrap();
        assert_eq!(img.find_free_inode(), Some(11));
    }

    #[test]
    fn exhausted_group_finds_nothing() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        while let Some(b) = img.find_free_block() {
            img.set_block_bit(b, true);
        }
        assert_eq!(img.group_desc().bg_free_blocks_count, 0);
        assert!(!img.has_capacity(0, 1));
    }

    #[test]
    #[should_panic]
    fn double_allocation_aborts() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        let b = img.find_free_block().unwrap();
        img.set_block_bit(b, true);
        img.set_block_bit(b, true);
    }
}
