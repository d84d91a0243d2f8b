//! mkfs module: builds a brand-new single-group ext2 image.
//!
//! Formatting happens in memory:
//!   1. Lay out superblock and group descriptor
//!   2. Mark metadata blocks and reserved inodes in the bitmaps
//!   3. Create the root directory (inode 2) with "." and ".."
//!   4. Optionally create `lost+found`
//!
//! `run_mkfs` then writes the finished image to disk in one go.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use log::info;

use crate::bitmap::set_bit;
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

const BLOCK_BITMAP_BLOCK: u32 = 3;
const INODE_BITMAP_BLOCK: u32 = 4;
const INODE_TABLE_BLOCK: u32 = 5;
const INODE_TABLE_BLOCKS: u32 = INODE_COUNT * INODE_SIZE as u32 / BLOCK_SIZE as u32;
/// Last block holding filesystem metadata; data starts after it.
const LAST_META_BLOCK: u32 = INODE_TABLE_BLOCK + INODE_TABLE_BLOCKS - 1;

#[derive(Clone, Debug)]
pub struct FormatOptions {
    /// Stored in the superblock; at most 16 bytes.
    pub volume_name: String,
    pub lost_and_found: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            volume_name: "ext2img".to_string(),
            lost_and_found: true,
        }
    }
}

/// Builds a formatted image in memory.
pub fn build_image(opts: &FormatOptions) -> Result<Image> {
    let name = opts.volume_name.as_bytes();
    if name.len() > 16 {
        return Err(FsError::InvalidArgument(format!(
            "volume name {:?} is longer than 16 bytes",
            opts.volume_name
        )));
    }

    let mut bytes = vec![0u8; IMAGE_SIZE];

    // ---------------------------------------------------------
    // 1) Bitmaps: metadata blocks, block-128 padding, reserved inodes
    // ---------------------------------------------------------
    let bb = BLOCK_BITMAP_BLOCK as usize * BLOCK_SIZE;
    let block_bitmap = &mut bytes[bb..bb + BLOCK_SIZE];
    for block in 1..=LAST_META_BLOCK {
        set_bit(block_bitmap, block);
    }
    set_bit(block_bitmap, BLOCK_COUNT);

    let ib = INODE_BITMAP_BLOCK as usize * BLOCK_SIZE;
    let inode_bitmap = &mut bytes[ib..ib + BLOCK_SIZE];
    for ino in (1..FIRST_INO).filter(|&i| i != ROOT_INO) {
        set_bit(inode_bitmap, ino);
    }

    let free_blocks = BLOCK_COUNT - LAST_META_BLOCK - 1;
    let free_inodes = INODE_COUNT - (FIRST_INO - 2);

    // ---------------------------------------------------------
    // 2) Superblock
    // ---------------------------------------------------------
    let mut sb = Superblock::zeroed();
    sb.s_inodes_count = INODE_COUNT;
    sb.s_blocks_count = BLOCK_COUNT;
    sb.s_free_blocks_count = free_blocks;
    sb.s_free_inodes_count = free_inodes;
    sb.s_first_data_block = 1;
    sb.s_blocks_per_group = 8 * BLOCK_SIZE as u32;
    sb.s_frags_per_group = 8 * BLOCK_SIZE as u32;
    sb.s_inodes_per_group = INODE_COUNT;
    sb.s_max_mnt_count = u16::MAX;
    sb.s_magic = EXT2_MAGIC;
    sb.s_state = 1;
    sb.s_errors = 1;
    sb.s_rev_level = 1;
    sb.s_first_ino = FIRST_INO;
    sb.s_inode_size = INODE_SIZE;
    sb.s_feature_incompat = FEATURE_INCOMPAT_FILETYPE;
    sb.s_volume_name[..name.len()].copy_from_slice(name);
    write_struct(&mut bytes, SB_OFFSET, &sb);

    // ---------------------------------------------------------
    // 3) Group descriptor
    // ---------------------------------------------------------
    let mut gd = GroupDesc::zeroed();
    gd.bg_block_bitmap = BLOCK_BITMAP_BLOCK;
    gd.bg_inode_bitmap = INODE_BITMAP_BLOCK;
    gd.bg_inode_table = INODE_TABLE_BLOCK;
    gd.bg_free_blocks_count = free_blocks as u16;
    gd.bg_free_inodes_count = free_inodes as u16;
    write_struct(&mut bytes, GD_OFFSET, &gd);

    let mut image = Image::from_bytes(bytes)?;

    // ---------------------------------------------------------
    // 4) Root directory: "." and ".." both name the root
    // ---------------------------------------------------------
    image.init_inode(ROOT_INO);
    image.update_inode(ROOT_INO, |n| n.i_mode = S_IFDIR | 0o755);
    image.insert_dir_entry(ROOT_INO, ROOT_INO, FT_DIR, ".")?;
    image.insert_dir_entry(ROOT_INO, ROOT_INO, FT_DIR, "..")?;
    image.update_group_desc(|gd| gd.bg_used_dirs_count += 1);

    // ---------------------------------------------------------
    // 5) lost+found
    // ---------------------------------------------------------
    if opts.lost_and_found {
        image.create_entry(ROOT_INO, 1, S_IFDIR | 0o700, "lost+found")?;
    }

    let clock = image.clock();
    image.update_superblock(|sb| {
        sb.s_mtime = clock;
        sb.s_wtime = clock;
        sb.s_lastcheck = clock;
    });

    info!(
        "formatted {} blocks, {} inodes, volume {:?}",
        BLOCK_COUNT, INODE_COUNT, opts.volume_name
    );
    Ok(image)
}

/// Formats a new image file at `path`, replacing whatever was there.
pub fn run_mkfs(path: impl AsRef<Path>, opts: &FormatOptions) -> Result<()> {
    let path = path.as_ref();
    let image = build_image(opts)?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(image.as_bytes())?;
    file.sync_all()?;

    info!("ext2 image created at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_blocks_are_taken() {
        let img = build_image(&FormatOptions::default()).unwrap();
        for block in 1..=LAST_META_BLOCK {
            assert!(img.block_in_use(block), "block {}", block);
        }
        assert!(img.block_in_use(BLOCK_COUNT));
        assert_eq!(LAST_META_BLOCK, 8);
    }

    #[test]
    fn counters_agree_with_bitmaps() {
        for lost_and_found in [false, true] {
            let img = build_image(&FormatOptions {
                lost_and_found,
                ..FormatOptions::default()
            })
            .unwrap();
            let sb = img.superblock();
            let gd = img.group_desc();
            assert_eq!(sb.s_free_blocks_count, img.count_free_blocks());
            assert_eq!(sb.s_free_inodes_count, img.count_free_inodes());
            assert_eq!(gd.bg_free_blocks_count as u32, sb.s_free_blocks_count);
            assert_eq!(gd.bg_free_inodes_count as u32, sb.s_free_inodes_count);
        }
    }

    #[test]
    fn bare_image_has_only_the_root() {
        let mut img = build_image(&FormatOptions {
            lost_and_found: false,
            ..FormatOptions::default()
        })
        .unwrap();
        let sb = img.superblock();
        assert_eq!(sb.s_free_blocks_count, 118);
        assert_eq!(sb.s_free_inodes_count, 22);
        assert_eq!(img.group_desc().bg_used_dirs_count, 1);

        let root = img.valid_inode(ROOT_INO).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.i_links_count, 2);
        assert_eq!(root.i_size as usize, BLOCK_SIZE);
        assert_eq!(img.resolve_inode("/").unwrap(), ROOT_INO);
        assert_eq!(img.find_child(ROOT_INO, "..").unwrap(), ROOT_INO);
    }

    #[test]
    fn lost_and_found_is_the_first_free_inode() {
        let mut img = build_image(&FormatOptions::default()).unwrap();
        assert_eq!(img.resolve_inode("/lost+found").unwrap(), FIRST_INO);
        assert_eq!(img.group_desc().bg_used_dirs_count, 2);
        assert_eq!(img.inode(ROOT_INO).i_links_count, 3);
    }

    #[test]
    fn volume_name_is_stored_and_bounded() {
        let img = build_image(&FormatOptions {
            volume_name: "scratch".into(),
            ..FormatOptions::default()
        })
        .unwrap();
        assert_eq!(img.superblock().volume_name(), "scratch");

        let too_long = FormatOptions {
            volume_name: "x".repeat(17),
            ..FormatOptions::default()
        };
        assert!(matches!(build_image(&too_long), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn written_image_opens_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        run_mkfs(&path, &FormatOptions::default()).unwrap();

        let mut img = Image::open(&path).unwrap();
        assert_eq!(img.list_directory(ROOT_INO, false).unwrap(), vec!["lost+found"]);
        img.close(false).unwrap();
    }
}
