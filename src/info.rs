//! ext2_info: human-readable dump of an image.
//!
//! Prints the superblock and group counters, both bitmaps, every live inode
//! with its block pointers, and the raw entry chain of every directory block.
//! The goal is to check what the other tools did without reaching for hexdump.

use std::fmt::Write;

use crate::block_tree::EntryPos;
use crate::fs_layout::*;
use crate::image::Image;

fn kind_char(kind: FileKind) -> char {
    match kind {
        FileKind::Regular => 'f',
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
        FileKind::Unknown => '?',
    }
}

fn bitmap_line(count: u32, in_use: impl Fn(u32) -> bool) -> String {
    let mut line = String::new();
    for i in 1..=count {
        line.push(if in_use(i) { '1' } else { '0' });
        if i % 8 == 0 && i != count {
            line.push(' ');
        }
    }
    line
}

/// Renders the whole image. Takes `&mut` because walking pointer trees may
/// clear stale pointers; nothing else is changed.
pub fn describe(img: &mut Image) -> String {
    let mut out = String::new();
    let sb = img.superblock();
    let gd = img.group_desc();

    // ---------------------------------------------------------
    // Superblock + group
    // ---------------------------------------------------------
    let _ = writeln!(out, "====== SUPERBLOCK ======");
    let _ = writeln!(out, "Volume name:     {:?}", sb.volume_name());
    let _ = writeln!(out, "Inodes:          {} ({} free)", sb.s_inodes_count, sb.s_free_inodes_count);
    let _ = writeln!(out, "Blocks:          {} ({} free)", sb.s_blocks_count, sb.s_free_blocks_count);
    let _ = writeln!(out, "First inode:     {}", sb.s_first_ino);
    let _ = writeln!(out, "Last write:      {}", sb.s_wtime);

    let _ = writeln!(out, "\n====== BLOCK GROUP ======");
    let _ = writeln!(out, "Block bitmap:    {}", gd.bg_block_bitmap);
    let _ = writeln!(out, "Inode bitmap:    {}", gd.bg_inode_bitmap);
    let _ = writeln!(out, "Inode table:     {}", gd.bg_inode_table);
    let _ = writeln!(out, "Free blocks:     {}", gd.bg_free_blocks_count);
    let _ = writeln!(out, "Free inodes:     {}", gd.bg_free_inodes_count);
    let _ = writeln!(out, "Used dirs:       {}", gd.bg_used_dirs_count);

    // ---------------------------------------------------------
    // Bitmaps
    // ---------------------------------------------------------
    let _ = writeln!(out, "\n====== BITMAPS ======");
    let blocks = bitmap_line(sb.s_blocks_count, |i| img.block_in_use(i));
    let inodes = bitmap_line(sb.s_inodes_count, |i| img.inode_in_use(i));
    let _ = writeln!(out, "Blocks: {}", blocks);
    let _ = writeln!(out, "Inodes: {}", inodes);

    // ---------------------------------------------------------
    // Inodes
    // ---------------------------------------------------------
    let _ = writeln!(out, "\n====== INODES ======");
    let live: Vec<u32> = std::iter::once(ROOT_INO)
        .chain(sb.s_first_ino..=sb.s_inodes_count)
        .filter(|&i| img.valid_inode(i).is_some())
        .collect();

    let mut dir_blocks = Vec::new();
    for &ino in &live {
        let inode = img.inode(ino);
        let _ = writeln!(
            out,
            "[{}] type: {} size: {} links: {} blocks: {}",
            ino,
            kind_char(inode.kind()),
            inode.i_size,
            inode.i_links_count,
            inode.i_blocks
        );

        if inode.is_fast_symlink() {
            let target = String::from_utf8_lossy(&inode.inline_bytes()[..inode.i_size as usize]).into_owned();
            let _ = writeln!(out, "[{}] Inline: {:?}", ino, target);
            continue;
        }

        let leaves = img.leaf_blocks(ino);
        let list: Vec<String> = leaves.iter().map(|b| b.to_string()).collect();
        let _ = writeln!(out, "[{}] Blocks: {}", ino, list.join(" "));
        if inode.is_dir() {
            dir_blocks.extend(leaves.into_iter().map(|b| (ino, b)));
        }
    }

    // ---------------------------------------------------------
    // Directory blocks
    // ---------------------------------------------------------
    let _ = writeln!(out, "\n====== DIRECTORY BLOCKS ======");
    for (ino, block) in dir_blocks {
        let _ = writeln!(out, "DIR BLOCK {} (inode {})", block, ino);
        let mut offset = 0;
        while offset + DIR_HEADER_SIZE <= BLOCK_SIZE {
            let pos = EntryPos { block, offset };
            let h = img.entry_header(pos);
            if (h.rec_len as usize) < DIR_HEADER_SIZE {
                let _ = writeln!(out, "  <broken chain at offset {}>", offset);
                break;
            }
            let _ = writeln!(
                out,
                "  inode: {} rec_len: {} name_len: {} type: {} name: {:?}",
                h.inode,
                h.rec_len,
                h.name_len,
                h.file_type,
                String::from_utf8_lossy(img.entry_name(pos))
            );
            offset += h.rec_len as usize;
        }
    }

    out
}
