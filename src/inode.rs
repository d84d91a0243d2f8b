use log::{debug, info, warn};

use crate::block_tree::{EntryPos, Traversal};
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

impl Image {
    /// The inode record, if `ino` names a live inode: addressable, marked in
    /// the bitmap, created and not deleted.
    pub fn valid_inode(&self, ino: u32) -> Option<Inode> {
        if !self.is_addressable_inode(ino) || !self.inode_in_use(ino) {
            return None;
        }
        let inode = self.inode(ino);
        inode.is_live().then_some(inode)
    }

    /// Claims inode `ino`: marks it used and writes a zeroed record stamped
    /// as created now.
    pub(crate) fn init_inode(&mut self, ino: u32) {
        self.set_inode_bit(ino, true);

        let clock = self.clock();
        let mut inode = Inode::zeroed();
        inode.i_ctime = clock;
        inode.i_mtime = clock;
        inode.i_atime = clock;
        self.put_inode(ino, &inode);
        debug!("inode {} initialized", ino);
    }

    /// Frees inode `ino` and everything it owns, then stamps its deletion time.
    pub(crate) fn destroy_inode(&mut self, ino: u32) {
        let inode = self.inode(ino);

        if inode.is_fast_symlink() {
            self.update_inode(ino, |n| n.i_block = [0; N_BLOCK_PTRS]);
        } else {
            self.release_all_blocks(ino);
        }

        if inode.is_dir() {
            self.update_group_desc(|gd| gd.bg_used_dirs_count = gd.bg_used_dirs_count.saturating_sub(1));
        }

        let clock = self.clock();
        self.update_inode(ino, |n| n.i_dtime = clock);
        self.set_inode_bit(ino, false);
        debug!("inode {} destroyed", ino);
    }

    /// Creates a new inode with `mode` and links it into `parent` as `name`.
    ///
    /// `block_hint` is the number of blocks the caller is about to write and
    /// must be at least 1 for a directory. A directory also gets its "." and
    /// ".." entries. If linking fails after the inode was claimed, the inode
    /// stays allocated and the error is returned.
    pub fn create_entry(&mut self, parent: u32, block_hint: u32, mode: u16, name: &str) -> Result<u32> {
        let kind = FileKind::from_mode(mode);
        assert!(
            block_hint > 0 || kind != FileKind::Directory,
            "a directory needs at least one block"
        );

        match self.valid_inode(parent) {
            Some(p) if p.is_dir() => {}
            Some(_) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }
        if !self.has_capacity(1, block_hint) {
            return Err(FsError::NoSpace);
        }

        let ino = self.find_free_inode().ok_or(FsError::NoSpace)?;
        self.init_inode(ino);
        self.update_inode(ino, |n| n.i_mode = mode);

        self.insert_dir_entry(parent, ino, kind.dir_type(), name)?;

        if kind == FileKind::Directory {
            self.insert_dir_entry(ino, ino, FT_DIR, ".")?;
            self.insert_dir_entry(ino, parent, FT_DIR, "..")?;
            self.update_group_desc(|gd| gd.bg_used_dirs_count += 1);
        }

        info!("created {:?} {:?} as inode {} in {}", kind, name, ino, parent);
        Ok(ino)
    }

    /// Adds another name for `target` inside `parent`.
    pub fn add_hard_link(&mut self, parent: u32, target: u32, file_type: u8, name: &str) -> Result<()> {
        match self.valid_inode(parent) {
            Some(p) if p.is_dir() => {}
            Some(_) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }
        if self.valid_inode(target).is_none() {
            return Err(FsError::NotFound);
        }

        self.insert_dir_entry(parent, target, file_type, name)?;
        info!("linked inode {} as {:?} in {}", target, name, parent);
        Ok(())
    }

    /// Removes the entry `name` of `parent`, which refers to `child`.
    ///
    /// A directory is emptied first, depth first. Its "." and ".." entries
    /// are unlinked in place and only lower the link count of the inode they
    /// name. The child is destroyed if it is a directory or a symlink, or once
    /// its last link is gone.
    pub fn remove_entry(&mut self, child: u32, name: &str, parent: u32) -> Result<()> {
        let inode = self.valid_inode(child).ok_or(FsError::NotFound)?;

        if inode.is_dir() {
            let mut remove_child = |img: &mut Image, dir: u32, pos: EntryPos| {
                let target = img.entry_header(pos).inode;
                let entry = String::from_utf8_lossy(img.entry_name(pos)).into_owned();

                if entry == "." || entry == ".." {
                    img.remove_dir_entry(dir, &entry);
                    img.update_inode(target, |n| n.i_links_count = n.i_links_count.saturating_sub(1));
                } else if let Err(e) = img.remove_entry(target, &entry, dir) {
                    warn!("could not remove {:?} from directory {}: {}", entry, dir, e);
                }
            };
            self.traverse(child, &mut Traversal::each_entry(&mut remove_child));
        }

        if !self.remove_dir_entry(parent, name) {
            return Err(FsError::NotFound);
        }

        let links = self.update_inode(child, |n| {
            n.i_links_count = n.i_links_count.saturating_sub(1);
            n.i_links_count
        });
        if inode.is_symlink() || inode.is_dir() || links == 0 {
            self.destroy_inode(child);
        }

        info!("removed {:?} (inode {}) from {}", name, child, parent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{build_image, FormatOptions};

    fn empty_image() -> Image {
        build_image(&FormatOptions {
            lost_and_found: false,
            ..FormatOptions::default()
        })
        .unwrap()
    }

    fn free_counts(img: &Image) -> (u32, u32, u16) {
        let sb = img.superblock();
        (
            sb.s_free_blocks_count,
            sb.s_free_inodes_count,
            img.group_desc().bg_used_dirs_count,
        )
    }

    #[test]
    fn new_file_is_valid_and_linked_once() {
        let mut img = empty_image();
        let ino = img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "f").unwrap();
        assert_eq!(ino, FIRST_INO);
        let inode = img.valid_inode(ino).unwrap();
        assert_eq!(inode.i_links_count, 1);
        assert_eq!(inode.kind(), FileKind::Regular);
        assert_eq!(inode.i_ctime, img.clock());
    }

    #[test]
    fn new_directory_gets_dot_entries() {
        let mut img = empty_image();
        let used_dirs = img.group_desc().bg_used_dirs_count;
        let root_links = img.inode(ROOT_INO).i_links_count;

        let d = img.create_entry(ROOT_INO, 1, S_IFDIR | 0o755, "d").unwrap();

        assert_eq!(img.list_directory(d, true).unwrap(), vec![".", ".."]);
        assert_eq!(img.inode(d).i_links_count, 2);
        assert_eq!(img.inode(ROOT_INO).i_links_count, root_links + 1);
        assert_eq!(img.group_desc().bg_used_dirs_count, used_dirs + 1);
    }

    #[test]
    fn creating_under_a_file_fails() {
        let mut img = empty_image();
        let f = img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "f").unwrap();
        assert!(matches!(
            img.create_entry(f, 0, S_IFREG | 0o644, "g"),
            Err(FsError::NotADirectory)
        ));
    }

    #[test]
    fn inode_exhaustion_is_no_space() {
        let mut img = empty_image();
        let mut made = 0;
        loop {
            match img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, &format!("f{}", made)) {
                Ok(_) => made += 1,
                Err(FsError::NoSpace) => break,
                Err(e) => panic!("unexpected {}", e),
            }
        }
        assert_eq!(made, INODE_COUNT - FIRST_INO + 1);
        assert_eq!(img.superblock().s_free_inodes_count, 0);
    }

    #[test]
    fn hard_links_keep_the_inode_until_the_last_name() {
        let mut img = empty_image();
        let ino = img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "a").unwrap();
        img.add_hard_link(ROOT_INO, ino, FT_REG_FILE, "b").unwrap();
        assert_eq!(img.inode(ino).i_links_count, 2);

        img.remove_entry(ino, "a", ROOT_INO).unwrap();
        assert!(img.valid_inode(ino).is_some());
        img.remove_entry(ino, "b", ROOT_INO).unwrap();
        assert!(img.valid_inode(ino).is_none());
        assert!(!img.inode_in_use(ino));
        assert_ne!(img.inode(ino).i_dtime, 0);
    }

    #[test]
    fn recursive_removal_restores_every_counter() {
        let mut img = empty_image();
        let before = free_counts(&img);
        let root_links = img.inode(ROOT_INO).i_links_count;

        let d = img.create_entry(ROOT_INO, 1, S_IFDIR | 0o755, "d").unwrap();
        let e = img.create_entry(d, 1, S_IFDIR | 0o755, "e").unwrap();
        let f = img.create_entry(e, 3, S_IFREG | 0o644, "f").unwrap();
        img.write_content(f, 3, &[7u8; 2500]).unwrap();
        let l = img.create_entry(d, 0, S_IFLNK | 0o777, "l").unwrap();
        img.write_content(l, 0, b"/d/e/f").unwrap();
        img.add_hard_link(d, f, FT_REG_FILE, "f2").unwrap();

        img.remove_entry(d, "d", ROOT_INO).unwrap();

        assert_eq!(free_counts(&img), before);
        assert_eq!(img.inode(ROOT_INO).i_links_count, root_links);
        assert_eq!(img.count_free_blocks(), before.0);
        assert_eq!(img.count_free_inodes(), before.1);
        assert!(img.list_directory(ROOT_INO, false).unwrap().is_empty());
    }

    #[test]
    fn removing_a_symlink_clears_its_inline_target() {
        let mut img = empty_image();
        let l = img.create_entry(ROOT_INO, 0, S_IFLNK | 0o777, "l").unwrap();
        img.write_content(l, 0, b"/somewhere").unwrap();
        img.remove_entry(l, "l", ROOT_INO).unwrap();
        assert_eq!(img.inode(l).i_block, [0; N_BLOCK_PTRS]);
        assert!(img.valid_inode(l).is_none());
    }

    #[test]
    fn removing_an_unknown_name_is_not_found() {
        let mut img = empty_image();
        let ino = img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "a").unwrap();
        assert!(matches!(
            img.remove_entry(ino, "nope", ROOT_INO),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn sibling_removal_in_either_order_restores_counters() {
        let mut img = empty_image();
        let d = img.create_entry(ROOT_INO, 1, S_IFDIR | 0o755, "d").unwrap();
        let group = |img: &Image| {
            let gd = img.group_desc();
            (gd.bg_free_blocks_count as u32, gd.bg_free_inodes_count as u32)
        };

        for reverse in [false, true] {
            let before = free_counts(&img);
            let names: Vec<String> = (0..15).map(|i| format!("file{:02}", i)).collect();
            let mut inodes = Vec::new();
            for name in &names {
                let ino = img.create_entry(d, 1, S_IFREG | 0o644, name).unwrap();
                img.write_content(ino, 1, name.as_bytes()).unwrap();
                inodes.push(ino);
            }
            assert_ne!(free_counts(&img), before);

            let mut order: Vec<(u32, &String)> = inodes.into_iter().zip(&names).collect();
            if reverse {
                order.reverse();
            }
            for (ino, name) in order {
                img.remove_entry(ino, name, d).unwrap();
            }

            assert_eq!(free_counts(&img), before);
            assert_eq!(group(&img), (before.0, before.1));
            assert_eq!(img.list_directory(d, false).unwrap(), Vec::<String>::new());
        }
    }
}
