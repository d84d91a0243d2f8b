//! Absolute path resolution.
//!
//! Paths are walked from the root one `/`-separated token at a time. A
//! symlink met in the middle of a path is followed once: its target is
//! resolved with the link itself excluded, and any symlink met while doing so
//! is rejected. This bounds every lookup to a single dereference.

use crate::block_tree::Traversal;
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;

/// The final component of `path`, ignoring trailing slashes. `/` for the root.
///
/// `.` and `..` come back as they are. They name the walked directory or its
/// parent, so callers must not look them up as new names in the parent.
pub fn last_token(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "" } else { "/" };
    }
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

fn check_absolute(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(FsError::InvalidPath("empty path".into()));
    }
    if !path.starts_with('/') {
        return Err(FsError::InvalidPath(format!("{} is not absolute", path)));
    }
    Ok(())
}

impl Image {
    /// The entry `name` of directory `parent`. An empty name or `/` means the
    /// directory itself. `None` if `parent` is not a live directory or has no
    /// such entry.
    pub fn find_child(&mut self, parent: u32, name: &str) -> Option<u32> {
        match self.valid_inode(parent) {
            Some(p) if p.is_dir() => {}
            _ => return None,
        }
        if name.is_empty() || name == "/" {
            return Some(parent);
        }
        self.traverse(parent, &mut Traversal::lookup(name.as_bytes()))
            .map(|hit| self.entry_header(hit.entry).inode)
    }

    /// The directory that holds (or would hold) the last component of `path`.
    /// The last component itself need not exist.
    pub fn resolve_parent(&mut self, path: &str) -> Result<u32> {
        check_absolute(path)?;
        self.walk(path, None).map(|(parent, _)| parent)
    }

    /// The inode `path` names. A symlink in the last component is returned
    /// as itself, not followed.
    pub fn resolve_inode(&mut self, path: &str) -> Result<u32> {
        check_absolute(path)?;
        self.resolve_excluding(path, None)
    }

    fn resolve_excluding(&mut self, path: &str, except: Option<u32>) -> Result<u32> {
        let (_, reached) = self.walk(path, except)?;
        reached.ok_or(FsError::NotFound)
    }

    /// Walks every token of `path`. Returns the directory holding the last
    /// component and the inode that component names, if any.
    fn walk(&mut self, path: &str, except: Option<u32>) -> Result<(u32, Option<u32>)> {
        let mut curr = Some(ROOT_INO);
        let mut parent = ROOT_INO;

        for token in path.split('/').filter(|t| !t.is_empty()) {
            let Some(at) = curr else {
                return Err(FsError::NotFound);
            };
            if Some(at) == except {
                return Err(FsError::SymlinkCycle);
            }
            let inode = self.valid_inode(at).ok_or(FsError::NotFound)?;

            let dir = match inode.kind() {
                FileKind::Directory => at,
                FileKind::Symlink => {
                    if except.is_some() {
                        return Err(FsError::SymlinkCycle);
                    }
                    let target = self.read_content(at)?;
                    let target = String::from_utf8_lossy(&target).into_owned();
                    let resolved = self.resolve_excluding(&target, Some(at))?;
                    match self.valid_inode(resolved).map(|n| n.kind()) {
                        Some(FileKind::Directory) => {}
                        Some(FileKind::Symlink) => return Err(FsError::SymlinkCycle),
                        Some(_) => return Err(FsError::NotADirectory),
                        None => return Err(FsError::NotFound),
                    }
                    curr = Some(resolved);
                    resolved
                }
                _ => return Err(FsError::NotADirectory),
            };

            // "." leaves us in place and must not move the remembered parent.
            let next = self.find_child(dir, token);
            if next != curr {
                parent = dir;
                curr = next;
            }
        }
        Ok((parent, curr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{build_image, FormatOptions};

    /// /a/b/c.txt, /a/link -> /a/b, /a/loop -> /a/link
    fn tree() -> (Image, [u32; 5]) {
        let mut img = build_image(&FormatOptions {
            lost_and_found: false,
            ..FormatOptions::default()
        })
        .unwrap();
        let a = img.create_entry(ROOT_INO, 1, S_IFDIR | 0o755, "a").unwrap();
        let b = img.create_entry(a, 1, S_IFDIR | 0o755, "b").unwrap();
        let c = img.create_entry(b, 0, S_IFREG | 0o644, "c.txt").unwrap();
        let link = img.create_entry(a, 0, S_IFLNK | 0o777, "link").unwrap();
        img.write_content(link, 0, b"/a/b").unwrap();
        let looped = img.create_entry(a, 0, S_IFLNK | 0o777, "loop").unwrap();
        img.write_content(looped, 0, b"/a/link").unwrap();
        (img, [a, b, c, link, looped])
    }

    #[test]
    fn last_token_is_basename() {
        assert_eq!(last_token("/a/b/c.txt"), "c.txt");
        assert_eq!(last_token("/a/b/"), "b");
        assert_eq!(last_token("/"), "/");
        assert_eq!(last_token("//"), "/");
        assert_eq!(last_token("name"), "name");
    }

    #[test]
    fn full_paths_match_a_manual_walk() {
        let (mut img, [a, b, c, ..]) = tree();
        let manual = img
            .find_child(ROOT_INO, "a")
            .and_then(|a| img.find_child(a, "b"))
            .and_then(|b| img.find_child(b, "c.txt"));
        assert_eq!(manual, Some(c));
        assert_eq!(img.resolve_inode("/a/b/c.txt").unwrap(), c);
        assert_eq!(img.resolve_inode("/a").unwrap(), a);
        assert_eq!(img.resolve_inode("/a/b/").unwrap(), b);
        assert_eq!(img.resolve_inode("/").unwrap(), ROOT_INO);
    }

    #[test]
    fn parent_of_a_new_name_is_its_directory() {
        let (mut img, [_, b, ..]) = tree();
        assert_eq!(img.resolve_parent("/a/b/new.txt").unwrap(), b);
        assert_eq!(img.resolve_parent("/a/b/c.txt").unwrap(), b);
        assert_eq!(img.resolve_parent("/a").unwrap(), ROOT_INO);
    }

    #[test]
    fn dot_tokens_keep_the_walk_in_place() {
        let (mut img, [a, b, c, ..]) = tree();
        assert_eq!(img.resolve_inode("/a/./b/./c.txt").unwrap(), c);
        assert_eq!(img.resolve_inode("/a/b/../b/c.txt").unwrap(), c);
        assert_eq!(img.resolve_inode("/a/b/..").unwrap(), a);
        assert_eq!(img.resolve_parent("/a/./b/x").unwrap(), b);

        // A trailing "." names the directory walked so far.
        let manual = img.find_child(b, ".");
        assert_eq!(manual, Some(b));
        assert_eq!(img.resolve_inode("/a/b/.").unwrap(), b);
        assert_eq!(img.resolve_inode("/a/./b/.").unwrap(), b);
        assert_eq!(img.resolve_inode("/a/b/./").unwrap(), b);
        assert_eq!(img.resolve_inode("/.").unwrap(), ROOT_INO);
        assert_eq!(img.resolve_inode("/a/link/.").unwrap(), b);
    }

    #[test]
    fn one_symlink_is_followed() {
        let (mut img, [_, _, c, link, _]) = tree();
        assert_eq!(img.resolve_inode("/a/link/c.txt").unwrap(), c);
        // The last component is the link itself.
        assert_eq!(img.resolve_inode("/a/link").unwrap(), link);
    }

    #[test]
    fn nested_symlinks_are_rejected() {
        let (mut img, _) = tree();
        assert!(matches!(
            img.resolve_inode("/a/loop/c.txt"),
            Err(FsError::SymlinkCycle)
        ));
    }

    #[test]
    fn broken_walks_report_why() {
        let (mut img, _) = tree();
        assert!(matches!(img.resolve_inode("/nope/x"), Err(FsError::NotFound)));
        assert!(matches!(img.resolve_inode("/a/nope"), Err(FsError::NotFound)));
        assert!(matches!(
            img.resolve_inode("/a/b/c.txt/x"),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(img.resolve_inode("a/b"), Err(FsError::InvalidPath(_))));
        assert!(matches!(img.resolve_parent(""), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn find_child_of_a_file_is_none() {
        let (mut img, [_, _, c, ..]) = tree();
        assert_eq!(img.find_child(c, "x"), None);
        assert_eq!(img.find_child(ROOT_INO, ""), Some(ROOT_INO));
    }
}
