//! Front-end logic behind the `ext2_*` binaries.
//!
//! Each command validates its paths and checks every failure it can foresee
//! before the first mutation, then calls into the engine. The binaries only
//! parse arguments and hand a closure to [`run_session`].

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use clap::Args;
use log::error;

use crate::config::Config;
use crate::content::blocks_needed;
use crate::error::{FsError, Result};
use crate::fs_layout::*;
use crate::image::Image;
use crate::logger;
use crate::path::last_token;

/// Arguments every image tool takes.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Path to the ext2 image file
    pub image: PathBuf,

    /// Optional config.ini
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// More log output; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parses the command line. Usage errors exit with status 1.
pub fn parse_args<P: clap::Parser>() -> P {
    P::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(if e.use_stderr() {
            libc::EXIT_FAILURE
        } else {
            libc::EXIT_SUCCESS
        })
    })
}

/// Sets up logging, opens the image, runs `op` and closes the image.
///
/// The image is written back only when `mutates` is set and `op` succeeded.
/// Returns the process exit code: 0, the errno of the failure, or 1 when the
/// image or config could not be used at all.
pub fn run_session(args: &SessionArgs, tool: &str, mutates: bool, op: impl FnOnce(&mut Image) -> Result<()>) -> i32 {
    let cfg = match Config::load_or_default(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", tool, e);
            return libc::EXIT_FAILURE;
        }
    };
    logger::init(logger::bump(cfg.log_level, args.verbose));

    let mut img = match Image::open(&args.image) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("{}: failed to load {}: {}", tool, args.image.display(), e);
            return libc::EXIT_FAILURE;
        }
    };

    let outcome = op(&mut img);
    let code = match &outcome {
        Ok(()) => libc::EXIT_SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", tool, e);
            e.errno()
        }
    };

    if let Err(e) = img.close(mutates && outcome.is_ok()) {
        error!("closing {}: {}", args.image.display(), e);
        eprintln!("{}: failed to write {}: {}", tool, args.image.display(), e);
        return libc::EXIT_FAILURE;
    }
    code
}

fn require_absolute(path: &str) -> Result<()> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(FsError::InvalidPath(format!("{:?} must be absolute", path)));
    }
    Ok(())
}

fn require_file_path(path: &str) -> Result<()> {
    require_absolute(path)?;
    if path.ends_with('/') {
        return Err(FsError::InvalidPath(format!("{:?} must not end with /", path)));
    }
    Ok(())
}

fn check_new_name(img: &mut Image, parent: u32, name: &str) -> Result<()> {
    if let Some(existing) = img.find_child(parent, name) {
        return Err(match img.valid_inode(existing) {
            Some(n) if n.is_dir() => FsError::IsADirectory,
            _ => FsError::AlreadyExists,
        });
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

fn is_dir(img: &Image, ino: u32) -> bool {
    img.valid_inode(ino).map_or(false, |n| n.is_dir())
}

/// Copies a regular file from the host into the image.
///
/// If `target` names an existing directory the file lands inside it under the
/// source's own name; otherwise `target` is the full path of the new file.
pub fn copy_in(img: &mut Image, source: &Path, target: &str) -> Result<u32> {
    let meta = std::fs::metadata(source)
        .map_err(|e| FsError::InvalidArgument(format!("{}: {}", source.display(), e)))?;
    if !meta.is_file() {
        return Err(FsError::InvalidArgument(format!(
            "{} is not a regular file",
            source.display()
        )));
    }
    require_absolute(target)?;

    let (parent, name) = match img.resolve_inode(target) {
        Ok(ino) if is_dir(img, ino) => {
            let name = source
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| FsError::InvalidArgument(format!("{} has no usable name", source.display())))?;
            (ino, name.to_string())
        }
        Ok(_) => return Err(FsError::AlreadyExists),
        Err(FsError::NotFound) if !target.ends_with('/') => {
            (img.resolve_parent(target)?, last_token(target).to_string())
        }
        Err(e) => return Err(e),
    };
    if img.find_child(parent, &name).is_some() {
        return Err(FsError::AlreadyExists);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }

    let data = std::fs::read(source)?;
    let hint = blocks_needed(data.len());
    let mode = S_IFREG | (meta.permissions().mode() & 0o777) as u16;

    let ino = img.create_entry(parent, hint, mode, &name)?;
    img.write_content(ino, hint, &data)?;
    Ok(ino)
}

/// Creates `target` as a hard link to `source`, or as a symlink holding the
/// path `source` when `symbolic` is set.
pub fn link(img: &mut Image, source: &str, target: &str, symbolic: bool) -> Result<()> {
    require_file_path(source)?;
    require_file_path(target)?;

    let src = img.resolve_inode(source)?;
    let parent = img.resolve_parent(target)?;
    let name = last_token(target);
    check_new_name(img, parent, name)?;

    let src_inode = img.valid_inode(src).ok_or(FsError::NotFound)?;
    if src_inode.is_dir() {
        return Err(FsError::IsADirectory);
    }

    if symbolic {
        let data = source.as_bytes();
        let hint = if data.len() < FAST_SYMLINK_MAX {
            0
        } else {
            blocks_needed(data.len())
        };
        let ino = img.create_entry(parent, hint, S_IFLNK | 0o777, name)?;
        img.write_content(ino, hint, data)
    } else {
        img.add_hard_link(parent, src, src_inode.kind().dir_type(), name)
    }
}

/// What `ls` prints: the entries of a directory, or the name of anything else.
pub fn list(img: &mut Image, path: &str, all: bool) -> Result<Vec<String>> {
    require_absolute(path)?;
    let must_be_dir = path.ends_with('/');

    let ino = img.resolve_inode(path)?;

    if !is_dir(img, ino) {
        if must_be_dir {
            return Err(FsError::NotFound);
        }
        return Ok(vec![last_token(path).to_string()]);
    }
    img.list_directory(ino, all)
}

pub fn make_dir(img: &mut Image, path: &str) -> Result<u32> {
    require_absolute(path)?;
    let parent = img.resolve_parent(path)?;
    let name = last_token(path);

    if img.find_child(parent, name).is_some() {
        return Err(FsError::AlreadyExists);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    img.create_entry(parent, 1, S_IFDIR | 0o755, name)
}

/// Removes a file or link; with `recursive`, a whole directory tree.
pub fn remove(img: &mut Image, path: &str, recursive: bool) -> Result<()> {
    require_absolute(path)?;
    let parent = img.resolve_parent(path)?;
    let name = last_token(path);
    let ino = img.find_child(parent, name).ok_or(FsError::NotFound)?;

    if ino == parent || ino == ROOT_INO || name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!("cannot remove {}", path)));
    }
    if !recursive {
        if path.ends_with('/') {
            return Err(FsError::InvalidPath(format!("{:?} must not end with /", path)));
        }
        if is_dir(img, ino) {
            return Err(FsError::IsADirectory);
        }
    }
    img.remove_entry(ino, name, parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkfs::{build_image, FormatOptions};

    fn fresh() -> Image {
        build_image(&FormatOptions {
            lost_and_found: false,
            ..FormatOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn mkdir_rejects_existing_and_long_names() {
        let mut img = fresh();
        make_dir(&mut img, "/a").unwrap();
        assert!(matches!(make_dir(&mut img, "/a"), Err(FsError::AlreadyExists)));
        assert!(matches!(make_dir(&mut img, "/"), Err(FsError::AlreadyExists)));
        assert!(matches!(make_dir(&mut img, "/x/y"), Err(FsError::NotFound)));
        let long = format!("/{}", "n".repeat(NAME_MAX + 1));
        assert!(matches!(make_dir(&mut img, &long), Err(FsError::NameTooLong)));
        assert!(matches!(make_dir(&mut img, "rel"), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn ls_of_a_file_prints_its_name() {
        let mut img = fresh();
        make_dir(&mut img, "/a").unwrap();
        link(&mut img, "/a", "/a/l", true).unwrap_err();
        let f = img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "f").unwrap();
        link(&mut img, "/f", "/a/l", true).unwrap();

        assert_eq!(list(&mut img, "/a/l", false).unwrap(), vec!["l"]);
        assert!(matches!(list(&mut img, "/a/l/", false), Err(FsError::NotFound)));
        assert_eq!(list(&mut img, "/", false).unwrap(), vec!["a", "f"]);
        assert_eq!(list(&mut img, "/a/", true).unwrap(), vec![".", "..", "l"]);
        assert!(img.valid_inode(f).is_some());
    }

    #[test]
    fn ls_of_a_trailing_dot_lists_that_directory() {
        let mut img = fresh();
        make_dir(&mut img, "/a").unwrap();
        let b = make_dir(&mut img, "/a/b").unwrap();
        img.create_entry(b, 0, S_IFREG | 0o644, "inner").unwrap();

        assert_eq!(list(&mut img, "/a/b/.", false).unwrap(), vec!["inner"]);
        assert_eq!(list(&mut img, "/a/./b/.", false).unwrap(), vec!["inner"]);
        assert_eq!(list(&mut img, "/a/b/..", false).unwrap(), vec!["b"]);
    }

    #[test]
    fn hard_links_refuse_directories_and_clashes() {
        let mut img = fresh();
        make_dir(&mut img, "/d").unwrap();
        img.create_entry(ROOT_INO, 0, S_IFREG | 0o644, "f").unwrap();

        assert!(matches!(link(&mut img, "/d", "/d2", false), Err(FsError::IsADirectory)));
        assert!(matches!(link(&mut img, "/f", "/d", false), Err(FsError::IsADirectory)));
        assert!(matches!(link(&mut img, "/f", "/f", false), Err(FsError::AlreadyExists)));
        assert!(matches!(link(&mut img, "/nope", "/g", false), Err(FsError::NotFound)));
        assert!(matches!(link(&mut img, "/f", "/g/", false), Err(FsError::InvalidPath(_))));

        link(&mut img, "/f", "/d/g", false).unwrap();
        let f = img.resolve_inode("/f").unwrap();
        assert_eq!(img.resolve_inode("/d/g").unwrap(), f);
        assert_eq!(img.inode(f).i_links_count, 2);
    }

    #[test]
    fn rm_guards_special_entries() {
        let mut img = fresh();
        make_dir(&mut img, "/a").unwrap();
        make_dir(&mut img, "/a/b").unwrap();

        assert!(matches!(remove(&mut img, "/", true), Err(FsError::InvalidArgument(_))));
        assert!(matches!(remove(&mut img, "/a/.", true), Err(FsError::InvalidArgument(_))));
        assert!(matches!(remove(&mut img, "/a/b/..", true), Err(FsError::InvalidArgument(_))));
        assert!(matches!(remove(&mut img, "/a", false), Err(FsError::IsADirectory)));
        assert!(matches!(remove(&mut img, "/a/zz", false), Err(FsError::NotFound)));

        remove(&mut img, "/a", true).unwrap();
        assert!(list(&mut img, "/", false).unwrap().is_empty());
    }
}
