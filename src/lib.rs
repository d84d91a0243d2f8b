//! ext2img library
//!
//! Engine for reading and mutating small single-group ext2 images, shared by
//! every binary (mkfs, info, cp, ln, ls, mkdir, rm).

pub mod bitmap;
pub mod block_tree;
pub mod commands;
pub mod config;
pub mod content;
pub mod dir_entry;
pub mod error;
pub mod fs_layout;
pub mod image;
pub mod info;
pub mod inode;
pub mod logger;
pub mod mkfs;
pub mod path;

pub use error::{FsError, Result};
pub use image::Image;
