//! On-disk records of the ext2 image and the constants that pin its layout.
//!
//! Every record is `repr(C)` and made only of unsigned integers, so any byte
//! pattern read from the image is a valid value. Records are copied in and
//! out of the arena with [`read_struct`] / [`to_bytes`]; nothing holds a
//! pointer into the image.

/// Bytes per block.
pub const BLOCK_SIZE: usize = 1024;
/// Blocks in an image, including the boot block.
pub const BLOCK_COUNT: u32 = 128;
/// Total image size in bytes.
pub const IMAGE_SIZE: usize = BLOCK_SIZE * BLOCK_COUNT as usize;

/// Byte offset of the superblock.
pub const SB_OFFSET: usize = 1024;
/// The superblock occupies exactly one 1 KiB region.
pub const SB_SIZE: usize = 1024;
/// The single group descriptor follows the superblock.
pub const GD_OFFSET: usize = SB_OFFSET + SB_SIZE;

pub const EXT2_MAGIC: u16 = 0xEF53;

/// Inodes in the single block group.
pub const INODE_COUNT: u32 = 32;
pub const INODE_SIZE: u16 = 128;
pub const FIRST_INO: u32 = 11;
pub const ROOT_INO: u32 = 2;

/// Longest name a directory entry can carry.
pub const NAME_MAX: usize = 255;
/// Directory entry header: inode, rec_len, name_len, file_type.
pub const DIR_HEADER_SIZE: usize = 8;
pub const DIR_ALIGN: usize = 4;

/// Symlink targets shorter than this live inline in `i_block`.
pub const FAST_SYMLINK_MAX: usize = 60;

pub const N_BLOCK_PTRS: usize = 15;
pub const N_DIRECT: usize = 12;
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4;
/// 512-byte sectors per block, for `i_blocks`.
pub const SECTORS_PER_BLOCK: u32 = (BLOCK_SIZE / 512) as u32;

pub const S_IFMT: u16 = 0xF000;
pub const S_IFLNK: u16 = 0xA000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFDIR: u16 = 0x4000;

pub const FT_UNKNOWN: u8 = 0;
pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;

pub const FEATURE_INCOMPAT_FILETYPE: u32 = 0x0002;

/// Marker for records that may be copied byte-for-byte out of the image.
///
/// # Safety
/// Implementors must be `repr(C)` and contain only integer fields (or arrays
/// of them), so that every bit pattern is a valid value.
pub unsafe trait OnDisk: Copy {
    /// A record with every byte zero.
    fn zeroed() -> Self {
        read_struct(&vec![0u8; std::mem::size_of::<Self>()], 0)
    }
}

/// Copies a record out of `buf` at `offset`. Panics if it would run past the end.
pub fn read_struct<T: OnDisk>(buf: &[u8], offset: usize) -> T {
    let size = std::mem::size_of::<T>();
    let src = &buf[offset..offset + size];
    unsafe { std::ptr::read_unaligned(src.as_ptr() as *const T) }
}

/// Copies a record into `buf` at `offset`.
pub fn write_struct<T: OnDisk>(buf: &mut [u8], offset: usize, v: &T) {
    let size = std::mem::size_of::<T>();
    buf[offset..offset + size].copy_from_slice(&to_bytes(v));
}

pub fn to_bytes<T: OnDisk>(v: &T) -> Vec<u8> {
    let size = std::mem::size_of::<T>();
    let mut buf = vec![0u8; size];
    unsafe {
        std::ptr::copy_nonoverlapping(v as *const T as *const u8, buf.as_mut_ptr(), size);
    }
    buf
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Superblock {
    pub s_inodes_count: u32,
    pub s_blocks_count: u32,
    pub s_r_blocks_count: u32,
    pub s_free_blocks_count: u32,
    pub s_free_inodes_count: u32,
    pub s_first_data_block: u32,
    pub s_log_block_size: u32,
    pub s_log_frag_size: u32,
    pub s_blocks_per_group: u32,
    pub s_frags_per_group: u32,
    pub s_inodes_per_group: u32,
    pub s_mtime: u32,
    pub s_wtime: u32,
    pub s_mnt_count: u16,
    pub s_max_mnt_count: u16,
    pub s_magic: u16,
    pub s_state: u16,
    pub s_errors: u16,
    pub s_minor_rev_level: u16,
    pub s_lastcheck: u32,
    pub s_checkinterval: u32,
    pub s_creator_os: u32,
    pub s_rev_level: u32,
    pub s_def_resuid: u16,
    pub s_def_resgid: u16,
    pub s_first_ino: u32,
    pub s_inode_size: u16,
    pub s_block_group_nr: u16,
    pub s_feature_compat: u32,
    pub s_feature_incompat: u32,
    pub s_feature_ro_compat: u32,
    pub s_uuid: [u8; 16],
    pub s_volume_name: [u8; 16],
    pub s_last_mounted: [u8; 64],
    pub s_algorithm_usage_bitmap: u32,
    pub s_prealloc_blocks: u8,
    pub s_prealloc_dir_blocks: u8,
    pub s_padding1: u16,
    pub s_journal_uuid: [u8; 16],
    pub s_journal_inum: u32,
    pub s_journal_dev: u32,
    pub s_last_orphan: u32,
    pub s_hash_seed: [u32; 4],
    pub s_def_hash_version: u8,
    pub s_reserved_char_pad: u8,
    pub s_reserved_word_pad: u16,
    pub s_default_mount_opts: u32,
    pub s_first_meta_bg: u32,
    pub s_reserved: [u32; 190],
}

unsafe impl OnDisk for Superblock {}

impl Superblock {
    pub fn volume_name(&self) -> String {
        let end = self
            .s_volume_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.s_volume_name.len());
        String::from_utf8_lossy(&self.s_volume_name[..end]).into_owned()
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct GroupDesc {
    pub bg_block_bitmap: u32,
    pub bg_inode_bitmap: u32,
    pub bg_inode_table: u32,
    pub bg_free_blocks_count: u16,
    pub bg_free_inodes_count: u16,
    pub bg_used_dirs_count: u16,
    pub bg_pad: u16,
    pub bg_reserved: [u32; 3],
}

unsafe impl OnDisk for GroupDesc {}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Inode {
    pub i_mode: u16,
    pub i_uid: u16,
    pub i_size: u32,
    pub i_atime: u32,
    pub i_ctime: u32,
    pub i_mtime: u32,
    pub i_dtime: u32,
    pub i_gid: u16,
    pub i_links_count: u16,
    /// Allocated 512-byte sectors.
    pub i_blocks: u32,
    pub i_flags: u32,
    pub osd1: u32,
    pub i_block: [u32; N_BLOCK_PTRS],
    pub i_generation: u32,
    pub i_file_acl: u32,
    pub i_dir_acl: u32,
    pub i_faddr: u32,
    pub extra: [u32; 3],
}

unsafe impl OnDisk for Inode {}

/// What an inode's mode says it is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Unknown,
}

impl FileKind {
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::Unknown,
        }
    }

    /// The `file_type` tag a directory entry carries for this kind.
    pub fn dir_type(self) -> u8 {
        match self {
            FileKind::Regular => FT_REG_FILE,
            FileKind::Directory => FT_DIR,
            FileKind::Symlink => FT_SYMLINK,
            FileKind::Unknown => FT_UNKNOWN,
        }
    }
}

impl Inode {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.i_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }

    /// Created and not yet deleted. The bitmap half of validity is checked by the session.
    pub fn is_live(&self) -> bool {
        self.i_ctime > 0 && self.i_dtime == 0
    }

    /// A symlink whose target is stored in `i_block` rather than in data blocks.
    pub fn is_fast_symlink(&self) -> bool {
        self.is_symlink() && (self.i_size as usize) < FAST_SYMLINK_MAX
    }

    /// The pointer array viewed as the inline bytes of a fast symlink.
    pub fn inline_bytes(&self) -> [u8; FAST_SYMLINK_MAX] {
        let mut out = [0u8; FAST_SYMLINK_MAX];
        for (chunk, ptr) in out.chunks_exact_mut(4).zip(self.i_block.iter()) {
            chunk.copy_from_slice(&ptr.to_le_bytes());
        }
        out
    }

    pub fn set_inline_bytes(&mut self, data: &[u8]) {
        let mut raw = [0u8; FAST_SYMLINK_MAX];
        raw[..data.len()].copy_from_slice(data);
        for (ptr, chunk) in self.i_block.iter_mut().zip(raw.chunks_exact(4)) {
            *ptr = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }
}

/// Fixed header of a directory entry; the name bytes follow it.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct DirEntryHeader {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

unsafe impl OnDisk for DirEntryHeader {}

/// Bytes an entry with a name of `name_len` needs, rounded up to the entry alignment.
pub fn dir_entry_footprint(name_len: usize) -> usize {
    (DIR_HEADER_SIZE + name_len + DIR_ALIGN - 1) & !(DIR_ALIGN - 1)
}
