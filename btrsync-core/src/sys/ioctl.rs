//! Raw Linux btrfs ioctl structs and numbers.
//!
//! Struct layouts and ioctl numbers follow `linux/btrfs.h`; every struct is
//! `#[repr(C)]` to match the kernel ABI exactly. Command numbers are built
//! through `nix`'s `_IOC`-equivalent macros, which bit-pack
//! `(direction, magic, number, size)` the same way the kernel's `_IOC` does.

use derivative::Derivative;
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

const BTRFS_IOCTL_MAGIC: u8 = 0x94;

pub const SUBVOL_NAME_MAX: usize = 4039;
pub const VOL_NAME_MAX: usize = 255;
pub const PATH_NAME_MAX: usize = 4087;
pub const INO_LOOKUP_PATH_MAX: usize = 4080;
pub const UUID_SIZE: usize = 16;
pub const SEARCH_ARGS_BUFSIZE: usize = 4096 - size_of_search_key();

const fn size_of_search_key() -> usize {
    std::mem::size_of::<SearchKey>()
}

pub const FIRST_FREE_OBJECTID: u64 = 256;

pub const SUBVOL_RDONLY: u64 = 1 << 1;
pub const SUBVOL_SPEC_BY_ID: u64 = 1 << 4;

pub const SEND_FLAG_OMIT_STREAM_HEADER: u64 = 1 << 0;
pub const SEND_FLAG_OMIT_END_CMD: u64 = 1 << 1;
pub const SEND_FLAG_VERSION: u64 = 1 << 2;
pub const SEND_FLAG_NO_FILE_DATA: u64 = 1 << 4;
pub const SEND_FLAG_COMPRESSED: u64 = 1 << 5;

pub const ENCODED_IO_COMPRESSION_NONE: u32 = 0;
pub const ENCODED_IO_ENCRYPTION_NONE: u32 = 0;

#[derive(Debug, Copy, Clone, Default)]
#[repr(C)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u32,
}

/// `struct btrfs_ioctl_vol_args` — used by older single-name ioctls.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct VolArgs {
    pub fd: i64,
    pub name: [u8; PATH_NAME_MAX + 1],
}

impl Default for VolArgs {
    fn default() -> Self {
        Self {
            fd: 0,
            name: [0; PATH_NAME_MAX + 1],
        }
    }
}

/// `union btrfs_ioctl_vol_args_v2::__annonymous`.
#[derive(Copy, Clone)]
#[repr(C)]
pub union VolArgsV2Spec {
    pub name: [u8; SUBVOL_NAME_MAX + 1],
    pub devid: u64,
    pub subvolid: u64,
}

impl Default for VolArgsV2Spec {
    fn default() -> Self {
        Self { subvolid: 0 }
    }
}

/// `struct btrfs_ioctl_vol_args_v2` — SNAP_CREATE_V2, SNAP_DESTROY_V2, SUBVOL_CREATE_V2.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct VolArgsV2 {
    pub fd: i64,
    pub transid: u64,
    pub flags: u64,
    pub unused: [u64; 4],
    pub spec: VolArgsV2Spec,
}

/// `struct btrfs_ioctl_get_subvol_info_args`.
#[derive(Copy, Clone, Derivative)]
#[derivative(Default)]
#[repr(C)]
pub struct GetSubvolInfoArgs {
    pub treeid: u64,
    #[derivative(Default(value = "[0; VOL_NAME_MAX + 1]"))]
    pub name: [u8; VOL_NAME_MAX + 1],
    pub parent_id: u64,
    pub dirid: u64,
    pub generation: u64,
    pub flags: u64,
    pub uuid: [u8; UUID_SIZE],
    pub parent_uuid: [u8; UUID_SIZE],
    pub received_uuid: [u8; UUID_SIZE],
    pub ctransid: u64,
    pub otransid: u64,
    pub stransid: u64,
    pub rtransid: u64,
    pub ctime: Timespec,
    pub otime: Timespec,
    pub stime: Timespec,
    pub rtime: Timespec,
    pub reserved: [u64; 8],
}

/// `struct btrfs_ioctl_ino_lookup_args`.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct InoLookupArgs {
    pub treeid: u64,
    pub objectid: u64,
    pub name: [u8; INO_LOOKUP_PATH_MAX],
}

impl Default for InoLookupArgs {
    fn default() -> Self {
        Self {
            treeid: 0,
            objectid: 0,
            name: [0; INO_LOOKUP_PATH_MAX],
        }
    }
}

/// `struct btrfs_ioctl_search_key`.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct SearchKey {
    pub tree_id: u64,
    pub min_objectid: u64,
    pub max_objectid: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub min_transid: u64,
    pub max_transid: u64,
    pub min_type: u32,
    pub max_type: u32,
    pub nr_items: u32,
    pub unused: u32,
    pub unused1: u64,
    pub unused2: u64,
    pub unused3: u64,
    pub unused4: u64,
}

/// `struct btrfs_ioctl_search_args` — fixed 4096-byte ABI, key followed by a
/// flat buffer of `btrfs_ioctl_search_header` + item bytes.
#[repr(C)]
pub struct SearchArgs {
    pub key: SearchKey,
    pub buf: [u8; SEARCH_ARGS_BUFSIZE],
}

impl Default for SearchArgs {
    fn default() -> Self {
        Self {
            key: SearchKey::default(),
            buf: [0; SEARCH_ARGS_BUFSIZE],
        }
    }
}

/// `struct btrfs_ioctl_search_header` prefixing each item in `SearchArgs::buf`.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct SearchHeader {
    pub transid: u64,
    pub objectid: u64,
    pub offset: u64,
    pub item_type: u32,
    pub len: u32,
}

/// `struct btrfs_ioctl_clone_range_args`.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct CloneRangeArgs {
    pub src_fd: i64,
    pub src_offset: u64,
    pub src_length: u64,
    pub dest_offset: u64,
}

/// `struct btrfs_ioctl_received_subvol_args`.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct ReceivedSubvolArgs {
    pub uuid: [u8; UUID_SIZE],
    pub stransid: u64,
    pub rtransid: u64,
    pub stime: Timespec,
    pub rtime: Timespec,
    pub flags: u64,
    pub reserved: [u64; 16],
}

impl Default for ReceivedSubvolArgs {
    fn default() -> Self {
        Self {
            uuid: [0; UUID_SIZE],
            stransid: 0,
            rtransid: 0,
            stime: Timespec::default(),
            rtime: Timespec::default(),
            flags: 0,
            reserved: [0; 16],
        }
    }
}

/// `struct btrfs_ioctl_send_args`.
#[derive(Copy, Clone)]
#[repr(C)]
pub struct SendArgs {
    pub send_fd: i64,
    pub clone_sources_count: u64,
    pub clone_sources: *const u64,
    pub parent_root: u64,
    pub flags: u64,
    pub version: u32,
    pub reserved: [u8; 28],
}

impl Default for SendArgs {
    fn default() -> Self {
        Self {
            send_fd: 0,
            clone_sources_count: 0,
            clone_sources: std::ptr::null(),
            parent_root: 0,
            flags: 0,
            version: 0,
            reserved: [0; 28],
        }
    }
}

/// `struct btrfs_ioctl_encoded_io_args`. Only the fields this adapter uses
/// are populated by callers; the rest follow the kernel's zero defaults.
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct EncodedIoArgs {
    pub iov: *const u8,
    pub iovcnt: u64,
    pub offset: i64,
    pub flags: u64,
    pub len: u64,
    pub unencoded_len: u64,
    pub unencoded_offset: u64,
    pub compression: u32,
    pub encryption: u32,
    pub reserved: [u8; 64],
}

/// `struct fsverity_enable_arg` (generic verity ioctl, also used by btrfs).
#[derive(Copy, Clone, Default)]
#[repr(C)]
pub struct VerityEnableArg {
    pub version: u32,
    pub hash_algorithm: u32,
    pub block_size: u32,
    pub salt_size: u32,
    pub salt_ptr: u64,
    pub sig_size: u32,
    pub reserved1: u32,
    pub sig_ptr: u64,
    pub reserved2: [u64; 11],
}

ioctl_write_ptr!(snap_create_v2, BTRFS_IOCTL_MAGIC, 23, VolArgsV2);
ioctl_write_ptr!(snap_destroy_v2, BTRFS_IOCTL_MAGIC, 63, VolArgsV2);
ioctl_write_ptr!(subvol_create_v2, BTRFS_IOCTL_MAGIC, 24, VolArgsV2);
ioctl_write_ptr!(snap_destroy, BTRFS_IOCTL_MAGIC, 15, VolArgs);
ioctl_read!(subvol_get_flags, BTRFS_IOCTL_MAGIC, 25, u64);
ioctl_write_ptr!(subvol_set_flags, BTRFS_IOCTL_MAGIC, 26, u64);
ioctl_read!(get_subvol_info, BTRFS_IOCTL_MAGIC, 60, GetSubvolInfoArgs);
ioctl_readwrite!(ino_lookup, BTRFS_IOCTL_MAGIC, 18, InoLookupArgs);
ioctl_readwrite!(tree_search, BTRFS_IOCTL_MAGIC, 17, SearchArgs);
ioctl_write_ptr!(clone_range, BTRFS_IOCTL_MAGIC, 13, CloneRangeArgs);
ioctl_write_ptr!(set_received_subvol, BTRFS_IOCTL_MAGIC, 37, ReceivedSubvolArgs);
ioctl_write_ptr!(send, BTRFS_IOCTL_MAGIC, 38, SendArgs);
ioctl_readwrite!(encoded_write, BTRFS_IOCTL_MAGIC, 64, EncodedIoArgs);
ioctl_read!(sync_fs, BTRFS_IOCTL_MAGIC, 8, i64);

// FS_IOC_ENABLE_VERITY lives on the generic 'f' magic, not btrfs's 0x94.
ioctl_write_ptr!(enable_verity, b'f', 133, VerityEnableArg);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vol_args_v2_is_page_sized() {
        assert_eq!(std::mem::size_of::<VolArgsV2>(), 4096);
    }

    #[test]
    fn vol_args_is_page_sized() {
        assert_eq!(std::mem::size_of::<VolArgs>(), 4096);
    }

    #[test]
    fn ino_lookup_args_is_page_sized() {
        assert_eq!(std::mem::size_of::<InoLookupArgs>(), 4096);
    }

    #[test]
    fn search_args_is_page_sized() {
        assert_eq!(std::mem::size_of::<SearchArgs>(), 4096);
    }
}
