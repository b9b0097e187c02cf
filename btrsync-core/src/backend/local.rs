//! Local btrfs backend: the destination is a mounted btrfs filesystem and
//! every command maps onto a real ioctl rather than a plain POSIX call for
//! the handful of operations btrfs treats specially.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::receive::{OpError, OpResult, ReceiveContext, Receiver, ReceiverHooks};
use crate::sendstream::{Command, Timespec};
use crate::sys::btrfs::{self, EncodedWriteOp, Mount};

use super::posix;
use super::resolve_path;

const PARENT_SEARCH_ATTEMPTS: u32 = 3;
const PARENT_SEARCH_BACKOFF: Duration = Duration::from_millis(100);

fn adapter_err(e: btrfs::AdapterError) -> OpError {
    OpError::Other(e.into())
}

/// Receives directly onto a btrfs filesystem rooted at `mount`.
///
/// `force_decompress` routes `ENCODED_WRITE` through decompression and a
/// plain `WRITE` instead of the encoded-write ioctl; real deployments use
/// this only when the destination filesystem's compression profile must
/// differ from the source's.
pub struct LocalReceiver {
    mount: Mount,
    root: PathBuf,
    force_decompress: bool,
}

impl LocalReceiver {
    pub fn new(mount: Mount, root: impl Into<PathBuf>) -> Self {
        Self {
            mount,
            root: root.into(),
            force_decompress: false,
        }
    }

    pub fn with_force_decompress(mut self, force_decompress: bool) -> Self {
        self.force_decompress = force_decompress;
        self
    }

    fn full_path(&self, ctx: &ReceiveContext, path: &[u8]) -> PathBuf {
        self.root.join(resolve_path(ctx.current_subvolume().as_ref(), path))
    }

    /// Resolves the already-received subvolume whose `received_uuid` and
    /// `stransid` match the stream's clone reference, retrying transient
    /// ioctl races.
    fn find_clone_source(&self, clone_uuid: Uuid, clone_ctransid: u64) -> OpResult<PathBuf> {
        let mut last_err = None;
        for attempt in 0..PARENT_SEARCH_ATTEMPTS {
            match btrfs::build_rb_tree(&self.mount) {
                Ok(tree) => {
                    if let Some(info) = tree.by_received_uuid(clone_uuid, clone_ctransid) {
                        return Ok(info.full_path.clone());
                    }
                    last_err = Some(OpError::Other(anyhow::anyhow!(
                        "no subvolume with received-uuid {clone_uuid} / stransid {clone_ctransid}"
                    )));
                }
                Err(e) => last_err = Some(adapter_err(e)),
            }
            if attempt + 1 < PARENT_SEARCH_ATTEMPTS {
                thread::sleep(PARENT_SEARCH_BACKOFF);
            }
        }
        Err(last_err.unwrap())
    }
}

#[async_trait]
impl Receiver for LocalReceiver {
    async fn subvol(&self, ctx: &ReceiveContext, path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
        btrfs::create_subvolume(&self.full_path(ctx, path)).map_err(adapter_err)
    }

    async fn snapshot(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        _uuid: Uuid,
        _ctransid: u64,
        clone_uuid: Uuid,
        clone_ctransid: u64,
    ) -> OpResult {
        let source = self.find_clone_source(clone_uuid, clone_ctransid)?;
        let dest = self.full_path(ctx, path);
        btrfs::create_snapshot(&source, &dest, true).map_err(adapter_err)?;
        btrfs::sync_filesystem(&self.mount.mount_point).map_err(adapter_err)
    }

    async fn mkfile(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::mkfile(&self.full_path(ctx, path))
    }

    async fn mkdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::mkdir(&self.full_path(ctx, path))
    }

    async fn mknod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32, rdev: u64) -> OpResult {
        posix::mknod(&self.full_path(ctx, path), mode, rdev)
    }

    async fn mkfifo(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::mkfifo(&self.full_path(ctx, path))
    }

    async fn mksock(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::mksock(&self.full_path(ctx, path))
    }

    async fn symlink(&self, ctx: &ReceiveContext, path: &[u8], _ino: u64, path_link: &[u8]) -> OpResult {
        posix::symlink(&self.full_path(ctx, path), path_link)
    }

    async fn rename(&self, ctx: &ReceiveContext, path: &[u8], path_to: &[u8]) -> OpResult {
        posix::rename(&self.full_path(ctx, path), &self.full_path(ctx, path_to))
    }

    async fn link(&self, ctx: &ReceiveContext, path: &[u8], path_link: &[u8]) -> OpResult {
        posix::link(&self.full_path(ctx, path_link), &self.full_path(ctx, path))
    }

    async fn unlink(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::unlink(&self.full_path(ctx, path))
    }

    async fn rmdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        posix::rmdir(&self.full_path(ctx, path))
    }

    async fn set_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8], data: &[u8]) -> OpResult {
        posix::set_xattr(&self.full_path(ctx, path), name, data)
    }

    async fn remove_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8]) -> OpResult {
        posix::remove_xattr(&self.full_path(ctx, path), name)
    }

    async fn write(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, data: &[u8]) -> OpResult {
        posix::write(&self.full_path(ctx, path), offset, data)
    }

    #[allow(clippy::too_many_arguments)]
    async fn clone_range(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        offset: u64,
        len: u64,
        clone_uuid: Uuid,
        clone_ctransid: u64,
        clone_path: &[u8],
        clone_offset: u64,
    ) -> OpResult {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let source_root = self.find_clone_source(clone_uuid, clone_ctransid)?;
        let source_file = source_root.join(Path::new(OsStr::from_bytes(clone_path)));
        btrfs::clone_range(&source_file, &self.full_path(ctx, path), clone_offset, offset, len).map_err(adapter_err)
    }

    async fn truncate(&self, ctx: &ReceiveContext, path: &[u8], size: u64) -> OpResult {
        posix::truncate(&self.full_path(ctx, path), size)
    }

    async fn chmod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32) -> OpResult {
        posix::chmod(&self.full_path(ctx, path), mode)
    }

    async fn chown(&self, ctx: &ReceiveContext, path: &[u8], uid: u64, gid: u64) -> OpResult {
        posix::chown(&self.full_path(ctx, path), uid, gid)
    }

    async fn utimes(&self, ctx: &ReceiveContext, path: &[u8], atime: Timespec, mtime: Timespec, _ctime: Timespec) -> OpResult {
        posix::utimes(&self.full_path(ctx, path), atime, mtime)
    }

    async fn update_extent(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, size: u64) -> OpResult {
        posix::update_extent(&self.full_path(ctx, path), offset, size)
    }

    async fn fallocate(&self, ctx: &ReceiveContext, path: &[u8], mode: u32, offset: u64, size: u64) -> OpResult {
        posix::fallocate(&self.full_path(ctx, path), mode, offset, size)
    }

    async fn fileattr(&self, _ctx: &ReceiveContext, _path: &[u8], _attr: u64) -> OpResult {
        Err(OpError::Unsupported)
    }

    #[allow(clippy::too_many_arguments)]
    async fn encoded_write(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        offset: u64,
        unencoded_file_len: u64,
        unencoded_len: u64,
        unencoded_offset: u64,
        compression: u32,
        encryption: u32,
        data: &[u8],
    ) -> OpResult {
        if self.force_decompress {
            if encryption != 0 {
                return Err(OpError::Other(anyhow::anyhow!("encoded-write encryption is not supported")));
            }
            let plain = posix::decompress(compression, data)?;
            return self.write(ctx, path, offset, &plain).await;
        }

        let full = self.full_path(ctx, path);
        let op = EncodedWriteOp {
            offset,
            unencoded_file_len,
            unencoded_len,
            unencoded_offset,
            compression,
            encryption,
            data,
        };
        btrfs::encoded_write(&full, &op).map_err(adapter_err)
    }

    async fn enable_verity(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        algorithm: u8,
        block_size: u32,
        salt: &[u8],
        signature: &[u8],
    ) -> OpResult {
        btrfs::enable_verity(&self.full_path(ctx, path), algorithm, block_size, salt, signature).map_err(adapter_err)
    }

    async fn finish_subvolume(&self, ctx: &ReceiveContext) -> OpResult {
        let subvol = match ctx.current_subvolume() {
            Some(s) => s,
            None => return Ok(()),
        };
        let full = self.root.join(resolve_path(None, &subvol.path));
        btrfs::set_read_only(&full, false).map_err(adapter_err)?;
        btrfs::set_received(&full, subvol.uuid, subvol.ctransid).map_err(adapter_err)?;
        btrfs::set_read_only(&full, true).map_err(adapter_err)?;
        btrfs::sync_filesystem(&self.mount.mount_point).map_err(adapter_err)
    }
}

#[async_trait]
impl ReceiverHooks for LocalReceiver {
    async fn pre_op(&self, _ctx: &ReceiveContext, _command: &Command) -> OpResult {
        Ok(())
    }

    async fn post_op(&self, _ctx: &ReceiveContext, _command: &Command) -> OpResult {
        Ok(())
    }
}
