use async_trait::async_trait;
use uuid::Uuid;

use crate::sendstream::Timespec;

use super::context::ReceiveContext;
use super::error::{OpError, OpResult};

/// One method per send command (minus END, which the dispatcher handles
/// directly as subvolume finalization) plus `finish_subvolume`. Backends
/// implement this against whatever storage they represent: a real btrfs
/// filesystem, a plain directory, a compressed archive, a remote shell.
///
/// Default bodies return [`OpError::Unsupported`] so a backend only has to
/// implement the subset of commands it can actually perform.
#[async_trait]
pub trait Receiver: Send + Sync {
    async fn subvol(&self, ctx: &ReceiveContext, path: &[u8], uuid: Uuid, ctransid: u64) -> OpResult {
        let _ = (ctx, path, uuid, ctransid);
        Err(OpError::Unsupported)
    }

    async fn snapshot(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        uuid: Uuid,
        ctransid: u64,
        clone_uuid: Uuid,
        clone_ctransid: u64,
    ) -> OpResult {
        let _ = (ctx, path, uuid, ctransid, clone_uuid, clone_ctransid);
        Err(OpError::Unsupported)
    }

    async fn mkfile(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn mkdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn mknod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32, rdev: u64) -> OpResult {
        let _ = (ctx, path, mode, rdev);
        Err(OpError::Unsupported)
    }

    async fn mkfifo(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn mksock(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn symlink(&self, ctx: &ReceiveContext, path: &[u8], ino: u64, path_link: &[u8]) -> OpResult {
        let _ = (ctx, path, ino, path_link);
        Err(OpError::Unsupported)
    }

    async fn rename(&self, ctx: &ReceiveContext, path: &[u8], path_to: &[u8]) -> OpResult {
        let _ = (ctx, path, path_to);
        Err(OpError::Unsupported)
    }

    async fn link(&self, ctx: &ReceiveContext, path: &[u8], path_link: &[u8]) -> OpResult {
        let _ = (ctx, path, path_link);
        Err(OpError::Unsupported)
    }

    async fn unlink(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn rmdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let _ = (ctx, path);
        Err(OpError::Unsupported)
    }

    async fn set_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8], data: &[u8]) -> OpResult {
        let _ = (ctx, path, name, data);
        Err(OpError::Unsupported)
    }

    async fn remove_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8]) -> OpResult {
        let _ = (ctx, path, name);
        Err(OpError::Unsupported)
    }

    async fn write(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, data: &[u8]) -> OpResult {
        let _ = (ctx, path, offset, data);
        Err(OpError::Unsupported)
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
        let _ = (ctx, path, offset, len, clone_uuid, clone_ctransid, clone_path, clone_offset);
        Err(OpError::Unsupported)
    }

    async fn truncate(&self, ctx: &ReceiveContext, path: &[u8], size: u64) -> OpResult {
        let _ = (ctx, path, size);
        Err(OpError::Unsupported)
    }

    async fn chmod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32) -> OpResult {
        let _ = (ctx, path, mode);
        Err(OpError::Unsupported)
    }

    async fn chown(&self, ctx: &ReceiveContext, path: &[u8], uid: u64, gid: u64) -> OpResult {
        let _ = (ctx, path, uid, gid);
        Err(OpError::Unsupported)
    }

    async fn utimes(&self, ctx: &ReceiveContext, path: &[u8], atime: Timespec, mtime: Timespec, ctime: Timespec) -> OpResult {
        let _ = (ctx, path, atime, mtime, ctime);
        Err(OpError::Unsupported)
    }

    async fn update_extent(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, size: u64) -> OpResult {
        let _ = (ctx, path, offset, size);
        Err(OpError::Unsupported)
    }

    async fn fallocate(&self, ctx: &ReceiveContext, path: &[u8], mode: u32, offset: u64, size: u64) -> OpResult {
        let _ = (ctx, path, mode, offset, size);
        Err(OpError::Unsupported)
    }

    async fn fileattr(&self, ctx: &ReceiveContext, path: &[u8], attr: u64) -> OpResult {
        let _ = (ctx, path, attr);
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
        let _ = (
            ctx,
            path,
            offset,
            unencoded_file_len,
            unencoded_len,
            unencoded_offset,
            compression,
            encryption,
            data,
        );
        Err(OpError::Unsupported)
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
        let _ = (ctx, path, algorithm, block_size, salt, signature);
        Err(OpError::Unsupported)
    }

    /// Called when a subvolume started by `subvol`/`snapshot` is complete:
    /// either another SUBVOL/SNAPSHOT follows, END is honored, or the
    /// stream terminates. Backends that track received-UUID/ctransid or a
    /// checkpoint offset do their bookkeeping here.
    async fn finish_subvolume(&self, ctx: &ReceiveContext) -> OpResult {
        let _ = ctx;
        Ok(())
    }
}

/// Extended hook interface for backends that need to observe every command
/// before/after dispatch (checkpointing, resume skip). Separate from
/// [`Receiver`] so simple backends don't have to implement no-op hooks.
#[async_trait]
pub trait ReceiverHooks: Send + Sync {
    /// Called before dispatch. Returning `Err(OpError::SkipCommand)`
    /// suppresses the operation entirely with no error accounting.
    async fn pre_op(&self, ctx: &ReceiveContext, command: &crate::sendstream::Command) -> OpResult {
        let _ = (ctx, command);
        Ok(())
    }

    /// Called after a dispatched operation completes (successfully or
    /// not). Same error semantics as `pre_op`.
    async fn post_op(&self, ctx: &ReceiveContext, command: &crate::sendstream::Command) -> OpResult {
        let _ = (ctx, command);
        Ok(())
    }
}

/// A receiver that implements nothing; every command is `Unsupported`.
/// The default when a caller supplies no receiver implementation.
pub struct NoopReceiver;

#[async_trait]
impl Receiver for NoopReceiver {}

#[async_trait]
impl ReceiverHooks for NoopReceiver {}
