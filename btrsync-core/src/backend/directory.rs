//! Plain-directory backend: a mirror destination on any filesystem, with no
//! btrfs-specific semantics. Subvolumes and snapshots become directories;
//! `CLONE` and `ENABLE_VERITY` are unsupported; `ENCODED_WRITE` always
//! decompresses and falls back to a plain write. Progress is tracked with
//! pre/post hooks against a `.btrsync/<uuid>` checkpoint file rather than
//! anything native-filesystem-level.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::receive::{OpError, OpResult, ReceiveContext, Receiver, ReceiverHooks};
use crate::sendstream::{Command, Timespec};

use super::posix;
use super::progress::{self, COMPLETE_MARKER};
use super::resolve_path;

pub struct DirectoryReceiver {
    root: PathBuf,
}

impl DirectoryReceiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, ctx: &ReceiveContext, path: &[u8]) -> PathBuf {
        self.root.join(resolve_path(ctx.current_subvolume().as_ref(), path))
    }

    fn checkpoint_path(&self, uuid: Uuid) -> PathBuf {
        progress::progress_path(&self.root, uuid)
    }

    pub fn read_checkpoint(&self, uuid: Uuid) -> Option<u64> {
        fs::read_to_string(self.checkpoint_path(uuid)).ok().and_then(|s| progress::parse(&s))
    }

    fn write_checkpoint(&self, uuid: Uuid, offset: u64) -> OpResult {
        let dir = progress::progress_dir(&self.root);
        fs::create_dir_all(&dir).map_err(|e| OpError::Other(e.into()))?;
        fs::write(self.checkpoint_path(uuid), offset.to_string()).map_err(|e| OpError::Other(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl Receiver for DirectoryReceiver {
    async fn subvol(&self, ctx: &ReceiveContext, path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
        posix::mkdir(&self.full_path(ctx, path))
    }

    async fn snapshot(
        &self,
        ctx: &ReceiveContext,
        path: &[u8],
        _uuid: Uuid,
        _ctransid: u64,
        _clone_uuid: Uuid,
        _clone_ctransid: u64,
    ) -> OpResult {
        posix::mkdir(&self.full_path(ctx, path))
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
        // Resume may hand us a WRITE whose preceding MKFILE was skipped;
        // posix::write open-or-creates uniformly rather than requiring the
        // file to already exist.
        posix::write(&self.full_path(ctx, path), offset, data)
    }

    async fn clone_range(
        &self,
        _ctx: &ReceiveContext,
        _path: &[u8],
        _offset: u64,
        _len: u64,
        _clone_uuid: Uuid,
        _clone_ctransid: u64,
        _clone_path: &[u8],
        _clone_offset: u64,
    ) -> OpResult {
        Err(OpError::Unsupported)
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
        _unencoded_file_len: u64,
        _unencoded_len: u64,
        _unencoded_offset: u64,
        compression: u32,
        encryption: u32,
        data: &[u8],
    ) -> OpResult {
        if encryption != 0 {
            return Err(OpError::Other(anyhow::anyhow!("encoded-write encryption is not supported")));
        }
        let plain = posix::decompress(compression, data)?;
        self.write(ctx, path, offset, &plain).await
    }

    async fn enable_verity(
        &self,
        _ctx: &ReceiveContext,
        _path: &[u8],
        _algorithm: u8,
        _block_size: u32,
        _salt: &[u8],
        _signature: &[u8],
    ) -> OpResult {
        Err(OpError::Unsupported)
    }

    async fn finish_subvolume(&self, ctx: &ReceiveContext) -> OpResult {
        if let Some(subvol) = ctx.current_subvolume() {
            self.write_checkpoint(subvol.uuid, COMPLETE_MARKER)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiverHooks for DirectoryReceiver {
    async fn pre_op(&self, ctx: &ReceiveContext, _command: &Command) -> OpResult {
        if let Some(subvol) = ctx.current_subvolume() {
            if let Some(checkpoint) = self.read_checkpoint(subvol.uuid) {
                if ctx.offset() < checkpoint {
                    return Err(OpError::SkipCommand);
                }
            }
        }
        Ok(())
    }

    async fn post_op(&self, ctx: &ReceiveContext, _command: &Command) -> OpResult {
        if let Some(subvol) = ctx.current_subvolume() {
            self.write_checkpoint(subvol.uuid, ctx.offset() + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receive::{ReceiveOptions, process_send_stream};
    use crate::sendstream::Command as WireCommand;
    use crate::sendstream::Writer;
    use std::sync::Arc;

    fn discard_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn build_stream(commands: Vec<WireCommand>) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        w.send_header().unwrap();
        for c in commands {
            w.write_command(c.command_type(), &c.to_attrs()).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn full_send_produces_directory_and_file_with_progress_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let stream = build_stream(vec![
            WireCommand::Subvol {
                path: b"v".to_vec(),
                uuid,
                ctransid: 10,
            },
            WireCommand::Mkdir { path: b"v/d".to_vec() },
            WireCommand::Mkfile { path: b"v/d/f".to_vec() },
            WireCommand::Write {
                path: b"v/d/f".to_vec(),
                offset: 0,
                data: vec![0xDE, 0xAD, 0xBE, 0xEF],
            },
            WireCommand::Chmod {
                path: b"v/d/f".to_vec(),
                mode: 0o644,
            },
            WireCommand::End,
        ]);

        let receiver = Arc::new(DirectoryReceiver::new(tmp.path()));
        let mut options = ReceiveOptions::new(discard_logger(), receiver.clone());
        options.hooks = Some(receiver.clone());
        process_send_stream(stream.as_slice(), options).await.unwrap();

        let file_path = tmp.path().join("v/d/f");
        assert_eq!(fs::read(&file_path).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(fs::metadata(&file_path).unwrap().permissions().mode() & 0o777, 0o644);

        let checkpoint = fs::read_to_string(progress::progress_path(tmp.path(), uuid)).unwrap();
        assert_eq!(progress::parse(&checkpoint), Some(COMPLETE_MARKER));
    }

    #[tokio::test]
    async fn resumed_write_tolerates_skipped_mkfile() {
        let tmp = tempfile::tempdir().unwrap();
        let uuid = Uuid::new_v4();
        fs::create_dir_all(tmp.path().join("v/d")).unwrap();
        let stream = build_stream(vec![
            WireCommand::Subvol {
                path: b"v".to_vec(),
                uuid,
                ctransid: 10,
            },
            WireCommand::Mkdir { path: b"v/d".to_vec() },
            WireCommand::Mkfile { path: b"v/d/f".to_vec() },
            WireCommand::Write {
                path: b"v/d/f".to_vec(),
                offset: 0,
                data: vec![1, 2, 3, 4],
            },
            WireCommand::Chmod {
                path: b"v/d/f".to_vec(),
                mode: 0o644,
            },
            WireCommand::End,
        ]);

        let receiver = Arc::new(DirectoryReceiver::new(tmp.path()));
        let mut options = ReceiveOptions::new(discard_logger(), receiver.clone());
        options.hooks = Some(receiver.clone());
        options.start_offset = 3;
        process_send_stream(stream.as_slice(), options).await.unwrap();

        let file_path = tmp.path().join("v/d/f");
        assert_eq!(fs::read(&file_path).unwrap(), vec![1, 2, 3, 4]);
    }
}
