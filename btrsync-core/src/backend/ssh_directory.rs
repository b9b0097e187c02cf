//! SSH-directory backend: mirrors the plain-directory backend's semantics
//! over a remote shell rather than local syscalls. Every operation shells
//! out a single POSIX command over the session; `ssh2` is blocking, so each
//! call runs on a blocking thread.

use std::path::PathBuf;
use std::sync::Arc;

use std::sync::Mutex;

use async_trait::async_trait;
use ssh2::Session;
use uuid::Uuid;

use crate::receive::{OpError, OpResult, ReceiveContext, Receiver, ReceiverHooks};
use crate::sendstream::{Command, Timespec};

use super::progress::{self, COMPLETE_MARKER};
use super::resolve_path;

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn path_quote(path: &std::path::Path) -> String {
    shell_quote(&path.to_string_lossy())
}

pub struct SshDirectoryReceiver {
    session: Arc<Mutex<Session>>,
    root: PathBuf,
}

impl SshDirectoryReceiver {
    pub fn new(session: Session, root: impl Into<PathBuf>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            root: root.into(),
        }
    }

    fn full_path(&self, ctx: &ReceiveContext, path: &[u8]) -> PathBuf {
        self.root.join(resolve_path(ctx.current_subvolume().as_ref(), path))
    }

    /// Runs `command` in a login shell on the remote host and waits for it
    /// to exit; a non-zero exit status becomes `OpError::Other`.
    async fn run(&self, command: String) -> OpResult {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || -> OpResult {
            let session = session.lock().unwrap();
            let mut channel = session.channel_session().map_err(|e| OpError::Other(e.into()))?;
            channel.exec(&command).map_err(|e| OpError::Other(e.into()))?;
            let mut output = String::new();
            std::io::Read::read_to_string(&mut channel, &mut output).ok();
            channel.wait_close().map_err(|e| OpError::Other(e.into()))?;
            let status = channel.exit_status().map_err(|e| OpError::Other(e.into()))?;
            if status != 0 {
                return Err(OpError::Other(anyhow::anyhow!("remote command `{command}` exited {status}: {output}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| OpError::Other(e.into()))?
    }

    /// Reads the remote checkpoint file for `uuid`, if any.
    pub async fn read_checkpoint(&self, uuid: Uuid) -> Option<u64> {
        let path = progress::progress_path(&self.root, uuid);
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || -> Option<String> {
            let session = session.lock().unwrap();
            let mut channel = session.channel_session().ok()?;
            channel.exec(&format!("cat {}", path_quote(&path))).ok()?;
            let mut output = String::new();
            std::io::Read::read_to_string(&mut channel, &mut output).ok();
            channel.wait_close().ok();
            if channel.exit_status().ok() == Some(0) {
                Some(output)
            } else {
                None
            }
        })
        .await
        .ok()
        .flatten()
        .and_then(|s| progress::parse(&s))
    }

    async fn write_checkpoint(&self, uuid: Uuid, offset: u64) -> OpResult {
        let dir = progress::progress_dir(&self.root);
        let path = progress::progress_path(&self.root, uuid);
        self.run(format!("mkdir -p {} && echo {} > {}", path_quote(&dir), offset, path_quote(&path)))
            .await
    }
}

#[async_trait]
impl Receiver for SshDirectoryReceiver {
    async fn subvol(&self, ctx: &ReceiveContext, path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
        self.run(format!("mkdir -p {}", path_quote(&self.full_path(ctx, path)))).await
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
        self.run(format!("mkdir -p {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn mkfile(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        self.run(format!("touch {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn mkdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        self.run(format!("mkdir -p {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn mknod(&self, _ctx: &ReceiveContext, _path: &[u8], _mode: u32, _rdev: u64) -> OpResult {
        Err(OpError::Unsupported)
    }

    async fn mkfifo(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        self.run(format!("mkfifo {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn mksock(&self, _ctx: &ReceiveContext, _path: &[u8]) -> OpResult {
        Err(OpError::Unsupported)
    }

    async fn symlink(&self, ctx: &ReceiveContext, path: &[u8], _ino: u64, path_link: &[u8]) -> OpResult {
        let target = String::from_utf8_lossy(path_link).into_owned();
        self.run(format!("ln -s {} {}", shell_quote(&target), path_quote(&self.full_path(ctx, path))))
            .await
    }

    async fn rename(&self, ctx: &ReceiveContext, path: &[u8], path_to: &[u8]) -> OpResult {
        self.run(format!(
            "mv {} {}",
            path_quote(&self.full_path(ctx, path)),
            path_quote(&self.full_path(ctx, path_to))
        ))
        .await
    }

    async fn link(&self, ctx: &ReceiveContext, path: &[u8], path_link: &[u8]) -> OpResult {
        self.run(format!(
            "ln {} {}",
            path_quote(&self.full_path(ctx, path_link)),
            path_quote(&self.full_path(ctx, path))
        ))
        .await
    }

    async fn unlink(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        self.run(format!("rm -f {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn rmdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        self.run(format!("rmdir {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn set_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8], data: &[u8]) -> OpResult {
        let name = String::from_utf8_lossy(name).into_owned();
        let value = String::from_utf8_lossy(data).into_owned();
        self.run(format!(
            "setfattr -n {} -v {} {}",
            shell_quote(&name),
            shell_quote(&value),
            path_quote(&self.full_path(ctx, path))
        ))
        .await
    }

    async fn remove_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8]) -> OpResult {
        let name = String::from_utf8_lossy(name).into_owned();
        self.run(format!("setfattr -x {} {}", shell_quote(&name), path_quote(&self.full_path(ctx, path))))
            .await
    }

    async fn write(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, data: &[u8]) -> OpResult {
        // `dd` with a 1-byte blocksize lets `seek=` land on an arbitrary byte
        // offset without a separate truncate/extend step; `conv=notrunc`
        // keeps the rest of the file intact.
        let full = self.full_path(ctx, path);
        let session = self.session.clone();
        let command = format!("dd of={} bs=1 seek={offset} conv=notrunc status=none", path_quote(&full));
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> OpResult {
            let session = session.lock().unwrap();
            let mut channel = session.channel_session().map_err(|e| OpError::Other(e.into()))?;
            channel.exec(&command).map_err(|e| OpError::Other(e.into()))?;
            std::io::Write::write_all(&mut channel, &data).map_err(|e| OpError::Other(e.into()))?;
            channel.send_eof().map_err(|e| OpError::Other(e.into()))?;
            channel.wait_close().map_err(|e| OpError::Other(e.into()))?;
            let status = channel.exit_status().map_err(|e| OpError::Other(e.into()))?;
            if status != 0 {
                return Err(OpError::Other(anyhow::anyhow!("remote dd exited {status}")));
            }
            Ok(())
        })
        .await
        .map_err(|e| OpError::Other(e.into()))?
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
        self.run(format!("truncate -s {} {}", size, path_quote(&self.full_path(ctx, path))))
            .await
    }

    async fn chmod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32) -> OpResult {
        self.run(format!("chmod {:o} {}", mode, path_quote(&self.full_path(ctx, path)))).await
    }

    async fn chown(&self, ctx: &ReceiveContext, path: &[u8], uid: u64, gid: u64) -> OpResult {
        self.run(format!("chown {uid}:{gid} {}", path_quote(&self.full_path(ctx, path)))).await
    }

    async fn utimes(&self, ctx: &ReceiveContext, path: &[u8], atime: Timespec, _mtime: Timespec, _ctime: Timespec) -> OpResult {
        let formatted = chrono::DateTime::<chrono::Utc>::from_timestamp(atime.sec, atime.nsec as u32)
            .unwrap_or_else(chrono::Utc::now)
            .format("%Y%m%d%H%M.%S")
            .to_string();
        self.run(format!("touch -t {} {}", formatted, path_quote(&self.full_path(ctx, path))))
            .await
    }

    async fn update_extent(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, size: u64) -> OpResult {
        let needed = offset + size;
        self.run(format!(
            "test $(stat -c %s {0} 2>/dev/null || echo 0) -ge {1} || truncate -s {1} {0}",
            path_quote(&self.full_path(ctx, path)),
            needed
        ))
        .await
    }

    async fn fallocate(&self, ctx: &ReceiveContext, path: &[u8], _mode: u32, offset: u64, size: u64) -> OpResult {
        self.run(format!(
            "fallocate -o {} -l {} {}",
            offset,
            size,
            path_quote(&self.full_path(ctx, path))
        ))
        .await
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
        let plain = super::posix::decompress(compression, data)?;
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
            self.write_checkpoint(subvol.uuid, COMPLETE_MARKER).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiverHooks for SshDirectoryReceiver {
    async fn pre_op(&self, ctx: &ReceiveContext, _command: &Command) -> OpResult {
        if let Some(subvol) = ctx.current_subvolume() {
            if let Some(checkpoint) = self.read_checkpoint(subvol.uuid).await {
                if ctx.offset() < checkpoint {
                    return Err(OpError::SkipCommand);
                }
            }
        }
        Ok(())
    }

    async fn post_op(&self, ctx: &ReceiveContext, _command: &Command) -> OpResult {
        if let Some(subvol) = ctx.current_subvolume() {
            self.write_checkpoint(subvol.uuid, ctx.offset() + 1).await?;
        }
        Ok(())
    }
}
