//! In-memory backend: builds an ephemeral tree with no backing storage,
//! intended for export through a user-space filesystem layer rather than
//! direct inspection. `SNAPSHOT` and `CLONE` are unsupported since there is
//! no already-received subvolume to reference; every other command
//! coalesces into a node keyed by its resolved path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::receive::{OpError, OpResult, ReceiveContext, Receiver};
use crate::sendstream::Timespec;

use super::resolve_path;

#[derive(Debug, Clone)]
pub enum NodeKind {
    Directory,
    File(Vec<u8>),
    Symlink(Vec<u8>),
    Special,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub mode: Option<u32>,
    pub uid: Option<u64>,
    pub gid: Option<u64>,
    pub xattrs: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            mode: None,
            uid: None,
            gid: None,
            xattrs: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
pub struct MemoryReceiver {
    tree: Mutex<BTreeMap<PathBuf, Node>>,
}

impl MemoryReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_file(&self, path: &Path) -> Option<Vec<u8>> {
        match &self.tree.lock().unwrap().get(path)?.kind {
            NodeKind::File(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.tree.lock().unwrap().keys().cloned().collect()
    }

    fn with_file(&self, path: PathBuf, f: impl FnOnce(&mut Vec<u8>)) {
        let mut tree = self.tree.lock().unwrap();
        let node = tree.entry(path).or_insert_with(|| Node::new(NodeKind::File(Vec::new())));
        if !matches!(node.kind, NodeKind::File(_)) {
            node.kind = NodeKind::File(Vec::new());
        }
        if let NodeKind::File(data) = &mut node.kind {
            f(data);
        }
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    async fn subvol(&self, ctx: &ReceiveContext, path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Directory));
        Ok(())
    }

    async fn snapshot(
        &self,
        _ctx: &ReceiveContext,
        _path: &[u8],
        _uuid: Uuid,
        _ctransid: u64,
        _clone_uuid: Uuid,
        _clone_ctransid: u64,
    ) -> OpResult {
        Err(OpError::Unsupported)
    }

    async fn mkfile(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::File(Vec::new())));
        Ok(())
    }

    async fn mkdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Directory));
        Ok(())
    }

    async fn mknod(&self, ctx: &ReceiveContext, path: &[u8], _mode: u32, _rdev: u64) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Special));
        Ok(())
    }

    async fn mkfifo(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Special));
        Ok(())
    }

    async fn mksock(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Special));
        Ok(())
    }

    async fn symlink(&self, ctx: &ReceiveContext, path: &[u8], _ino: u64, path_link: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().insert(full, Node::new(NodeKind::Symlink(path_link.to_vec())));
        Ok(())
    }

    async fn rename(&self, ctx: &ReceiveContext, path: &[u8], path_to: &[u8]) -> OpResult {
        let from = resolve_path(ctx.current_subvolume().as_ref(), path);
        let to = resolve_path(ctx.current_subvolume().as_ref(), path_to);
        let mut tree = self.tree.lock().unwrap();
        let moved: Vec<(PathBuf, Node)> = tree
            .iter()
            .filter(|(p, _)| p.starts_with(&from))
            .map(|(p, n)| (to.join(p.strip_prefix(&from).unwrap()), n.clone()))
            .collect();
        tree.retain(|p, _| !p.starts_with(&from));
        tree.extend(moved);
        Ok(())
    }

    async fn link(&self, ctx: &ReceiveContext, path: &[u8], path_link: &[u8]) -> OpResult {
        let target = resolve_path(ctx.current_subvolume().as_ref(), path_link);
        let new_path = resolve_path(ctx.current_subvolume().as_ref(), path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.get(&target).cloned().ok_or(OpError::Other(anyhow::anyhow!("link target not found")))?;
        tree.insert(new_path, node);
        Ok(())
    }

    async fn unlink(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().remove(&full);
        Ok(())
    }

    async fn rmdir(&self, ctx: &ReceiveContext, path: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.tree.lock().unwrap().remove(&full);
        Ok(())
    }

    async fn set_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8], data: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.entry(full).or_insert_with(|| Node::new(NodeKind::File(Vec::new())));
        node.xattrs.insert(name.to_vec(), data.to_vec());
        Ok(())
    }

    async fn remove_xattr(&self, ctx: &ReceiveContext, path: &[u8], name: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        if let Some(node) = self.tree.lock().unwrap().get_mut(&full) {
            node.xattrs.remove(name);
        }
        Ok(())
    }

    async fn write(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, data: &[u8]) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let offset = offset as usize;
        self.with_file(full, |buf| {
            if buf.len() < offset + data.len() {
                buf.resize(offset + data.len(), 0);
            }
            buf[offset..offset + data.len()].copy_from_slice(data);
        });
        Ok(())
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
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        self.with_file(full, |buf| buf.resize(size as usize, 0));
        Ok(())
    }

    async fn chmod(&self, ctx: &ReceiveContext, path: &[u8], mode: u32) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.entry(full).or_insert_with(|| Node::new(NodeKind::File(Vec::new())));
        node.mode = Some(mode);
        Ok(())
    }

    async fn chown(&self, ctx: &ReceiveContext, path: &[u8], uid: u64, gid: u64) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let mut tree = self.tree.lock().unwrap();
        let node = tree.entry(full).or_insert_with(|| Node::new(NodeKind::File(Vec::new())));
        node.uid = Some(uid);
        node.gid = Some(gid);
        Ok(())
    }

    async fn utimes(&self, _ctx: &ReceiveContext, _path: &[u8], _atime: Timespec, _mtime: Timespec, _ctime: Timespec) -> OpResult {
        Ok(())
    }

    async fn update_extent(&self, ctx: &ReceiveContext, path: &[u8], offset: u64, size: u64) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let needed = (offset + size) as usize;
        self.with_file(full, |buf| {
            if buf.len() < needed {
                buf.resize(needed, 0);
            }
        });
        Ok(())
    }

    async fn fallocate(&self, ctx: &ReceiveContext, path: &[u8], _mode: u32, offset: u64, size: u64) -> OpResult {
        let full = resolve_path(ctx.current_subvolume().as_ref(), path);
        let needed = (offset + size) as usize;
        self.with_file(full, |buf| {
            if buf.len() < needed {
                buf.resize(needed, 0);
            }
        });
        Ok(())
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receive::{process_send_stream, ReceiveContext, ReceiveOptions};
    use crate::sendstream::{Command as WireCommand, Writer};
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
    async fn write_coalesces_into_path_keyed_buffer() {
        let stream = build_stream(vec![
            WireCommand::Subvol {
                path: b"v".to_vec(),
                uuid: Uuid::new_v4(),
                ctransid: 1,
            },
            WireCommand::Mkfile { path: b"v/f".to_vec() },
            WireCommand::Write {
                path: b"v/f".to_vec(),
                offset: 0,
                data: vec![1, 2, 3],
            },
            WireCommand::Write {
                path: b"v/f".to_vec(),
                offset: 3,
                data: vec![4, 5],
            },
            WireCommand::End,
        ]);

        let receiver = Arc::new(MemoryReceiver::new());
        let options = ReceiveOptions::new(discard_logger(), receiver.clone());
        process_send_stream(stream.as_slice(), options).await.unwrap();

        assert_eq!(receiver.read_file(Path::new("v/f")), Some(vec![1, 2, 3, 4, 5]));
    }

    #[tokio::test]
    async fn snapshot_command_is_unsupported() {
        let receiver = MemoryReceiver::new();
        let options = ReceiveOptions::new(discard_logger(), Arc::new(MemoryReceiver::new()));
        let ctx = ReceiveContext::new(&options);
        let result = receiver.snapshot(&ctx, b"v2", Uuid::new_v4(), 1, Uuid::new_v4(), 1).await;
        assert!(matches!(result, Err(OpError::Unsupported)));
    }
}
