//! Compressed-archive backend: each snapshot becomes a single opaque file
//! rather than a directory tree. This backend never sees individual send
//! commands — a higher-level manager pipes the raw stream straight into
//! [`ArchiveReceiver::write_stream`] — so it implements [`Receiver`] only to
//! stay uniform with the other backends; every per-command method keeps the
//! trait's `Unsupported` default.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::receive::{OpError, OpResult, Receiver};

use super::progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Gzip,
    Zlib,
    Zstd,
    Lzw,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Zlib => "zlib",
            ArchiveFormat::Zstd => "zstd",
            ArchiveFormat::Lzw => "lzw",
        }
    }
}

fn io_err(e: std::io::Error) -> OpError {
    OpError::Other(e.into())
}

pub struct ArchiveReceiver {
    root: PathBuf,
    format: ArchiveFormat,
}

impl ArchiveReceiver {
    pub fn new(root: impl Into<PathBuf>, format: ArchiveFormat) -> Self {
        Self { root: root.into(), format }
    }

    pub fn artifact_path(&self, snapshot_name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", snapshot_name, self.format.extension()))
    }

    pub fn is_complete(&self, uuid: Uuid) -> bool {
        progress::progress_path(&self.root, uuid).exists()
    }

    fn mark_complete(&self, uuid: Uuid) -> OpResult {
        fs::create_dir_all(progress::progress_dir(&self.root)).map_err(io_err)?;
        File::create(progress::progress_path(&self.root, uuid)).map_err(io_err)?;
        Ok(())
    }

    /// Drains `reader` (the raw send stream) through this backend's
    /// compressor into `<snapshot_name>.<format>`, then drops an empty
    /// completion marker for `uuid`. Runs on a blocking thread since every
    /// compressor here is a synchronous `Write` adapter.
    pub async fn write_stream(&self, snapshot_name: &str, uuid: Uuid, mut reader: impl Read + Send + 'static) -> OpResult {
        fs::create_dir_all(&self.root).map_err(io_err)?;
        let artifact = self.artifact_path(snapshot_name);
        let format = self.format;

        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = File::create(&artifact)?;
            match format {
                ArchiveFormat::Gzip => {
                    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
                    std::io::copy(&mut reader, &mut encoder)?;
                    encoder.finish()?;
                }
                ArchiveFormat::Zlib => {
                    let mut encoder = flate2::write::ZlibEncoder::new(file, flate2::Compression::default());
                    std::io::copy(&mut reader, &mut encoder)?;
                    encoder.finish()?;
                }
                ArchiveFormat::Zstd => {
                    let mut encoder = zstd::stream::Encoder::new(file, 0)?;
                    std::io::copy(&mut reader, &mut encoder)?;
                    encoder.finish()?;
                }
                ArchiveFormat::Lzw => {
                    let mut input = Vec::new();
                    reader.read_to_end(&mut input)?;
                    let mut output = Vec::new();
                    weezl::encode::Encoder::new(weezl::BitOrder::Msb, 8)
                        .into_vec(&mut output)
                        .encode_all(&input)
                        .status
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    let mut file = file;
                    file.write_all(&output)?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| OpError::Other(e.into()))?;

        result.map_err(io_err)?;
        self.mark_complete(uuid)
    }
}

#[async_trait]
impl Receiver for ArchiveReceiver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_stream_produces_artifact_and_completion_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let receiver = ArchiveReceiver::new(tmp.path(), ArchiveFormat::Gzip);
        let uuid = Uuid::new_v4();
        let payload = b"btrfs-stream\0payload".to_vec();

        receiver.write_stream("2024-01-01", uuid, std::io::Cursor::new(payload)).await.unwrap();

        assert!(receiver.artifact_path("2024-01-01").exists());
        assert!(receiver.is_complete(uuid));
    }

    #[test]
    fn extension_matches_format() {
        assert_eq!(ArchiveFormat::Gzip.extension(), "gzip");
        assert_eq!(ArchiveFormat::Lzw.extension(), "lzw");
    }
}
