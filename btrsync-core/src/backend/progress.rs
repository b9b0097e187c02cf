//! Per-destination progress bookkeeping shared by the directory, archive
//! and SSH-directory backends: a hidden `.btrsync` directory inside the
//! destination holding one decimal-offset file per source subvolume UUID.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Directory name, relative to a mirror root, holding progress files.
pub const PROGRESS_DIR: &str = ".btrsync";

/// Sentinel offset value written once a subvolume has been fully received.
pub const COMPLETE_MARKER: u64 = u64::MAX - 1;

pub fn progress_dir(mirror_root: &Path) -> PathBuf {
    mirror_root.join(PROGRESS_DIR)
}

pub fn progress_path(mirror_root: &Path, uuid: Uuid) -> PathBuf {
    progress_dir(mirror_root).join(uuid.to_hyphenated().to_string())
}

/// Parses a progress file's contents (plain ASCII decimal).
pub fn parse(contents: &str) -> Option<u64> {
    contents.trim().parse().ok()
}

pub fn is_complete(offset: u64) -> bool {
    offset >= COMPLETE_MARKER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_path_is_hyphenated_lowercase() {
        let uuid = Uuid::nil();
        let path = progress_path(Path::new("/mirror"), uuid);
        assert_eq!(path, Path::new("/mirror/.btrsync/00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn complete_marker_round_trips() {
        assert!(is_complete(COMPLETE_MARKER));
        assert!(!is_complete(COMPLETE_MARKER - 1));
        assert_eq!(parse(&COMPLETE_MARKER.to_string()), Some(COMPLETE_MARKER));
    }
}
