//! Concrete [`Receiver`](crate::receive::Receiver) backends (component D):
//! a local btrfs filesystem, a plain directory, a single compressed
//! archive file, a remote directory driven over SSH, and an in-memory tree
//! for export. Every backend resolves a command-relative path against the
//! dispatcher's `current_subvolume` before applying it; [`resolve_path`] is
//! the shared helper for that.

pub mod archive;
pub mod directory;
pub mod local;
pub mod memory;
pub mod posix;
pub mod progress;
pub mod ssh_directory;

use std::path::{Path, PathBuf};

use crate::receive::CurrentSubvolume;

/// Joins a command's raw path attribute against the subvolume currently
/// open for writes, yielding a path relative to the backend's destination
/// root. Paths on the wire are arbitrary byte strings; no encoding is
/// assumed, so this only goes through `OsStr`, never `str`.
pub fn resolve_path(current: Option<&CurrentSubvolume>, path: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let relative = Path::new(OsStr::from_bytes(path));
    match current {
        Some(subvol) => Path::new(OsStr::from_bytes(&subvol.path)).join(relative),
        None => relative.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn resolves_against_current_subvolume() {
        let current = CurrentSubvolume {
            path: b"vol".to_vec(),
            uuid: Uuid::new_v4(),
            ctransid: 1,
            clone_uuid: None,
            clone_ctransid: None,
        };
        let resolved = resolve_path(Some(&current), b"d/f");
        assert_eq!(resolved, PathBuf::from("vol/d/f"));
    }

    #[test]
    fn resolves_bare_when_no_current_subvolume() {
        let resolved = resolve_path(None, b"d/f");
        assert_eq!(resolved, PathBuf::from("d/f"));
    }
}
