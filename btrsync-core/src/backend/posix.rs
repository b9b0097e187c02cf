//! POSIX file operations shared by the directory and local-btrfs backends.
//! Btrfs subvolumes are ordinary directories for every command except
//! `SUBVOL`/`SNAPSHOT`/`CLONE`/`ENCODED_WRITE`/`ENABLE_VERITY`, so both
//! backends apply everything else through these free functions against an
//! already-resolved destination path.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::receive::{OpError, OpResult};
use crate::sendstream::Timespec;

fn io_err(e: std::io::Error) -> OpError {
    OpError::Other(e.into())
}

fn cstring(path: &Path) -> OpResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|e| OpError::Other(e.into()))
}

pub fn mkfile(path: &Path) -> OpResult {
    File::create(path).map_err(io_err)?;
    Ok(())
}

pub fn mkdir(path: &Path) -> OpResult {
    fs::create_dir_all(path).map_err(io_err)
}

pub fn mknod(path: &Path, mode: u32, rdev: u64) -> OpResult {
    let c_path = cstring(path)?;
    let rc = unsafe { libc::mknod(c_path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn mkfifo(path: &Path) -> OpResult {
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600)).map_err(|e| OpError::Other(anyhow::anyhow!(e)))
}

pub fn mksock(path: &Path) -> OpResult {
    let c_path = cstring(path)?;
    let rc = unsafe { libc::mknod(c_path.as_ptr(), libc::S_IFSOCK | 0o600, 0) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn symlink(path: &Path, target: &[u8]) -> OpResult {
    use std::ffi::OsStr;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), path).map_err(io_err)
}

pub fn rename(from: &Path, to: &Path) -> OpResult {
    fs::rename(from, to).map_err(io_err)
}

pub fn link(target: &Path, new_path: &Path) -> OpResult {
    fs::hard_link(target, new_path).map_err(io_err)
}

pub fn unlink(path: &Path) -> OpResult {
    fs::remove_file(path).map_err(io_err)
}

pub fn rmdir(path: &Path) -> OpResult {
    fs::remove_dir(path).map_err(io_err)
}

pub fn set_xattr(path: &Path, name: &[u8], data: &[u8]) -> OpResult {
    let c_path = cstring(path)?;
    let c_name = CString::new(name).map_err(|e| OpError::Other(e.into()))?;
    let rc = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            data.as_ptr() as *const libc::c_void,
            data.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn remove_xattr(path: &Path, name: &[u8]) -> OpResult {
    let c_path = cstring(path)?;
    let c_name = CString::new(name).map_err(|e| OpError::Other(e.into()))?;
    let rc = unsafe { libc::removexattr(c_path.as_ptr(), c_name.as_ptr()) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Opens with create-if-absent: a resumed stream may omit the `MKFILE` that
/// would otherwise have created this file.
pub fn write(path: &Path, offset: u64, data: &[u8]) -> OpResult {
    let mut file = OpenOptions::new().write(true).create(true).open(path).map_err(io_err)?;
    file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
    file.write_all(data).map_err(io_err)
}

pub fn truncate(path: &Path, size: u64) -> OpResult {
    let file = OpenOptions::new().write(true).create(true).open(path).map_err(io_err)?;
    file.set_len(size).map_err(io_err)
}

pub fn chmod(path: &Path, mode: u32) -> OpResult {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_err)
}

pub fn chown(path: &Path, uid: u64, gid: u64) -> OpResult {
    let c_path = cstring(path)?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn utimes(path: &Path, atime: Timespec, mtime: Timespec) -> OpResult {
    let c_path = cstring(path)?;
    let times = [
        libc::timespec {
            tv_sec: atime.sec as libc::time_t,
            tv_nsec: atime.nsec as libc::c_long,
        },
        libc::timespec {
            tv_sec: mtime.sec as libc::time_t,
            tv_nsec: mtime.nsec as libc::c_long,
        },
    ];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn update_extent(path: &Path, offset: u64, size: u64) -> OpResult {
    let file = OpenOptions::new().write(true).create(true).open(path).map_err(io_err)?;
    let needed = offset + size;
    if file.metadata().map_err(io_err)?.len() < needed {
        file.set_len(needed).map_err(io_err)?;
    }
    Ok(())
}

pub fn fallocate(path: &Path, mode: u32, offset: u64, size: u64) -> OpResult {
    let file = OpenOptions::new().write(true).create(true).open(path).map_err(io_err)?;
    let rc = unsafe { libc::fallocate(file.as_raw_fd(), mode as i32, offset as i64, size as i64) };
    if rc != 0 {
        return Err(io_err(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn decompress(compression: u32, data: &[u8]) -> OpResult<Vec<u8>> {
    match compression {
        0 => Ok(data.to_vec()),
        1 => {
            use std::io::Read as _;
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(data).read_to_end(&mut out).map_err(io_err)?;
            Ok(out)
        }
        2 => zstd::stream::decode_all(data).map_err(io_err),
        other => Err(OpError::Other(anyhow::anyhow!("unsupported encoded-write compression code {other}"))),
    }
}
