//! A typed view over the untyped `(CommandType, AttrMap)` pairs the scanner
//! and writer traffic in. Each send command gets a constructor that builds
//! the right `AttrMap` and a decoder that recovers typed fields from one,
//! so callers (the receiver dispatch core, the sync manager) don't poke at
//! raw attribute codes directly.

use uuid::Uuid;

use super::attr::{decode, encode, AttrMap, AttrType};
use super::command::CommandType;
use super::error::CodecResult;

/// A decoded timestamp, `{ sec: u64, nsec: u32 }` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u32,
}

/// One btrfs send command with its arguments already decoded to native
/// types. Path-like fields are raw byte strings: no encoding is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subvol {
        path: Vec<u8>,
        uuid: Uuid,
        ctransid: u64,
    },
    Snapshot {
        path: Vec<u8>,
        uuid: Uuid,
        ctransid: u64,
        clone_uuid: Uuid,
        clone_ctransid: u64,
    },
    Mkfile {
        path: Vec<u8>,
    },
    Mkdir {
        path: Vec<u8>,
    },
    Mknod {
        path: Vec<u8>,
        mode: u32,
        rdev: u64,
    },
    Mkfifo {
        path: Vec<u8>,
    },
    Mksock {
        path: Vec<u8>,
    },
    Symlink {
        path: Vec<u8>,
        ino: u64,
        path_link: Vec<u8>,
    },
    Rename {
        path: Vec<u8>,
        path_to: Vec<u8>,
    },
    Link {
        path: Vec<u8>,
        path_link: Vec<u8>,
    },
    Unlink {
        path: Vec<u8>,
    },
    Rmdir {
        path: Vec<u8>,
    },
    SetXattr {
        path: Vec<u8>,
        name: Vec<u8>,
        data: Vec<u8>,
    },
    RemoveXattr {
        path: Vec<u8>,
        name: Vec<u8>,
    },
    Write {
        path: Vec<u8>,
        offset: u64,
        data: Vec<u8>,
    },
    Clone {
        path: Vec<u8>,
        offset: u64,
        len: u64,
        clone_uuid: Uuid,
        clone_ctransid: u64,
        clone_path: Vec<u8>,
        clone_offset: u64,
    },
    Truncate {
        path: Vec<u8>,
        size: u64,
    },
    Chmod {
        path: Vec<u8>,
        mode: u32,
    },
    Chown {
        path: Vec<u8>,
        uid: u64,
        gid: u64,
    },
    Utimes {
        path: Vec<u8>,
        atime: Timespec,
        mtime: Timespec,
        ctime: Timespec,
    },
    End,
    UpdateExtent {
        path: Vec<u8>,
        offset: u64,
        size: u64,
    },
    Fallocate {
        path: Vec<u8>,
        mode: u32,
        offset: u64,
        size: u64,
    },
    Fileattr {
        path: Vec<u8>,
        attr: u64,
    },
    EncodedWrite {
        path: Vec<u8>,
        offset: u64,
        unencoded_file_len: u64,
        unencoded_len: u64,
        unencoded_offset: u64,
        compression: u32,
        encryption: u32,
        data: Vec<u8>,
    },
    EnableVerity {
        path: Vec<u8>,
        algorithm: u8,
        block_size: u32,
        salt: Vec<u8>,
        signature: Vec<u8>,
    },
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        use Command::*;
        match self {
            Subvol { .. } => CommandType::Subvol,
            Snapshot { .. } => CommandType::Snapshot,
            Mkfile { .. } => CommandType::Mkfile,
            Mkdir { .. } => CommandType::Mkdir,
            Mknod { .. } => CommandType::Mknod,
            Mkfifo { .. } => CommandType::Mkfifo,
            Mksock { .. } => CommandType::Mksock,
            Symlink { .. } => CommandType::Symlink,
            Rename { .. } => CommandType::Rename,
            Link { .. } => CommandType::Link,
            Unlink { .. } => CommandType::Unlink,
            Rmdir { .. } => CommandType::Rmdir,
            SetXattr { .. } => CommandType::SetXattr,
            RemoveXattr { .. } => CommandType::RemoveXattr,
            Write { .. } => CommandType::Write,
            Clone { .. } => CommandType::Clone,
            Truncate { .. } => CommandType::Truncate,
            Chmod { .. } => CommandType::Chmod,
            Chown { .. } => CommandType::Chown,
            Utimes { .. } => CommandType::Utimes,
            End => CommandType::End,
            UpdateExtent { .. } => CommandType::UpdateExtent,
            Fallocate { .. } => CommandType::Fallocate,
            Fileattr { .. } => CommandType::Fileattr,
            EncodedWrite { .. } => CommandType::EncodedWrite,
            EnableVerity { .. } => CommandType::EnableVerity,
        }
    }

    /// Builds the wire attribute map for this command. Combined with
    /// `CommandType`, this is what `Writer::write_command` takes.
    pub fn to_attrs(&self) -> AttrMap {
        let mut m = AttrMap::new();
        use Command::*;
        match self {
            Subvol { path, uuid, ctransid } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::uuid(&mut m, AttrType::Uuid, *uuid);
                encode::u64le(&mut m, AttrType::Ctransid, *ctransid);
            }
            Snapshot {
                path,
                uuid,
                ctransid,
                clone_uuid,
                clone_ctransid,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::uuid(&mut m, AttrType::Uuid, *uuid);
                encode::u64le(&mut m, AttrType::Ctransid, *ctransid);
                encode::uuid(&mut m, AttrType::CloneUuid, *clone_uuid);
                encode::u64le(&mut m, AttrType::CloneCtransid, *clone_ctransid);
            }
            Mkfile { path } | Mkdir { path } | Mkfifo { path } | Mksock { path } | Unlink { path } | Rmdir { path } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
            }
            Mknod { path, mode, rdev } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u32le(&mut m, AttrType::Mode, *mode);
                encode::u64le(&mut m, AttrType::Rdev, *rdev);
            }
            Symlink { path, ino, path_link } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::Ino, *ino);
                encode::bytes(&mut m, AttrType::PathLink, path_link.clone());
            }
            Rename { path, path_to } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::bytes(&mut m, AttrType::PathTo, path_to.clone());
            }
            Link { path, path_link } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::bytes(&mut m, AttrType::PathLink, path_link.clone());
            }
            SetXattr { path, name, data } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::bytes(&mut m, AttrType::XattrName, name.clone());
                encode::bytes(&mut m, AttrType::XattrData, data.clone());
            }
            RemoveXattr { path, name } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::bytes(&mut m, AttrType::XattrName, name.clone());
            }
            Write { path, offset, data } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::FileOffset, *offset);
                encode::bytes(&mut m, AttrType::Data, data.clone());
            }
            Clone {
                path,
                offset,
                len,
                clone_uuid,
                clone_ctransid,
                clone_path,
                clone_offset,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::FileOffset, *offset);
                encode::u64le(&mut m, AttrType::CloneLen, *len);
                encode::uuid(&mut m, AttrType::CloneUuid, *clone_uuid);
                encode::u64le(&mut m, AttrType::CloneCtransid, *clone_ctransid);
                encode::bytes(&mut m, AttrType::ClonePath, clone_path.clone());
                encode::u64le(&mut m, AttrType::CloneOffset, *clone_offset);
            }
            Truncate { path, size } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::Size, *size);
            }
            Chmod { path, mode } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u32le(&mut m, AttrType::Mode, *mode);
            }
            Chown { path, uid, gid } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::Uid, *uid);
                encode::u64le(&mut m, AttrType::Gid, *gid);
            }
            Utimes {
                path,
                atime,
                mtime,
                ctime,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::timespec(&mut m, AttrType::Atime, atime.sec, atime.nsec);
                encode::timespec(&mut m, AttrType::Mtime, mtime.sec, mtime.nsec);
                encode::timespec(&mut m, AttrType::Ctime, ctime.sec, ctime.nsec);
            }
            End => {}
            UpdateExtent { path, offset, size } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::FileOffset, *offset);
                encode::u64le(&mut m, AttrType::Size, *size);
            }
            Fallocate {
                path,
                mode,
                offset,
                size,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u32le(&mut m, AttrType::FallocateMode, *mode);
                encode::u64le(&mut m, AttrType::FileOffset, *offset);
                encode::u64le(&mut m, AttrType::Size, *size);
            }
            Fileattr { path, attr } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::Fileattr, *attr);
            }
            EncodedWrite {
                path,
                offset,
                unencoded_file_len,
                unencoded_len,
                unencoded_offset,
                compression,
                encryption,
                data,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::u64le(&mut m, AttrType::FileOffset, *offset);
                encode::u64le(&mut m, AttrType::UnencodedFileLen, *unencoded_file_len);
                encode::u64le(&mut m, AttrType::UnencodedLen, *unencoded_len);
                encode::u64le(&mut m, AttrType::UnencodedOffset, *unencoded_offset);
                encode::u32le(&mut m, AttrType::Compression, *compression);
                encode::u32le(&mut m, AttrType::Encryption, *encryption);
                encode::bytes(&mut m, AttrType::Data, data.clone());
            }
            EnableVerity {
                path,
                algorithm,
                block_size,
                salt,
                signature,
            } => {
                encode::bytes(&mut m, AttrType::Path, path.clone());
                encode::bytes(&mut m, AttrType::VerityAlgorithm, vec![*algorithm]);
                encode::u32le(&mut m, AttrType::VerityBlockSize, *block_size);
                encode::bytes(&mut m, AttrType::VeritySaltData, salt.clone());
                encode::bytes(&mut m, AttrType::VeritySigData, signature.clone());
            }
        }
        m
    }

    /// Decodes a typed command from a scanned `(CommandType, AttrMap)`
    /// pair. The scanner has already checked required attributes are
    /// present; this only has to narrow byte widths.
    pub fn from_wire(command: CommandType, attrs: &AttrMap) -> CodecResult<Self> {
        use AttrType::*;
        let path = |a: AttrType| -> Vec<u8> { attrs.get(a).map(decode::bytes).unwrap_or_default() };
        Ok(match command {
            CommandType::Subvol => Command::Subvol {
                path: path(Path),
                uuid: decode::uuid(attrs.get(Uuid).unwrap_or(&[]), Uuid)?,
                ctransid: decode::u64le(attrs.get(Ctransid).unwrap_or(&[]), Ctransid)?,
            },
            CommandType::Snapshot => Command::Snapshot {
                path: path(Path),
                uuid: decode::uuid(attrs.get(Uuid).unwrap_or(&[]), Uuid)?,
                ctransid: decode::u64le(attrs.get(Ctransid).unwrap_or(&[]), Ctransid)?,
                clone_uuid: decode::uuid(attrs.get(CloneUuid).unwrap_or(&[]), CloneUuid)?,
                clone_ctransid: decode::u64le(attrs.get(CloneCtransid).unwrap_or(&[]), CloneCtransid)?,
            },
            CommandType::Mkfile => Command::Mkfile { path: path(Path) },
            CommandType::Mkdir => Command::Mkdir { path: path(Path) },
            CommandType::Mknod => Command::Mknod {
                path: path(Path),
                mode: decode::mode(attrs.get(Mode).unwrap_or(&[]), Mode)?,
                rdev: decode::u64le(attrs.get(Rdev).unwrap_or(&[]), Rdev)?,
            },
            CommandType::Mkfifo => Command::Mkfifo { path: path(Path) },
            CommandType::Mksock => Command::Mksock { path: path(Path) },
            CommandType::Symlink => Command::Symlink {
                path: path(Path),
                ino: decode::u64le(attrs.get(Ino).unwrap_or(&[]), Ino)?,
                path_link: path(PathLink),
            },
            CommandType::Rename => Command::Rename {
                path: path(Path),
                path_to: path(PathTo),
            },
            CommandType::Link => Command::Link {
                path: path(Path),
                path_link: path(PathLink),
            },
            CommandType::Unlink => Command::Unlink { path: path(Path) },
            CommandType::Rmdir => Command::Rmdir { path: path(Path) },
            CommandType::SetXattr => Command::SetXattr {
                path: path(Path),
                name: path(XattrName),
                data: path(XattrData),
            },
            CommandType::RemoveXattr => Command::RemoveXattr {
                path: path(Path),
                name: path(XattrName),
            },
            CommandType::Write => Command::Write {
                path: path(Path),
                offset: decode::u64le(attrs.get(FileOffset).unwrap_or(&[]), FileOffset)?,
                data: path(Data),
            },
            CommandType::Clone => Command::Clone {
                path: path(Path),
                offset: decode::u64le(attrs.get(FileOffset).unwrap_or(&[]), FileOffset)?,
                len: decode::u64le(attrs.get(CloneLen).unwrap_or(&[]), CloneLen)?,
                clone_uuid: decode::uuid(attrs.get(CloneUuid).unwrap_or(&[]), CloneUuid)?,
                clone_ctransid: decode::u64le(attrs.get(CloneCtransid).unwrap_or(&[]), CloneCtransid)?,
                clone_path: path(ClonePath),
                clone_offset: decode::u64le(attrs.get(CloneOffset).unwrap_or(&[]), CloneOffset)?,
            },
            CommandType::Truncate => Command::Truncate {
                path: path(Path),
                size: decode::u64le(attrs.get(Size).unwrap_or(&[]), Size)?,
            },
            CommandType::Chmod => Command::Chmod {
                path: path(Path),
                mode: decode::mode(attrs.get(Mode).unwrap_or(&[]), Mode)?,
            },
            CommandType::Chown => Command::Chown {
                path: path(Path),
                uid: decode::u64le(attrs.get(Uid).unwrap_or(&[]), Uid)?,
                gid: decode::u64le(attrs.get(Gid).unwrap_or(&[]), Gid)?,
            },
            CommandType::Utimes => Command::Utimes {
                path: path(Path),
                atime: decode_timespec(attrs, Atime)?,
                mtime: decode_timespec(attrs, Mtime)?,
                ctime: decode_timespec(attrs, Ctime)?,
            },
            CommandType::End => Command::End,
            CommandType::UpdateExtent => Command::UpdateExtent {
                path: path(Path),
                offset: decode::u64le(attrs.get(FileOffset).unwrap_or(&[]), FileOffset)?,
                size: decode::u64le(attrs.get(Size).unwrap_or(&[]), Size)?,
            },
            CommandType::Fallocate => Command::Fallocate {
                path: path(Path),
                mode: decode::mode(attrs.get(FallocateMode).unwrap_or(&[]), FallocateMode)?,
                offset: decode::u64le(attrs.get(FileOffset).unwrap_or(&[]), FileOffset)?,
                size: decode::u64le(attrs.get(Size).unwrap_or(&[]), Size)?,
            },
            CommandType::Fileattr => Command::Fileattr {
                path: path(Path),
                attr: decode::u64le(attrs.get(Fileattr).unwrap_or(&[]), Fileattr)?,
            },
            CommandType::EncodedWrite => Command::EncodedWrite {
                path: path(Path),
                offset: decode::u64le(attrs.get(FileOffset).unwrap_or(&[]), FileOffset)?,
                unencoded_file_len: decode::u64le(attrs.get(UnencodedFileLen).unwrap_or(&[]), UnencodedFileLen)?,
                unencoded_len: decode::u64le(attrs.get(UnencodedLen).unwrap_or(&[]), UnencodedLen)?,
                unencoded_offset: decode::u64le(attrs.get(UnencodedOffset).unwrap_or(&[]), UnencodedOffset)?,
                compression: decode::u32le(attrs.get(Compression).unwrap_or(&[]), Compression)?,
                encryption: decode::u32le(attrs.get(Encryption).unwrap_or(&[]), Encryption)?,
                data: path(Data),
            },
            CommandType::EnableVerity => Command::EnableVerity {
                path: path(Path),
                algorithm: *attrs.get(VerityAlgorithm).and_then(|b| b.first()).unwrap_or(&0),
                block_size: decode::u32le(attrs.get(VerityBlockSize).unwrap_or(&[]), VerityBlockSize)?,
                salt: path(VeritySaltData),
                signature: path(VeritySigData),
            },
            CommandType::Unspecified | CommandType::Unknown(_) => {
                return Err(super::error::CodecError::InvalidCommand(command.code()))
            }
        })
    }
}

fn decode_timespec(attrs: &AttrMap, attr: AttrType) -> CodecResult<Timespec> {
    let (sec, nsec) = decode::timespec(attrs.get(attr).unwrap_or(&[]), attr)?;
    Ok(Timespec { sec, nsec })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sendstream::writer::Writer;
    use crate::sendstream::Scanner;

    fn roundtrip(command: Command) -> Command {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            writer.write_command(command.command_type(), &command.to_attrs()).unwrap();
        }
        let mut scanner = Scanner::new(buf.as_slice());
        let (cmd, attrs) = scanner.scan().unwrap().expect("one command");
        Command::from_wire(cmd, &attrs).unwrap()
    }

    #[test]
    fn write_command_roundtrips() {
        let command = Command::Write {
            path: b"a/f".to_vec(),
            offset: 0,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        };
        assert_eq!(roundtrip(command.clone()), command);
    }

    #[test]
    fn subvol_command_roundtrips() {
        let command = Command::Subvol {
            path: b"v".to_vec(),
            uuid: Uuid::new_v4(),
            ctransid: 10,
        };
        assert_eq!(roundtrip(command.clone()), command);
    }

    #[test]
    fn clone_command_roundtrips() {
        let command = Command::Clone {
            path: b"f".to_vec(),
            offset: 4096,
            len: 4096,
            clone_uuid: Uuid::new_v4(),
            clone_ctransid: 7,
            clone_path: b"other".to_vec(),
            clone_offset: 0,
        };
        assert_eq!(roundtrip(command.clone()), command);
    }

    #[test]
    fn enable_verity_command_roundtrips() {
        let command = Command::EnableVerity {
            path: b"f".to_vec(),
            algorithm: 1,
            block_size: 4096,
            salt: vec![1, 2, 3],
            signature: vec![4, 5, 6, 7],
        };
        assert_eq!(roundtrip(command.clone()), command);
    }
}
