use super::attr::AttrType;

/// Wire command type codes, matching the kernel's `btrfs_send_cmd` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Unspecified,
    Subvol,
    Snapshot,
    Mkfile,
    Mkdir,
    Mknod,
    Mkfifo,
    Mksock,
    Symlink,
    Rename,
    Link,
    Unlink,
    Rmdir,
    SetXattr,
    RemoveXattr,
    Write,
    Clone,
    Truncate,
    Chmod,
    Chown,
    Utimes,
    End,
    UpdateExtent,
    Fallocate,
    Fileattr,
    EncodedWrite,
    EnableVerity,
    Unknown(u16),
}

impl CommandType {
    pub fn code(self) -> u16 {
        use CommandType::*;
        match self {
            Unspecified => 0,
            Subvol => 1,
            Snapshot => 2,
            Mkfile => 3,
            Mkdir => 4,
            Mknod => 5,
            Mkfifo => 6,
            Mksock => 7,
            Symlink => 8,
            Rename => 9,
            Link => 10,
            Unlink => 11,
            Rmdir => 12,
            SetXattr => 13,
            RemoveXattr => 14,
            Write => 15,
            Clone => 16,
            Truncate => 17,
            Chmod => 18,
            Chown => 19,
            Utimes => 20,
            End => 21,
            UpdateExtent => 22,
            Fallocate => 23,
            Fileattr => 24,
            EncodedWrite => 25,
            EnableVerity => 26,
            Unknown(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        use CommandType::*;
        match code {
            0 => Unspecified,
            1 => Subvol,
            2 => Snapshot,
            3 => Mkfile,
            4 => Mkdir,
            5 => Mknod,
            6 => Mkfifo,
            7 => Mksock,
            8 => Symlink,
            9 => Rename,
            10 => Link,
            11 => Unlink,
            12 => Rmdir,
            13 => SetXattr,
            14 => RemoveXattr,
            15 => Write,
            16 => Clone,
            17 => Truncate,
            18 => Chmod,
            19 => Chown,
            20 => Utimes,
            21 => End,
            22 => UpdateExtent,
            23 => Fallocate,
            24 => Fileattr,
            25 => EncodedWrite,
            26 => EnableVerity,
            other => Unknown(other),
        }
    }

    /// Attributes a well-formed stream must carry for this command. Order
    /// here is the order the kernel itself writes them in, which the writer
    /// reproduces and the scanner uses to validate completeness.
    pub fn required_attrs(self) -> &'static [AttrType] {
        use AttrType::*;
        use CommandType::*;
        match self {
            Subvol => &[Path, Uuid, Ctransid],
            Snapshot => &[Path, Uuid, Ctransid, CloneUuid, CloneCtransid],
            Mkfile | Mkdir | Rmdir | Unlink => &[Path],
            Mknod => &[Path, Mode, Rdev],
            Mkfifo | Mksock => &[Path],
            Symlink => &[Path, Ino, PathLink],
            Rename => &[Path, PathTo],
            Link => &[Path, PathLink],
            SetXattr => &[Path, XattrName, XattrData],
            RemoveXattr => &[Path, XattrName],
            Write => &[Path, FileOffset, Data],
            Clone => &[Path, FileOffset, CloneLen, CloneUuid, CloneCtransid, ClonePath, CloneOffset],
            Truncate => &[Path, Size],
            Chmod => &[Path, Mode],
            Chown => &[Path, Uid, Gid],
            Utimes => &[Path, Atime, Mtime, Ctime],
            End => &[],
            UpdateExtent => &[Path, FileOffset, Size],
            Fallocate => &[Path, FallocateMode, FileOffset, Size],
            Fileattr => &[Path, Fileattr],
            EncodedWrite => &[
                Path,
                FileOffset,
                UnencodedFileLen,
                UnencodedLen,
                UnencodedOffset,
                Compression,
                Encryption,
                Data,
            ],
            EnableVerity => &[Path, VerityAlgorithm, VerityBlockSize, VeritySaltData, VeritySigData],
            Unspecified | Unknown(_) => &[],
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
