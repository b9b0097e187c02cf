use std::collections::BTreeMap;

/// Wire attribute type codes, in the order the kernel's `btrfs_send_attr_type`
/// enum defines them. `Data` is handled specially by the scanner/writer: when
/// present it is always emitted last and its length is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum AttrType {
    Unspecified = 0,
    Uuid = 1,
    Ctransid = 2,
    Ino = 3,
    Size = 4,
    Mode = 5,
    Uid = 6,
    Gid = 7,
    Rdev = 8,
    Ctime = 9,
    Mtime = 10,
    Atime = 11,
    Otime = 12,
    XattrName = 13,
    XattrData = 14,
    Path = 15,
    PathTo = 16,
    PathLink = 17,
    FileOffset = 18,
    Data = 19,
    CloneUuid = 20,
    CloneCtransid = 21,
    ClonePath = 22,
    CloneOffset = 23,
    CloneLen = 24,
    FallocateMode = 25,
    UnencodedFileLen = 26,
    UnencodedLen = 27,
    UnencodedOffset = 28,
    Compression = 29,
    Encryption = 30,
    Fileattr = 31,
    VerityAlgorithm = 32,
    VerityBlockSize = 33,
    VeritySaltData = 34,
    VeritySigData = 35,
}

impl AttrType {
    pub const fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        use AttrType::*;
        let attr = match code {
            0 => Unspecified,
            1 => Uuid,
            2 => Ctransid,
            3 => Ino,
            4 => Size,
            5 => Mode,
            6 => Uid,
            7 => Gid,
            8 => Rdev,
            9 => Ctime,
            10 => Mtime,
            11 => Atime,
            12 => Otime,
            13 => XattrName,
            14 => XattrData,
            15 => Path,
            16 => PathTo,
            17 => PathLink,
            18 => FileOffset,
            19 => Data,
            20 => CloneUuid,
            21 => CloneCtransid,
            22 => ClonePath,
            23 => CloneOffset,
            24 => CloneLen,
            25 => FallocateMode,
            26 => UnencodedFileLen,
            27 => UnencodedLen,
            28 => UnencodedOffset,
            29 => Compression,
            30 => Encryption,
            31 => Fileattr,
            32 => VerityAlgorithm,
            33 => VerityBlockSize,
            34 => VeritySaltData,
            35 => VeritySigData,
            _ => return None,
        };
        Some(attr)
    }
}

/// An ordered mapping from attribute code to raw value bytes, as decoded off
/// the wire or assembled for encoding. A `BTreeMap` keyed by the raw `u16`
/// gives natural ascending iteration, which the writer relies on for every
/// attribute except `DATA` (re-sorted to the end explicitly).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttrMap(BTreeMap<u16, Vec<u8>>);

impl AttrMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, attr: AttrType, value: impl Into<Vec<u8>>) -> &mut Self {
        self.0.insert(attr.code(), value.into());
        self
    }

    pub fn get(&self, attr: AttrType) -> Option<&[u8]> {
        self.0.get(&attr.code()).map(Vec::as_slice)
    }

    pub fn require(&self, attr: AttrType) -> Option<&[u8]> {
        self.get(attr)
    }

    pub fn contains(&self, attr: AttrType) -> bool {
        self.0.contains_key(&attr.code())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.0.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decode helpers shared across command parsing. All multi-byte integers are
/// little-endian, per the wire format.
pub mod decode {
    use super::super::error::{CodecError, CodecResult};
    use super::AttrType;
    use uuid::Uuid;

    pub fn u32le(bytes: &[u8], attr: AttrType) -> CodecResult<u32> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidAttributeLength(attr, bytes.len()))?;
        Ok(u32::from_le_bytes(arr))
    }

    pub fn u64le(bytes: &[u8], attr: AttrType) -> CodecResult<u64> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidAttributeLength(attr, bytes.len()))?;
        Ok(u64::from_le_bytes(arr))
    }

    /// Mode-like fields arrive as either 32 or 64 bit integers depending on
    /// the command/kernel version; accept both and narrow to u32.
    pub fn mode(bytes: &[u8], attr: AttrType) -> CodecResult<u32> {
        match bytes.len() {
            4 => u32le(bytes, attr),
            8 => u64le(bytes, attr).map(|v| v as u32),
            _ => Err(CodecError::InvalidAttributeLength(attr, bytes.len())),
        }
    }

    pub fn uuid(bytes: &[u8], attr: AttrType) -> CodecResult<Uuid> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidAttributeLength(attr, bytes.len()))?;
        Ok(Uuid::from_bytes(arr))
    }

    /// `{ sec: u64, nsec: u32 }` timestamp, 12 bytes total.
    pub fn timespec(bytes: &[u8], attr: AttrType) -> CodecResult<(u64, u32)> {
        if bytes.len() != 12 {
            return Err(CodecError::InvalidAttributeLength(attr, bytes.len()));
        }
        let sec = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let nsec = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        Ok((sec, nsec))
    }

    /// Paths and xattr names/data are raw byte strings; no encoding assumed.
    pub fn bytes(bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

pub mod encode {
    use super::AttrMap;
    use super::AttrType;
    use uuid::Uuid;

    pub fn u32le(map: &mut AttrMap, attr: AttrType, v: u32) {
        map.insert(attr, v.to_le_bytes().to_vec());
    }

    pub fn u64le(map: &mut AttrMap, attr: AttrType, v: u64) {
        map.insert(attr, v.to_le_bytes().to_vec());
    }

    pub fn uuid(map: &mut AttrMap, attr: AttrType, v: Uuid) {
        map.insert(attr, v.as_bytes().to_vec());
    }

    pub fn timespec(map: &mut AttrMap, attr: AttrType, sec: u64, nsec: u32) {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&sec.to_le_bytes());
        buf.extend_from_slice(&nsec.to_le_bytes());
        map.insert(attr, buf);
    }

    pub fn bytes(map: &mut AttrMap, attr: AttrType, v: impl Into<Vec<u8>>) {
        map.insert(attr, v.into());
    }
}
