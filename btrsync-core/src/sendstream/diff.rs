//! Prefix-diff: find the first point at which two otherwise-similar send
//! streams diverge. Used to resume an interrupted transfer by treating the
//! point of divergence as a command offset to seek past on the next
//! attempt.

use std::io::Read;

use super::command::CommandType;
use super::error::CodecResult;
use super::scanner::Scanner;

/// Header triple used for lockstep equality, minus the length/crc when both
/// sides are a `SUBVOL`/`SNAPSHOT` pair (UUID differences between otherwise
/// identical subvolume streams are tolerated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandFingerprint {
    cmd: CommandType,
    crc: u32,
    len: u32,
}

/// Scans `a` and `b` in lockstep and returns the 1-based index of the first
/// command at which they diverge, or the length of the shorter stream if
/// one is a strict prefix of the other.
///
/// Two commands are considered equal either when both are `SUBVOL`/
/// `SNAPSHOT` with the same command code (their UUID/ctransid attributes
/// are allowed to differ, since a resend to a fresh destination declares a
/// different identity for the same content) or when their raw `(cmd, crc,
/// len)` header triples match exactly.
pub fn find_diff_offset<A: Read, B: Read>(a: A, b: B) -> CodecResult<u64> {
    let mut scanner_a = FingerprintScanner::new(a);
    let mut scanner_b = FingerprintScanner::new(b);

    let mut offset = 0u64;
    loop {
        let next_a = scanner_a.next()?;
        let next_b = scanner_b.next()?;
        match (next_a, next_b) {
            (Some(fa), Some(fb)) => {
                let equal = fa == fb
                    || (is_subvol_like(fa.cmd) && is_subvol_like(fb.cmd) && fa.cmd == fb.cmd);
                if !equal {
                    return Ok(offset + 1);
                }
                offset += 1;
            }
            _ => return Ok(offset),
        }
    }
}

fn is_subvol_like(cmd: CommandType) -> bool {
    matches!(cmd, CommandType::Subvol | CommandType::Snapshot)
}

/// Wraps a [`Scanner`] to also expose the on-wire header triple for a
/// command, which the plain `AttrMap`-returning scanner throws away.
struct FingerprintScanner<R> {
    scanner: Scanner<R>,
}

impl<R: Read> FingerprintScanner<R> {
    fn new(inner: R) -> Self {
        Self {
            scanner: Scanner::new(inner),
        }
    }

    fn next(&mut self) -> CodecResult<Option<CommandFingerprint>> {
        // The header-triple comparison needs the raw crc/len, which the
        // attribute-level scanner doesn't surface; recompute a stable
        // fingerprint from the decoded command instead. Re-serializing the
        // decoded attributes yields the same `len`, and the crc is recomputed
        // identically since we have not mutated the payload.
        match self.scanner.scan()? {
            Some((cmd, attrs)) => {
                let mut probe = Vec::new();
                let mut writer = super::writer::Writer::new(&mut probe);
                writer.send_header()?;
                writer.write_command(cmd, &attrs)?;
                // probe = 17-byte stream header + cmd header + payload
                let header = &probe[super::STREAM_HEADER_LEN..super::STREAM_HEADER_LEN + super::CMD_HEADER_LEN];
                let len = u32::from_le_bytes(header[0..4].try_into().unwrap());
                let crc = u32::from_le_bytes(header[6..10].try_into().unwrap());
                Ok(Some(CommandFingerprint { cmd, crc, len }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sendstream::attr::{AttrMap, AttrType};
    use crate::sendstream::command::CommandType;
    use crate::sendstream::writer::Writer;
    use uuid::Uuid;

    fn build(commands: &[(CommandType, AttrMap)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = Writer::new(&mut buf);
        writer.send_header().unwrap();
        for (cmd, attrs) in commands {
            writer.write_command(*cmd, attrs).unwrap();
        }
        buf
    }

    fn mkdir(path: &str) -> (CommandType, AttrMap) {
        let mut attrs = AttrMap::new();
        attrs.insert(AttrType::Path, path.as_bytes().to_vec());
        (CommandType::Mkdir, attrs)
    }

    fn subvol(path: &str, uuid: Uuid) -> (CommandType, AttrMap) {
        let mut attrs = AttrMap::new();
        attrs.insert(AttrType::Path, path.as_bytes().to_vec());
        attrs.insert(AttrType::Uuid, uuid.as_bytes().to_vec());
        attrs.insert(AttrType::Ctransid, 1u64.to_le_bytes().to_vec());
        (CommandType::Subvol, attrs)
    }

    #[test]
    fn diverges_at_first_mismatched_command() {
        let prefix = vec![mkdir("a"), mkdir("b")];
        let mut tail1 = prefix.clone();
        tail1.push(mkdir("c1"));
        let mut tail2 = prefix.clone();
        tail2.push(mkdir("c2"));

        let s1 = build(&tail1);
        let s2 = build(&tail2);
        let offset = find_diff_offset(s1.as_slice(), s2.as_slice()).unwrap();
        assert_eq!(offset, 3);
    }

    #[test]
    fn tolerates_differing_subvol_uuids() {
        let commands1 = vec![subvol("v", Uuid::new_v4()), mkdir("d")];
        let commands2 = vec![subvol("v", Uuid::new_v4()), mkdir("d")];
        let s1 = build(&commands1);
        let s2 = build(&commands2);
        let offset = find_diff_offset(s1.as_slice(), s2.as_slice()).unwrap();
        assert_eq!(offset, 2);
    }

    #[test]
    fn shorter_stream_wins_when_one_is_a_prefix() {
        let commands1 = vec![mkdir("a")];
        let commands2 = vec![mkdir("a"), mkdir("b")];
        let s1 = build(&commands1);
        let s2 = build(&commands2);
        let offset = find_diff_offset(s1.as_slice(), s2.as_slice()).unwrap();
        assert_eq!(offset, 1);
    }
}
