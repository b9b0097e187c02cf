use std::io::Read;

use super::attr::{AttrMap, AttrType};
use super::command::CommandType;
use super::crc::command_checksum;
use super::error::{CodecError, CodecResult};
use super::CMD_HEADER_LEN;

/// Reads commands off a raw btrfs send-stream. Generic over any byte source:
/// a pipe from `btrfs send`, a spool file, or an in-memory buffer in tests.
pub struct Scanner<R> {
    inner: R,
    header_read: bool,
    last_was_end: bool,
    ignore_checksums: bool,
}

impl<R: Read> Scanner<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            header_read: false,
            last_was_end: false,
            ignore_checksums: false,
        }
    }

    /// A scanner that does not fail a stream on checksum mismatch. Used when
    /// the receive context has checksums disabled.
    pub fn with_ignore_checksums(inner: R, ignore_checksums: bool) -> Self {
        Self {
            inner,
            header_read: false,
            last_was_end: false,
            ignore_checksums,
        }
    }

    /// Reads and validates the 17-byte stream header (13-byte magic, 4-byte
    /// version). `scan()` calls this implicitly with `validate = true` the
    /// first time it runs if the caller hasn't already.
    pub fn read_header(&mut self, validate: bool) -> CodecResult<()> {
        if self.header_read {
            return Err(CodecError::HeaderAlreadyParsed);
        }
        let mut magic = [0u8; 13];
        self.inner.read_exact(&mut magic)?;
        let mut version_bytes = [0u8; 4];
        self.inner.read_exact(&mut version_bytes)?;
        let version = u32::from_le_bytes(version_bytes);
        if validate {
            if &magic != super::STREAM_MAGIC {
                return Err(CodecError::InvalidMagic);
            }
            if version != super::STREAM_VERSION {
                return Err(CodecError::InvalidVersion(version));
            }
        }
        self.header_read = true;
        Ok(())
    }

    /// Reads the next command. Returns `Ok(None)` once the underlying
    /// reader is exhausted immediately after an `END` command; any other
    /// truncation (including a clean EOF that never saw `END`) is an error.
    /// A stream may legally contain more commands after an `END` (a second
    /// `SUBVOL` starting the next subvolume), so callers keep calling
    /// `scan()` until it returns `None`.
    pub fn scan(&mut self) -> CodecResult<Option<(CommandType, AttrMap)>> {
        if !self.header_read {
            self.read_header(true)?;
        }

        let mut cmd_header = [0u8; CMD_HEADER_LEN];
        match self.inner.read_exact(&mut cmd_header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return if self.last_was_end {
                    Ok(None)
                } else {
                    Err(CodecError::UnexpectedEof)
                };
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(cmd_header[0..4].try_into().unwrap()) as usize;
        let cmd_code = u16::from_le_bytes(cmd_header[4..6].try_into().unwrap());
        let crc_on_wire = u32::from_le_bytes(cmd_header[6..10].try_into().unwrap());
        let command = CommandType::from_code(cmd_code);

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload)?;

        if !self.ignore_checksums {
            let mut header_zeroed = cmd_header;
            header_zeroed[6..10].copy_from_slice(&[0, 0, 0, 0]);
            let computed = command_checksum(&header_zeroed, &payload);
            if computed != crc_on_wire {
                return Err(CodecError::InvalidCommandChecksum(command));
            }
        }

        let attrs = decode_attrs(&payload)?;

        for required in command.required_attrs() {
            if !attrs.contains(*required) {
                return Err(CodecError::MissingAttribute(command, *required));
            }
        }

        self.last_was_end = matches!(command, CommandType::End);

        Ok(Some((command, attrs)))
    }
}

/// Decodes the TLV attribute sequence of a single command's payload. `DATA`
/// never carries an on-wire length: once its type code is seen, everything
/// left in the payload is its value.
fn decode_attrs(payload: &[u8]) -> CodecResult<AttrMap> {
    let mut attrs = AttrMap::new();
    let mut offset = 0usize;
    let data_code = AttrType::Data.code();

    while offset < payload.len() {
        if offset + 2 > payload.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let attr_code = u16::from_le_bytes(payload[offset..offset + 2].try_into().unwrap());
        offset += 2;

        let value = if attr_code == data_code {
            let value = &payload[offset..];
            offset = payload.len();
            value
        } else {
            if offset + 2 > payload.len() {
                return Err(CodecError::UnexpectedEof);
            }
            let attr_len = u16::from_le_bytes(payload[offset..offset + 2].try_into().unwrap()) as usize;
            offset += 2;
            if offset + attr_len > payload.len() {
                return Err(CodecError::UnexpectedEof);
            }
            let value = &payload[offset..offset + attr_len];
            offset += attr_len;
            value
        };

        if let Some(attr) = AttrType::from_code(attr_code) {
            attrs.insert(attr, value.to_vec());
        }
    }

    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sendstream::writer::Writer;
    use crate::sendstream::AttrType;

    fn roundtrip(command: CommandType, attrs: AttrMap) -> (CommandType, AttrMap) {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            writer.write_command(command, &attrs).unwrap();
        }
        let mut scanner = Scanner::new(buf.as_slice());
        scanner.scan().unwrap().expect("one command")
    }

    #[test]
    fn data_attribute_decodes_without_explicit_length() {
        let mut attrs = AttrMap::new();
        attrs.insert(AttrType::Path, b"a/f".to_vec());
        attrs.insert(AttrType::FileOffset, 0u64.to_le_bytes().to_vec());
        attrs.insert(AttrType::Data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let (cmd, decoded) = roundtrip(CommandType::Write, attrs.clone());
        assert_eq!(cmd, CommandType::Write);
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn truncation_without_end_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            let mut attrs = AttrMap::new();
            attrs.insert(AttrType::Path, b"d".to_vec());
            writer.write_command(CommandType::Mkdir, &attrs).unwrap();
        }
        buf.truncate(buf.len() - 1);
        let mut scanner = Scanner::new(buf.as_slice());
        assert!(matches!(scanner.scan(), Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn eof_immediately_after_end_is_clean() {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            writer.end().unwrap();
        }
        let mut scanner = Scanner::new(buf.as_slice());
        let (cmd, _) = scanner.scan().unwrap().expect("end command");
        assert_eq!(cmd, CommandType::End);
        assert!(scanner.scan().unwrap().is_none());
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            let mut attrs = AttrMap::new();
            attrs.insert(AttrType::Path, b"d".to_vec());
            writer.write_command(CommandType::Mkdir, &attrs).unwrap();
        }
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut scanner = Scanner::new(buf.as_slice());
        assert!(matches!(
            scanner.scan(),
            Err(CodecError::InvalidCommandChecksum(CommandType::Mkdir))
        ));
    }

    #[test]
    fn checksum_mismatch_ignored_when_disabled() {
        let mut buf = Vec::new();
        {
            let mut writer = Writer::new(&mut buf);
            writer.send_header().unwrap();
            let mut attrs = AttrMap::new();
            attrs.insert(AttrType::Path, b"d".to_vec());
            writer.write_command(CommandType::Mkdir, &attrs).unwrap();
        }
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut scanner = Scanner::with_ignore_checksums(buf.as_slice(), true);
        assert!(scanner.scan().unwrap().is_some());
    }
}
