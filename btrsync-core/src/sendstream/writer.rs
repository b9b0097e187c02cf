use std::io::Write;

use super::attr::{AttrMap, AttrType};
use super::command::CommandType;
use super::crc::command_checksum;
use super::error::{CodecError, CodecResult};
use super::{CMD_HEADER_LEN, STREAM_MAGIC, STREAM_VERSION};

/// Writes commands to a raw btrfs send-stream sink: a pipe into `btrfs
/// receive`, a spool file, or an in-memory buffer in tests.
pub struct Writer<W> {
    inner: W,
    header_sent: bool,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header_sent: false,
        }
    }

    pub fn send_header(&mut self) -> CodecResult<()> {
        if self.header_sent {
            return Err(CodecError::HeaderAlreadySent);
        }
        self.inner.write_all(STREAM_MAGIC)?;
        self.inner.write_all(&STREAM_VERSION.to_le_bytes())?;
        self.header_sent = true;
        Ok(())
    }

    /// Writes one command. `DATA`, if present, is always emitted last with
    /// its length left implicit, matching the kernel writer.
    pub fn write_command(&mut self, command: CommandType, attrs: &AttrMap) -> CodecResult<()> {
        if !self.header_sent {
            self.send_header()?;
        }

        for required in command.required_attrs() {
            if !attrs.contains(*required) {
                return Err(CodecError::MissingAttribute(command, *required));
            }
        }

        let mut payload = Vec::new();
        let mut data_value: Option<&[u8]> = None;
        for (code, value) in attrs.iter() {
            if code == AttrType::Data.code() {
                data_value = Some(value);
                continue;
            }
            payload.extend_from_slice(&code.to_le_bytes());
            payload.extend_from_slice(&(value.len() as u16).to_le_bytes());
            payload.extend_from_slice(value);
        }
        if let Some(data) = data_value {
            // DATA never carries an on-wire length: the decoder recovers it
            // as "everything left in the payload".
            payload.extend_from_slice(&AttrType::Data.code().to_le_bytes());
            payload.extend_from_slice(data);
        }

        let mut header = [0u8; CMD_HEADER_LEN];
        header[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        header[4..6].copy_from_slice(&command.code().to_le_bytes());
        let crc = command_checksum(&header, &payload);
        header[6..10].copy_from_slice(&crc.to_le_bytes());

        self.inner.write_all(&header)?;
        self.inner.write_all(&payload)?;
        Ok(())
    }

    pub fn end(&mut self) -> CodecResult<()> {
        self.write_command(CommandType::End, &AttrMap::new())?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
