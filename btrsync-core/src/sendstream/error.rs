use super::attr::AttrType;
use super::command::CommandType;
use thiserror::Error;

/// Format errors produced by the scanner/writer. Fatal to the current stream.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("stream magic did not match 'btrfs-stream\\0'")]
    InvalidMagic,
    #[error("unsupported stream version {0} (expected 2)")]
    InvalidVersion(u32),
    #[error("stream header already sent")]
    HeaderAlreadySent,
    #[error("stream header already parsed")]
    HeaderAlreadyParsed,
    #[error("command checksum mismatch on {0:?}")]
    InvalidCommandChecksum(CommandType),
    #[error("command {0:?} missing required attribute {1:?}")]
    MissingAttribute(CommandType, AttrType),
    #[error("unrecognized command code {0}")]
    InvalidCommand(u16),
    #[error("attribute {0:?} had unexpected length {1}")]
    InvalidAttributeLength(AttrType, usize),
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
