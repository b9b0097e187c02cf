use crate::sendstream::CodecError;
use thiserror::Error;

/// Structured error returned from a single [`Receiver`](super::Receiver)
/// method call. `Unsupported` and `SkipCommand` are sentinels the dispatch
/// loop treats specially; anything else counts against the error budget.
#[derive(Error, Debug)]
pub enum OpError {
    /// The backend has no way to perform this operation at all (e.g. CLONE
    /// against a plain directory). Recorded and execution continues for
    /// ignorable operations; fails the stream for required ones.
    #[error("operation not supported by this backend")]
    Unsupported,
    /// A pre-op hook asked to suppress this command entirely. No error is
    /// counted and the receiver method is never called.
    #[error("command skipped")]
    SkipCommand,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OpResult<T = ()> = Result<T, OpError>;

/// Top-level failure from `process_send_stream`.
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("{count} errors exceeded the configured maximum, last: {last}")]
    MaxErrorsExceeded { last: anyhow::Error, count: u32 },
    #[error("receive deadline exceeded")]
    DeadlineExceeded,
    #[error("receive cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ReceiveResult<T = ()> = Result<T, ReceiveError>;
