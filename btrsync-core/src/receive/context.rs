use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use slog::Logger;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::receiver::{Receiver, ReceiverHooks};

/// Inputs to `process_send_stream`. Mirrors the knobs a `btrfs receive`
/// invocation would expose plus the ones this crate adds (cancellation,
/// resume offset, error budget).
pub struct ReceiveOptions {
    pub logger: Logger,
    pub verbosity: u8,
    /// Number of non-fatal errors tolerated before the stream aborts.
    /// Zero means any error is fatal. Defaults to 1.
    pub max_errors: u32,
    /// When set, an END command finishes the current subvolume and ends
    /// the stream loop rather than just finalizing and continuing.
    pub honor_end: bool,
    pub ignore_checksums: bool,
    /// ENCODED_WRITE falls back to decompress-then-WRITE instead of using
    /// the encoded-write path.
    pub force_decompress: bool,
    /// Commands before this stream offset are skipped without dispatch;
    /// SUBVOL/SNAPSHOT among them still update `current_subvolume`.
    pub start_offset: u64,
    pub receiver: Arc<dyn Receiver>,
    pub hooks: Option<Arc<dyn ReceiverHooks>>,
    pub cancellation: CancellationToken,
    pub deadline: Option<Duration>,
}

impl ReceiveOptions {
    pub fn new(logger: Logger, receiver: Arc<dyn Receiver>) -> Self {
        ReceiveOptions {
            logger,
            verbosity: 0,
            max_errors: 1,
            honor_end: true,
            ignore_checksums: false,
            force_decompress: false,
            start_offset: 0,
            receiver,
            hooks: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSubvolume {
    pub path: Vec<u8>,
    pub uuid: Uuid,
    pub ctransid: u64,
    pub clone_uuid: Option<Uuid>,
    pub clone_ctransid: Option<u64>,
}

/// The single opaque context passed to every `Receiver` method: logger,
/// verbosity, the subvolume currently open for writes, the current stream
/// offset, and the shared cancellation token. Deliberately one type
/// instead of the two parallel receive/receiver contexts a naive port
/// would produce.
pub struct ReceiveContext {
    pub logger: Logger,
    pub verbosity: u8,
    pub ignore_checksums: bool,
    pub force_decompress: bool,
    current_subvolume: std::sync::Mutex<Option<CurrentSubvolume>>,
    offset: AtomicU64,
    pub cancellation: CancellationToken,
    deadline_at: Option<Instant>,
}

impl ReceiveContext {
    pub fn new(options: &ReceiveOptions) -> Self {
        ReceiveContext {
            logger: options.logger.clone(),
            verbosity: options.verbosity,
            ignore_checksums: options.ignore_checksums,
            force_decompress: options.force_decompress,
            current_subvolume: std::sync::Mutex::new(None),
            offset: AtomicU64::new(0),
            cancellation: options.cancellation.clone(),
            deadline_at: options.deadline.map(|d| Instant::now() + d),
        }
    }

    /// True once `deadline` (if any) has elapsed. Checked alongside
    /// `is_cancelled` between commands so a timeout reports
    /// `ReceiveError::DeadlineExceeded` rather than the generic
    /// `Cancelled`.
    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline_at.map_or(false, |at| Instant::now() >= at)
    }

    pub fn current_subvolume(&self) -> Option<CurrentSubvolume> {
        self.current_subvolume.lock().unwrap().clone()
    }

    pub fn set_current_subvolume(&self, subvol: Option<CurrentSubvolume>) {
        *self.current_subvolume.lock().unwrap() = subvol;
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn advance_offset(&self) -> u64 {
        self.offset.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
