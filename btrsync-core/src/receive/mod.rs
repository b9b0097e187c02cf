//! Receiver dispatch core: decodes a send-stream and drives an arbitrary
//! storage backend through it. Backends implement [`Receiver`]; the actual
//! command loop, offset skipping, error budget, and cancellation handling
//! live in [`process_send_stream`] so no backend has to reimplement them.

mod context;
mod dispatch;
mod error;
mod receiver;

pub use context::{CurrentSubvolume, ReceiveContext, ReceiveOptions};
pub use dispatch::process_send_stream;
pub use error::{OpError, OpResult, ReceiveError, ReceiveResult};
pub use receiver::{NoopReceiver, Receiver, ReceiverHooks};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use slog::Logger;
    use uuid::Uuid;

    use crate::sendstream::Writer;

    use super::*;

    fn discard_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    struct CountingReceiver {
        mkdirs: AtomicUsize,
        writes: AtomicUsize,
        finishes: AtomicUsize,
    }

    impl CountingReceiver {
        fn new() -> Self {
            CountingReceiver {
                mkdirs: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                finishes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Receiver for CountingReceiver {
        async fn subvol(&self, _ctx: &ReceiveContext, _path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
            Ok(())
        }

        async fn mkdir(&self, _ctx: &ReceiveContext, _path: &[u8]) -> OpResult {
            self.mkdirs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mkfile(&self, _ctx: &ReceiveContext, _path: &[u8]) -> OpResult {
            Ok(())
        }

        async fn write(&self, _ctx: &ReceiveContext, _path: &[u8], _offset: u64, _data: &[u8]) -> OpResult {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn chmod(&self, _ctx: &ReceiveContext, _path: &[u8], _mode: u32) -> OpResult {
            Ok(())
        }

        async fn finish_subvolume(&self, _ctx: &ReceiveContext) -> OpResult {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn build_stream() -> Vec<u8> {
        use crate::sendstream::Command;
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        w.send_header().unwrap();
        let commands = vec![
            Command::Subvol {
                path: b"vol".to_vec(),
                uuid: Uuid::new_v4(),
                ctransid: 1,
            },
            Command::Mkdir { path: b"vol/d".to_vec() },
            Command::Mkfile { path: b"vol/d/f".to_vec() },
            Command::Write {
                path: b"vol/d/f".to_vec(),
                offset: 0,
                data: vec![1, 2, 3, 4],
            },
            Command::Chmod {
                path: b"vol/d/f".to_vec(),
                mode: 0o644,
            },
            Command::End,
        ];
        for c in commands {
            w.write_command(c.command_type(), &c.to_attrs()).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn dispatches_every_command_in_order() {
        let recv = Arc::new(CountingReceiver::new());
        let options = ReceiveOptions::new(discard_logger(), recv.clone());
        process_send_stream(build_stream().as_slice(), options).await.unwrap();
        assert_eq!(recv.mkdirs.load(Ordering::SeqCst), 1);
        assert_eq!(recv.writes.load(Ordering::SeqCst), 1);
        assert_eq!(recv.finishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_offset_skips_commands_before_it() {
        let recv = Arc::new(CountingReceiver::new());
        let mut options = ReceiveOptions::new(discard_logger(), recv.clone());
        // Skip SUBVOL, MKDIR, MKFILE (offsets 0,1,2); resume at WRITE.
        options.start_offset = 3;
        process_send_stream(build_stream().as_slice(), options).await.unwrap();
        assert_eq!(recv.mkdirs.load(Ordering::SeqCst), 0);
        assert_eq!(recv.writes.load(Ordering::SeqCst), 1);
        assert_eq!(recv.finishes.load(Ordering::SeqCst), 1);
    }

    struct FailingReceiver;

    #[async_trait]
    impl Receiver for FailingReceiver {
        async fn subvol(&self, _ctx: &ReceiveContext, _path: &[u8], _uuid: Uuid, _ctransid: u64) -> OpResult {
            Ok(())
        }

        async fn mkdir(&self, _ctx: &ReceiveContext, _path: &[u8]) -> OpResult {
            Err(OpError::Other(anyhow::anyhow!("boom")))
        }
    }

    #[tokio::test]
    async fn exceeding_max_errors_aborts() {
        let recv = Arc::new(FailingReceiver);
        let mut options = ReceiveOptions::new(discard_logger(), recv);
        options.max_errors = 0;
        let result = process_send_stream(build_stream().as_slice(), options).await;
        assert!(matches!(result, Err(ReceiveError::MaxErrorsExceeded { .. })));
    }
}
