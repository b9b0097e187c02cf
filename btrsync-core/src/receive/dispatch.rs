use std::io::Read;

use slog::{debug, o, trace, warn};

use crate::sendstream::{Command, Scanner};

use super::context::{CurrentSubvolume, ReceiveContext, ReceiveOptions};
use super::error::{OpError, ReceiveError, ReceiveResult};

/// Decodes `reader` as a btrfs send-stream and drives `options.receiver`
/// through it. This is the crate's single entry point for applying a
/// stream to any backend; callers differ only in what `Receiver` they pass.
pub async fn process_send_stream<R: Read>(reader: R, options: ReceiveOptions) -> ReceiveResult<()> {
    let ctx = ReceiveContext::new(&options);
    let log = options.logger.new(o!("start_offset" => options.start_offset));
    let mut scanner = Scanner::with_ignore_checksums(reader, options.ignore_checksums);
    let mut error_count: u32 = 0;

    loop {
        if ctx.is_deadline_exceeded() {
            finish_best_effort(&ctx, &options, &log).await;
            return Err(ReceiveError::DeadlineExceeded);
        }
        if ctx.is_cancelled() {
            finish_best_effort(&ctx, &options, &log).await;
            return Err(ReceiveError::Cancelled);
        }

        let scanned = match scanner.scan() {
            Ok(Some(pair)) => pair,
            Ok(None) => break,
            Err(e) => {
                finish_best_effort(&ctx, &options, &log).await;
                return Err(e.into());
            }
        };

        let command = Command::from_wire(scanned.0, &scanned.1)?;
        let before_start = ctx.offset() < options.start_offset;

        if before_start {
            if let Command::Subvol { path, uuid, ctransid } = &command {
                ctx.set_current_subvolume(Some(CurrentSubvolume {
                    path: path.clone(),
                    uuid: *uuid,
                    ctransid: *ctransid,
                    clone_uuid: None,
                    clone_ctransid: None,
                }));
            } else if let Command::Snapshot {
                path,
                uuid,
                ctransid,
                clone_uuid,
                clone_ctransid,
            } = &command
            {
                ctx.set_current_subvolume(Some(CurrentSubvolume {
                    path: path.clone(),
                    uuid: *uuid,
                    ctransid: *ctransid,
                    clone_uuid: Some(*clone_uuid),
                    clone_ctransid: Some(*clone_ctransid),
                }));
            }
            ctx.advance_offset();
            continue;
        }

        trace!(log, "dispatching command"; "command" => ?command.command_type());

        if let Some(hooks) = &options.hooks {
            match hooks.pre_op(&ctx, &command).await {
                Ok(()) => {}
                Err(OpError::SkipCommand) => {
                    ctx.advance_offset();
                    continue;
                }
                Err(e) => match account_error(&mut error_count, options.max_errors, e, &log) {
                    Ok(true) => {}
                    Ok(false) => {
                        ctx.advance_offset();
                        continue;
                    }
                    Err(fatal) => {
                        finish_best_effort(&ctx, &options, &log).await;
                        return Err(fatal);
                    }
                },
            }
        }

        let result = dispatch_one(&ctx, &options, &command).await;

        if let Err(e) = result {
            match e {
                OpError::SkipCommand => {}
                OpError::Unsupported if !is_required(&command) => {
                    warn!(log, "unsupported operation ignored"; "command" => ?command.command_type());
                }
                other => {
                    if let Err(fatal) = account_error(&mut error_count, options.max_errors, other, &log) {
                        finish_best_effort(&ctx, &options, &log).await;
                        return Err(fatal);
                    }
                }
            }
        }

        if let Some(hooks) = &options.hooks {
            if let Err(e) = hooks.post_op(&ctx, &command).await {
                match e {
                    OpError::SkipCommand => {}
                    other => {
                        if let Err(fatal) = account_error(&mut error_count, options.max_errors, other, &log) {
                            finish_best_effort(&ctx, &options, &log).await;
                            return Err(fatal);
                        }
                    }
                }
            }
        }

        if matches!(command, Command::End) && options.honor_end {
            finish_best_effort(&ctx, &options, &log).await;
            ctx.advance_offset();
            return Ok(());
        }

        ctx.advance_offset();
    }

    debug!(log, "stream ended"; "offset" => ctx.offset());
    finish_best_effort(&ctx, &options, &log).await;
    Ok(())
}

/// Increments the error counter for a non-skip error and returns whether
/// the budget has been exceeded.
fn account_error(count: &mut u32, max_errors: u32, err: OpError, log: &slog::Logger) -> Result<bool, ReceiveError> {
    *count += 1;
    let err = match err {
        OpError::Other(e) => e,
        OpError::Unsupported => anyhow::anyhow!("operation not supported by this backend"),
        OpError::SkipCommand => return Ok(false),
    };
    warn!(log, "operation failed"; "error" => %err, "count" => *count, "max" => max_errors);
    if *count > max_errors {
        return Err(ReceiveError::MaxErrorsExceeded { last: err, count: *count });
    }
    Ok(true)
}

fn is_required(command: &Command) -> bool {
    matches!(command, Command::Subvol { .. } | Command::Snapshot { .. } | Command::Write { .. })
}

async fn finish_best_effort(ctx: &ReceiveContext, options: &ReceiveOptions, log: &slog::Logger) {
    if ctx.current_subvolume().is_some() {
        if let Err(e) = options.receiver.finish_subvolume(ctx).await {
            warn!(log, "finish_subvolume failed during termination"; "error" => ?e);
        }
        ctx.set_current_subvolume(None);
    }
}

async fn dispatch_one(ctx: &ReceiveContext, options: &ReceiveOptions, command: &Command) -> Result<(), OpError> {
    let recv = options.receiver.as_ref();
    match command {
        Command::Subvol { path, uuid, ctransid } => {
            finish_if_open(ctx, recv).await?;
            recv.subvol(ctx, path, *uuid, *ctransid).await?;
            ctx.set_current_subvolume(Some(CurrentSubvolume {
                path: path.clone(),
                uuid: *uuid,
                ctransid: *ctransid,
                clone_uuid: None,
                clone_ctransid: None,
            }));
            Ok(())
        }
        Command::Snapshot {
            path,
            uuid,
            ctransid,
            clone_uuid,
            clone_ctransid,
        } => {
            finish_if_open(ctx, recv).await?;
            recv.snapshot(ctx, path, *uuid, *ctransid, *clone_uuid, *clone_ctransid).await?;
            ctx.set_current_subvolume(Some(CurrentSubvolume {
                path: path.clone(),
                uuid: *uuid,
                ctransid: *ctransid,
                clone_uuid: Some(*clone_uuid),
                clone_ctransid: Some(*clone_ctransid),
            }));
            Ok(())
        }
        Command::Mkfile { path } => recv.mkfile(ctx, path).await,
        Command::Mkdir { path } => recv.mkdir(ctx, path).await,
        Command::Mknod { path, mode, rdev } => recv.mknod(ctx, path, *mode, *rdev).await,
        Command::Mkfifo { path } => recv.mkfifo(ctx, path).await,
        Command::Mksock { path } => recv.mksock(ctx, path).await,
        Command::Symlink { path, ino, path_link } => recv.symlink(ctx, path, *ino, path_link).await,
        Command::Rename { path, path_to } => recv.rename(ctx, path, path_to).await,
        Command::Link { path, path_link } => recv.link(ctx, path, path_link).await,
        Command::Unlink { path } => recv.unlink(ctx, path).await,
        Command::Rmdir { path } => recv.rmdir(ctx, path).await,
        Command::SetXattr { path, name, data } => recv.set_xattr(ctx, path, name, data).await,
        Command::RemoveXattr { path, name } => recv.remove_xattr(ctx, path, name).await,
        Command::Write { path, offset, data } => recv.write(ctx, path, *offset, data).await,
        Command::Clone {
            path,
            offset,
            len,
            clone_uuid,
            clone_ctransid,
            clone_path,
            clone_offset,
        } => {
            recv.clone_range(ctx, path, *offset, *len, *clone_uuid, *clone_ctransid, clone_path, *clone_offset)
                .await
        }
        Command::Truncate { path, size } => recv.truncate(ctx, path, *size).await,
        Command::Chmod { path, mode } => recv.chmod(ctx, path, *mode).await,
        Command::Chown { path, uid, gid } => recv.chown(ctx, path, *uid, *gid).await,
        Command::Utimes { path, atime, mtime, ctime } => recv.utimes(ctx, path, *atime, *mtime, *ctime).await,
        Command::End => {
            if !options.honor_end {
                finish_if_open(ctx, recv).await?;
            }
            Ok(())
        }
        Command::UpdateExtent { path, offset, size } => recv.update_extent(ctx, path, *offset, *size).await,
        Command::Fallocate { path, mode, offset, size } => recv.fallocate(ctx, path, *mode, *offset, *size).await,
        Command::Fileattr { path, attr } => recv.fileattr(ctx, path, *attr).await,
        Command::EncodedWrite {
            path,
            offset,
            unencoded_file_len,
            unencoded_len,
            unencoded_offset,
            compression,
            encryption,
            data,
        } => {
            recv.encoded_write(
                ctx,
                path,
                *offset,
                *unencoded_file_len,
                *unencoded_len,
                *unencoded_offset,
                *compression,
                *encryption,
                data,
            )
            .await
        }
        Command::EnableVerity {
            path,
            algorithm,
            block_size,
            salt,
            signature,
        } => recv.enable_verity(ctx, path, *algorithm, *block_size, salt, signature).await,
    }
}

async fn finish_if_open(ctx: &ReceiveContext, recv: &(dyn super::Receiver)) -> Result<(), OpError> {
    if ctx.current_subvolume().is_some() {
        recv.finish_subvolume(ctx).await?;
        ctx.set_current_subvolume(None);
    }
    Ok(())
}
