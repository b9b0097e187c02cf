//! One full replication cycle (§2's "data flow for one mirror cycle"),
//! tying the snapshot manager (F), sync manager (G), and concurrency queue
//! (H) together against a resolved configuration. Both `btrsync-worker`'s
//! daemon loop and `btrsync-ctl`'s one-shot subcommands drive replication
//! through this module rather than duplicating the wiring.

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use slog::{o, Logger};
use uuid::Uuid;

use crate::core::mirror::{MirrorFormat, MirrorScheme, MirrorTarget, SyncManager};
use crate::core::observation::{ObservableEvent, ObservableEventStage, ObservationEmitter, ObservationRouter};
use crate::core::queue::ConcurrencyQueue;
use crate::core::snapshot::{SnapshotManager, SnapshotManagerConfig};
use crate::model::config::{Config, MirrorConfig, ResolvedSubvolume};
use crate::sys::btrfs::{self, Mount};

/// Tallies of one [`run_cycle`] pass, returned for `btrsync-ctl`'s human
/// output and for the worker daemon's status surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub subvolumes_scanned: usize,
    pub snapshots_created: usize,
    pub snapshots_pruned: usize,
    pub mirrors_synced: usize,
    pub mirror_entries_pruned: usize,
}

/// Runs one sweep across every enabled (volume, subvolume) pair in `config`:
/// ensures a fresh snapshot, prunes the retention set, syncs to every
/// configured mirror, then prunes each mirror of entries the source no
/// longer carries. Work fans out across `config.concurrency` (default 1)
/// bounded workers, per §5's top-level fanout.
pub async fn run_cycle(config: &Config, logger: &Logger) -> Result<CycleReport> {
    let resolved = config.resolved_subvolumes()?;
    let observers = ObservationRouter::new(config.observers.clone());
    let queue = ConcurrencyQueue::new(config.concurrency.unwrap_or(1));

    let created = Arc::new(AtomicUsize::new(0));
    let pruned = Arc::new(AtomicUsize::new(0));
    let synced = Arc::new(AtomicUsize::new(0));
    let mirror_pruned = Arc::new(AtomicUsize::new(0));
    let scanned = resolved.len();

    for subvolume in resolved {
        let logger = logger.new(o!("subvolume" => subvolume.subvolume.path.display().to_string()));
        let observers = observers.route(&subvolume.subvolume.path.display().to_string(), ObservableEvent::Snapshot);
        let custom_urls: Vec<(Uuid, Option<String>)> = observers.iter().map(|o| (o.healthcheck_id, o.custom_url.clone())).collect();
        let created = Arc::clone(&created);
        let pruned = Arc::clone(&pruned);
        let synced = Arc::clone(&synced);
        let mirror_pruned = Arc::clone(&mirror_pruned);

        let job = build_subvolume_job(&subvolume)?;

        queue.push(async move {
            emit_all(&custom_urls, ObservableEventStage::Starting).await;
            let result = job.run(&logger).await;
            match &result {
                Ok(stats) => {
                    created.fetch_add(stats.snapshots_created, Ordering::Relaxed);
                    pruned.fetch_add(stats.snapshots_pruned, Ordering::Relaxed);
                    synced.fetch_add(stats.mirrors_synced, Ordering::Relaxed);
                    mirror_pruned.fetch_add(stats.mirror_entries_pruned, Ordering::Relaxed);
                    emit_all(&custom_urls, ObservableEventStage::Succeeded).await;
                }
                Err(e) => {
                    emit_all(&custom_urls, ObservableEventStage::Failed(e.to_string())).await;
                }
            }
            result.map(|_| ())
        });
    }

    queue.wait().await?;

    Ok(CycleReport {
        subvolumes_scanned: scanned,
        snapshots_created: created.load(Ordering::Relaxed),
        snapshots_pruned: pruned.load(Ordering::Relaxed),
        mirrors_synced: synced.load(Ordering::Relaxed),
        mirror_entries_pruned: mirror_pruned.load(Ordering::Relaxed),
    })
}

/// Like [`run_cycle`] but skips `ensure_most_recent_snapshot` and the send
/// side of sync: only prunes each subvolume's retention set and each
/// mirror's stale entries. Used by `btrsync-ctl prune`, which is meant to
/// run ad hoc between scheduled cycles without forcing a new snapshot.
pub async fn prune_cycle(config: &Config, logger: &Logger) -> Result<CycleReport> {
    let resolved = config.resolved_subvolumes()?;
    let queue = ConcurrencyQueue::new(config.concurrency.unwrap_or(1));

    let pruned = Arc::new(AtomicUsize::new(0));
    let mirror_pruned = Arc::new(AtomicUsize::new(0));
    let scanned = resolved.len();

    for subvolume in resolved {
        let logger = logger.new(o!("subvolume" => subvolume.subvolume.path.display().to_string()));
        let pruned = Arc::clone(&pruned);
        let mirror_pruned = Arc::clone(&mirror_pruned);

        let job = build_subvolume_job(&subvolume)?;

        queue.push(async move {
            let stats = job.run_prune_only(&logger).await?;
            pruned.fetch_add(stats.snapshots_pruned, Ordering::Relaxed);
            mirror_pruned.fetch_add(stats.mirror_entries_pruned, Ordering::Relaxed);
            Ok(())
        });
    }

    queue.wait().await?;

    Ok(CycleReport {
        subvolumes_scanned: scanned,
        snapshots_created: 0,
        snapshots_pruned: pruned.load(Ordering::Relaxed),
        mirrors_synced: 0,
        mirror_entries_pruned: mirror_pruned.load(Ordering::Relaxed),
    })
}

async fn emit_all(targets: &[(Uuid, Option<String>)], stage: ObservableEventStage) {
    for (healthcheck_id, custom_url) in targets {
        let emitter = match custom_url {
            Some(url) => ObservationEmitter::new(url.clone()),
            None => ObservationEmitter::default(),
        };
        if let Err(e) = emitter.emit(*healthcheck_id, stage.clone()).await {
            slog_scope::warn!("observation ping failed"; "error" => %e);
        }
    }
}

struct SubvolumeJob {
    manager: SnapshotManager,
    source_uuid: Uuid,
    mirrors: Vec<MirrorJob>,
}

struct MirrorJob {
    name: String,
    source_mount: Mount,
    target: BuiltMirrorTarget,
    compressed: bool,
}

/// [`MirrorTarget`] can't be cloned (it may own an `ssh2::Session`), so each
/// mirror job carries the pieces needed to build a fresh one per run instead
/// of trying to share one across the queue's worker tasks.
enum BuiltMirrorTarget {
    Plain {
        scheme: MirrorScheme,
        format: MirrorFormat,
        root: PathBuf,
    },
    Ssh {
        format: MirrorFormat,
        root: PathBuf,
        host: String,
        port: u16,
        user: String,
        identity_file: Option<PathBuf>,
    },
}

impl BuiltMirrorTarget {
    fn build(&self) -> Result<MirrorTarget> {
        match self {
            BuiltMirrorTarget::Plain { scheme, format, root } => Ok(MirrorTarget::new(*scheme, *format, root.clone(), None)),
            BuiltMirrorTarget::Ssh {
                format,
                root,
                host,
                port,
                user,
                identity_file,
            } => {
                let session = connect_ssh(host, *port, user, identity_file.as_deref())?;
                Ok(MirrorTarget::new(MirrorScheme::Ssh, *format, root.clone(), Some(session)))
            }
        }
    }
}

struct JobStats {
    snapshots_created: usize,
    snapshots_pruned: usize,
    mirrors_synced: usize,
    mirror_entries_pruned: usize,
}

impl SubvolumeJob {
    async fn run(&self, logger: &Logger) -> Result<JobStats> {
        let mut stats = JobStats {
            snapshots_created: 0,
            snapshots_pruned: 0,
            mirrors_synced: 0,
            mirror_entries_pruned: 0,
        };

        let now = Utc::now();
        if self.manager.ensure_most_recent_snapshot(now)?.is_some() {
            stats.snapshots_created += 1;
        }
        stats.snapshots_pruned += self.manager.prune_snapshots(now)?.len();

        let snapshots = self.manager.snapshots()?;
        for mirror in &self.mirrors {
            let target = mirror.target.build()?;
            let sync_logger = logger.new(o!("mirror" => mirror.name.clone()));
            let sync = SyncManager::new(mirror.source_mount.clone(), self.source_uuid, target, mirror.compressed, sync_logger)
                .map_err(|e| anyhow!(e))?;
            sync.sync(&snapshots).await?;
            stats.mirrors_synced += 1;
            let removed = sync.prune(&snapshots).await?;
            stats.mirror_entries_pruned += removed.len();
        }

        Ok(stats)
    }

    /// Retention pruning plus mirror pruning, without creating a snapshot
    /// or sending anything new.
    async fn run_prune_only(&self, logger: &Logger) -> Result<JobStats> {
        let mut stats = JobStats {
            snapshots_created: 0,
            snapshots_pruned: 0,
            mirrors_synced: 0,
            mirror_entries_pruned: 0,
        };

        let now = Utc::now();
        stats.snapshots_pruned += self.manager.prune_snapshots(now)?.len();

        let snapshots = self.manager.snapshots()?;
        for mirror in &self.mirrors {
            let target = mirror.target.build()?;
            let sync_logger = logger.new(o!("mirror" => mirror.name.clone()));
            let sync = SyncManager::new(mirror.source_mount.clone(), self.source_uuid, target, mirror.compressed, sync_logger)
                .map_err(|e| anyhow!(e))?;
            let removed = sync.prune(&snapshots).await?;
            stats.mirror_entries_pruned += removed.len();
        }

        Ok(stats)
    }
}

fn to_chrono_duration(d: std::time::Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(|e| anyhow!("duration {:?} out of range: {}", d, e))
}

fn build_subvolume_job(resolved: &ResolvedSubvolume<'_>) -> Result<SubvolumeJob> {
    let source_path = resolved.subvolume.path.clone();
    let mount = btrfs::find_root_mount(&source_path)
        .with_context(|| format!("{} is not on a mounted btrfs filesystem", source_path.display()))?;

    let tree = btrfs::build_rb_tree(&mount)?;
    let source_uuid = tree
        .in_order()
        .find(|r| r.full_path == source_path)
        .map(|r| r.uuid)
        .ok_or_else(|| anyhow!("{} is not a subvolume", source_path.display()))?;

    let snapshot_config = SnapshotManagerConfig {
        interval: to_chrono_duration(resolved.settings.snapshot_interval)?,
        minimum_retention: to_chrono_duration(resolved.settings.snapshot_min_retention)?,
        retention: to_chrono_duration(resolved.settings.snapshot_retention)?,
        retention_interval: to_chrono_duration(resolved.settings.snapshot_retention_interval)?,
        time_format: resolved.settings.time_format.clone(),
        snapshot_dir: resolved.settings.snapshots_dir.clone(),
        name_prefix: resolved.snapshot_name_prefix().to_owned(),
    };
    let manager = SnapshotManager::new(snapshot_config, mount.clone(), source_path, source_uuid)?;

    let mirrors = resolved
        .mirrors
        .iter()
        .map(|m| build_mirror_job(m, &mount))
        .collect::<Result<Vec<_>>>()?;

    Ok(SubvolumeJob {
        manager,
        source_uuid,
        mirrors,
    })
}

fn build_mirror_job(mirror: &MirrorConfig, source_mount: &Mount) -> Result<MirrorJob> {
    let (scheme, root) = crate::core::mirror::parse_mirror_url(&mirror.path).map_err(|e| anyhow!(e))?;
    let format = MirrorFormat::parse(&mirror.format).map_err(|e| anyhow!(e))?;
    let source_mount = source_mount.clone();

    let target = match scheme {
        MirrorScheme::File => BuiltMirrorTarget::Plain { scheme, format, root },
        MirrorScheme::Ssh => {
            let (host, path) = split_ssh_host(&mirror.path)?;
            BuiltMirrorTarget::Ssh {
                format,
                root: path,
                host,
                port: mirror.ssh_port.unwrap_or(22),
                user: mirror.ssh_user.clone().unwrap_or_else(|| "root".to_owned()),
                identity_file: mirror.ssh_identity_file.clone(),
            }
        }
    };

    Ok(MirrorJob {
        name: mirror.name.clone(),
        source_mount,
        target,
        compressed: mirror.compressed,
    })
}

fn split_ssh_host(url: &str) -> Result<(String, PathBuf)> {
    let rest = url.strip_prefix("ssh://").ok_or_else(|| anyhow!("not an ssh:// url: {}", url))?;
    let slash = rest.find('/').ok_or_else(|| anyhow!("ssh mirror url missing a path: {}", url))?;
    Ok((rest[..slash].to_owned(), PathBuf::from(&rest[slash..])))
}

fn connect_ssh(host: &str, port: u16, user: &str, identity_file: Option<&Path>) -> Result<ssh2::Session> {
    let stream = TcpStream::connect((host, port)).with_context(|| format!("connecting to {}:{}", host, port))?;
    let mut session = ssh2::Session::new().context("creating ssh session")?;
    session.set_tcp_stream(stream);
    session.handshake().context("ssh handshake failed")?;

    match identity_file {
        Some(key) => session.userauth_pubkey_file(user, None, key, None).context("ssh pubkey authentication failed")?,
        None => session.userauth_agent(user).context("ssh agent authentication failed")?,
    }
    if !session.authenticated() {
        return Err(anyhow!("ssh authentication to {} did not succeed", host));
    }
    Ok(session)
}
