//! Snapshot manager (component F): one instance per configured source
//! subvolume, responsible for creating a fresh read-only snapshot on its
//! configured interval and pruning the snapshot set under the configured
//! two-tier retention policy.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::retention::{evaluate_two_tier, TwoTierPolicy};
use crate::core::{BtrfsSnapshot, Snapshot as SnapshotTrait};
use crate::sys::btrfs::{self, Mount, RootInfo};

/// `§4.F` configuration: interval, minimum retention, retention, retention
/// interval, time format, snapshot directory, snapshot-name prefix.
#[derive(Debug, Clone)]
pub struct SnapshotManagerConfig {
    pub interval: chrono::Duration,
    pub minimum_retention: chrono::Duration,
    pub retention: chrono::Duration,
    pub retention_interval: chrono::Duration,
    pub time_format: String,
    /// Directory (a subvolume itself) under which snapshots are created,
    /// relative to the filesystem's top-level mount point.
    pub snapshot_dir: PathBuf,
    pub name_prefix: String,
}

impl SnapshotManagerConfig {
    /// `interval < minimum_retention < retention`, `retention_interval <
    /// retention`. Zero retention disables pruning entirely and is exempt
    /// from the ordering check against it.
    pub fn validate(&self) -> Result<()> {
        if self.interval >= self.minimum_retention {
            bail!("snapshot interval must be less than minimum retention");
        }
        if self.minimum_retention >= self.retention && self.retention.num_seconds() != 0 {
            bail!("minimum retention must be less than retention");
        }
        if self.retention.num_seconds() != 0 && self.retention_interval >= self.retention {
            bail!("retention interval must be less than retention");
        }
        Ok(())
    }
}

/// A single entry of a source subvolume's snapshot set: a read-only
/// subvolume whose `parent_uuid` is the source's UUID.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl SnapshotTrait for SnapshotHandle {
    fn datetime(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl std::fmt::Display for SnapshotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl BtrfsSnapshot for SnapshotHandle {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn delete(self) -> Result<()> {
        btrfs::delete_snapshot(&self.path).map_err(|e| anyhow!(e))
    }
}

impl From<&RootInfo> for SnapshotHandle {
    fn from(info: &RootInfo) -> Self {
        Self {
            uuid: info.uuid,
            created_at: info.ctime,
            path: info.full_path.clone(),
        }
    }
}

/// Drives `ensure_most_recent_snapshot`/`prune_snapshots` for one source
/// subvolume against its mounted filesystem.
pub struct SnapshotManager {
    config: SnapshotManagerConfig,
    mount: Mount,
    source_path: PathBuf,
    source_uuid: Uuid,
}

impl SnapshotManager {
    pub fn new(config: SnapshotManagerConfig, mount: Mount, source_path: PathBuf, source_uuid: Uuid) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mount,
            source_path,
            source_uuid,
        })
    }

    fn snapshot_dir_path(&self) -> PathBuf {
        self.mount.mount_point.join(&self.config.snapshot_dir)
    }

    /// Ensures the snapshot directory exists as a subvolume (creating it if
    /// missing), and lists every snapshot of `source_uuid` found under it
    /// whose name carries the configured prefix, ordered oldest-first.
    pub fn snapshots(&self) -> Result<Vec<SnapshotHandle>> {
        let dir = self.snapshot_dir_path();
        self.ensure_snapshot_dir(&dir)?;

        let tree = btrfs::build_rb_tree(&self.mount)?;
        let mut snapshots: Vec<SnapshotHandle> = tree
            .in_order()
            .filter(|r| r.parent_uuid == Some(self.source_uuid))
            .filter(|r| r.full_path.starts_with(&dir))
            .filter(|r| r.name.starts_with(&self.config.name_prefix))
            .filter(|r| !r.deleted)
            .map(SnapshotHandle::from)
            .collect();
        snapshots.sort_unstable_by_key(|s| s.created_at);
        Ok(snapshots)
    }

    fn ensure_snapshot_dir(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            if !btrfs::is_subvolume(dir)? {
                bail!("{} exists but is not a subvolume", dir.display());
            }
        } else {
            btrfs::create_subvolume(dir)?;
        }
        Ok(())
    }

    /// Creates a new read-only snapshot named `<prefix>.<now, time_format>`
    /// if the most recent existing snapshot (if any) is older than
    /// `interval`. Returns the snapshot created, or `None` if the existing
    /// one is still fresh enough.
    pub fn ensure_most_recent_snapshot(&self, now: DateTime<Utc>) -> Result<Option<SnapshotHandle>> {
        let existing = self.snapshots()?;
        if let Some(most_recent) = existing.last() {
            if now - most_recent.created_at < self.config.interval {
                return Ok(None);
            }
        }

        let dir = self.snapshot_dir_path();
        let name = format!("{}.{}", self.config.name_prefix, now.format(&self.config.time_format));
        let dest = dir.join(&name);
        btrfs::create_snapshot(&self.source_path, &dest, true)?;
        btrfs::sync_filesystem(&self.mount.mount_point)?;

        let tree = btrfs::build_rb_tree(&self.mount)?;
        let info = tree
            .in_order()
            .find(|r| r.full_path == dest)
            .ok_or_else(|| anyhow!("created snapshot {} not found in root tree after creation", dest.display()))?;
        Ok(Some(SnapshotHandle::from(info)))
    }

    /// Applies the two-tier retention policy (§4.F / §8) to the current
    /// snapshot set and deletes everything it drops. Returns immediately
    /// (deleting nothing) when `retention` is zero.
    pub fn prune_snapshots(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        if self.config.retention.num_seconds() == 0 {
            return Ok(Vec::new());
        }

        let snapshots = self.snapshots()?;
        let policy = TwoTierPolicy {
            minimum_retention: self.config.minimum_retention,
            retention: self.config.retention,
            retention_interval: self.config.retention_interval,
        };
        let evaluation = evaluate_two_tier(snapshots, &policy, now);

        let mut deleted = Vec::with_capacity(evaluation.drop.len());
        for snapshot in evaluation.drop {
            let uuid = snapshot.uuid;
            snapshot.delete()?;
            deleted.push(uuid);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation_rejects_bad_ordering() {
        let mut config = SnapshotManagerConfig {
            interval: chrono::Duration::hours(1),
            minimum_retention: chrono::Duration::hours(2),
            retention: chrono::Duration::days(7),
            retention_interval: chrono::Duration::days(1),
            time_format: "%FT%H-%M-%SZ".into(),
            snapshot_dir: PathBuf::from(".btrsync/snapshots"),
            name_prefix: "btrsync".into(),
        };
        config.validate().unwrap();

        config.minimum_retention = chrono::Duration::days(14);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retention_skips_interval_ordering_check() {
        let config = SnapshotManagerConfig {
            interval: chrono::Duration::hours(1),
            minimum_retention: chrono::Duration::hours(2),
            retention: chrono::Duration::zero(),
            retention_interval: chrono::Duration::zero(),
            time_format: "%FT%H-%M-%SZ".into(),
            snapshot_dir: PathBuf::from(".btrsync/snapshots"),
            name_prefix: "btrsync".into(),
        };
        config.validate().unwrap();
    }
}
