pub mod engine;
pub mod mirror;
pub mod observation;
pub mod queue;
pub mod retention;
pub mod snapshot;
pub mod system;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use uuid::Uuid;

/// Anything with a point in time it was taken at.
pub trait Snapshot: Display {
    fn datetime(&self) -> DateTime<Utc>;
}

/// A snapshot backed by a real btrfs subvolume, identifiable and deletable.
pub trait BtrfsSnapshot: Snapshot {
    fn uuid(&self) -> Uuid;
    fn delete(self) -> Result<()>;
}
