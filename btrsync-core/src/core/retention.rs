use crate::core::BtrfsSnapshot;
use chrono::{DateTime, Utc};

/// The two-tier retention policy a [`crate::core::snapshot::SnapshotManager`]
/// enforces: anything older than `retention` is gone outright; within the
/// band `[minimum_retention, retention)` only the earliest snapshot of every
/// `retention_interval`-wide bucket survives; anything younger than
/// `minimum_retention` is always kept.
#[derive(Debug, Clone, Copy)]
pub struct TwoTierPolicy {
    pub minimum_retention: chrono::Duration,
    pub retention: chrono::Duration,
    /// Zero disables the second (bucketing) pass entirely.
    pub retention_interval: chrono::Duration,
}

/// Result of [`evaluate_two_tier`]: snapshots partitioned into what survives
/// and what should be deleted. `now` is fixed by the caller so evaluation is
/// deterministic and testable.
pub struct TwoTierEvaluation<T> {
    pub keep: Vec<T>,
    pub drop: Vec<T>,
}

/// Applies the two-tier policy described in spec §4.F / §8 ("Retention
/// pruning") to `snapshots`, which need not be pre-sorted.
///
/// Pass 1: anything with age strictly greater than `retention` is dropped.
/// Pass 2 (only if `retention_interval` is non-zero): snapshots with age in
/// `(minimum_retention, retention)` are partitioned into buckets — a new
/// bucket starts whenever the gap to the previous (older) snapshot in the
/// remaining set exceeds `retention_interval` — and only the earliest
/// snapshot of each bucket survives. Age is measured against `now`; the
/// `minimum_retention` boundary is exclusive on the "always keep" side
/// (age == minimum_retention already participates in bucketing), matching
/// the open question recorded in DESIGN.md.
pub fn evaluate_two_tier<T: BtrfsSnapshot>(snapshots: Vec<T>, policy: &TwoTierPolicy, now: DateTime<Utc>) -> TwoTierEvaluation<T> {
    let mut ordered = snapshots;
    ordered.sort_unstable_by_key(|s| s.datetime());

    if policy.retention.num_seconds() == 0 {
        return TwoTierEvaluation {
            keep: ordered,
            drop: Vec::new(),
        };
    }

    let mut keep = Vec::new();
    let mut drop = Vec::new();
    let mut banded = Vec::new();

    for snapshot in ordered {
        let age = now - snapshot.datetime();
        if age > policy.retention {
            drop.push(snapshot);
        } else if age > policy.minimum_retention {
            banded.push(snapshot);
        } else {
            keep.push(snapshot);
        }
    }

    if policy.retention_interval.num_seconds() == 0 {
        keep.extend(banded);
        return TwoTierEvaluation { keep, drop };
    }

    // `banded` is ascending by time (oldest first). Walk it oldest-to-newest,
    // starting a fresh bucket whenever the gap since the last snapshot
    // examined (kept or not) exceeds `retention_interval`; keep only the
    // first snapshot of each bucket.
    let mut last_seen: Option<DateTime<Utc>> = None;
    for snapshot in banded {
        let starts_new_bucket = match last_seen {
            Some(prev) => snapshot.datetime() - prev > policy.retention_interval,
            None => true,
        };
        last_seen = Some(snapshot.datetime());
        if starts_new_bucket {
            keep.push(snapshot);
        } else {
            drop.push(snapshot);
        }
    }

    TwoTierEvaluation { keep, drop }
}

#[cfg(test)]
mod two_tier_tests {
    use super::*;
    use crate::core::Snapshot;
    use std::fmt::Display;

    #[derive(Clone)]
    struct Fixture(DateTime<Utc>);

    impl Snapshot for Fixture {
        fn datetime(&self) -> DateTime<Utc> {
            self.0
        }
    }

    impl BtrfsSnapshot for Fixture {
        fn uuid(&self) -> uuid::Uuid {
            uuid::Uuid::nil()
        }
        fn delete(self) -> Result<()> {
            Ok(())
        }
    }

    impl Display for Fixture {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn keeps_earliest_of_each_band_bucket_and_drops_the_rest() {
        let now = Utc::now();
        let ages_minutes = [0, 5, 30, 120, 24 * 60, 3 * 24 * 60, 8 * 24 * 60];
        let snapshots: Vec<Fixture> = ages_minutes
            .iter()
            .map(|m| Fixture(now - chrono::Duration::minutes(*m)))
            .collect();

        let policy = TwoTierPolicy {
            minimum_retention: chrono::Duration::days(1),
            retention: chrono::Duration::days(7),
            retention_interval: chrono::Duration::days(1),
        };

        let result = evaluate_two_tier(snapshots, &policy, now);

        // T-8d exceeds retention and must be dropped.
        assert!(result.drop.iter().any(|s| now - s.datetime() == chrono::Duration::minutes(8 * 24 * 60)));
        // Everything younger than 1 day is always kept.
        for age in [0, 5, 30, 120] {
            assert!(result.keep.iter().any(|s| now - s.datetime() == chrono::Duration::minutes(age)));
        }
        // Within the band, only the earliest of each 1-day bucket survives;
        // T-1d and T-3d fall in different day-wide buckets and both survive.
        assert!(result.keep.iter().any(|s| now - s.datetime() == chrono::Duration::minutes(24 * 60)));
        assert!(result.keep.iter().any(|s| now - s.datetime() == chrono::Duration::minutes(3 * 24 * 60)));
        assert_eq!(result.keep.len() + result.drop.len(), 7);
    }

    #[test]
    fn zero_retention_keeps_everything() {
        let now = Utc::now();
        let snapshots = vec![Fixture(now), Fixture(now - chrono::Duration::days(30))];
        let policy = TwoTierPolicy {
            minimum_retention: chrono::Duration::days(1),
            retention: chrono::Duration::zero(),
            retention_interval: chrono::Duration::days(1),
        };
        let result = evaluate_two_tier(snapshots, &policy, now);
        assert_eq!(result.keep.len(), 2);
        assert!(result.drop.is_empty());
    }
}
