//  zfsync: ZFS dataset replication over SSH
//  Copyright (C) 2026  The zfsync authors

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::sync::error::SyncError;
use crate::sync::zfs::Snapshot;

/// What to send for one dataset, decided from the snapshot inventories of
/// both sides after the run's sync snapshot has been minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlan {
    /// Target absent and the source had no snapshots before this run: the
    /// fresh sync snapshot is the whole transfer.
    InitialOnly { oldest: String },
    /// Target absent: bootstrap from the source's oldest snapshot, then
    /// catch up to the fresh sync snapshot.
    InitialThenIncremental { oldest: String, new_sync: String },
    /// Target present: incremental from the most recent snapshot both sides
    /// agree on.
    IncrementalFromMatch { base: String, new_sync: String },
}

fn by_creation_then_name(a: &&Snapshot, b: &&Snapshot) -> std::cmp::Ordering {
    (a.creation, &a.name).cmp(&(b.creation, &b.name))
}

/// The source's oldest snapshot; ctime ties break on the lexically smallest
/// name so the bootstrap choice is deterministic.
pub fn oldest(snaps: &[Snapshot]) -> Option<&Snapshot> {
    snaps.iter().min_by(by_creation_then_name)
}

/// The most recent snapshot whose name and creation time are equal on both
/// sides; ctime ties break on the lexically greatest name.
pub fn latest_common<'a>(source: &'a [Snapshot], target: &[Snapshot]) -> Option<&'a Snapshot> {
    source
        .iter()
        .filter(|s| {
            target
                .iter()
                .any(|t| t.name == s.name && t.creation == s.creation)
        })
        .max_by(by_creation_then_name)
}

/// Decide the plan for one dataset. `source_snaps` is the inventory from
/// before the sync snapshot was minted; `target_snaps` is `Some` exactly
/// when the target dataset exists.
pub fn plan_sync(
    source_snaps: &[Snapshot],
    target_snaps: Option<&[Snapshot]>,
    new_sync: &str,
    source_desc: &str,
    target_desc: &str,
) -> Result<SyncPlan, SyncError> {
    match target_snaps {
        None => match oldest(source_snaps) {
            None => Ok(SyncPlan::InitialOnly {
                oldest: new_sync.to_string(),
            }),
            Some(snap) => Ok(SyncPlan::InitialThenIncremental {
                oldest: snap.name.clone(),
                new_sync: new_sync.to_string(),
            }),
        },
        Some(target) => match latest_common(source_snaps, target) {
            Some(base) => Ok(SyncPlan::IncrementalFromMatch {
                base: base.name.clone(),
                new_sync: new_sync.to_string(),
            }),
            None => Err(SyncError::NoCommonSnapshot {
                src: source_desc.to_string(),
                target: target_desc.to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str, creation: u64) -> Snapshot {
        Snapshot {
            name: name.to_string(),
            creation,
        }
    }

    #[test]
    fn bootstrap_from_oldest() {
        let source = vec![snap("b", 200), snap("a", 100)];
        let plan = plan_sync(&source, None, "sync1", "src", "tgt").unwrap();
        assert_eq!(
            plan,
            SyncPlan::InitialThenIncremental {
                oldest: "a".to_string(),
                new_sync: "sync1".to_string(),
            }
        );
    }

    #[test]
    fn bootstrap_of_empty_source_sends_only_sync_snap() {
        let plan = plan_sync(&[], None, "sync1", "src", "tgt").unwrap();
        assert_eq!(
            plan,
            SyncPlan::InitialOnly {
                oldest: "sync1".to_string(),
            }
        );
    }

    #[test]
    fn incremental_from_latest_common() {
        let source = vec![snap("a", 10), snap("b", 20), snap("s", 30)];
        let target = vec![snap("a", 10), snap("s", 30)];
        let plan = plan_sync(&source, Some(&target), "sync1", "src", "tgt").unwrap();
        assert_eq!(
            plan,
            SyncPlan::IncrementalFromMatch {
                base: "s".to_string(),
                new_sync: "sync1".to_string(),
            }
        );
    }

    #[test]
    fn match_requires_equal_creation_time() {
        let source = vec![snap("a", 10), snap("s", 30)];
        // same name, different ctime: a rewritten snapshot is no anchor
        let target = vec![snap("a", 10), snap("s", 31)];
        let plan = plan_sync(&source, Some(&target), "sync1", "src", "tgt").unwrap();
        assert_eq!(
            plan,
            SyncPlan::IncrementalFromMatch {
                base: "a".to_string(),
                new_sync: "sync1".to_string(),
            }
        );
    }

    #[test]
    fn ctime_tie_breaks_to_lexically_greatest() {
        let source = vec![snap("alpha", 10), snap("beta", 10)];
        let target = vec![snap("beta", 10), snap("alpha", 10)];
        let base = latest_common(&source, &target).unwrap();
        assert_eq!(base.name, "beta");
    }

    #[test]
    fn oldest_tie_breaks_to_lexically_smallest() {
        let source = vec![snap("beta", 10), snap("alpha", 10)];
        assert_eq!(oldest(&source).unwrap().name, "alpha");
    }

    #[test]
    fn no_common_snapshot_is_fatal() {
        let source = vec![snap("a", 10)];
        let target = vec![snap("z", 99)];
        let err = plan_sync(&source, Some(&target), "sync1", "src", "tgt").unwrap_err();
        assert!(matches!(err, SyncError::NoCommonSnapshot { .. }));
    }
}
