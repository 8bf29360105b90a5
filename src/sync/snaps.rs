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

use crate::sync::sys;
use crate::sync::zfs::Snapshot;

// The `syncoid_` leader keeps sync points interchangeable with syncoid's,
// so an existing replication chain carries over.
const SYNC_SNAP_LEADER: &str = "syncoid";

/// How many snapshots one `zfs destroy` invocation covers while pruning.
/// A tuning knob for ssh round trips, not a correctness property.
pub const DESTROY_BATCH: usize = 10;

/// The name minted for this run's sync point:
/// `syncoid_<hostname>_<YYYY-MM-DD:HH:MM:SS>`.
pub fn sync_snap_name(hostname: &str) -> String {
    format!("{SYNC_SNAP_LEADER}_{hostname}_{}", sys::snapshot_stamp())
}

pub fn sync_snap_prefix(hostname: &str) -> String {
    format!("{SYNC_SNAP_LEADER}_{hostname}_")
}

/// Snapshots eligible for pruning after a successful transfer: sync
/// snapshots minted by this host, never the one this run just created.
/// Other hosts' sync points are left alone.
pub fn prune_candidates<'a>(snaps: &'a [Snapshot], hostname: &str, keep: &str) -> Vec<&'a str> {
    let prefix = sync_snap_prefix(hostname);
    snaps
        .iter()
        .map(|snap| snap.name.as_str())
        .filter(|name| name.starts_with(&prefix) && *name != keep)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(name: &str) -> Snapshot {
        Snapshot {
            name: name.to_string(),
            creation: 0,
        }
    }

    #[test]
    fn name_shape() {
        let name = sync_snap_name("myhost");
        assert!(name.starts_with("syncoid_myhost_"));
        let stamp = name.strip_prefix("syncoid_myhost_").unwrap();
        assert_eq!(stamp.len(), "0000-00-00:00:00:00".len());
    }

    #[test]
    fn never_prunes_fresh_snapshot() {
        let keep = "syncoid_myhost_2026-08-01:12:00:00";
        let snaps = vec![
            snap("syncoid_myhost_2026-07-30:01:00:00"),
            snap(keep),
            snap("syncoid_myhost_2026-07-31:01:00:00"),
        ];
        let pruned = prune_candidates(&snaps, "myhost", keep);
        assert!(!pruned.contains(&keep));
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn only_this_hosts_sync_snapshots() {
        let snaps = vec![
            snap("syncoid_otherhost_2026-07-30:01:00:00"),
            snap("daily-2026-07-30"),
            snap("syncoid_myhost_2026-07-30:01:00:00"),
            snap("syncoid_myhostile_2026-07-30:01:00:00"),
        ];
        let pruned = prune_candidates(&snaps, "myhost", "syncoid_myhost_2026-08-01:12:00:00");
        assert_eq!(pruned, ["syncoid_myhost_2026-07-30:01:00:00"]);
    }
}
