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

use crate::sync::cmd::{Cmd, CmdTarget};
use crate::sync::error::SyncError;
use crate::sync::snaps::DESTROY_BATCH;
use log::{debug, warn};
use regex_lite::Regex;

const DOES_NOT_EXIST: &str = "dataset does not exist";

/// Estimates below this floor make pv's meter nonsensical.
const ESTIMATE_FLOOR: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub name: String,
    pub creation: u64,
}

/// Typed ZFS operations against one endpoint. Commands run through sudo
/// when the endpoint's user is not root.
pub struct Zfs<'run> {
    target: &'run CmdTarget<'run>,
    sudo: bool,
}

impl<'run> Zfs<'run> {
    pub fn new(target: &'run CmdTarget<'run>, is_root: bool) -> Self {
        Self {
            target,
            sudo: !is_root,
        }
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    fn zfs(&self) -> Cmd<'run> {
        Cmd::new(self.target, self.sudo, "zfs")
    }

    fn zfs_error(cmd: &Cmd, output: &std::process::Output, doing: &str) -> SyncError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        SyncError::Zfs(format!("{doing} ({cmd}): {}", stderr.trim()))
    }

    pub fn dataset_exists(&self, fs: &str) -> Result<bool, SyncError> {
        let mut cmd = self.zfs();
        cmd.args(["get", "-H", "name"]).arg(fs);
        debug!("checking whether {fs} exists on {} using {cmd}", self.target.pretty_str());
        let output = cmd.capture()?;
        if !output.status.success() {
            if output
                .stderr
                .windows(DOES_NOT_EXIST.len())
                .any(|w| w == DOES_NOT_EXIST.as_bytes())
            {
                return Ok(false);
            }
            return Err(Self::zfs_error(&cmd, &output, "failed to probe dataset"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(first_field_is(&stdout, fs))
    }

    /// Depth-1 snapshots of `fs` with their creation timestamps. Lines not
    /// of the form `<fs>@name` are skipped with a warning.
    pub fn snapshots(&self, fs: &str) -> Result<Vec<Snapshot>, SyncError> {
        let mut cmd = self.zfs();
        cmd.args(["get", "-Hpd", "1", "-t", "snapshot", "creation"]).arg(fs);
        debug!("listing snapshots of {fs} using {cmd}");
        let output = cmd.capture()?;
        if !output.status.success() {
            return Err(Self::zfs_error(&cmd, &output, "failed to list snapshots"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_snapshot_lines(fs, &stdout))
    }

    /// A single property value, the third tab-separated field of
    /// `zfs get -H`.
    pub fn get_prop(&self, fs: &str, property: &str) -> Result<String, SyncError> {
        let mut cmd = self.zfs();
        cmd.args(["get", "-H", property]).arg(fs);
        debug!("getting {property} of {fs} using {cmd}");
        let output = cmd.capture()?;
        if !output.status.success() {
            return Err(Self::zfs_error(&cmd, &output, "failed to get property"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        prop_value(&stdout).map(str::to_string).ok_or_else(|| {
            SyncError::Zfs(format!(
                "expected zfs get -H {property} {fs} to return at least three fields"
            ))
        })
    }

    pub fn set_prop(&self, fs: &str, property: &str, value: &str) -> Result<(), SyncError> {
        let mut cmd = self.zfs();
        cmd.arg("set").arg(format!("{property}={value}")).arg(fs);
        debug!("setting {property}={value} on {fs} using {cmd}");
        let output = cmd.capture()?;
        if !output.status.success() {
            return Err(Self::zfs_error(&cmd, &output, "failed to set property"));
        }
        Ok(())
    }

    pub fn snapshot(&self, fs: &str, name: &str) -> Result<(), SyncError> {
        let mut cmd = self.zfs();
        cmd.arg("snapshot").arg(format!("{fs}@{name}"));
        debug!("creating snapshot using {cmd}");
        let output = cmd.capture()?;
        if !output.status.success() {
            return Err(Self::zfs_error(&cmd, &output, "failed to create snapshot"));
        }
        Ok(())
    }

    /// Destroy snapshots in batches of [`DESTROY_BATCH`] to bound ssh round
    /// trips. A failed batch is logged and skipped; returns how many
    /// snapshots were destroyed.
    pub fn destroy_snapshots(&self, fs: &str, names: &[&str]) -> usize {
        let mut destroyed = 0;
        for batch in names.chunks(DESTROY_BATCH) {
            let mut cmd = self.zfs();
            cmd.arg("destroy").arg(format!("{fs}@{}", batch.join(",")));
            debug!("pruning snapshots using {cmd}");
            match cmd.capture() {
                Ok(output) if output.status.success() => destroyed += batch.len(),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!("failed to destroy snapshots of {fs}: {}", stderr.trim());
                }
                Err(e) => warn!("failed to destroy snapshots of {fs}: {e}"),
            }
        }
        destroyed
    }

    /// `fs` and all child datasets, depth-first, `fs` itself first.
    pub fn list_children(&self, fs: &str) -> Result<Vec<String>, SyncError> {
        let mut cmd = self.zfs();
        cmd.args(["list", "-o", "name", "-t", "filesystem,volume", "-Hr"]).arg(fs);
        debug!("listing child datasets of {fs} using {cmd}");
        let output = cmd.capture()?;
        if !output.status.success() {
            return Err(Self::zfs_error(&cmd, &output, "failed to list child datasets"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(str::to_string).collect())
    }

    /// Dry-run size of the send, for the progress meter. Zero means
    /// unavailable; small positive values are clamped so pv's scale stays
    /// sane.
    pub fn estimate_send(&self, fs: &str, from: Option<&str>, to: &str) -> u64 {
        let mut cmd = self.zfs();
        cmd.args(["send", "-nP"]);
        if let Some(from) = from {
            cmd.arg("-I").arg(format!("{fs}@{from}"));
        }
        cmd.arg(format!("{fs}@{to}"));
        debug!("estimating send size using {cmd}");
        let Ok(output) = cmd.capture() else {
            return 0;
        };
        if !output.status.success() {
            return 0;
        }
        // -P reports on stdout, older releases put the summary on stderr
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let size = parse_estimate(&stdout).or_else(|| parse_estimate(&stderr));
        clamp_estimate(size.unwrap_or(0))
    }
}

/// Whether the target host is currently receiving into `fs`. Racy by
/// nature; callers re-check immediately before each send.
pub fn receive_in_progress(target: &CmdTarget, fs: &str) -> Result<bool, SyncError> {
    let mut ps = Cmd::new(target, false, "ps");
    ps.args(["-Ao", "args="]);
    debug!("checking whether {fs} is already in zfs receive using {ps}");
    let output = ps.capture()?;
    if !output.status.success() {
        return Err(SyncError::Zfs(format!(
            "failed to list processes on {}",
            target.pretty_str()
        )));
    }
    let pattern = recv_pattern();
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if pattern.is_match(line) && line.contains(fs) {
            debug!("process '{line}' matches target {fs}");
            return Ok(true);
        }
    }
    Ok(false)
}

fn recv_pattern() -> Regex {
    Regex::new(r"zfs *(receive|recv)").expect("regex pattern should be correct")
}

/// Forces `readonly=on` on an existing target for the duration of the
/// transfer, restoring the captured value on every exit path.
pub struct ReadonlyGuard<'zfs, 'run> {
    zfs: &'zfs Zfs<'run>,
    fs: &'zfs str,
    original: String,
    restored: bool,
}

impl<'zfs, 'run> ReadonlyGuard<'zfs, 'run> {
    pub fn set(zfs: &'zfs Zfs<'run>, fs: &'zfs str) -> Result<Self, SyncError> {
        let original = zfs.get_prop(fs, "readonly")?;
        zfs.set_prop(fs, "readonly", "on")?;
        Ok(Self {
            zfs,
            fs,
            original,
            restored: false,
        })
    }

    /// Explicit restore on the success and error paths, so failures
    /// surface. The drop path only covers unwinds and early returns.
    pub fn restore(mut self) -> Result<(), SyncError> {
        self.restored = true;
        self.zfs.set_prop(self.fs, "readonly", &self.original)
    }
}

impl<'zfs, 'run> Drop for ReadonlyGuard<'zfs, 'run> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.zfs.set_prop(self.fs, "readonly", &self.original) {
            warn!(
                "failed to restore readonly={} on {}: {e}",
                self.original, self.fs
            );
        }
    }
}

fn first_field_is(stdout: &str, fs: &str) -> bool {
    stdout
        .split_whitespace()
        .next()
        .is_some_and(|field| field == fs)
}

fn prop_value(stdout: &str) -> Option<&str> {
    stdout.trim().split('\t').nth(2)
}

fn parse_snapshot_lines(fs: &str, stdout: &str) -> Vec<Snapshot> {
    let mut snapshots = Vec::new();
    for line in stdout.lines() {
        let mut tsv = line.split('\t');
        let Some(name) = tsv
            .next()
            .and_then(|field| field.strip_prefix(fs))
            .and_then(|rest| rest.strip_prefix('@'))
        else {
            warn!("skipping snapshot line not of the form {fs}@NAME: {line}");
            continue;
        };
        // field layout: name, property, value, source
        let value = tsv.nth(1);
        let Some(creation) = value.and_then(|v| v.parse::<u64>().ok()) else {
            warn!("skipping snapshot {name} with unparseable creation time: {line}");
            continue;
        };
        snapshots.push(Snapshot {
            name: name.to_string(),
            creation,
        });
    }
    snapshots
}

fn parse_estimate(text: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("size"), Some(value)) => value.parse::<u64>().ok(),
            _ => None,
        }
    })
}

fn clamp_estimate(size: u64) -> u64 {
    if size == 0 {
        0
    } else {
        size.max(ESTIMATE_FLOOR)
    }
}
