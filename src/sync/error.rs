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

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid endpoint '{given}': {reason}")]
    BadEndpoint { given: String, reason: &'static str },

    #[error("cannot sync now: {0} is already the target of a zfs receive process")]
    TargetBusy(String),

    #[error("target {target} exists but shares no snapshot with source {src}")]
    NoCommonSnapshot { src: String, target: String },

    #[error("replication pipeline for {fs} exited with status {status}")]
    Pipeline { fs: String, status: i32 },

    #[error("{0}")]
    Zfs(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Exit code for the fatal path. Argument errors share clap's 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::BadEndpoint { .. } => 2,
            SyncError::TargetBusy(_) => 3,
            SyncError::NoCommonSnapshot { .. } => 4,
            SyncError::Pipeline { .. } => 5,
            SyncError::Zfs(_) | SyncError::Io(_) => 1,
        }
    }
}
