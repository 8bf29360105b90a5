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
use std::fmt::Display;

/// A resolved `[user@host:]dataset` argument. `host` keeps the full
/// `user@host` form suitable for handing to ssh; `None` means local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Option<String>,
    pub fs: String,
    pub is_root: bool,
}

fn local_is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

impl Endpoint {
    /// Parse an endpoint argument. A string containing `@` must be of the
    /// form `user@host:dataset` with all three parts non-empty; anything
    /// without `@` is a local dataset path.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let bad = |reason| SyncError::BadEndpoint {
            given: raw.to_string(),
            reason,
        };
        let Some((user, rest)) = raw.split_once('@') else {
            if raw.is_empty() {
                return Err(bad("empty dataset path"));
            }
            return Ok(Self {
                host: None,
                fs: raw.to_string(),
                is_root: local_is_root(),
            });
        };
        if user.is_empty() {
            return Err(bad("empty user before '@'"));
        }
        let Some((host, fs)) = rest.split_once(':') else {
            return Err(bad("'@' given but no ':' separating host from dataset"));
        };
        if host.is_empty() {
            return Err(bad("empty host between '@' and ':'"));
        }
        if fs.is_empty() {
            return Err(bad("empty dataset path after ':'"));
        }
        Ok(Self {
            host: Some(format!("{user}@{host}")),
            fs: fs.to_string(),
            is_root: user == "root",
        })
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Same host and privileges, different dataset. Used by the recursive
    /// driver for child datasets.
    pub fn with_fs(&self, fs: String) -> Self {
        Self {
            host: self.host.clone(),
            fs,
            is_root: self.is_root,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}:{}", host, self.fs),
            None => write!(f, "{}", self.fs),
        }
    }
}
