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

pub mod args;
pub mod capabilities;
pub mod cmd;
pub mod compress;
pub mod endpoint;
pub mod error;
pub mod pipeline;
pub mod plan;
pub mod snaps;
pub mod ssh;
pub mod sys;
pub mod util;
pub mod zfs;

pub use args::Args;
pub use capabilities::Capabilities;
pub use cmd::{Cmd, CmdTarget};
pub use compress::Compress;
pub use endpoint::Endpoint;
pub use error::SyncError;
pub use pipeline::{Pipeline, RecvSpec, SendSpec};
pub use plan::SyncPlan;
pub use ssh::SshMaster;
pub use zfs::{Snapshot, Zfs};
