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
use log::{debug, warn};
use std::{
    io,
    process::{Command, Stdio},
};

/// A persistent multiplexed ssh connection. Every command for the host
/// reuses the control socket, so one handshake covers the whole run. The
/// master is told to exit when this is dropped.
pub struct SshMaster {
    host: String,
    socket: String,
}

impl SshMaster {
    pub fn open(host: &str, options: &[String]) -> io::Result<Self> {
        let (user, hostname) = host.split_once('@').unwrap_or(("", host));
        let socket = format!("/tmp/zfsync-{user}-{hostname}-{}", sys::unix_seconds());
        let mut cmd = Command::new("ssh");
        cmd.args(["-M", "-S", &socket, "-o", "ControlPersist=yes"]);
        for option in options {
            cmd.args(["-o", option]);
        }
        cmd.args([host, "exit"]);
        debug!("opening ssh control master on socket {socket} for {host}");
        // stdio stays on the terminal so ssh can ask for passphrases
        let status = cmd.status()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "failed to establish an ssh connection to {host}"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            socket,
        })
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }
}

impl Drop for SshMaster {
    fn drop(&mut self) {
        debug!("closing ssh control master for {}", self.host);
        let closed = Command::new("ssh")
            .args(["-S", &self.socket, "-O", "exit", &self.host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success());
        if !matches!(closed, Ok(true)) {
            warn!("failed to close ssh control master for {}", self.host);
        }
    }
}
