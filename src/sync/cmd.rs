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

use std::{
    borrow::Cow,
    fmt::Display,
    io,
    process::{Command, Output, Stdio},
};

/// Quote a word for the remote shell. Datasets, snapshot names and helper
/// flags are usually clean, so the common case stays unquoted.
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    fn safe(c: char) -> bool {
        c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
    }
    if !arg.is_empty() && arg.chars().all(safe) {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

pub struct Ssh<'run> {
    host: &'run str,
    socket: Option<&'run str>,
    options: &'run [String],
}

impl<'run> Ssh<'run> {
    pub fn new(host: &'run str, socket: Option<&'run str>, options: &'run [String]) -> Self {
        Self {
            host,
            socket,
            options,
        }
    }
    pub fn to_cmd(&self) -> Command {
        let mut cmd = Command::new("ssh");
        if let Some(socket) = self.socket {
            cmd.args(["-S", socket]);
        }
        for option in self.options {
            cmd.args(["-o", option]);
        }
        cmd.arg(self.host);
        cmd
    }
}

/// Where a command runs: this machine, or a remote host over the shared
/// control connection.
pub enum CmdTarget<'run> {
    Local,
    Remote { ssh: Ssh<'run> },
}

impl<'run> CmdTarget<'run> {
    pub fn new_local() -> Self {
        Self::Local
    }
    pub fn new(
        host: Option<&'run str>,
        socket: Option<&'run str>,
        options: &'run [String],
    ) -> Self {
        host.map_or(Self::Local, |host| {
            let ssh = Ssh::new(host, socket, options);
            Self::Remote { ssh }
        })
    }
    pub fn is_remote(&self) -> bool {
        match self {
            CmdTarget::Local => false,
            CmdTarget::Remote { .. } => true,
        }
    }
    pub fn host(&self) -> &str {
        match self {
            CmdTarget::Local => "",
            CmdTarget::Remote { ssh } => ssh.host,
        }
    }
    pub fn pretty_str(&self) -> &str {
        match self {
            CmdTarget::Local => "local machine",
            CmdTarget::Remote { ssh } => ssh.host,
        }
    }
    pub fn make_cmd(&self, base: &str) -> Command {
        match self {
            CmdTarget::Local => Command::new(base),
            CmdTarget::Remote { ssh } => {
                let mut cmd = ssh.to_cmd();
                cmd.arg(base);
                cmd
            }
        }
    }
}

impl<'run> Display for CmdTarget<'run> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmdTarget::Local => {}
            CmdTarget::Remote { ssh } => {
                write!(f, "ssh ")?;
                if let Some(socket) = ssh.socket {
                    write!(f, "-S {} ", socket)?;
                }
                for option in ssh.options {
                    write!(f, "-o {} ", option)?;
                }
                write!(f, "{} ", ssh.host)?;
            }
        };
        Ok(())
    }
}

pub struct Cmd<'run> {
    target: &'run CmdTarget<'run>,
    sudo: bool,
    base: &'static str,
    args: Vec<String>,
}

impl<'run> Cmd<'run> {
    pub fn new(target: &'run CmdTarget<'run>, sudo: bool, base: &'static str) -> Self {
        Self {
            target,
            sudo,
            base,
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The words a remote shell would see, sudo prefix included.
    pub fn shell_words(&self) -> String {
        let mut words = String::new();
        if self.sudo {
            words.push_str("sudo ");
        }
        words.push_str(self.base);
        for arg in &self.args {
            words.push(' ');
            words.push_str(&shell_quote(arg));
        }
        words
    }

    pub fn to_command(&self) -> Command {
        match self.target {
            CmdTarget::Local => {
                let mut cmd = if self.sudo {
                    let mut cmd = Command::new("sudo");
                    cmd.arg(self.base);
                    cmd
                } else {
                    Command::new(self.base)
                };
                cmd.args(&self.args);
                cmd
            }
            CmdTarget::Remote { ssh } => {
                let mut cmd = ssh.to_cmd();
                cmd.arg(self.shell_words());
                cmd
            }
        }
    }

    /// POSIX-portable existence probe for the base program.
    pub fn to_check(&self) -> Command {
        let mut cmd = self.target.make_cmd("command");
        cmd.arg("-v");
        cmd.arg(self.base);
        cmd
    }

    pub fn capture(&self) -> io::Result<Output> {
        self.to_command().stdin(Stdio::null()).output()
    }
}

impl<'run> Display for Cmd<'run> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.target, self.shell_words())
    }
}
