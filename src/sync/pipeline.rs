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

use crate::sync::capabilities::Capabilities;
use crate::sync::cmd::{CmdTarget, shell_quote};
use crate::sync::compress::CompressCommand;
use log::debug;
use std::fmt::Display;
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};

/// An upstream stage of a running transfer. If the final stage exits while
/// this one is still going (a dead receiver, an interrupted transfer),
/// dropping the guard terminates and reaps it so no sender keeps streaming
/// into a closed pipe.
struct StageGuard {
    child: Child,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        // try_wait also reaps a stage that already finished on its own
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        let _ = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Send,
    Compress,
    Decompress,
    Mbuffer,
    Pv,
    Receive,
}

/// One program in the transfer chain. `sudo` is only ever set on the zfs
/// halves, never on helpers.
pub struct Stage {
    kind: StageKind,
    sudo: bool,
    base: &'static str,
    args: Vec<String>,
}

impl Stage {
    fn new(kind: StageKind, sudo: bool, base: &'static str, args: Vec<String>) -> Self {
        Self {
            kind,
            sudo,
            base,
            args,
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

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

    fn to_command(&self) -> Command {
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
}

/// The stages that run on one machine. A remote hop lowers to a single ssh
/// invocation carrying a shell pipe; a local hop lowers to one spawned
/// process per stage.
pub struct Hop<'run> {
    target: &'run CmdTarget<'run>,
    stages: Vec<Stage>,
}

impl<'run> Hop<'run> {
    fn new(target: &'run CmdTarget<'run>, stages: Vec<Stage>) -> Self {
        Self { target, stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn joined(&self) -> String {
        self.stages
            .iter()
            .map(Stage::shell_words)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn commands(&self) -> Vec<Command> {
        match self.target {
            CmdTarget::Local => self.stages.iter().map(Stage::to_command).collect(),
            CmdTarget::Remote { ssh } => {
                let mut cmd = ssh.to_cmd();
                cmd.arg(self.joined());
                vec![cmd]
            }
        }
    }
}

impl<'run> Display for Hop<'run> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            CmdTarget::Local => write!(f, "{}", self.joined()),
            CmdTarget::Remote { .. } => write!(f, "{}'{}'", self.target, self.joined()),
        }
    }
}

pub struct SendSpec<'a> {
    pub fs: &'a str,
    pub from: Option<&'a str>,
    pub to: &'a str,
}

pub struct RecvSpec<'a> {
    pub fs: &'a str,
    /// `-F`, used only when bootstrapping a target that did not exist.
    pub force: bool,
}

/// Everything the assembler needs besides the topology: resolved helper
/// argument lists and the dry-run size estimate for this send step.
pub struct PipelineEnv<'a> {
    pub compressor: Option<&'a CompressCommand>,
    /// mbuffer on the sending hop, `-R` limit included when given.
    pub source_mbuffer_args: Vec<String>,
    /// mbuffer on the receiving hop, `-r` limit included when given.
    pub target_mbuffer_args: Vec<String>,
    /// mbuffer for the intermediate hop, never rate-limited.
    pub plain_mbuffer_args: Vec<String>,
    /// The single mbuffer of a purely local transfer; carries whichever of
    /// the two limits was given, source winning.
    pub local_mbuffer_args: Vec<String>,
    pub pv_opts: Vec<String>,
    pub estimate: u64,
}

pub struct Pipeline<'run> {
    hops: Vec<Hop<'run>>,
}

fn send_stage(sudo: bool, send: &SendSpec) -> Stage {
    let mut args = vec!["send".to_string()];
    if let Some(from) = send.from {
        args.push("-I".to_string());
        args.push(format!("{}@{}", send.fs, from));
    }
    args.push(format!("{}@{}", send.fs, send.to));
    Stage::new(StageKind::Send, sudo, "zfs", args)
}

fn recv_stage(sudo: bool, recv: &RecvSpec) -> Stage {
    let mut args = vec!["receive".to_string()];
    if recv.force {
        args.push("-F".to_string());
    }
    args.push(recv.fs.to_string());
    Stage::new(StageKind::Receive, sudo, "zfs", args)
}

fn compress_stage(c: &CompressCommand) -> Stage {
    let args = c.args.iter().map(|a| a.to_string()).collect();
    Stage::new(StageKind::Compress, false, c.base, args)
}

fn decompress_stage(c: &CompressCommand) -> Stage {
    let args = c.decompress_args.iter().map(|a| a.to_string()).collect();
    Stage::new(StageKind::Decompress, false, c.decompress, args)
}

fn mbuffer_stage(args: &[String]) -> Stage {
    Stage::new(StageKind::Mbuffer, false, "mbuffer", args.to_vec())
}

fn pv_stage(env: &PipelineEnv) -> Stage {
    let mut args = env.pv_opts.clone();
    if env.estimate > 0 {
        args.push("-s".to_string());
        args.push(env.estimate.to_string());
    }
    Stage::new(StageKind::Pv, false, "pv", args)
}

/// Stitch `zfs send` to `zfs receive` for the given topology, inserting
/// only the stages the capability probe allowed. Omitting a stage leaves
/// the chain contiguous; an intermediate hop with nothing to do disappears.
pub fn assemble<'run>(
    source: &'run CmdTarget<'run>,
    source_sudo: bool,
    target: &'run CmdTarget<'run>,
    target_sudo: bool,
    local: &'run CmdTarget<'run>,
    caps: &Capabilities,
    env: &PipelineEnv,
    send: &SendSpec,
    recv: &RecvSpec,
) -> Pipeline<'run> {
    let comp = if caps.compress { env.compressor } else { None };
    let send_stage = send_stage(source_sudo, send);
    let recv_stage = recv_stage(target_sudo, recv);

    let hops = match (source.is_remote(), target.is_remote()) {
        (false, false) => {
            let mut stages = vec![send_stage];
            if caps.source_mbuffer {
                stages.push(mbuffer_stage(&env.local_mbuffer_args));
            }
            if caps.pv {
                stages.push(pv_stage(env));
            }
            stages.push(recv_stage);
            vec![Hop::new(local, stages)]
        }
        (false, true) => {
            let mut sender = vec![send_stage];
            if caps.pv {
                sender.push(pv_stage(env));
            }
            if let Some(c) = comp {
                sender.push(compress_stage(c));
            }
            if caps.source_mbuffer {
                sender.push(mbuffer_stage(&env.source_mbuffer_args));
            }
            let mut receiver = Vec::new();
            if caps.target_mbuffer {
                receiver.push(mbuffer_stage(&env.target_mbuffer_args));
            }
            if let Some(c) = comp {
                receiver.push(decompress_stage(c));
            }
            receiver.push(recv_stage);
            vec![Hop::new(local, sender), Hop::new(target, receiver)]
        }
        (true, false) => {
            let mut sender = vec![send_stage];
            if let Some(c) = comp {
                sender.push(compress_stage(c));
            }
            if caps.source_mbuffer {
                sender.push(mbuffer_stage(&env.source_mbuffer_args));
            }
            let mut receiver = Vec::new();
            if caps.target_mbuffer {
                receiver.push(mbuffer_stage(&env.target_mbuffer_args));
            }
            if let Some(c) = comp {
                receiver.push(decompress_stage(c));
            }
            if caps.pv {
                receiver.push(pv_stage(env));
            }
            receiver.push(recv_stage);
            vec![Hop::new(source, sender), Hop::new(local, receiver)]
        }
        (true, true) => {
            let mut sender = vec![send_stage];
            if let Some(c) = comp {
                sender.push(compress_stage(c));
            }
            if caps.source_mbuffer {
                sender.push(mbuffer_stage(&env.source_mbuffer_args));
            }
            let mut middle = Vec::new();
            if let Some(c) = comp {
                middle.push(decompress_stage(c));
            }
            if caps.pv {
                middle.push(pv_stage(env));
            }
            if let Some(c) = comp {
                middle.push(compress_stage(c));
            }
            if caps.local_mbuffer {
                middle.push(mbuffer_stage(&env.plain_mbuffer_args));
            }
            let mut receiver = Vec::new();
            if caps.target_mbuffer {
                receiver.push(mbuffer_stage(&env.target_mbuffer_args));
            }
            if let Some(c) = comp {
                receiver.push(decompress_stage(c));
            }
            receiver.push(recv_stage);
            let mut hops = vec![Hop::new(source, sender)];
            if !middle.is_empty() {
                hops.push(Hop::new(local, middle));
            }
            hops.push(Hop::new(target, receiver));
            hops
        }
    };

    Pipeline { hops }
}

impl<'run> Pipeline<'run> {
    pub fn hops(&self) -> &[Hop<'run>] {
        &self.hops
    }

    /// Spawn the chain, stdout of each process piped into the next, stderr
    /// shared with the terminal. The final process's exit status is the
    /// transfer's status; earlier processes are reaped (or terminated) once
    /// it finishes.
    pub fn run(&self) -> io::Result<ExitStatus> {
        debug!("running pipeline: {self}");
        let commands: Vec<Command> = self.hops.iter().flat_map(|hop| hop.commands()).collect();
        let last = commands.len() - 1;
        let mut guards = Vec::new();
        let mut prev_stdout = None;
        for (i, mut cmd) in commands.into_iter().enumerate() {
            cmd.stderr(Stdio::inherit());
            match prev_stdout.take() {
                Some(stdout) => {
                    cmd.stdin(Stdio::from(stdout));
                }
                // ssh does not like it if stdin is not a terminal
                None => {
                    cmd.stdin(Stdio::inherit());
                }
            }
            if i == last {
                cmd.stdout(Stdio::inherit());
                return cmd.status();
            }
            cmd.stdout(Stdio::piped());
            let mut child = cmd.spawn()?;
            prev_stdout = Some(child.stdout.take().expect("stdout is piped"));
            guards.push(StageGuard { child });
        }
        unreachable!("a pipeline always contains send and receive")
    }
}

impl<'run> Display for Pipeline<'run> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for hop in &self.hops {
            if !first {
                write!(f, " | ")?;
            }
            first = false;
            write!(f, "{hop}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::args::mbuffer_standard_args;
    use crate::sync::compress::Compress;

    fn env(compressor: Option<&CompressCommand>, estimate: u64) -> PipelineEnv<'_> {
        let plain = mbuffer_standard_args("16M");
        let mut source = plain.clone();
        source.extend(["-R".to_string(), "10m".to_string()]);
        let mut target = plain.clone();
        target.extend(["-r".to_string(), "2M".to_string()]);
        PipelineEnv {
            compressor,
            source_mbuffer_args: source.clone(),
            target_mbuffer_args: target,
            plain_mbuffer_args: plain,
            local_mbuffer_args: source,
            pv_opts: vec!["-p".into(), "-t".into(), "-e".into(), "-r".into(), "-b".into()],
            estimate,
        }
    }

    fn no_caps() -> Capabilities {
        Capabilities {
            compress: false,
            source_mbuffer: false,
            target_mbuffer: false,
            local_mbuffer: false,
            pv: false,
        }
    }

    fn all_caps() -> Capabilities {
        Capabilities {
            compress: true,
            source_mbuffer: true,
            target_mbuffer: true,
            local_mbuffer: true,
            pv: true,
        }
    }

    fn kinds(pipeline: &Pipeline) -> Vec<Vec<StageKind>> {
        pipeline
            .hops()
            .iter()
            .map(|hop| hop.stages().iter().map(Stage::kind).collect())
            .collect()
    }

    fn assert_no_adjacent_duplicates(pipeline: &Pipeline) {
        for hop in pipeline.hops() {
            for pair in hop.stages().windows(2) {
                assert_ne!(pair[0].kind(), pair[1].kind(), "in {pipeline}");
            }
        }
    }

    #[test]
    fn local_bootstrap_without_helpers() {
        let local = CmdTarget::new_local();
        let env = env(None, 0);
        let pipeline = assemble(
            &local,
            false,
            &local,
            false,
            &local,
            &no_caps(),
            &env,
            &SendSpec {
                fs: "tank/data",
                from: None,
                to: "old",
            },
            &RecvSpec {
                fs: "backup/data",
                force: true,
            },
        );
        assert_eq!(
            pipeline.to_string(),
            "zfs send tank/data@old | zfs receive -F backup/data"
        );
    }

    #[test]
    fn local_transfer_places_pv_between_mbuffer_and_receive() {
        let local = CmdTarget::new_local();
        let env = env(None, 8192);
        let pipeline = assemble(
            &local,
            false,
            &local,
            false,
            &local,
            &Capabilities {
                pv: true,
                source_mbuffer: true,
                ..no_caps()
            },
            &env,
            &SendSpec {
                fs: "tank/data",
                from: Some("a"),
                to: "b",
            },
            &RecvSpec {
                fs: "backup/data",
                force: false,
            },
        );
        assert_eq!(
            pipeline.to_string(),
            "zfs send -I tank/data@a tank/data@b \
             | mbuffer -q -s 128k -m 16M -R 10m \
             | pv -p -t -e -r -b -s 8192 \
             | zfs receive backup/data"
        );
    }

    #[test]
    fn pull_with_all_helpers() {
        let options = Vec::new();
        let source = CmdTarget::new(Some("root@src"), Some("/tmp/zfsync-root-src-1"), &options);
        let target = CmdTarget::new_local();
        let local = CmdTarget::new_local();
        let lzo = Compress::Lzo.to_cmd().unwrap();
        let env = env(Some(&lzo), 4096);
        let pipeline = assemble(
            &source,
            true,
            &target,
            false,
            &local,
            &all_caps(),
            &env,
            &SendSpec {
                fs: "tank/data",
                from: Some("s"),
                to: "s_new",
            },
            &RecvSpec {
                fs: "backup/data",
                force: false,
            },
        );
        assert_eq!(
            pipeline.to_string(),
            "ssh -S /tmp/zfsync-root-src-1 root@src \
             'sudo zfs send -I tank/data@s tank/data@s_new | lzop | mbuffer -q -s 128k -m 16M -R 10m' \
             | mbuffer -q -s 128k -m 16M -r 2M \
             | lzop -dfc \
             | pv -p -t -e -r -b -s 4096 \
             | zfs receive backup/data"
        );
        assert_no_adjacent_duplicates(&pipeline);
    }

    #[test]
    fn push_orders_pv_compress_mbuffer() {
        let options = Vec::new();
        let source = CmdTarget::new_local();
        let target = CmdTarget::new(Some("user@dst"), None, &options);
        let local = CmdTarget::new_local();
        let gzip = Compress::Gzip.to_cmd().unwrap();
        let env = env(Some(&gzip), 0);
        let pipeline = assemble(
            &source,
            false,
            &target,
            true,
            &local,
            &all_caps(),
            &env,
            &SendSpec {
                fs: "tank/data",
                from: None,
                to: "first",
            },
            &RecvSpec {
                fs: "backup/data",
                force: true,
            },
        );
        assert_eq!(
            kinds(&pipeline),
            vec![
                vec![
                    StageKind::Send,
                    StageKind::Pv,
                    StageKind::Compress,
                    StageKind::Mbuffer
                ],
                vec![StageKind::Mbuffer, StageKind::Decompress, StageKind::Receive],
            ]
        );
        // pv has no -s when the estimate is unavailable
        assert!(!pipeline.to_string().contains("-s 0"));
        assert!(pipeline.to_string().contains("sudo zfs receive -F backup/data"));
    }

    #[test]
    fn remote_to_remote_builds_three_hops() {
        let options = Vec::new();
        let source = CmdTarget::new(Some("a@one"), None, &options);
        let target = CmdTarget::new(Some("b@two"), None, &options);
        let local = CmdTarget::new_local();
        let lzo = Compress::Lzo.to_cmd().unwrap();
        let env = env(Some(&lzo), 4096);
        let pipeline = assemble(
            &source,
            false,
            &target,
            false,
            &local,
            &all_caps(),
            &env,
            &SendSpec {
                fs: "tank/data",
                from: Some("s"),
                to: "s_new",
            },
            &RecvSpec {
                fs: "backup/data",
                force: false,
            },
        );
        assert_eq!(
            kinds(&pipeline),
            vec![
                vec![StageKind::Send, StageKind::Compress, StageKind::Mbuffer],
                vec![
                    StageKind::Decompress,
                    StageKind::Pv,
                    StageKind::Compress,
                    StageKind::Mbuffer
                ],
                vec![StageKind::Mbuffer, StageKind::Decompress, StageKind::Receive],
            ]
        );
        assert_no_adjacent_duplicates(&pipeline);
    }

    #[test]
    fn remote_to_remote_without_compressor_keeps_buffering() {
        let options = Vec::new();
        let source = CmdTarget::new(Some("a@one"), None, &options);
        let target = CmdTarget::new(Some("b@two"), None, &options);
        let local = CmdTarget::new_local();
        let env = env(None, 4096);
        let pipeline = assemble(
            &source,
            false,
            &target,
            false,
            &local,
            &Capabilities {
                compress: false,
                ..all_caps()
            },
            &env,
            &SendSpec {
                fs: "tank/data",
                from: Some("s"),
                to: "s_new",
            },
            &RecvSpec {
                fs: "backup/data",
                force: false,
            },
        );
        assert_eq!(
            kinds(&pipeline),
            vec![
                vec![StageKind::Send, StageKind::Mbuffer],
                vec![StageKind::Pv, StageKind::Mbuffer],
                vec![StageKind::Mbuffer, StageKind::Receive],
            ]
        );
    }

    #[test]
    fn dropping_a_capability_removes_exactly_its_stage() {
        let options = Vec::new();
        let source = CmdTarget::new(Some("root@src"), None, &options);
        let target = CmdTarget::new_local();
        let local = CmdTarget::new_local();
        let lzo = Compress::Lzo.to_cmd().unwrap();
        let env = env(Some(&lzo), 4096);
        let send = SendSpec {
            fs: "tank/data",
            from: Some("s"),
            to: "s_new",
        };
        let recv = RecvSpec {
            fs: "backup/data",
            force: false,
        };
        let full: Vec<StageKind> = kinds(&assemble(
            &source, true, &target, false, &local, &all_caps(), &env, &send, &recv,
        ))
        .into_iter()
        .flatten()
        .collect();
        let without_pv: Vec<StageKind> = kinds(&assemble(
            &source,
            true,
            &target,
            false,
            &local,
            &Capabilities {
                pv: false,
                ..all_caps()
            },
            &env,
            &send,
            &recv,
        ))
        .into_iter()
        .flatten()
        .collect();
        let expected: Vec<StageKind> = full
            .iter()
            .copied()
            .filter(|kind| *kind != StageKind::Pv)
            .collect();
        assert_eq!(without_pv, expected);
    }
}
