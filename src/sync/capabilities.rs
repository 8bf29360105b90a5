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
use crate::sync::compress::CompressCommand;
use log::warn;
use std::collections::HashMap;
use std::io;

/// Which optional pipeline stages can run, resolved once per run. A missing
/// helper downgrades to a warning and its stage is omitted.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Compression is all-or-nothing: the compressor must exist at every
    /// location that compresses or decompresses.
    pub compress: bool,
    /// mbuffer on the sending hop (the source host, or this machine when
    /// the source is local).
    pub source_mbuffer: bool,
    /// mbuffer on the receiving hop.
    pub target_mbuffer: bool,
    /// mbuffer for the intermediate hop of a remote-to-remote transfer.
    pub local_mbuffer: bool,
    /// pv runs on the local machine only.
    pub pv: bool,
}

/// Existence checks deduplicated per (host, program), so a local-to-local
/// run probes each helper once.
struct Prober {
    assume: bool,
    checked: HashMap<(String, &'static str), bool>,
}

impl Prober {
    fn new(assume: bool) -> Self {
        Self {
            assume,
            checked: HashMap::new(),
        }
    }

    fn check(&mut self, target: &CmdTarget, base: &'static str) -> io::Result<bool> {
        if self.assume {
            return Ok(true);
        }
        let key = (target.host().to_string(), base);
        if let Some(&ok) = self.checked.get(&key) {
            return Ok(ok);
        }
        let ok = Cmd::new(target, false, base)
            .to_check()
            .output()?
            .status
            .success();
        self.checked.insert(key, ok);
        Ok(ok)
    }

    /// True when every (location, program) pair checks out; the first miss
    /// warns and disables the stage.
    fn stage(
        &mut self,
        continue_without: &str,
        checks: &[(&CmdTarget, &'static str)],
    ) -> io::Result<bool> {
        for &(target, base) in checks {
            if !self.check(target, base)? {
                warn!(
                    "{base} not available on {} - sync will continue without {continue_without}",
                    target.pretty_str()
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Capabilities {
    /// Probe the helper binaries the chosen topology consults. `use_pv` is
    /// false under `--quiet`; `assume` skips every check
    /// (`--nocommandchecks`).
    pub fn detect(
        source: &CmdTarget,
        target: &CmdTarget,
        local: &CmdTarget,
        compressor: Option<&CompressCommand>,
        use_pv: bool,
        assume: bool,
    ) -> io::Result<Self> {
        let both_remote = source.is_remote() && target.is_remote();
        let both_local = !source.is_remote() && !target.is_remote();
        let mut prober = Prober::new(assume);

        // a purely local transfer never compresses
        let compress = match compressor {
            Some(c) if !both_local => {
                let mut checks = vec![(source, c.base), (target, c.decompress)];
                if both_remote {
                    checks.push((local, c.base));
                    checks.push((local, c.decompress));
                }
                prober.stage("compression", &checks)?
            }
            _ => false,
        };

        let source_mbuffer = prober.stage("buffering and bandwidth limits", &[(source, "mbuffer")])?;
        let target_mbuffer = if both_local {
            false
        } else {
            prober.stage("buffering and write limits", &[(target, "mbuffer")])?
        };
        let local_mbuffer = if both_remote {
            prober.stage("intermediate buffering", &[(local, "mbuffer")])?
        } else {
            false
        };

        let pv = if use_pv {
            prober.stage("progress bar", &[(local, "pv")])?
        } else {
            false
        };

        Ok(Self {
            compress,
            source_mbuffer,
            target_mbuffer,
            local_mbuffer,
            pv,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::compress::Compress;

    fn assume(source: &CmdTarget, target: &CmdTarget, with_compress: bool) -> Capabilities {
        let local = CmdTarget::new_local();
        let compressor = if with_compress { Compress::Lzo.to_cmd() } else { None };
        Capabilities::detect(source, target, &local, compressor.as_ref(), true, true).unwrap()
    }

    #[test]
    fn local_topology_never_compresses() {
        let source = CmdTarget::new_local();
        let target = CmdTarget::new_local();
        let caps = assume(&source, &target, true);
        assert!(!caps.compress);
        assert!(caps.source_mbuffer);
        assert!(!caps.target_mbuffer);
        assert!(!caps.local_mbuffer);
        assert!(caps.pv);
    }

    #[test]
    fn push_topology() {
        let options = Vec::new();
        let source = CmdTarget::new_local();
        let target = CmdTarget::new(Some("user@host"), None, &options);
        let caps = assume(&source, &target, true);
        assert!(caps.compress);
        assert!(caps.source_mbuffer);
        assert!(caps.target_mbuffer);
        assert!(!caps.local_mbuffer);
    }

    #[test]
    fn remote_to_remote_gets_intermediate_mbuffer() {
        let options = Vec::new();
        let source = CmdTarget::new(Some("a@one"), None, &options);
        let target = CmdTarget::new(Some("b@two"), None, &options);
        let caps = assume(&source, &target, true);
        assert!(caps.compress);
        assert!(caps.local_mbuffer);
    }

    #[test]
    fn compress_disabled_without_compressor() {
        let options = Vec::new();
        let source = CmdTarget::new_local();
        let target = CmdTarget::new(Some("user@host"), None, &options);
        let caps = assume(&source, &target, false);
        assert!(!caps.compress);
    }
}
