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

use bw::Bytes;
use clap::Parser;

pub mod bw;

/// ZFS dataset replication tool
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Compresses data during transfer. Accepted options are gzip, lzo and
    /// none
    #[arg(long, default_value = "lzo", value_name = "FORMAT")]
    pub compress: String,

    /// Also transfers child datasets
    #[arg(short, long)]
    pub recursive: bool,

    /// Bandwidth limit in bytes/kbytes/etc per second on the source transfer
    #[arg(long, value_name = "RATE", value_parser = Bytes::try_from_str)]
    pub source_bwlimit: Option<Bytes>,

    /// Bandwidth limit in bytes/kbytes/etc per second on the target transfer
    #[arg(long, value_name = "RATE", value_parser = Bytes::try_from_str)]
    pub target_bwlimit: Option<Bytes>,

    /// Specify the mbuffer size, please refer to mbuffer(1) manual page.
    #[arg(long, default_value = "16M", value_name = "VALUE")]
    pub mbuffer_size: String,

    /// Configure how pv displays the progress bar
    #[arg(long, default_value = "-p -t -e -r -b", value_name = "OPTIONS")]
    pub pv_options: String,

    /// Dumps the merged snapshot inventory during the run
    #[arg(long = "dumpsnaps")]
    pub dump_snaps: bool,

    /// Skips checking for optional helper binaries and assumes they are all
    /// present
    #[arg(long = "nocommandchecks")]
    pub no_command_checks: bool,

    /// Passes OPTION to ssh for remote usage. Can be specified multiple times
    #[arg(short = 'o', long = "ssh-option", value_name = "OPTION")]
    pub ssh_options: Vec<String>,

    /// Connects to remote machines on a particular port.
    #[arg(short = 'P', long, value_name = "PORT")]
    pub ssh_port: Option<String>,

    /// Passes CIPHER to ssh to use a particular cipher set.
    #[arg(short = 'c', long, value_name = "CIPHER")]
    pub ssh_cipher: Option<String>,

    /// Prints out a lot of additional information during a run. Overridden by
    /// --quiet and the RUST_LOG environment variable
    #[arg(long)]
    pub debug: bool,

    /// Suppresses non-error output and the progress bar
    #[arg(long)]
    pub quiet: bool,

    pub source: String,

    pub target: String,
}

impl Args {
    /// ssh `-o` options applied to the control master and every reuse.
    pub fn ssh_config_options(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if let Some(port) = &self.ssh_port {
            opts.push(format!("Port={port}"));
        }
        if let Some(cipher) = &self.ssh_cipher {
            opts.push(format!("Ciphers={cipher}"));
        }
        opts.extend(self.ssh_options.iter().cloned());
        opts
    }

    pub fn source_mbuffer_args(&self) -> Vec<String> {
        let mut args = mbuffer_standard_args(&self.mbuffer_size);
        if let Some(limit) = &self.source_bwlimit {
            args.push("-R".to_string());
            args.push(limit.text.clone());
        }
        args
    }

    pub fn target_mbuffer_args(&self) -> Vec<String> {
        let mut args = mbuffer_standard_args(&self.mbuffer_size);
        if let Some(limit) = &self.target_bwlimit {
            args.push("-r".to_string());
            args.push(limit.text.clone());
        }
        args
    }
}

pub fn mbuffer_standard_args(size: &str) -> Vec<String> {
    vec![
        "-q".to_string(),
        "-s".to_string(),
        "128k".to_string(),
        "-m".to_string(),
        size.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_defaults() {
        let args = Args::parse_from(["zfsync", "tank/data", "user@host:backup/data"]);
        assert_eq!(args.source, "tank/data");
        assert_eq!(args.target, "user@host:backup/data");
        assert_eq!(args.compress, "lzo");
        assert_eq!(args.mbuffer_size, "16M");
        assert!(!args.recursive);
    }

    #[test]
    fn third_positional_is_fatal() {
        assert!(Args::try_parse_from(["zfsync", "a", "b", "c"]).is_err());
    }

    #[test]
    fn unknown_option_is_fatal() {
        assert!(Args::try_parse_from(["zfsync", "--frobnicate", "a", "b"]).is_err());
    }

    #[test]
    fn equals_and_space_forms() {
        let a = Args::parse_from(["zfsync", "--compress=gzip", "a", "b"]);
        let b = Args::parse_from(["zfsync", "--compress", "gzip", "a", "b"]);
        assert_eq!(a.compress, b.compress);
    }

    #[test]
    fn bwlimit_flags() {
        let args = Args::parse_from([
            "zfsync",
            "--source-bwlimit",
            "10m",
            "--target-bwlimit=2M",
            "a",
            "b",
        ]);
        let src = args.source_mbuffer_args();
        assert_eq!(src, ["-q", "-s", "128k", "-m", "16M", "-R", "10m"]);
        let tgt = args.target_mbuffer_args();
        assert_eq!(tgt, ["-q", "-s", "128k", "-m", "16M", "-r", "2M"]);
    }

    #[test]
    fn ssh_option_collection() {
        let args = Args::parse_from([
            "zfsync",
            "-P",
            "2222",
            "-o",
            "Compression=no",
            "a",
            "b",
        ]);
        assert_eq!(
            args.ssh_config_options(),
            ["Port=2222", "Compression=no"]
        );
    }
}
