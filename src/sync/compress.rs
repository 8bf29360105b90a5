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

use log::warn;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compress {
    Gzip,
    #[default]
    Lzo,
    None,
}

/// The compressing and decompressing halves of a transit compressor.
pub struct CompressCommand {
    pub base: &'static str,
    pub args: &'static [&'static str],
    pub decompress: &'static str,
    pub decompress_args: &'static [&'static str],
}

impl Compress {
    pub fn to_str(&self) -> &'static str {
        match self {
            Compress::Gzip => "gzip",
            Compress::Lzo => "lzo",
            Compress::None => "none",
        }
    }

    /// Resolve the `--compress` flag. An unrecognized value warns and
    /// disables compression rather than failing the run.
    pub fn from_flag(value: &str) -> Self {
        match value {
            "gzip" => Compress::Gzip,
            "lzo" => Compress::Lzo,
            "none" | "no" | "0" => Compress::None,
            other => {
                warn!("unrecognized compression format '{other}' - sync will continue uncompressed");
                Compress::None
            }
        }
    }

    pub fn to_cmd(&self) -> Option<CompressCommand> {
        match self {
            Compress::Gzip => Some(CompressCommand {
                base: "gzip",
                args: &["-3"][..],
                decompress: "zcat",
                decompress_args: &[][..],
            }),
            Compress::Lzo => Some(CompressCommand {
                base: "lzop",
                args: &[][..],
                decompress: "lzop",
                decompress_args: &["-dfc"][..],
            }),
            Compress::None => None,
        }
    }
}

impl Display for Compress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}
