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

use std::fmt::Display;

/// Send-size estimates for log lines. Zero means the dry-run estimate
/// was unavailable.
pub struct ReadableBytes(pub u64);

impl From<u64> for ReadableBytes {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for ReadableBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;
        const GB: u64 = 1024 * MB;

        if self.0 == 0 {
            write!(f, "UNKNOWN")?;
        } else if self.0 >= GB {
            let gb = self.0 as f64 / GB as f64;
            write!(f, "{gb:.1} GiB")?;
        } else if self.0 >= MB {
            let mb = self.0 as f64 / MB as f64;
            write!(f, "{mb:.1} MiB")?;
        } else {
            let kb = self.0 / KB;
            write!(f, "{} KiB", kb)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_at_zero() {
        assert_eq!(ReadableBytes(0).to_string(), "UNKNOWN");
    }

    #[test]
    fn scales() {
        assert_eq!(ReadableBytes(4096).to_string(), "4 KiB");
        assert_eq!(ReadableBytes(3 * 1024 * 1024).to_string(), "3.0 MiB");
        assert_eq!(ReadableBytes(5 * 1024 * 1024 * 1024 / 2).to_string(), "2.5 GiB");
    }
}
