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

use chrono::{Datelike, Timelike};
use std::{ffi, io};

// Linux guarantees sysconf(_SC_HOST_NAME_MAX) >= _POSIX_HOST_NAME_MAX (255),
// and FreeBSD guarantees the same floor, so a fixed buffer of 255 + NUL
// covers both.
const HOST_NAME_MAX: usize = 255;

/// Returns an error if the hostname is too long
pub fn hostname() -> io::Result<String> {
    const NAMELEN: usize = HOST_NAME_MAX + 1;
    let mut buffer = [0 as libc::c_char; NAMELEN];
    let rc = unsafe { libc::gethostname(buffer.as_mut_ptr(), NAMELEN) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    };
    // Truncation behavior is unspecified, including whether the result is
    // null-terminated, so check before building a CStr.
    if !buffer.contains(&0) {
        return Err(io::Error::other("hostname longer than 255 bytes"));
    };
    // Safety: null-termination checked above
    let hostname_cstr = unsafe { ffi::CStr::from_ptr(buffer.as_ptr()) };
    let hostname = hostname_cstr
        .to_str()
        .map_err(|e| io::Error::other(format!("failed to obtain hostname from c string: {e}")))?;
    Ok(hostname.to_string())
}

/// Local time as `YYYY-MM-DD:HH:MM:SS`, the stamp embedded in sync
/// snapshot names.
pub fn snapshot_stamp() -> String {
    let local = chrono::Local::now();
    format!(
        "{:04}-{:02}-{:02}:{:02}:{:02}:{:02}",
        local.year(),
        local.month(),
        local.day(),
        local.hour(),
        local.minute(),
        local.second()
    )
}

/// Unix seconds, used to make ssh control socket paths unique per run.
pub fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_shape() {
        let stamp = snapshot_stamp();
        assert_eq!(stamp.len(), "0000-00-00:00:00:00".len());
        let bytes = stamp.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            match i {
                4 | 7 => assert_eq!(*b, b'-'),
                10 | 13 | 16 => assert_eq!(*b, b':'),
                _ => assert!(b.is_ascii_digit(), "non-digit at {i} in {stamp}"),
            }
        }
    }
}
