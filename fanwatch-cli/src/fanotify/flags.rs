// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event mask bits as defined by `<linux/fanotify.h>`, and their human-readable names.

#[cfg(target_os = "linux")]
use nix::libc as abi;

pub const FAN_ACCESS: u64 = abi::FAN_ACCESS;
pub const FAN_MODIFY: u64 = abi::FAN_MODIFY;
pub const FAN_ATTRIB: u64 = abi::FAN_ATTRIB;
pub const FAN_CLOSE_WRITE: u64 = abi::FAN_CLOSE_WRITE;
pub const FAN_CLOSE_NOWRITE: u64 = abi::FAN_CLOSE_NOWRITE;
pub const FAN_OPEN: u64 = abi::FAN_OPEN;
pub const FAN_MOVED_FROM: u64 = abi::FAN_MOVED_FROM;
pub const FAN_MOVED_TO: u64 = abi::FAN_MOVED_TO;
pub const FAN_CREATE: u64 = abi::FAN_CREATE;
pub const FAN_DELETE: u64 = abi::FAN_DELETE;
pub const FAN_DELETE_SELF: u64 = abi::FAN_DELETE_SELF;
pub const FAN_MOVE_SELF: u64 = abi::FAN_MOVE_SELF;
pub const FAN_OPEN_EXEC: u64 = abi::FAN_OPEN_EXEC;
pub const FAN_Q_OVERFLOW: u64 = abi::FAN_Q_OVERFLOW;
pub const FAN_FS_ERROR: u64 = abi::FAN_FS_ERROR;
pub const FAN_EVENT_ON_CHILD: u64 = abi::FAN_EVENT_ON_CHILD;
pub const FAN_RENAME: u64 = abi::FAN_RENAME;
pub const FAN_ONDIR: u64 = abi::FAN_ONDIR;

pub const FAN_MOVE: u64 = FAN_MOVED_FROM | FAN_MOVED_TO;

/// Display order for [`mask_to_human`]; it is fixed and independent of bit position.
const CANONICAL_NAMES: &[(u64, &str)] = &[
    (FAN_CLOSE_WRITE, "FAN_CLOSE_WRITE"),
    (FAN_ACCESS, "FAN_ACCESS"),
    (FAN_ATTRIB, "FAN_ATTRIB"),
    (FAN_CLOSE_NOWRITE, "FAN_CLOSE_NOWRITE"),
    (FAN_CREATE, "FAN_CREATE"),
    (FAN_DELETE, "FAN_DELETE"),
    (FAN_DELETE_SELF, "FAN_DELETE_SELF"),
    (FAN_ONDIR, "FAN_ONDIR"),
    (FAN_MODIFY, "FAN_MODIFY"),
    (FAN_MOVE_SELF, "FAN_MOVE_SELF"),
    (FAN_MOVED_FROM, "FAN_MOVED_FROM"),
    (FAN_MOVED_TO, "FAN_MOVED_TO"),
    (FAN_RENAME, "FAN_RENAME"),
    (FAN_OPEN, "FAN_OPEN"),
    (FAN_OPEN_EXEC, "FAN_OPEN_EXEC"),
    (FAN_Q_OVERFLOW, "FAN_Q_OVERFLOW"),
    (FAN_FS_ERROR, "FAN_FS_ERROR"),
    (FAN_EVENT_ON_CHILD, "FAN_EVENT_ON_CHILD"),
];

/// Names every recognized bit set in `mask`, in canonical order.  Unrecognized bits are dropped.
#[must_use]
pub fn mask_to_human(mask: u64) -> Vec<&'static str> {
    CANONICAL_NAMES
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

#[must_use]
pub fn mask_to_human_string(mask: u64) -> String {
    mask_to_human(mask).join(", ")
}

/// The bits of `mask` that [`mask_to_human`] has no name for.
#[must_use]
pub fn unrecognized_bits(mask: u64) -> u64 {
    CANONICAL_NAMES
        .iter()
        .fold(mask, |remaining, (bit, _)| remaining & !bit)
}

/// `<linux/fanotify.h>` values, for decoding captured streams where libc has no fanotify definitions.
#[cfg(not(target_os = "linux"))]
mod abi {
    pub const FAN_ACCESS: u64 = 0x0000_0001;
    pub const FAN_MODIFY: u64 = 0x0000_0002;
    pub const FAN_ATTRIB: u64 = 0x0000_0004;
    pub const FAN_CLOSE_WRITE: u64 = 0x0000_0008;
    pub const FAN_CLOSE_NOWRITE: u64 = 0x0000_0010;
    pub const FAN_OPEN: u64 = 0x0000_0020;
    pub const FAN_MOVED_FROM: u64 = 0x0000_0040;
    pub const FAN_MOVED_TO: u64 = 0x0000_0080;
    pub const FAN_CREATE: u64 = 0x0000_0100;
    pub const FAN_DELETE: u64 = 0x0000_0200;
    pub const FAN_DELETE_SELF: u64 = 0x0000_0400;
    pub const FAN_MOVE_SELF: u64 = 0x0000_0800;
    pub const FAN_OPEN_EXEC: u64 = 0x0000_1000;
    pub const FAN_Q_OVERFLOW: u64 = 0x0000_4000;
    pub const FAN_FS_ERROR: u64 = 0x0000_8000;
    pub const FAN_EVENT_ON_CHILD: u64 = 0x0800_0000;
    pub const FAN_RENAME: u64 = 0x1000_0000;
    pub const FAN_ONDIR: u64 = 0x4000_0000;
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        CANONICAL_NAMES, FAN_CLOSE_WRITE, FAN_CREATE, FAN_DELETE, FAN_MODIFY, FAN_MOVED_FROM,
        FAN_MOVED_TO, FAN_ONDIR, mask_to_human, mask_to_human_string, unrecognized_bits,
    };

    #[test]
    fn kernel_abi_values() {
        assert_eq!(FAN_CREATE, 0x100);
        assert_eq!(FAN_CLOSE_WRITE, 0x8);
        assert_eq!(FAN_MOVED_FROM | FAN_MOVED_TO, 0xc0);
        assert_eq!(FAN_ONDIR, 0x4000_0000);
    }

    #[test]
    fn single_bit() {
        assert_eq!(mask_to_human(FAN_CREATE), vec!["FAN_CREATE"]);
    }

    #[test]
    fn empty_mask() {
        assert!(mask_to_human(0).is_empty());
        assert_eq!(mask_to_human_string(0), "");
    }

    #[test]
    fn canonical_order_not_bit_order() {
        // FAN_MODIFY is the lowest of these bits, but sorts after FAN_ONDIR.
        assert_eq!(
            mask_to_human(FAN_MODIFY | FAN_ONDIR | FAN_CLOSE_WRITE),
            vec!["FAN_CLOSE_WRITE", "FAN_ONDIR", "FAN_MODIFY"]
        );
        assert_eq!(
            mask_to_human(FAN_MOVED_TO | FAN_MOVED_FROM | FAN_DELETE),
            vec!["FAN_DELETE", "FAN_MOVED_FROM", "FAN_MOVED_TO"]
        );
    }

    #[test]
    fn unrecognized_bits_omitted() {
        // 0x2000 and 0x1_0000_0000 have no fanotify meaning.
        assert_eq!(
            mask_to_human(FAN_CREATE | 0x2000 | 0x1_0000_0000),
            vec!["FAN_CREATE"]
        );
        assert!(mask_to_human(0x2000).is_empty());
        assert_eq!(unrecognized_bits(FAN_CREATE | 0x2000), 0x2000);
        assert_eq!(unrecognized_bits(FAN_CREATE | FAN_ONDIR), 0);
    }

    #[test]
    fn all_bits_named_once() {
        let names = mask_to_human(u64::MAX);
        assert_eq!(names.len(), CANONICAL_NAMES.len());
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn joined_for_log_lines() {
        assert_eq!(
            mask_to_human_string(FAN_CREATE | FAN_ONDIR),
            "FAN_CREATE, FAN_ONDIR"
        );
    }
}
