// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::CString,
    fs::File,
    os::{
        fd::{AsFd, AsRawFd as _, BorrowedFd, FromRawFd as _, OwnedFd},
        unix::ffi::OsStrExt as _,
    },
    path::{Path, PathBuf},
};

use log::debug;
use nix::{
    errno::Errno,
    libc::{
        self, FAN_CLASS_NOTIF, FAN_CLOEXEC, FAN_MARK_ADD, FAN_MARK_FILESYSTEM, FAN_REPORT_DFID_NAME,
    },
};
use thiserror::Error;

use super::flags::mask_to_human_string;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("fanotify requires CAP_SYS_ADMIN (and CAP_DAC_READ_SEARCH to resolve paths); run as root")]
    PermissionDenied,
    #[error("fanotify_init failed: `{0}`")]
    Init(#[source] Errno),
    #[error("unable to watch filesystem containing {root:?}: `{errno}`")]
    Mark {
        root: PathBuf,
        #[source]
        errno: Errno,
    },
    #[error("watch root {0:?} can't be passed to the kernel")]
    InvalidRoot(PathBuf),
}

/// A fanotify group reporting directory-entry events, with name info, for the whole filesystem containing a root.
///
/// Records read from the descriptor carry `FAN_NOFD` and a directory file handle plus name, which is the layout
/// [`RecordDecoder`](super::RecordDecoder) expects.
#[derive(Debug)]
pub struct Subscription {
    fd: OwnedFd,
}

impl Subscription {
    pub fn init(mask: u64, root: &Path) -> Result<Self, SubscriptionError> {
        let c_root = CString::new(root.as_os_str().as_bytes())
            .map_err(|_| SubscriptionError::InvalidRoot(root.to_path_buf()))?;

        #[allow(clippy::cast_sign_loss)] // O_* flags are small non-negative constants
        let event_f_flags = (libc::O_RDONLY | libc::O_LARGEFILE) as libc::c_uint;
        // SAFETY: plain syscall wrapper with no pointer arguments.
        let res = unsafe {
            libc::fanotify_init(
                FAN_CLASS_NOTIF | FAN_CLOEXEC | FAN_REPORT_DFID_NAME,
                event_f_flags,
            )
        };
        let raw = Errno::result(res).map_err(|errno| match errno {
            Errno::EPERM => SubscriptionError::PermissionDenied,
            other => SubscriptionError::Init(other),
        })?;
        // SAFETY: fanotify_init succeeded, so `raw` is a new descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `c_root` is a valid NUL-terminated string that outlives the call.
        let res = unsafe {
            libc::fanotify_mark(
                fd.as_raw_fd(),
                FAN_MARK_ADD | FAN_MARK_FILESYSTEM,
                mask,
                libc::AT_FDCWD,
                c_root.as_ptr(),
            )
        };
        Errno::result(res).map_err(|errno| match errno {
            Errno::EPERM => SubscriptionError::PermissionDenied,
            errno => SubscriptionError::Mark {
                root: root.to_path_buf(),
                errno,
            },
        })?;

        debug!(
            "watching filesystem of {root:?} for {}",
            mask_to_human_string(mask)
        );
        Ok(Subscription { fd })
    }

    /// The descriptor as a blocking reader; dropping it ends the subscription.
    #[must_use]
    pub fn into_reader(self) -> File {
        File::from(self.fd)
    }
}

impl AsFd for Subscription {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{FAN_REPORT_DFID_NAME, Subscription, SubscriptionError};
    use crate::fanotify::flags::FAN_CREATE;

    #[test]
    fn dfid_name_flag_value() {
        assert_eq!(FAN_REPORT_DFID_NAME, 0xc00);
    }

    #[test]
    fn nul_in_root_rejected() {
        let root = Path::new("/tmp/bad\0root");
        match Subscription::init(FAN_CREATE, root) {
            Err(SubscriptionError::InvalidRoot(path)) => assert_eq!(path, root),
            other => panic!("expected InvalidRoot, got {other:?}"),
        }
    }

    #[test]
    fn missing_root_reported() {
        let root = Path::new("/nonexistent/fanwatch");
        match Subscription::init(FAN_CREATE, root) {
            Err(SubscriptionError::Mark { root: r, .. }) => assert_eq!(r, root),
            // Unprivileged or a kernel without fanotify; nothing to check.
            Err(SubscriptionError::PermissionDenied | SubscriptionError::Init(_)) => {}
            other => panic!("expected Mark error, got {other:?}"),
        }
    }
}
