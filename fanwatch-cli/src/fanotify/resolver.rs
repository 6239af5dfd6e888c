// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{io, path::PathBuf};

use thiserror::Error;

use super::protocol::FileHandle;

#[cfg(target_os = "linux")]
pub use linux::{OwnedFileHandle, ProcFdHandleResolver, open_directory_context};

/// Turns an opaque kernel file handle into the current path of the object it references.
///
/// Implementations hold whatever context the mechanism needs (on Linux, a descriptor on the watched filesystem) and
/// must not leave any resources allocated once `resolve` returns, whether it succeeds or fails.
pub trait HandleResolver {
    fn resolve(&self, handle: &FileHandle<'_>) -> Result<PathBuf, ResolveError>;
}

impl<R: HandleResolver + ?Sized> HandleResolver for &R {
    fn resolve(&self, handle: &FileHandle<'_>) -> Result<PathBuf, ResolveError> {
        (**self).resolve(handle)
    }
}

impl<R: HandleResolver + ?Sized> HandleResolver for Box<R> {
    fn resolve(&self, handle: &FileHandle<'_>) -> Result<PathBuf, ResolveError> {
        (**self).resolve(handle)
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The object was removed (or its inode recycled) between the event being queued and the lookup.  Expected during
    /// bulk deletes; not a fault.
    #[error("file handle is stale")]
    Stale,
    #[error("unable to open file handle: `{0}`")]
    Open(#[source] io::Error),
    #[error("unable to read path from {link:?}: `{error}`")]
    ReadLink {
        link: PathBuf,
        #[source]
        error: io::Error,
    },
}

impl ResolveError {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, ResolveError::Stale)
    }
}

const DELETED_SUFFIX: &str = " (deleted)";

/// The kernel appends " (deleted)" to the `/proc/self/fd` link of an unlinked object; it isn't part of the path.
#[must_use]
pub fn strip_deleted_suffix(path: PathBuf) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => path,
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::{
        fs::{self, OpenOptions},
        io,
        os::{
            fd::{AsFd, AsRawFd as _, BorrowedFd, FromRawFd as _, OwnedFd, RawFd},
            unix::{ffi::OsStrExt as _, fs::OpenOptionsExt as _},
        },
        path::{Path, PathBuf},
    };

    use log::trace;
    use nix::{errno::Errno, fcntl::OFlag, libc};

    use super::{HandleResolver, ResolveError, strip_deleted_suffix};
    use crate::fanotify::protocol::{FILE_HANDLE_HEADER_LEN, FileHandle};

    /// `MAX_HANDLE_SZ` from `<linux/exportfs.h>`.
    const MAX_HANDLE_SZ: usize = 128;

    /// Open the watched root as the directory context that every handle is resolved against.
    pub fn open_directory_context(root: &Path) -> io::Result<OwnedFd> {
        let dir = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(root)?;
        Ok(OwnedFd::from(dir))
    }

    /// Resolves handles with `open_by_handle_at(2)` followed by a `readlink` of `/proc/self/fd/<n>`.
    ///
    /// Requires `CAP_DAC_READ_SEARCH`.  Exactly one descriptor is opened per call, and it is closed before the call
    /// returns on every path.
    pub struct ProcFdHandleResolver {
        context: OwnedFd,
    }

    impl ProcFdHandleResolver {
        #[must_use]
        pub fn new(context: OwnedFd) -> Self {
            ProcFdHandleResolver { context }
        }

        pub fn open(root: &Path) -> io::Result<Self> {
            Ok(Self::new(open_directory_context(root)?))
        }
    }

    impl HandleResolver for ProcFdHandleResolver {
        fn resolve(&self, handle: &FileHandle<'_>) -> Result<PathBuf, ResolveError> {
            let fd = open_by_handle_at(self.context.as_fd(), handle, OFlag::O_RDONLY).map_err(
                |errno| match errno {
                    Errno::ESTALE => ResolveError::Stale,
                    other => ResolveError::Open(io::Error::from(other)),
                },
            )?;

            let link = PathBuf::from(format!("/proc/self/fd/{}", fd.as_raw_fd()));
            let target = fs::read_link(&link);
            drop(fd);

            let target = target.map_err(|error| ResolveError::ReadLink { link, error })?;
            trace!("resolved file handle to {target:?}");
            Ok(strip_deleted_suffix(target))
        }
    }

    fn open_by_handle_at(
        mount_fd: BorrowedFd<'_>,
        handle: &FileHandle<'_>,
        flags: OFlag,
    ) -> nix::Result<OwnedFd> {
        let raw = handle.to_kernel_struct();
        // SAFETY: `raw` is a complete `struct file_handle` whose `handle_bytes` matches the trailing byte count, and it
        // outlives the call.
        let res = unsafe {
            libc::syscall(
                libc::SYS_open_by_handle_at,
                mount_fd.as_raw_fd(),
                raw.as_ptr(),
                flags.bits(),
            )
        };
        let fd = RawFd::try_from(Errno::result(res)?).map_err(|_| Errno::EOVERFLOW)?;
        // SAFETY: the syscall succeeded, so `fd` is a freshly opened descriptor that nothing else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// A file handle obtained from `name_to_handle_at(2)`, owning its bytes.
    ///
    /// This is the other direction of the resolver: producing a handle from a path, the same way the kernel does when
    /// it queues an event.  Useful for checking that a filesystem supports handles before watching it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct OwnedFileHandle {
        handle_type: i32,
        bytes: Vec<u8>,
        mount_id: i32,
    }

    impl OwnedFileHandle {
        pub fn for_path(path: &Path) -> nix::Result<Self> {
            let c_path =
                std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)?;

            let mut raw = vec![0u8; FILE_HANDLE_HEADER_LEN + MAX_HANDLE_SZ];
            #[allow(clippy::cast_possible_truncation)] // MAX_HANDLE_SZ is 128
            raw[0..4].copy_from_slice(&(MAX_HANDLE_SZ as u32).to_ne_bytes());
            let mut mount_id: libc::c_int = 0;

            // SAFETY: `raw` is large enough for a `struct file_handle` with `MAX_HANDLE_SZ` bytes, as announced in its
            // `handle_bytes` field, and both out-pointers are valid for the duration of the call.
            let res = unsafe {
                libc::syscall(
                    libc::SYS_name_to_handle_at,
                    libc::AT_FDCWD,
                    c_path.as_ptr(),
                    raw.as_mut_ptr(),
                    &raw mut mount_id,
                    0,
                )
            };
            Errno::result(res)?;

            let handle_bytes = raw[0..4].try_into().map(u32::from_ne_bytes).map_err(|_| Errno::EINVAL)?;
            let handle_type = raw[4..8].try_into().map(i32::from_ne_bytes).map_err(|_| Errno::EINVAL)?;
            let end = FILE_HANDLE_HEADER_LEN + handle_bytes as usize;
            let bytes = raw.get(FILE_HANDLE_HEADER_LEN..end).ok_or(Errno::EOVERFLOW)?.to_vec();
            Ok(OwnedFileHandle {
                handle_type,
                bytes,
                mount_id,
            })
        }

        #[must_use]
        pub fn as_handle(&self) -> FileHandle<'_> {
            FileHandle::new(self.handle_type, &self.bytes)
        }

        #[must_use]
        pub fn mount_id(&self) -> i32 {
            self.mount_id
        }
    }
}
