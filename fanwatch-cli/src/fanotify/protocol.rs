// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The fanotify wire format (at least, the parts of it that `FAN_REPORT_DFID_NAME` produces).
//!
//! Every event read from a fanotify descriptor starts with a fixed [`EventMetadata`] header whose `event_len` covers
//! the whole record.  With file identifiers enabled the header is followed by an info record ([`FidInfo`]), a
//! `struct file_handle` ([`FileHandleHeader`] plus its opaque bytes), and a NUL-terminated name padded out to the
//! record boundary.  All fields are native-endian in the kernel; only little-endian hosts are supported.
//!
//! Each parser here consumes exactly its own bytes from the front of the input slice and leaves the remainder, so a
//! caller that slices the input to a record span first can never read past that record.

use num_enum::FromPrimitive;
use winnow::binary::{le_i32, le_u8, le_u16, le_u32, le_u64};
use winnow::token::take;
use winnow::{ModalResult, Parser};

/// Value of `fanotify_event_metadata.vers` that this decoder understands.
pub const METADATA_VERSION: u8 = 3;

/// `sizeof(struct fanotify_event_metadata)`
pub const EVENT_METADATA_LEN: usize = 24;

/// `sizeof(struct fanotify_event_info_fid)`, excluding the flexible file handle.
pub const FID_INFO_LEN: usize = 12;

/// `sizeof(struct file_handle)`, excluding the flexible `f_handle` bytes.
pub const FILE_HANDLE_HEADER_LEN: usize = 8;

/// `fd` value in the metadata when the event carries file identifiers instead of an open descriptor.
pub const FAN_NOFD: i32 = -1;

/// `struct fanotify_event_metadata`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMetadata {
    pub event_len: u32,
    pub vers: u8,
    pub reserved: u8,
    pub metadata_len: u16,
    pub mask: u64,
    pub fd: i32,
    pub pid: i32,
}

impl EventMetadata {
    pub fn parse(input: &mut &[u8]) -> ModalResult<Self> {
        (le_u32, le_u8, le_u8, le_u16, le_u64, le_i32, le_i32)
            .map(
                |(event_len, vers, reserved, metadata_len, mask, fd, pid)| EventMetadata {
                    event_len,
                    vers,
                    reserved,
                    metadata_len,
                    mask,
                    fd,
                    pid,
                },
            )
            .parse_next(input)
    }
}

/// `fanotify_event_info_header.info_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum InfoType {
    /// `FAN_EVENT_INFO_TYPE_FID`: the handle identifies the object itself; there is no name.
    Fid = 1,
    /// `FAN_EVENT_INFO_TYPE_DFID_NAME`: the handle identifies the parent directory, and a name follows.
    DfidName = 2,
    /// `FAN_EVENT_INFO_TYPE_DFID`: the handle identifies the parent directory; there is no name.
    Dfid = 3,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// `struct fanotify_event_info_fid`, up to (but not including) the embedded file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FidInfo {
    pub info_type: InfoType,
    pub pad: u8,
    /// Length of the whole info record, including the file handle and name that follow.
    pub len: u16,
    /// `__kernel_fsid_t`; opaque, only meaningful for comparing against other events from the same filesystem.
    pub fsid: u64,
}

impl FidInfo {
    pub fn parse(input: &mut &[u8]) -> ModalResult<Self> {
        (le_u8, le_u8, le_u16, le_u64)
            .map(|(info_type, pad, len, fsid)| FidInfo {
                info_type: InfoType::from(info_type),
                pad,
                len,
                fsid,
            })
            .parse_next(input)
    }
}

/// Fixed part of `struct file_handle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandleHeader {
    pub handle_bytes: u32,
    pub handle_type: i32,
}

impl FileHandleHeader {
    pub fn parse(input: &mut &[u8]) -> ModalResult<Self> {
        (le_u32, le_i32)
            .map(|(handle_bytes, handle_type)| FileHandleHeader {
                handle_bytes,
                handle_type,
            })
            .parse_next(input)
    }

    /// Consume exactly `handle_bytes` opaque bytes following this header.
    pub fn take_handle<'a>(&self, input: &mut &'a [u8]) -> ModalResult<FileHandle<'a>> {
        take(self.handle_bytes as usize)
            .map(|bytes| FileHandle {
                handle_type: self.handle_type,
                bytes,
            })
            .parse_next(input)
    }
}

/// A kernel file handle as delivered in an event.
///
/// The bytes are the filesystem's private encoding of an object reference; they only mean something when handed back
/// to the kernel together with a descriptor on the same filesystem.  Nothing in this crate inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle<'a> {
    handle_type: i32,
    bytes: &'a [u8],
}

impl<'a> FileHandle<'a> {
    #[must_use]
    pub fn new(handle_type: i32, bytes: &'a [u8]) -> Self {
        FileHandle { handle_type, bytes }
    }

    #[must_use]
    pub fn handle_type(&self) -> i32 {
        self.handle_type
    }

    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Serialize as a native `struct file_handle`, ready to pass to `open_by_handle_at(2)`.
    #[must_use]
    pub fn to_kernel_struct(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(FILE_HANDLE_HEADER_LEN + self.bytes.len());
        // handle_bytes was read from a u32 in the first place, so this can only fail for a hand-built handle.
        let handle_bytes = u32::try_from(self.bytes.len()).unwrap_or(u32::MAX);
        raw.extend_from_slice(&handle_bytes.to_ne_bytes());
        raw.extend_from_slice(&self.handle_type.to_ne_bytes());
        raw.extend_from_slice(self.bytes);
        raw
    }
}
