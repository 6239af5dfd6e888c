// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    ffi::{OsStr, OsString},
    os::unix::ffi::OsStrExt as _,
    path::PathBuf,
};

use thiserror::Error;

use super::{
    flags::{FAN_Q_OVERFLOW, mask_to_human},
    protocol::{
        EVENT_METADATA_LEN, EventMetadata, FID_INFO_LEN, FILE_HANDLE_HEADER_LEN, FidInfo,
        FileHandleHeader, InfoType, METADATA_VERSION,
    },
    resolver::{HandleResolver, ResolveError},
};

/// A fully decoded and resolved filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub mask: u64,
    pub pid: i32,
    pub fsid: u64,
    pub info_type: InfoType,
    /// Current path of the object the event's file handle refers to; the parent directory for `DFID_NAME` events.
    pub directory: PathBuf,
    /// Directory entry name carried by the event, if any.
    pub name: Option<OsString>,
    /// `directory` joined with `name`.
    pub path: PathBuf,
}

impl Event {
    #[must_use]
    pub fn human_flags(&self) -> Vec<&'static str> {
        mask_to_human(self.mask)
    }
}

#[derive(Debug)]
pub enum DecodeOutcome {
    Event(Event),
    /// The file handle no longer refers to anything; no event, and nothing worth reporting.
    Stale,
    /// The kernel's event queue overflowed and events were dropped before they reached us.
    Overflow,
    /// This record could not be decoded or resolved.  Its neighbours are unaffected.
    Failed(RecordError),
}

/// A buffer-level failure: the record header itself couldn't be trusted, so there's no way to find the next record.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("offset {offset} is beyond the end of a {len}-byte buffer")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("record header at offset {offset} is truncated; only {available} bytes remain")]
    TruncatedHeader { offset: usize, available: usize },
    #[error(
        "record at offset {offset} declares length {event_len}, shorter than its 24-byte header"
    )]
    LengthTooShort { offset: usize, event_len: usize },
    #[error(
        "record at offset {offset} declares length {event_len}, but only {available} bytes remain in the buffer"
    )]
    LengthOverrun {
        offset: usize,
        event_len: usize,
        available: usize,
    },
}

/// Why a single record was abandoned.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unsupported metadata version {0}; expected 3")]
    UnsupportedVersion(u8),
    #[error("metadata length {metadata_len} is outside the {event_len}-byte record")]
    InvalidMetadataLength { metadata_len: usize, event_len: usize },
    #[error("identifier info truncated; only {available} bytes remain in the record")]
    TruncatedInfo { available: usize },
    #[error("identifier info declares length {declared}, but {available} bytes remain in the record")]
    InvalidInfoLength { declared: usize, available: usize },
    #[error("file handle descriptor truncated; only {available} bytes remain in the info record")]
    TruncatedHandleHeader { available: usize },
    #[error("file handle declares {declared} bytes, but {available} bytes remain in the info record")]
    TruncatedHandle { declared: u32, available: usize },
    #[error("failed to resolve file handle: `{0}`")]
    Resolve(#[from] ResolveError),
}

/// Decodes `FAN_REPORT_DFID_NAME` records, resolving each file handle to a path as it goes.
pub struct RecordDecoder<R> {
    resolver: R,
}

impl<R: HandleResolver> RecordDecoder<R> {
    pub fn new(resolver: R) -> Self {
        RecordDecoder { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Decode the record that starts at `offset` in `buffer`.
    ///
    /// On success the returned offset is always `offset + event_len`, whether or not the record itself could be
    /// decoded.  Only a header that can't be trusted produces a `DecodeError`.
    pub fn decode(
        &self,
        buffer: &[u8],
        offset: usize,
    ) -> Result<(DecodeOutcome, usize), DecodeError> {
        let remaining = buffer
            .get(offset..)
            .ok_or(DecodeError::OffsetOutOfRange {
                offset,
                len: buffer.len(),
            })?;

        let mut cursor = remaining;
        let metadata =
            EventMetadata::parse(&mut cursor).map_err(|_| DecodeError::TruncatedHeader {
                offset,
                available: remaining.len(),
            })?;

        let event_len = metadata.event_len as usize;
        if event_len < EVENT_METADATA_LEN {
            return Err(DecodeError::LengthTooShort { offset, event_len });
        }
        if event_len > remaining.len() {
            return Err(DecodeError::LengthOverrun {
                offset,
                event_len,
                available: remaining.len(),
            });
        }

        let outcome = match self.decode_record(&metadata, &remaining[..event_len]) {
            Ok(outcome) => outcome,
            Err(RecordError::Resolve(ResolveError::Stale)) => DecodeOutcome::Stale,
            Err(err) => DecodeOutcome::Failed(err),
        };
        Ok((outcome, offset + event_len))
    }

    /// `span` is exactly the record's bytes, header included.
    fn decode_record(
        &self,
        metadata: &EventMetadata,
        span: &[u8],
    ) -> Result<DecodeOutcome, RecordError> {
        if metadata.vers != METADATA_VERSION {
            return Err(RecordError::UnsupportedVersion(metadata.vers));
        }
        let metadata_len = usize::from(metadata.metadata_len);
        if metadata_len < EVENT_METADATA_LEN || metadata_len > span.len() {
            return Err(RecordError::InvalidMetadataLength {
                metadata_len,
                event_len: span.len(),
            });
        }
        if metadata.mask & FAN_Q_OVERFLOW != 0 {
            return Ok(DecodeOutcome::Overflow);
        }

        // Everything after the metadata: the identifier info, its file handle, and the trailing name.
        let body = &span[metadata_len..];

        let mut cursor = body;
        let info = FidInfo::parse(&mut cursor).map_err(|_| RecordError::TruncatedInfo {
            available: body.len(),
        })?;
        let info_len = usize::from(info.len);
        if info_len < FID_INFO_LEN + FILE_HANDLE_HEADER_LEN || info_len > body.len() {
            return Err(RecordError::InvalidInfoLength {
                declared: info_len,
                available: body.len(),
            });
        }

        // The handle must fit inside the info record that declares it.
        let mut cursor = &body[FID_INFO_LEN..info_len];
        let header = FileHandleHeader::parse(&mut cursor).map_err(|_| {
            RecordError::TruncatedHandleHeader {
                available: info_len - FID_INFO_LEN,
            }
        })?;
        let available = cursor.len();
        let handle = header
            .take_handle(&mut cursor)
            .map_err(|_| RecordError::TruncatedHandle {
                declared: header.handle_bytes,
                available,
            })?;
        let handle_end = info_len - cursor.len();

        let directory = self.resolver.resolve(&handle)?;

        let name = trailing_name(&body[handle_end..]);
        // "." names the directory itself, for events on the watched object rather than one of its entries.
        let (name, path) = if name.is_empty() || name == b"." {
            (None, directory.clone())
        } else {
            let name = OsStr::from_bytes(name);
            (Some(name.to_os_string()), directory.join(name))
        };

        Ok(DecodeOutcome::Event(Event {
            mask: metadata.mask,
            pid: metadata.pid,
            fsid: info.fsid,
            info_type: info.info_type,
            directory,
            name,
            path,
        }))
    }
}

/// The name runs to the first NUL; anything after it is the terminator and alignment padding.
fn trailing_name(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}
