// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Synthetic fanotify records and a table-driven resolver, for exercising the decoder without a kernel.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
    path::PathBuf,
};

use log::{Level, LevelFilter, Log, Metadata, Record};

use super::{
    flags::{FAN_CREATE, FAN_Q_OVERFLOW},
    protocol::{
        EVENT_METADATA_LEN, FAN_NOFD, FID_INFO_LEN, FILE_HANDLE_HEADER_LEN, FileHandle, InfoType,
        METADATA_VERSION,
    },
    resolver::{HandleResolver, ResolveError},
};

/// Builds one `FAN_REPORT_DFID_NAME` record, laid out as the kernel would.
pub(crate) struct RecordBuilder {
    mask: u64,
    pid: i32,
    version: u8,
    info_type: u8,
    fsid: u64,
    handle_type: i32,
    handle: Vec<u8>,
    name: Vec<u8>,
    handle_bytes_override: Option<u32>,
    info_len_override: Option<u16>,
}

impl RecordBuilder {
    pub(crate) fn new(handle: &[u8]) -> Self {
        RecordBuilder {
            mask: FAN_CREATE,
            pid: 1,
            version: METADATA_VERSION,
            info_type: 2,
            fsid: 0x0000_fd00_0000_0001,
            handle_type: 1,
            handle: handle.to_vec(),
            name: Vec::new(),
            handle_bytes_override: None,
            info_len_override: None,
        }
    }

    /// A queue-overflow notification: a bare metadata header with no identifier info.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn overflow() -> Vec<u8> {
        let mut raw = Vec::with_capacity(EVENT_METADATA_LEN);
        raw.extend_from_slice(&(EVENT_METADATA_LEN as u32).to_le_bytes());
        raw.push(METADATA_VERSION);
        raw.push(0);
        raw.extend_from_slice(&(EVENT_METADATA_LEN as u16).to_le_bytes());
        raw.extend_from_slice(&FAN_Q_OVERFLOW.to_le_bytes());
        raw.extend_from_slice(&FAN_NOFD.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw
    }

    pub(crate) fn mask(mut self, mask: u64) -> Self {
        self.mask = mask;
        self
    }

    pub(crate) fn pid(mut self, pid: i32) -> Self {
        self.pid = pid;
        self
    }

    pub(crate) fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn info_type(mut self, info_type: InfoType) -> Self {
        self.info_type = match info_type {
            InfoType::Fid => 1,
            InfoType::DfidName => 2,
            InfoType::Dfid => 3,
            InfoType::Unknown(n) => n,
        };
        self
    }

    pub(crate) fn name(mut self, name: &str) -> Self {
        self.name = name.as_bytes().to_vec();
        self
    }

    pub(crate) fn handle_bytes_override(mut self, handle_bytes: u32) -> Self {
        self.handle_bytes_override = Some(handle_bytes);
        self
    }

    pub(crate) fn info_len_override(mut self, info_len: u16) -> Self {
        self.info_len_override = Some(info_len);
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn build(&self) -> Vec<u8> {
        let mut info = Vec::new();
        info.push(self.info_type);
        info.push(0);
        info.extend_from_slice(&[0, 0]); // len, patched below
        info.extend_from_slice(&self.fsid.to_le_bytes());
        let handle_bytes = self
            .handle_bytes_override
            .unwrap_or(self.handle.len() as u32);
        info.extend_from_slice(&handle_bytes.to_le_bytes());
        info.extend_from_slice(&self.handle_type.to_le_bytes());
        info.extend_from_slice(&self.handle);
        if !self.name.is_empty() {
            info.extend_from_slice(&self.name);
            info.push(0);
        }
        // FANOTIFY_EVENT_ALIGN
        while info.len() % 4 != 0 {
            info.push(0);
        }
        let info_len = self.info_len_override.unwrap_or(info.len() as u16);
        info[2..4].copy_from_slice(&info_len.to_le_bytes());

        let event_len = (EVENT_METADATA_LEN + info.len()) as u32;
        let mut raw = Vec::with_capacity(event_len as usize);
        raw.extend_from_slice(&event_len.to_le_bytes());
        raw.push(self.version);
        raw.push(0);
        raw.extend_from_slice(&(EVENT_METADATA_LEN as u16).to_le_bytes());
        raw.extend_from_slice(&self.mask.to_le_bytes());
        raw.extend_from_slice(&FAN_NOFD.to_le_bytes());
        raw.extend_from_slice(&self.pid.to_le_bytes());
        raw.extend_from_slice(&info);
        debug_assert!(info.len() >= FID_INFO_LEN + FILE_HANDLE_HEADER_LEN);
        raw
    }

    /// The first `len` bytes of the record, with `event_len` rewritten to claim exactly that many.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn truncated_to(&self, len: usize) -> Vec<u8> {
        let mut raw = self.build();
        raw.truncate(len);
        raw[0..4].copy_from_slice(&(len as u32).to_le_bytes());
        raw
    }
}

enum FakeEntry {
    Directory(PathBuf),
    Stale,
    Denied,
}

/// Resolves handles by exact byte match against a table.  Unknown handles are stale.
#[derive(Default)]
pub(crate) struct FakeResolver {
    entries: HashMap<Vec<u8>, FakeEntry>,
    calls: Cell<usize>,
}

impl FakeResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_directory(mut self, handle: &[u8], path: &str) -> Self {
        self.entries
            .insert(handle.to_vec(), FakeEntry::Directory(PathBuf::from(path)));
        self
    }

    pub(crate) fn with_stale(mut self, handle: &[u8]) -> Self {
        self.entries.insert(handle.to_vec(), FakeEntry::Stale);
        self
    }

    pub(crate) fn with_denied(mut self, handle: &[u8]) -> Self {
        self.entries.insert(handle.to_vec(), FakeEntry::Denied);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl HandleResolver for FakeResolver {
    fn resolve(&self, handle: &FileHandle<'_>) -> Result<PathBuf, ResolveError> {
        self.calls.set(self.calls.get() + 1);
        match self.entries.get(handle.bytes()) {
            Some(FakeEntry::Directory(path)) => Ok(path.clone()),
            Some(FakeEntry::Stale) | None => Err(ResolveError::Stale),
            Some(FakeEntry::Denied) => Err(ResolveError::Open(io::Error::from(
                io::ErrorKind::PermissionDenied,
            ))),
        }
    }
}

thread_local! {
    static CAPTURED_LEVELS: RefCell<Vec<Level>> = const { RefCell::new(Vec::new()) };
}

/// Records the level of every message, per thread, so parallel tests don't see each other's output.
struct LevelCapture;

impl Log for LevelCapture {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        CAPTURED_LEVELS.with(|levels| levels.borrow_mut().push(record.level()));
    }

    fn flush(&self) {}
}

static LEVEL_CAPTURE: LevelCapture = LevelCapture;

/// Run `f`, returning its result along with the levels of everything it logged on this thread.
pub(crate) fn capture_log_levels<T>(f: impl FnOnce() -> T) -> (T, Vec<Level>) {
    // Only ever installed from here; a second call finds it already in place.
    let _ = log::set_logger(&LEVEL_CAPTURE);
    log::set_max_level(LevelFilter::Trace);
    CAPTURED_LEVELS.with(|levels| levels.borrow_mut().clear());
    let result = f();
    let levels = CAPTURED_LEVELS.with(|levels| std::mem::take(&mut *levels.borrow_mut()));
    (result, levels)
}
