// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io::{self, Read};

use log::{debug, error, info, trace, warn};
use thiserror::Error;

use super::{
    decoder::{DecodeOutcome, Event, RecordDecoder},
    flags::mask_to_human_string,
    resolver::HandleResolver,
};

/// Default size of the buffer handed to each `read(2)`; the kernel fails the read with `EINVAL` if a single event
/// can't fit.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Receives every event that decodes and resolves successfully, in the order it appeared in the stream.
pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: Event) {
        (**self).emit(event);
    }
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

/// Writes one `info` line per event: the full path, then its flag names.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&mut self, event: Event) {
        info!(
            "{}, {}",
            event.path.display(),
            mask_to_human_string(event.mask)
        );
    }
}

/// Tally of what happened to the records in one delivered buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub emitted: usize,
    pub stale: usize,
    pub overflows: usize,
    pub failed: usize,
    /// Bytes left unread because a record header couldn't be trusted.
    pub discarded_bytes: usize,
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("unable to read from notification descriptor: `{0}`")]
    Io(#[from] io::Error),
}

/// Blocking read loop over a fanotify descriptor (or anything else that produces the same packed records).
///
/// Each `read` delivers a whole number of records; they are decoded and handed to the sink before the next `read`.
/// Nothing is buffered across reads.
pub struct EventStreamReader<Rd, R, S> {
    source: Rd,
    decoder: RecordDecoder<R>,
    sink: S,
    buffer: Vec<u8>,
}

impl<Rd: Read, R: HandleResolver, S: EventSink> EventStreamReader<Rd, R, S> {
    pub fn new(source: Rd, decoder: RecordDecoder<R>, sink: S) -> Self {
        Self::with_buffer_size(source, decoder, sink, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        source: Rd,
        decoder: RecordDecoder<R>,
        sink: S,
        buffer_size: usize,
    ) -> Self {
        EventStreamReader {
            source,
            decoder,
            sink,
            buffer: vec![0; buffer_size],
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Read and drain buffers until the source fails or reaches end-of-file.
    ///
    /// A read error ends the loop; whether to call `run` again is up to the caller.  End-of-file returns `Ok`, which
    /// a fanotify descriptor never produces but other sources may.
    pub fn run(&mut self) -> Result<(), ReadError> {
        while self.read_once()?.is_some() {}
        Ok(())
    }

    /// Block for one buffer, then drain it.  `None` at end-of-file.
    pub fn read_once(&mut self) -> Result<Option<DrainSummary>, ReadError> {
        let n = loop {
            match self.source.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            debug!("notification stream reached end-of-file");
            return Ok(None);
        }

        let summary = drain_buffer(&self.decoder, &mut self.sink, &self.buffer[..n]);
        trace!("drained {n} bytes: {summary:?}");
        Ok(Some(summary))
    }

    /// Decode every record in `data` as though it had just been read from the source.
    pub fn drain(&mut self, data: &[u8]) -> DrainSummary {
        drain_buffer(&self.decoder, &mut self.sink, data)
    }
}

fn drain_buffer<R: HandleResolver, S: EventSink>(
    decoder: &RecordDecoder<R>,
    sink: &mut S,
    data: &[u8],
) -> DrainSummary {
    let mut summary = DrainSummary::default();
    let mut offset = 0;
    while offset < data.len() {
        let (outcome, next) = match decoder.decode(data, offset) {
            Ok(decoded) => decoded,
            Err(err) => {
                summary.discarded_bytes = data.len() - offset;
                error!(
                    "abandoning remaining {} bytes of event buffer: {err}",
                    summary.discarded_bytes
                );
                break;
            }
        };

        match outcome {
            DecodeOutcome::Event(event) => {
                summary.emitted += 1;
                sink.emit(event);
            }
            DecodeOutcome::Stale => {
                // Routine when a directory tree is removed faster than we can resolve its children.
                summary.stale += 1;
                debug!("dropped event at offset {offset}: file handle is stale");
            }
            DecodeOutcome::Overflow => {
                summary.overflows += 1;
                warn!("fanotify event queue overflowed; some events were lost");
            }
            DecodeOutcome::Failed(err) => {
                summary.failed += 1;
                error!("dropped event at offset {offset}: {err}");
            }
        }
        offset = next;
    }
    summary
}
