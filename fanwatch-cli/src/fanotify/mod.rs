// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Decoding of a fanotify event stream into path-qualified events.
//!
//! Data flows one way: the [`EventStreamReader`] pulls buffers from the notification descriptor, the
//! [`RecordDecoder`] splits them into records, a [`HandleResolver`] turns each record's directory handle into a path,
//! and finished [`Event`]s go to an [`EventSink`].

pub mod decoder;
pub mod flags;
pub mod protocol;
pub mod reader;
pub mod resolver;
#[cfg(target_os = "linux")]
pub mod subscription;
#[cfg(test)]
mod testing;

pub use decoder::{DecodeError, DecodeOutcome, Event, RecordDecoder, RecordError};
pub use flags::{mask_to_human, mask_to_human_string};
pub use reader::{DrainSummary, EventSink, EventStreamReader, LogEventSink, ReadError};
pub use resolver::{HandleResolver, ResolveError};
#[cfg(target_os = "linux")]
pub use resolver::{OwnedFileHandle, ProcFdHandleResolver, open_directory_context};
#[cfg(target_os = "linux")]
pub use subscription::{Subscription, SubscriptionError};
