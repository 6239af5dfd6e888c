// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchErrors {
    #[error("event stream failed {attempts} times; giving up (raise max-restarts to keep retrying)")]
    RestartsExhausted { attempts: u32 },

    #[error("fanotify is only available on Linux")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum FlagsErrors {
    #[error("unable to parse {input:?} as an event mask; expected a decimal or 0x-prefixed hex number")]
    InvalidMask {
        input: String,
        #[source]
        error: std::num::ParseIntError,
    },
}
