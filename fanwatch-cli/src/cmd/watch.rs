// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{process::ExitCode, time::Duration};

use anyhow::{Context as _, Result};
use log::{Log, error, set_boxed_logger};

use crate::config::{WatchSettings, get_watch_config};

use super::cli::WatchOptions;

pub fn cli(logger: Box<dyn Log>, options: &WatchOptions) -> ExitCode {
    if set_boxed_logger(logger).is_err() {
        return ExitCode::FAILURE;
    }

    let settings = match load_settings(options) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err:?}");
            return ExitCode::FAILURE;
        }
    };

    match watch(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

fn load_settings(options: &WatchOptions) -> Result<WatchSettings> {
    let file = get_watch_config(options.config.as_deref()).context("loading config")?;
    let settings = file
        .merge(options.as_overrides())
        .resolve()
        .context("validating watch settings")?;
    Ok(settings)
}

/// Counts event stream failures and decides whether, and after how long, to subscribe again.
#[derive(Debug)]
pub struct RestartPolicy {
    delay: Duration,
    max_restarts: Option<u32>,
    failures: u32,
}

impl RestartPolicy {
    #[must_use]
    pub fn new(delay: Duration, max_restarts: Option<u32>) -> Self {
        RestartPolicy {
            delay,
            max_restarts,
            failures: 0,
        }
    }

    /// Record a failure.  Returns the pause before the next attempt, or `None` once the restart allowance is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        match self.max_restarts {
            Some(max) if self.failures > max => None,
            _ => Some(self.delay),
        }
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(target_os = "linux")]
fn watch(settings: &WatchSettings) -> Result<()> {
    use std::thread;

    use anyhow::anyhow;
    use log::{info, warn};

    use crate::{
        errors::WatchErrors,
        fanotify::{
            EventStreamReader, HandleResolver as _, LogEventSink, OwnedFileHandle,
            ProcFdHandleResolver, RecordDecoder, Subscription, SubscriptionError,
            mask_to_human_string,
        },
    };

    let resolver = ProcFdHandleResolver::open(&settings.root)
        .with_context(|| format!("opening watch root {:?}", settings.root))?;

    // A round trip through the root's own handle shows up missing capabilities before the first event does.
    match OwnedFileHandle::for_path(&settings.root) {
        Ok(handle) => {
            if let Err(err) = resolver.resolve(&handle.as_handle()) {
                warn!(
                    "unable to resolve a file handle for {:?}, so events will not be reported: {err} (requires CAP_DAC_READ_SEARCH)",
                    settings.root
                );
            }
        }
        Err(errno) => warn!(
            "filesystem containing {:?} doesn't support file handles ({errno}); events will not resolve",
            settings.root
        ),
    }

    info!(
        "watching filesystem containing {:?} for {}",
        settings.root,
        mask_to_human_string(settings.mask)
    );

    let mut policy = RestartPolicy::new(settings.restart_delay, settings.max_restarts);
    loop {
        let result = Subscription::init(settings.mask, &settings.root)
            .map_err(anyhow::Error::from)
            .and_then(|subscription| {
                EventStreamReader::with_buffer_size(
                    subscription.into_reader(),
                    RecordDecoder::new(&resolver),
                    LogEventSink,
                    settings.buffer_size,
                )
                .run()
                .map_err(anyhow::Error::from)
            });
        let err = match result {
            Ok(()) => anyhow!("event stream ended"),
            Err(err) => err,
        };

        if matches!(
            err.downcast_ref::<SubscriptionError>(),
            Some(SubscriptionError::PermissionDenied | SubscriptionError::InvalidRoot(_))
        ) {
            return Err(err);
        }

        match policy.next_delay() {
            Some(delay) => {
                error!("{err:?}; restarting in {delay:?}");
                thread::sleep(delay);
            }
            None => {
                return Err(err.context(WatchErrors::RestartsExhausted {
                    attempts: policy.failures(),
                }));
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn watch(_settings: &WatchSettings) -> Result<()> {
    Err(crate::errors::WatchErrors::Unsupported.into())
}
