// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;

use crate::fanotify::{
    flags::{
        FAN_ATTRIB, FAN_CLOSE_WRITE, FAN_CREATE, FAN_DELETE, FAN_DELETE_SELF, FAN_MODIFY,
        FAN_MOVE, FAN_MOVE_SELF, FAN_ONDIR,
    },
    reader::DEFAULT_BUFFER_SIZE,
};

const DEFAULT_CONFIG_PATH: &str = ".config/fanwatch.toml";
const DEFAULT_ROOT: &str = "/tmp";
const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
const DEFAULT_EVENTS: &[EventClass] = &[
    EventClass::Create,
    EventClass::Delete,
    EventClass::Modify,
    EventClass::CloseWrite,
    EventClass::Move,
];

/// Event classes an operator can ask for.  Each maps onto one or more fanotify mask bits.
#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventClass {
    Create,
    Delete,
    Modify,
    CloseWrite,
    /// Both halves of a rename.
    Move,
    Attrib,
    DeleteSelf,
    MoveSelf,
    /// Also report events on directories, not just files.
    Ondir,
}

impl EventClass {
    #[must_use]
    pub fn mask(self) -> u64 {
        match self {
            EventClass::Create => FAN_CREATE,
            EventClass::Delete => FAN_DELETE,
            EventClass::Modify => FAN_MODIFY,
            EventClass::CloseWrite => FAN_CLOSE_WRITE,
            EventClass::Move => FAN_MOVE,
            EventClass::Attrib => FAN_ATTRIB,
            EventClass::DeleteSelf => FAN_DELETE_SELF,
            EventClass::MoveSelf => FAN_MOVE_SELF,
            EventClass::Ondir => FAN_ONDIR,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("override config path {0:?} could not be opened")]
    MissingOverride(PathBuf),
    #[error("unable to read config {path:?}: `{error}`")]
    Read {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
    #[error("unable to parse config {path:?}: `{error}`")]
    Parse {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },
    #[error("buffer-size {0} is below the minimum of 4096 bytes")]
    BufferTooSmall(usize),
    #[error("no event classes selected")]
    NoEvents,
}

/// Contents of the optional config file; every key may also be given on the command line, which wins.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WatchConfig {
    pub root: Option<PathBuf>,
    pub events: Option<Vec<EventClass>>,
    pub buffer_size: Option<usize>,
    pub restart_delay_ms: Option<u64>,
    pub max_restarts: Option<u32>,
}

/// Fully-resolved settings for one `watch` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub root: PathBuf,
    pub mask: u64,
    pub buffer_size: usize,
    pub restart_delay: Duration,
    /// `None` retries forever.
    pub max_restarts: Option<u32>,
}

impl WatchConfig {
    /// Layer `overrides` on top of `self`, key by key.
    #[must_use]
    pub fn merge(self, overrides: WatchConfig) -> WatchConfig {
        WatchConfig {
            root: overrides.root.or(self.root),
            events: overrides.events.or(self.events),
            buffer_size: overrides.buffer_size.or(self.buffer_size),
            restart_delay_ms: overrides.restart_delay_ms.or(self.restart_delay_ms),
            max_restarts: overrides.max_restarts.or(self.max_restarts),
        }
    }

    pub fn resolve(self) -> Result<WatchSettings, ConfigError> {
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size < DEFAULT_BUFFER_SIZE {
            return Err(ConfigError::BufferTooSmall(buffer_size));
        }

        let events = self.events.as_deref().unwrap_or(DEFAULT_EVENTS);
        let mask = events.iter().fold(0, |mask, class| mask | class.mask());
        // ONDIR alone selects nothing.
        if mask & !FAN_ONDIR == 0 {
            return Err(ConfigError::NoEvents);
        }

        Ok(WatchSettings {
            root: self.root.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
            mask,
            buffer_size,
            restart_delay: Duration::from_millis(
                self.restart_delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS),
            ),
            max_restarts: self.max_restarts,
        })
    }
}

pub fn get_watch_config(override_config: Option<&Path>) -> Result<WatchConfig, ConfigError> {
    let path = override_config.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if override_config.is_some() {
                return Err(ConfigError::MissingOverride(path.to_path_buf()));
            }
            return Ok(WatchConfig::default());
        }
        Err(error) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                error,
            });
        }
    };
    toml::from_str(&contents).map_err(|error| ConfigError::Parse {
        path: path.to_path_buf(),
        error,
    })
}
