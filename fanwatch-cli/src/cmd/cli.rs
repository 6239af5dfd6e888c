// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use log::set_max_level;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::{path::PathBuf, process::ExitCode};

use crate::config::{EventClass, WatchConfig};

use super::{flags, watch};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
pub struct CommonOptions {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the filesystem containing a root directory, logging one line per event
    Watch(WatchOptions),

    /// Print the flag names set in a numeric fanotify event mask
    Flags {
        /// Event mask, either decimal or 0x-prefixed hex
        mask: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct WatchOptions {
    /// Directory whose filesystem is watched; every event on that filesystem is reported, not just those under it
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Event class to report; may be repeated.  Replaces the configured list when given.
    #[arg(value_enum, long = "event")]
    pub events: Vec<EventClass>,

    /// Size in bytes of the read buffer; at least 4096
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Pause before re-establishing the subscription after the event stream fails
    #[arg(long)]
    pub restart_delay_ms: Option<u64>,

    /// Give up after this many restarts; retries forever if unset
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Read settings from this file instead of .config/fanwatch.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl WatchOptions {
    /// The command-line settings, as a config layer to put over the config file.
    #[must_use]
    pub fn as_overrides(&self) -> WatchConfig {
        WatchConfig {
            root: self.root.clone(),
            events: if self.events.is_empty() {
                None
            } else {
                Some(self.events.clone())
            },
            buffer_size: self.buffer_size,
            restart_delay_ms: self.restart_delay_ms,
            max_restarts: self.max_restarts,
        }
    }
}

pub fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    let logger = TermLogger::new(
        cli.common.verbose.log_level_filter(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );
    set_max_level(cli.common.verbose.log_level_filter());

    match &cli.command {
        Commands::Watch(options) => watch::cli(logger, options),
        Commands::Flags { mask } => flags::cli(logger, mask),
    }
}
