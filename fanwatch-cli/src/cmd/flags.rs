// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::process::ExitCode;

use log::{Log, error, set_boxed_logger, warn};

use crate::{
    errors::FlagsErrors,
    fanotify::flags::{mask_to_human, unrecognized_bits},
};

#[allow(clippy::print_stdout)]
pub fn cli(logger: Box<dyn Log>, input: &str) -> ExitCode {
    if set_boxed_logger(logger).is_err() {
        return ExitCode::FAILURE;
    }

    let mask = match parse_mask(input) {
        Ok(mask) => mask,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let unnamed = unrecognized_bits(mask);
    if unnamed != 0 {
        warn!("mask contains bits with no known name: {unnamed:#x}");
    }
    for name in mask_to_human(mask) {
        println!("{name}");
    }
    ExitCode::SUCCESS
}

/// Accepts decimal, or hex with a `0x` prefix.
pub fn parse_mask(input: &str) -> Result<u64, FlagsErrors> {
    let trimmed = input.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse(),
    };
    parsed.map_err(|error| FlagsErrors::InvalidMask {
        input: input.to_string(),
        error,
    })
}
