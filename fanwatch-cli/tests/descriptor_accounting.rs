// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

// Kept as its own test binary: counting /proc/self/fd is only meaningful with no other tests opening files
// concurrently.
#![cfg(target_os = "linux")]

use std::fs;

use anyhow::Result;
use fanwatch::fanotify::{HandleResolver as _, OwnedFileHandle, ProcFdHandleResolver, ResolveError};
use nix::errno::Errno;
use tempfile::TempDir;

const HANDLES: usize = 64;

fn open_descriptors() -> Result<usize> {
    Ok(fs::read_dir("/proc/self/fd")?.count())
}

#[test]
fn resolving_handles_closes_every_descriptor() -> Result<()> {
    let tmp = TempDir::new()?;
    let mut handles = Vec::with_capacity(HANDLES);
    for i in 0..HANDLES {
        let dir = tmp.path().join(format!("d{i}"));
        fs::create_dir(&dir)?;
        match OwnedFileHandle::for_path(&dir) {
            Ok(handle) => handles.push((dir, handle)),
            Err(errno) => {
                println!("skipping: name_to_handle_at unsupported here ({errno})");
                return Ok(());
            }
        }
    }
    // Every other directory goes away, so both the success and the stale paths are exercised.
    for (dir, _) in handles.iter().step_by(2) {
        fs::remove_dir(dir)?;
    }

    let resolver = ProcFdHandleResolver::open(tmp.path())?;
    let before = open_descriptors()?;

    let mut resolved = 0;
    let mut stale = 0;
    for (_, handle) in &handles {
        match resolver.resolve(&handle.as_handle()) {
            Ok(_) => resolved += 1,
            Err(ResolveError::Stale) => stale += 1,
            Err(ResolveError::Open(e)) if e.raw_os_error() == Some(Errno::EPERM as i32) => {
                println!("skipping: open_by_handle_at requires CAP_DAC_READ_SEARCH");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }

    assert_eq!(open_descriptors()?, before);
    assert_eq!(resolved + stale, HANDLES);
    assert!(resolved >= HANDLES / 2, "live directories must resolve");
    Ok(())
}
