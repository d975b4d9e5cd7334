// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide FSAL instance.

use std::sync::OnceLock;

use tracing::{debug, info};

use crate::capabilities::{FsCapabilities, FsalCore};
use crate::config::FsalInitInfo;
use crate::error::{FsalError, FsalResult};

static FSAL: OnceLock<FsalCore> = OnceLock::new();

/// Initialize the process-wide FSAL. Only the first successful call takes effect.
pub fn init(info: &FsalInitInfo) -> FsalResult<&'static FsalCore> {
    if FSAL.get().is_some() {
        return Err(FsalError::AlreadyInitialized);
    }
    let core = FsalCore::init(info)?;
    // Another thread may have won the race between the check and here.
    FSAL.set(core).map_err(|_| FsalError::AlreadyInitialized)?;
    let core = FSAL.get().ok_or(FsalError::AlreadyInitialized)?;
    info!(max_fs_calls = core.throttle().capacity(), "FSAL initialized");
    Ok(core)
}

pub fn get() -> Option<&'static FsalCore> {
    FSAL.get()
}

/// Capability table of the process-wide FSAL, if initialized.
pub fn capabilities() -> Option<&'static FsCapabilities> {
    FSAL.get().map(FsalCore::capabilities)
}

/// Nothing to release; the table lives for the rest of the process.
pub fn terminate() -> FsalResult<()> {
    debug!(initialized = FSAL.get().is_some(), "FSAL terminate");
    Ok(())
}
