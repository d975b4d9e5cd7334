// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FSAL core: handle resolution, access evaluation and call accounting for the
//! VFS backend of a network file server.

pub mod access;
pub mod capabilities;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod facility;
pub mod global;
pub mod pnfs;
pub mod resolver;
pub mod stats;
pub mod throttle;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{check_access, evaluate};
pub use capabilities::{FsCapabilities, FsalCore};
pub use classify::{ErrorClassifier, PosixErrorClassifier};
pub use config::{FsalInitInfo, InitPolicy};
pub use context::{ExportContext, OpContext};
pub use error::{ErrorClass, FsalError, FsalResult};
pub use facility::{HandleFacility, NameTarget};
#[cfg(target_os = "linux")]
pub use facility::KernelHandleFacility;
pub use resolver::HandleResolver;
pub use stats::{FsalOp, Outcome, StatisticsRecord};
pub use throttle::{CallThrottle, ThrottlePermit};
pub use types::{AccessMask, Credential, FileStat, Handle, ObjectAttributes, MAX_HANDLE_LEN};
