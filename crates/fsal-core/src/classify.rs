// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Translation of raw OS errors into FSAL errors.
//!
//! This is the only place that interprets errno values. Everything else in the
//! crate receives an already classified [`FsalError`].

use std::io;

use crate::error::{FsalError, OsErrorKind};

/// Maps a raw OS error code to an FSAL error.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, errno: i32) -> FsalError;

    /// Convenience wrapper for `io::Error` values coming back from the facility.
    fn classify_io(&self, err: &io::Error) -> FsalError {
        match err.raw_os_error() {
            Some(errno) => self.classify(errno),
            // Errors synthesised in user space carry no errno; treat as EIO.
            None => self.classify(libc::EIO),
        }
    }
}

/// Default POSIX errno classifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosixErrorClassifier;

impl PosixErrorClassifier {
    pub fn kind_of(errno: i32) -> OsErrorKind {
        match errno {
            libc::EPERM => OsErrorKind::NotPermitted,
            libc::ENOENT => OsErrorKind::NotFound,
            libc::EIO => OsErrorKind::Io,
            libc::ENODEV | libc::ENXIO => OsErrorKind::NoDevice,
            libc::EACCES => OsErrorKind::PermissionDenied,
            libc::EEXIST => OsErrorKind::AlreadyExists,
            libc::EXDEV => OsErrorKind::CrossDevice,
            libc::ENOTDIR => OsErrorKind::NotDir,
            libc::EISDIR => OsErrorKind::IsDir,
            libc::EINVAL => OsErrorKind::InvalidInput,
            libc::EFBIG => OsErrorKind::FileTooLarge,
            libc::ENOSPC => OsErrorKind::NoSpace,
            libc::EROFS => OsErrorKind::ReadOnlyFs,
            libc::EMLINK => OsErrorKind::TooManyLinks,
            libc::ENAMETOOLONG => OsErrorKind::NameTooLong,
            libc::ENOTEMPTY => OsErrorKind::DirNotEmpty,
            libc::EDQUOT => OsErrorKind::QuotaExceeded,
            libc::ESTALE => OsErrorKind::Stale,
            libc::EBADF => OsErrorKind::BadHandle,
            libc::ELOOP => OsErrorKind::TooManySymlinks,
            libc::EAGAIN | libc::EBUSY | libc::ETIMEDOUT => OsErrorKind::Delay,
            libc::EINTR => OsErrorKind::Interrupted,
            libc::ENOMEM => OsErrorKind::NoMemory,
            libc::ENOTSUP | libc::ENOSYS => OsErrorKind::NotSupported,
            _ => OsErrorKind::Other,
        }
    }

    pub fn is_retryable(kind: OsErrorKind) -> bool {
        matches!(
            kind,
            OsErrorKind::Delay | OsErrorKind::Interrupted | OsErrorKind::NoMemory
        )
    }
}

impl ErrorClassifier for PosixErrorClassifier {
    fn classify(&self, errno: i32) -> FsalError {
        if errno == libc::EFAULT {
            return FsalError::Fault;
        }
        let kind = Self::kind_of(errno);
        FsalError::Os {
            errno,
            kind,
            retryable: Self::is_retryable(kind),
        }
    }
}
