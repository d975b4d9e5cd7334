// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the FSAL core

use std::fmt;

use crate::stats::Outcome;

/// Classification of a failure for retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad address or missing argument; never retried.
    Fault,
    Retryable,
    Unrecoverable,
}

/// Coarse kind of an OS-derived failure, as produced by the errno classifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OsErrorKind {
    NotPermitted,
    NotFound,
    Io,
    NoDevice,
    PermissionDenied,
    AlreadyExists,
    CrossDevice,
    NotDir,
    IsDir,
    InvalidInput,
    FileTooLarge,
    NoSpace,
    ReadOnlyFs,
    TooManyLinks,
    NameTooLong,
    DirNotEmpty,
    QuotaExceeded,
    Stale,
    BadHandle,
    TooManySymlinks,
    Delay,
    Interrupted,
    NoMemory,
    NotSupported,
    Other,
}

impl fmt::Display for OsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsErrorKind::NotPermitted => "operation not permitted",
            OsErrorKind::NotFound => "not found",
            OsErrorKind::Io => "i/o error",
            OsErrorKind::NoDevice => "no such device",
            OsErrorKind::PermissionDenied => "permission denied",
            OsErrorKind::AlreadyExists => "already exists",
            OsErrorKind::CrossDevice => "cross-device link",
            OsErrorKind::NotDir => "not a directory",
            OsErrorKind::IsDir => "is a directory",
            OsErrorKind::InvalidInput => "invalid input",
            OsErrorKind::FileTooLarge => "file too large",
            OsErrorKind::NoSpace => "no space left",
            OsErrorKind::ReadOnlyFs => "read-only filesystem",
            OsErrorKind::TooManyLinks => "too many links",
            OsErrorKind::NameTooLong => "name too long",
            OsErrorKind::DirNotEmpty => "directory not empty",
            OsErrorKind::QuotaExceeded => "quota exceeded",
            OsErrorKind::Stale => "stale handle",
            OsErrorKind::BadHandle => "bad handle",
            OsErrorKind::TooManySymlinks => "too many symlinks",
            OsErrorKind::Delay => "resource temporarily unavailable",
            OsErrorKind::Interrupted => "interrupted",
            OsErrorKind::NoMemory => "out of memory",
            OsErrorKind::NotSupported => "operation not supported",
            OsErrorKind::Other => "os error",
        };
        f.write_str(name)
    }
}

/// Core FSAL error type
#[derive(thiserror::Error, Debug)]
pub enum FsalError {
    #[error("bad address or missing argument")]
    Fault,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("access denied")]
    AccessDenied,
    #[error("not supported")]
    NotSupported,
    #[error("server fault: {0}")]
    ServerFault(String),
    #[error("fsal already initialized")]
    AlreadyInitialized,
    #[error("{kind} (errno {errno})")]
    Os {
        errno: i32,
        kind: OsErrorKind,
        retryable: bool,
    },
}

impl FsalError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FsalError::Fault => ErrorClass::Fault,
            FsalError::Os {
                retryable: true, ..
            } => ErrorClass::Retryable,
            _ => ErrorClass::Unrecoverable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Raw errno for OS-derived failures.
    pub fn errno(&self) -> Option<i32> {
        match self {
            FsalError::Os { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// How this failure is counted by the statistics collector.
    pub fn outcome(&self) -> Outcome {
        match self.class() {
            ErrorClass::Retryable => Outcome::Retryable,
            ErrorClass::Fault | ErrorClass::Unrecoverable => Outcome::Unrecoverable,
        }
    }
}

pub type FsalResult<T> = Result<T, FsalError>;
