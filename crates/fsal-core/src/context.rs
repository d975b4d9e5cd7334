// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-call execution context.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::classify::{ErrorClassifier, PosixErrorClassifier};
use crate::error::{FsalError, FsalResult};
use crate::types::Credential;

/// An exported directory tree, pinned by an open descriptor on its root.
#[derive(Debug)]
pub struct ExportContext {
    root_fd: OwnedFd,
    root_path: PathBuf,
}

impl ExportContext {
    pub fn open(root_path: impl AsRef<Path>) -> FsalResult<Self> {
        let root_path = root_path.as_ref();
        if root_path.as_os_str().is_empty() {
            return Err(FsalError::InvalidArgument);
        }
        let file = File::open(root_path).map_err(|e| PosixErrorClassifier.classify_io(&e))?;
        let meta = file
            .metadata()
            .map_err(|e| PosixErrorClassifier.classify_io(&e))?;
        if !meta.is_dir() {
            return Err(PosixErrorClassifier.classify(libc::ENOTDIR));
        }
        debug!(root = %root_path.display(), "export root opened");
        Ok(Self::from_fd(OwnedFd::from(file), root_path))
    }

    /// Wrap a root descriptor opened elsewhere (e.g. at mount time).
    pub fn from_fd(root_fd: OwnedFd, root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_fd,
            root_path: root_path.into(),
        }
    }

    pub fn root_fd(&self) -> BorrowedFd<'_> {
        self.root_fd.as_fd()
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

/// Credential and export for one FSAL call.
#[derive(Clone, Debug)]
pub struct OpContext {
    pub credential: Credential,
    pub export: Arc<ExportContext>,
}

impl OpContext {
    pub fn new(credential: Credential, export: Arc<ExportContext>) -> Self {
        Self { credential, export }
    }
}
