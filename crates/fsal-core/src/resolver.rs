// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Translation between paths, descriptors and opaque handles.
//!
//! Every operation is one request to the [`HandleFacility`], issued while
//! holding a throttle permit. Failures are classified, never retried, and every
//! outcome is counted in the calling thread's statistics.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::ffi::OsStringExt;
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::classify::{ErrorClassifier, PosixErrorClassifier};
use crate::context::OpContext;
use crate::error::{FsalError, FsalResult};
use crate::facility::{HandleFacility, NameTarget};
use crate::stats::{self, FsalOp};
use crate::throttle::CallThrottle;
use crate::types::{FileStat, Handle};

/// Flags used to open a symlink for reading its target.
const READLINK_OPEN_FLAGS: i32 = libc::O_PATH | libc::O_NOFOLLOW;

pub struct HandleResolver<F> {
    facility: F,
    classifier: Box<dyn ErrorClassifier>,
    throttle: Arc<CallThrottle>,
}

impl<F: HandleFacility> HandleResolver<F> {
    pub fn new(facility: F, throttle: Arc<CallThrottle>) -> Self {
        Self::with_classifier(facility, throttle, Box::new(PosixErrorClassifier))
    }

    pub fn with_classifier(
        facility: F,
        throttle: Arc<CallThrottle>,
        classifier: Box<dyn ErrorClassifier>,
    ) -> Self {
        Self {
            facility,
            classifier,
            throttle,
        }
    }

    pub fn facility(&self) -> &F {
        &self.facility
    }

    /// Handle for `path`. Absolute paths are resolved from the process root,
    /// relative ones from the export root.
    pub fn handle_from_path(&self, ctx: &OpContext, path: &Path) -> FsalResult<Handle> {
        self.finish(FsalOp::HandleFromPath, || {
            if path.as_os_str().is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            let target = if path.is_absolute() {
                NameTarget::Path(path)
            } else {
                NameTarget::At {
                    dir: ctx.export.root_fd(),
                    name: path.as_os_str(),
                }
            };
            self.name_to_handle(target)
        })
    }

    /// Handle for `name` inside an already open directory.
    pub fn handle_from_name_at(&self, dir: BorrowedFd<'_>, name: &OsStr) -> FsalResult<Handle> {
        self.finish(FsalOp::HandleFromName, || {
            if name.is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            self.name_to_handle(NameTarget::At { dir, name })
        })
    }

    /// Canonical handle of the object behind `fd`.
    pub fn handle_from_fd(&self, fd: BorrowedFd<'_>) -> FsalResult<Handle> {
        self.finish(FsalOp::HandleFromFd, || {
            self.name_to_handle(NameTarget::Descriptor(fd))
        })
    }

    /// Open `handle` relative to the export root. The caller owns the result.
    pub fn open_by_handle(&self, ctx: &OpContext, handle: &Handle, flags: i32) -> FsalResult<OwnedFd> {
        self.open_by_handle_at(ctx.export.root_fd(), handle, flags)
    }

    pub fn open_by_handle_at(
        &self,
        dir: BorrowedFd<'_>,
        handle: &Handle,
        flags: i32,
    ) -> FsalResult<OwnedFd> {
        self.finish(FsalOp::OpenByHandle, || {
            if handle.is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            self.request(|f| f.open_by_handle(dir, handle, flags))
        })
    }

    /// Hard-link the object behind `source` as `name` in `dest_dir`.
    pub fn link_at(&self, source: BorrowedFd<'_>, dest_dir: BorrowedFd<'_>, name: &OsStr) -> FsalResult<()> {
        self.finish(FsalOp::LinkAt, || {
            if name.is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            self.request(|f| f.link_by_fd(source, dest_dir, name))
        })
    }

    /// Target of the symlink named by `handle`, at most `max_len` bytes.
    pub fn readlink_by_handle(
        &self,
        ctx: &OpContext,
        handle: &Handle,
        max_len: usize,
    ) -> FsalResult<OsString> {
        self.finish(FsalOp::ReadLink, || {
            if max_len == 0 || handle.is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            let root = ctx.export.root_fd();
            let fd = self.request(|f| f.open_by_handle(root, handle, READLINK_OPEN_FLAGS))?;
            let mut buf = vec![0u8; max_len];
            let read = self.request(|f| f.readlink_by_fd(fd.as_fd(), &mut buf));
            drop(fd);
            buf.truncate(read?);
            Ok(OsString::from_vec(buf))
        })
    }

    pub fn stat_by_handle(&self, ctx: &OpContext, handle: &Handle) -> FsalResult<FileStat> {
        self.finish(FsalOp::StatByHandle, || {
            if handle.is_empty() {
                return Err(FsalError::InvalidArgument);
            }
            let root = ctx.export.root_fd();
            self.request(|f| f.stat_by_handle(root, handle))
        })
    }

    fn name_to_handle(&self, target: NameTarget<'_>) -> FsalResult<Handle> {
        let mut handle = Handle::empty();
        self.request(|f| f.name_to_handle(target, &mut handle))?;
        Ok(handle)
    }

    /// One facility request under a throttle permit, with its error classified.
    fn request<T>(&self, call: impl FnOnce(&F) -> io::Result<T>) -> FsalResult<T> {
        let result = {
            let _permit = self.throttle.acquire();
            call(&self.facility)
        };
        result.map_err(|e| self.classifier.classify_io(&e))
    }

    fn finish<T>(&self, op: FsalOp, body: impl FnOnce() -> FsalResult<T>) -> FsalResult<T> {
        let result = body();
        if let Err(e) = &result {
            trace!(op = op.name(), error = %e, "handle request failed");
        }
        stats::record_result(op, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExportContext;
    use crate::error::ErrorClass;
    use crate::testing::fake_facility::{FakeHandleFacility, FakeRequest};
    use crate::types::Credential;
    use std::os::unix::ffi::OsStrExt;

    struct Fixture {
        _root: tempfile::TempDir,
        ctx: OpContext,
        resolver: HandleResolver<FakeHandleFacility>,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let export = Arc::new(ExportContext::open(root.path()).unwrap());
        Fixture {
            ctx: OpContext::new(Credential::new(1000, 1000, vec![]), export),
            resolver: HandleResolver::new(FakeHandleFacility::new(), Arc::new(CallThrottle::new(2))),
            _root: root,
        }
    }

    #[test]
    fn descriptor_round_trip_yields_same_handle() {
        let fx = fixture();
        fx.resolver.facility().add_file("/export/a/b", 0o644, 1000, 1000);
        let handle = fx
            .resolver
            .handle_from_path(&fx.ctx, Path::new("/export/a/b"))
            .unwrap();
        let fd = fx
            .resolver
            .open_by_handle(&fx.ctx, &handle, libc::O_RDONLY)
            .unwrap();
        let again = fx.resolver.handle_from_fd(fd.as_fd()).unwrap();
        assert_eq!(again, handle);
    }

    #[test]
    fn relative_path_resolves_under_export_root() {
        let fx = fixture();
        let id = fx.resolver.facility().add_file("docs", 0o644, 0, 0);
        let handle = fx
            .resolver
            .handle_from_path(&fx.ctx, Path::new("docs"))
            .unwrap();
        assert_eq!(handle, FakeHandleFacility::handle_for(id));
    }

    #[test]
    fn empty_names_are_invalid() {
        let fx = fixture();
        let root = fx.ctx.export.root_fd();
        assert!(matches!(
            fx.resolver.handle_from_path(&fx.ctx, Path::new("")),
            Err(FsalError::InvalidArgument)
        ));
        assert!(matches!(
            fx.resolver.handle_from_name_at(root, OsStr::new("")),
            Err(FsalError::InvalidArgument)
        ));
        assert!(matches!(
            fx.resolver.link_at(root, root, OsStr::new("")),
            Err(FsalError::InvalidArgument)
        ));
        assert_eq!(fx.resolver.facility().calls(FakeRequest::NameToHandle), 0);
        assert_eq!(fx.resolver.facility().calls(FakeRequest::LinkByFd), 0);
    }

    #[test]
    fn facility_errors_are_classified_not_retried() {
        let fx = fixture();
        fx.resolver.facility().add_file("/f", 0o644, 0, 0);
        fx.resolver.facility().fail(FakeRequest::NameToHandle, libc::EAGAIN);
        let err = fx
            .resolver
            .handle_from_path(&fx.ctx, Path::new("/f"))
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(fx.resolver.facility().calls(FakeRequest::NameToHandle), 1);

        fx.resolver.facility().fail(FakeRequest::NameToHandle, libc::EFAULT);
        assert!(matches!(
            fx.resolver.handle_from_path(&fx.ctx, Path::new("/f")),
            Err(FsalError::Fault)
        ));

        fx.resolver.facility().clear_failures();
        assert!(fx.resolver.handle_from_path(&fx.ctx, Path::new("/f")).is_ok());
    }

    #[test]
    fn unknown_handle_is_stale() {
        let fx = fixture();
        let err = fx
            .resolver
            .open_by_handle(&fx.ctx, &FakeHandleFacility::handle_for(99), libc::O_RDONLY)
            .unwrap_err();
        assert_eq!(err.errno(), Some(libc::ESTALE));
        assert_eq!(err.class(), ErrorClass::Unrecoverable);
    }

    #[test]
    fn readlink_returns_target_and_closes_descriptor() {
        let fx = fixture();
        let id = fx.resolver.facility().add_symlink("/l", "../target/file");
        let handle = FakeHandleFacility::handle_for(id);
        let target = fx.resolver.readlink_by_handle(&fx.ctx, &handle, 256).unwrap();
        assert_eq!(target.as_bytes(), b"../target/file");
        assert_eq!(fx.resolver.facility().last_open_flags(), Some(READLINK_OPEN_FLAGS));
        assert!(fx.resolver.facility().last_descriptor_closed());
    }

    #[test]
    fn readlink_is_bounded_by_max_len() {
        let fx = fixture();
        let id = fx.resolver.facility().add_symlink("/l", "abcdefgh");
        let target = fx
            .resolver
            .readlink_by_handle(&fx.ctx, &FakeHandleFacility::handle_for(id), 3)
            .unwrap();
        assert_eq!(target.as_bytes(), b"abc");
    }

    #[test]
    fn readlink_failure_still_closes_descriptor() {
        let fx = fixture();
        let id = fx.resolver.facility().add_symlink("/l", "t");
        fx.resolver.facility().fail(FakeRequest::ReadLinkByFd, libc::EIO);
        let err = fx
            .resolver
            .readlink_by_handle(&fx.ctx, &FakeHandleFacility::handle_for(id), 64)
            .unwrap_err();
        assert_eq!(err.errno(), Some(libc::EIO));
        assert!(fx.resolver.facility().last_descriptor_closed());
        assert_eq!(fx.resolver.throttle.in_flight(), 0);
    }

    #[test]
    fn link_at_creates_new_name_for_object() {
        let fx = fixture();
        let id = fx.resolver.facility().add_file("/src", 0o600, 0, 0);
        let fd = fx
            .resolver
            .open_by_handle(&fx.ctx, &FakeHandleFacility::handle_for(id), libc::O_RDONLY)
            .unwrap();
        fx.resolver
            .link_at(fd.as_fd(), fx.ctx.export.root_fd(), OsStr::new("dst"))
            .unwrap();
        assert_eq!(fx.resolver.facility().links(), vec![(id, OsString::from("dst"))]);
        let linked = fx
            .resolver
            .handle_from_name_at(fx.ctx.export.root_fd(), OsStr::new("dst"))
            .unwrap();
        assert_eq!(linked, FakeHandleFacility::handle_for(id));
    }

    #[test]
    fn stat_by_handle_returns_metadata() {
        let fx = fixture();
        let id = fx.resolver.facility().add_file("/s", 0o640, 42, 7);
        let st = fx
            .resolver
            .stat_by_handle(&fx.ctx, &FakeHandleFacility::handle_for(id))
            .unwrap();
        assert_eq!((st.uid, st.gid, st.permissions()), (42, 7, 0o640));
        assert!(!st.is_dir());
    }

    #[test]
    fn every_outcome_is_counted() {
        let fx = fixture();
        let before = stats::snapshot().get(FsalOp::HandleFromPath);
        fx.resolver.facility().add_file("/c", 0o644, 0, 0);
        fx.resolver.handle_from_path(&fx.ctx, Path::new("/c")).unwrap();
        let _ = fx.resolver.handle_from_path(&fx.ctx, Path::new("/missing"));
        let _ = fx.resolver.handle_from_path(&fx.ctx, Path::new(""));
        let after = stats::snapshot().get(FsalOp::HandleFromPath);
        assert_eq!(after.calls - before.calls, 3);
        assert_eq!(after.successes - before.successes, 1);
        assert_eq!(after.unrecoverable_errors - before.unrecoverable_errors, 2);
        assert!(after.is_consistent());
    }
}
