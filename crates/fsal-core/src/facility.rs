// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Handle translation facility.
//!
//! The resolver talks to the filesystem only through [`HandleFacility`]. Each
//! method is one request kind with a fixed payload; the handle buffer is always
//! [`MAX_HANDLE_LEN`](crate::types::MAX_HANDLE_LEN) bytes.

use std::ffi::OsStr;
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::Path;

use crate::types::{FileStat, Handle};

/// What a name-to-handle request starts from.
#[derive(Clone, Copy, Debug)]
pub enum NameTarget<'a> {
    /// Path resolved from the process working directory (`AT_FDCWD`).
    Path(&'a Path),
    /// Name relative to an open directory.
    At { dir: BorrowedFd<'a>, name: &'a OsStr },
    /// The object behind an already open descriptor.
    Descriptor(BorrowedFd<'a>),
}

pub trait HandleFacility: Send + Sync {
    /// Fill `out` with the handle of `target`. `out` arrives zeroed.
    fn name_to_handle(&self, target: NameTarget<'_>, out: &mut Handle) -> io::Result<()>;

    /// Open the object named by `handle` on the filesystem containing `mount_dir`.
    fn open_by_handle(
        &self,
        mount_dir: BorrowedFd<'_>,
        handle: &Handle,
        flags: i32,
    ) -> io::Result<OwnedFd>;

    /// Hard-link the object behind `source` as `name` inside `dest_dir`.
    fn link_by_fd(
        &self,
        source: BorrowedFd<'_>,
        dest_dir: BorrowedFd<'_>,
        name: &OsStr,
    ) -> io::Result<()>;

    /// Read the target of the symlink behind `fd` into `buf`; returns bytes written.
    fn readlink_by_fd(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize>;

    fn stat_by_handle(&self, mount_dir: BorrowedFd<'_>, handle: &Handle) -> io::Result<FileStat>;
}

#[cfg(target_os = "linux")]
pub use kernel::KernelHandleFacility;

#[cfg(target_os = "linux")]
mod kernel {
    use std::ffi::{CString, OsStr};
    use std::io;
    use std::mem::MaybeUninit;
    use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
    use std::os::unix::ffi::OsStrExt;

    use tracing::trace;

    use super::{HandleFacility, NameTarget};
    use crate::types::{FileStat, Handle, MAX_HANDLE_LEN};

    /// Kernel `struct file_handle` with a fixed-size payload.
    #[repr(C)]
    struct RawFileHandle {
        handle_bytes: libc::c_uint,
        handle_type: libc::c_int,
        f_handle: [u8; MAX_HANDLE_LEN],
    }

    impl RawFileHandle {
        fn empty() -> Self {
            Self {
                handle_bytes: MAX_HANDLE_LEN as libc::c_uint,
                handle_type: 0,
                f_handle: [0u8; MAX_HANDLE_LEN],
            }
        }

        fn from_handle(handle: &Handle) -> Self {
            let mut raw = Self::empty();
            raw.handle_bytes = handle.len() as libc::c_uint;
            raw.handle_type = handle.handle_type();
            raw.f_handle[..handle.len()].copy_from_slice(handle.as_bytes());
            raw
        }
    }

    fn c_name(name: &OsStr) -> io::Result<CString> {
        CString::new(name.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
    }

    fn check(ret: libc::c_long) -> io::Result<libc::c_long> {
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret)
        }
    }

    /// `name_to_handle_at(2)` and friends. Opening by handle needs
    /// `CAP_DAC_READ_SEARCH`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct KernelHandleFacility;

    impl KernelHandleFacility {
        pub fn new() -> Self {
            Self
        }
    }

    impl HandleFacility for KernelHandleFacility {
        fn name_to_handle(&self, target: NameTarget<'_>, out: &mut Handle) -> io::Result<()> {
            let (dirfd, name, flags) = match target {
                NameTarget::Path(path) => (libc::AT_FDCWD, c_name(path.as_os_str())?, 0),
                NameTarget::At { dir, name } => (dir.as_raw_fd(), c_name(name)?, 0),
                NameTarget::Descriptor(fd) => (fd.as_raw_fd(), CString::default(), libc::AT_EMPTY_PATH),
            };
            let mut raw = RawFileHandle::empty();
            let mut mount_id: libc::c_int = 0;
            // SAFETY: `raw` is a live file_handle with room for MAX_HANDLE_LEN bytes
            // and `name` is NUL terminated.
            check(unsafe {
                libc::syscall(
                    libc::SYS_name_to_handle_at,
                    dirfd,
                    name.as_ptr(),
                    &mut raw as *mut RawFileHandle,
                    &mut mount_id as *mut libc::c_int,
                    flags,
                )
            })?;
            let len = raw.handle_bytes as usize;
            if len > MAX_HANDLE_LEN {
                return Err(io::Error::from_raw_os_error(libc::EOVERFLOW));
            }
            out.buffer_mut()[..len].copy_from_slice(&raw.f_handle[..len]);
            out.set_contents(raw.handle_type, len)?;
            trace!(mount_id, handle = %out, "name_to_handle_at");
            Ok(())
        }

        fn open_by_handle(
            &self,
            mount_dir: BorrowedFd<'_>,
            handle: &Handle,
            flags: i32,
        ) -> io::Result<OwnedFd> {
            let mut raw = RawFileHandle::from_handle(handle);
            // SAFETY: `raw` describes exactly `handle_bytes` valid payload bytes.
            let fd = check(unsafe {
                libc::syscall(
                    libc::SYS_open_by_handle_at,
                    mount_dir.as_raw_fd(),
                    &mut raw as *mut RawFileHandle,
                    flags | libc::O_CLOEXEC,
                )
            })?;
            // SAFETY: the kernel just returned this descriptor to us.
            Ok(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) })
        }

        fn link_by_fd(
            &self,
            source: BorrowedFd<'_>,
            dest_dir: BorrowedFd<'_>,
            name: &OsStr,
        ) -> io::Result<()> {
            let name = c_name(name)?;
            let empty = CString::default();
            // SAFETY: both strings are NUL terminated and outlive the call.
            let ret = unsafe {
                libc::linkat(
                    source.as_raw_fd(),
                    empty.as_ptr(),
                    dest_dir.as_raw_fd(),
                    name.as_ptr(),
                    libc::AT_EMPTY_PATH,
                )
            };
            check(ret as libc::c_long).map(|_| ())
        }

        fn readlink_by_fd(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
            let empty = CString::default();
            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let n = unsafe {
                libc::readlinkat(
                    fd.as_raw_fd(),
                    empty.as_ptr(),
                    buf.as_mut_ptr() as *mut libc::c_char,
                    buf.len(),
                )
            };
            check(n as libc::c_long).map(|n| n as usize)
        }

        fn stat_by_handle(&self, mount_dir: BorrowedFd<'_>, handle: &Handle) -> io::Result<FileStat> {
            let fd = self.open_by_handle(mount_dir, handle, libc::O_PATH | libc::O_NOFOLLOW)?;
            let mut st = MaybeUninit::<libc::stat>::zeroed();
            // SAFETY: `st` is large enough for a stat structure.
            let ret = unsafe { libc::fstat(fd.as_raw_fd(), st.as_mut_ptr()) };
            check(ret as libc::c_long)?;
            // SAFETY: fstat succeeded and filled the structure.
            Ok(FileStat::from(unsafe { st.assume_init() }))
        }
    }
}
