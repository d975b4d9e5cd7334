// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory handle facility with failure injection.
//!
//! Objects live in a table keyed by a numeric id that doubles as the handle
//! payload. Opening a handle hands out one end of a socket pair so tests can
//! observe when the resolver drops the descriptor.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::facility::{HandleFacility, NameTarget};
use crate::types::{FileStat, Handle};

pub const FAKE_HANDLE_TYPE: i32 = 0x66;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeRequest {
    NameToHandle,
    OpenByHandle,
    LinkByFd,
    ReadLinkByFd,
    StatByHandle,
}

struct FakeObject {
    stat: FileStat,
    symlink_target: Option<Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    names: HashMap<PathBuf, u64>,
    objects: HashMap<u64, FakeObject>,
    /// Socket inode of each handed out descriptor, mapped to its object.
    open: HashMap<u64, u64>,
    failures: HashMap<FakeRequest, i32>,
    links: Vec<(u64, OsString)>,
    last_open_flags: Option<i32>,
    last_peer: Option<UnixStream>,
    calls: HashMap<FakeRequest, usize>,
}

#[derive(Default)]
pub struct FakeHandleFacility {
    state: Mutex<FakeState>,
}

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

fn inode_of(fd: BorrowedFd<'_>) -> io::Result<u64> {
    let file = File::from(fd.try_clone_to_owned()?);
    Ok(file.metadata()?.ino())
}

fn object_id(handle: &Handle) -> io::Result<u64> {
    let bytes: [u8; 8] = handle
        .as_bytes()
        .try_into()
        .map_err(|_| errno(libc::EINVAL))?;
    if handle.handle_type() != FAKE_HANDLE_TYPE {
        return Err(errno(libc::EINVAL));
    }
    Ok(u64::from_le_bytes(bytes))
}

impl FakeHandleFacility {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, path: &Path, mode: u32, uid: u32, gid: u32, target: Option<&[u8]>) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let stat = FileStat {
            ino: id,
            mode,
            uid,
            gid,
            nlink: 1,
            size: target.map_or(0, |t| t.len() as i64),
            ..Default::default()
        };
        state.objects.insert(
            id,
            FakeObject {
                stat,
                symlink_target: target.map(<[u8]>::to_vec),
            },
        );
        state.names.insert(path.to_path_buf(), id);
        id
    }

    pub fn add_file(&self, path: impl AsRef<Path>, mode: u32, uid: u32, gid: u32) -> u64 {
        self.insert(path.as_ref(), libc::S_IFREG as u32 | mode, uid, gid, None)
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>, target: &str) -> u64 {
        self.insert(
            path.as_ref(),
            libc::S_IFLNK as u32 | 0o777,
            0,
            0,
            Some(target.as_bytes()),
        )
    }

    pub fn handle_for(id: u64) -> Handle {
        Handle::from_parts(FAKE_HANDLE_TYPE, &id.to_le_bytes()).unwrap()
    }

    /// Make every subsequent `request` fail with `code` until cleared.
    pub fn fail(&self, request: FakeRequest, code: i32) {
        self.state.lock().unwrap().failures.insert(request, code);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn links(&self) -> Vec<(u64, OsString)> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn last_open_flags(&self) -> Option<i32> {
        self.state.lock().unwrap().last_open_flags
    }

    pub fn calls(&self, request: FakeRequest) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&request)
            .copied()
            .unwrap_or(0)
    }

    /// True once the most recently opened descriptor has been closed.
    pub fn last_descriptor_closed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(peer) = state.last_peer.as_mut() else {
            return false;
        };
        peer.set_nonblocking(true).unwrap();
        let mut byte = [0u8; 1];
        matches!(peer.read(&mut byte), Ok(0))
    }

    fn begin(&self, request: FakeRequest) -> io::Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(request).or_default() += 1;
        if let Some(code) = state.failures.get(&request).copied() {
            return Err(errno(code));
        }
        Ok(state)
    }
}

impl HandleFacility for FakeHandleFacility {
    fn name_to_handle(&self, target: NameTarget<'_>, out: &mut Handle) -> io::Result<()> {
        let state = self.begin(FakeRequest::NameToHandle)?;
        assert!(out.is_empty(), "output handle must arrive empty");
        assert!(
            out.buffer_mut().iter().all(|b| *b == 0),
            "output handle must arrive zeroed"
        );
        let id = match target {
            NameTarget::Path(path) => state.names.get(path).copied(),
            NameTarget::At { name, .. } => state.names.get(Path::new(name)).copied(),
            NameTarget::Descriptor(fd) => state.open.get(&inode_of(fd)?).copied(),
        }
        .ok_or_else(|| errno(libc::ENOENT))?;
        let bytes = id.to_le_bytes();
        out.buffer_mut()[..bytes.len()].copy_from_slice(&bytes);
        out.set_contents(FAKE_HANDLE_TYPE, bytes.len())
    }

    fn open_by_handle(
        &self,
        _mount_dir: BorrowedFd<'_>,
        handle: &Handle,
        flags: i32,
    ) -> io::Result<OwnedFd> {
        let mut state = self.begin(FakeRequest::OpenByHandle)?;
        let id = object_id(handle)?;
        if !state.objects.contains_key(&id) {
            return Err(errno(libc::ESTALE));
        }
        let (ours, peer) = UnixStream::pair()?;
        let fd = OwnedFd::from(ours);
        let ino = inode_of(fd.as_fd())?;
        state.open.insert(ino, id);
        state.last_open_flags = Some(flags);
        state.last_peer = Some(peer);
        Ok(fd)
    }

    fn link_by_fd(
        &self,
        source: BorrowedFd<'_>,
        _dest_dir: BorrowedFd<'_>,
        name: &OsStr,
    ) -> io::Result<()> {
        let mut state = self.begin(FakeRequest::LinkByFd)?;
        let id = state
            .open
            .get(&inode_of(source)?)
            .copied()
            .ok_or_else(|| errno(libc::EBADF))?;
        if state.names.contains_key(Path::new(name)) {
            return Err(errno(libc::EEXIST));
        }
        state.names.insert(PathBuf::from(name), id);
        state.links.push((id, name.to_os_string()));
        Ok(())
    }

    fn readlink_by_fd(&self, fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.begin(FakeRequest::ReadLinkByFd)?;
        let id = state
            .open
            .get(&inode_of(fd)?)
            .copied()
            .ok_or_else(|| errno(libc::EBADF))?;
        let target = state
            .objects
            .get(&id)
            .and_then(|o| o.symlink_target.as_deref())
            .ok_or_else(|| errno(libc::EINVAL))?;
        let n = target.len().min(buf.len());
        buf[..n].copy_from_slice(&target[..n]);
        Ok(n)
    }

    fn stat_by_handle(&self, _mount_dir: BorrowedFd<'_>, handle: &Handle) -> io::Result<FileStat> {
        let state = self.begin(FakeRequest::StatByHandle)?;
        let id = object_id(handle)?;
        state
            .objects
            .get(&id)
            .map(|o| o.stat)
            .ok_or_else(|| errno(libc::ESTALE))
    }
}
