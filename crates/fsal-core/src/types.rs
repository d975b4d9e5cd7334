// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for the FSAL

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{FsalError, FsalResult};

/// Upper bound on the opaque part of a handle (kernel `MAX_HANDLE_SZ`).
pub const MAX_HANDLE_LEN: usize = 128;

/// Size of the wire header: handle type followed by length, both little endian.
const WIRE_HEADER_LEN: usize = 8;

/// Opaque, persistent identifier for one filesystem object.
///
/// Bytes past `len` are always zero, so a handle never carries stale data from
/// a previous use of the buffer.
#[derive(Clone)]
pub struct Handle {
    handle_type: i32,
    len: usize,
    bytes: [u8; MAX_HANDLE_LEN],
}

impl Handle {
    /// Zero-filled handle, ready to be populated by a translation facility.
    pub fn empty() -> Self {
        Self {
            handle_type: 0,
            len: 0,
            bytes: [0u8; MAX_HANDLE_LEN],
        }
    }

    pub fn from_parts(handle_type: i32, bytes: &[u8]) -> FsalResult<Self> {
        if bytes.len() > MAX_HANDLE_LEN {
            return Err(FsalError::InvalidArgument);
        }
        let mut handle = Self::empty();
        handle.bytes[..bytes.len()].copy_from_slice(bytes);
        handle.len = bytes.len();
        handle.handle_type = handle_type;
        Ok(handle)
    }

    pub fn handle_type(&self) -> i32 {
        self.handle_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Zero the whole buffer and drop the current contents.
    pub fn reset(&mut self) {
        self.bytes = [0u8; MAX_HANDLE_LEN];
        self.len = 0;
        self.handle_type = 0;
    }

    /// Full-capacity output buffer for a facility filling this handle in place.
    pub fn buffer_mut(&mut self) -> &mut [u8; MAX_HANDLE_LEN] {
        &mut self.bytes
    }

    /// Record what a facility wrote into [`Handle::buffer_mut`].
    pub fn set_contents(&mut self, handle_type: i32, len: usize) -> io::Result<()> {
        if len > MAX_HANDLE_LEN {
            return Err(io::Error::from_raw_os_error(libc::EOVERFLOW));
        }
        self.bytes[len..].fill(0);
        self.handle_type = handle_type;
        self.len = len;
        Ok(())
    }

    /// Stable byte encoding used by tooling and the layers above.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WIRE_HEADER_LEN + self.len);
        out.extend_from_slice(&self.handle_type.to_le_bytes());
        out.extend_from_slice(&(self.len as u32).to_le_bytes());
        out.extend_from_slice(self.as_bytes());
        out
    }

    pub fn from_wire(data: &[u8]) -> FsalResult<Self> {
        if data.len() < WIRE_HEADER_LEN {
            return Err(FsalError::InvalidArgument);
        }
        let mut type_bytes = [0u8; 4];
        type_bytes.copy_from_slice(&data[0..4]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[4..8]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let payload = &data[WIRE_HEADER_LEN..];
        if payload.len() != len {
            return Err(FsalError::InvalidArgument);
        }
        Self::from_parts(i32::from_le_bytes(type_bytes), payload)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_wire())
    }

    pub fn from_hex(s: &str) -> FsalResult<Self> {
        let data = hex::decode(s.trim()).map_err(|_| FsalError::InvalidArgument)?;
        Self::from_wire(&data)
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.handle_type == other.handle_type && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle_type.hash(state);
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &self.handle_type)
            .field("len", &self.len)
            .field("bytes", &hex::encode(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Security identity an access decision is evaluated under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, in the order the caller supplied them.
    #[serde(default)]
    pub groups: Vec<u32>,
}

impl Credential {
    pub fn new(uid: u32, gid: u32, groups: Vec<u32>) -> Self {
        Self { uid, gid, groups }
    }

    pub fn root() -> Self {
        Self::new(0, 0, Vec::new())
    }

    pub fn is_superuser(&self) -> bool {
        self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

bitflags! {
    /// Requested access for an access decision.
    ///
    /// READ, WRITE and EXEC line up with a single rwx triad of a mode so the
    /// evaluator can compare them directly.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AccessMask: u32 {
        const EXEC = 0o1;
        const WRITE = 0o2;
        const READ = 0o4;
        /// Owner-only semantic check (not a POSIX permission bit).
        const OWNER = 1 << 8;
        /// Existence test; unsupported by the evaluator.
        const EXISTS = 1 << 9;
    }
}

impl AccessMask {
    /// Permission bits granted by one rwx triad (already shifted down to 0..=7).
    pub fn from_triad(triad: u32) -> Self {
        Self::from_bits_truncate(triad & 0o7)
    }
}

/// Raw OS metadata as returned by a stat request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    /// Full `st_mode`, including the file type bits.
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: i64,
    pub atime_nsec: i64,
    pub mtime: i64,
    pub mtime_nsec: i64,
    pub ctime: i64,
    pub ctime_nsec: i64,
}

impl FileStat {
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT as u32
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK as u32
    }

    /// Permission and special bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl From<libc::stat> for FileStat {
    #[allow(clippy::unnecessary_cast)]
    fn from(st: libc::stat) -> Self {
        Self {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u64,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as u64,
            size: st.st_size as i64,
            blksize: st.st_blksize as i64,
            blocks: st.st_blocks as i64,
            atime: st.st_atime as i64,
            atime_nsec: st.st_atime_nsec as i64,
            mtime: st.st_mtime as i64,
            mtime_nsec: st.st_mtime_nsec as i64,
            ctime: st.st_ctime as i64,
            ctime_nsec: st.st_ctime_nsec as i64,
        }
    }
}

/// Attribute snapshot previously fetched by the layers above.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub owner: u32,
    pub group: u32,
    /// Permission bits (`0o7777` range).
    pub mode: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub nlink: u64,
}

impl From<&FileStat> for ObjectAttributes {
    fn from(st: &FileStat) -> Self {
        Self {
            owner: st.uid,
            group: st.gid,
            mode: st.permissions(),
            size: st.size.max(0) as u64,
            nlink: st.nlink,
        }
    }
}
