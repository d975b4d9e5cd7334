// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem capability table and FSAL initialization.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::{merge_field, Bits, FsalInitInfo};
use crate::error::{FsalError, FsalResult};
use crate::stats::{self, FsalOp};
use crate::throttle::CallThrottle;

/// Largest permit pool the throttle accepts.
pub const MAX_THROTTLE_CAPACITY: usize = i32::MAX as usize;

/// `_POSIX_LINK_MAX`
const POSIX_LINK_MAX: u32 = 8;
const MAX_NAME_LEN: u32 = 255;
const MAX_PATH_LEN: u32 = 4096;

bitflags! {
    /// Object attributes a backend can report.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AttrMask: u64 {
        const SUPPATTR = 1 << 0;
        const TYPE = 1 << 1;
        const SIZE = 1 << 2;
        const FSID = 1 << 3;
        const ACL = 1 << 5;
        const FILEID = 1 << 6;
        const MODE = 1 << 7;
        const NUMLINKS = 1 << 8;
        const OWNER = 1 << 9;
        const GROUP = 1 << 10;
        const RAWDEV = 1 << 11;
        const ATIME = 1 << 12;
        const CREATION = 1 << 13;
        const CTIME = 1 << 14;
        const MTIME = 1 << 15;
        const SPACEUSED = 1 << 16;
        const MOUNTFILEID = 1 << 17;
        const CHGTIME = 1 << 18;
    }
}

impl AttrMask {
    /// What the VFS backend can fill from a stat.
    pub const VFS_SUPPORTED: AttrMask = AttrMask::SUPPATTR
        .union(AttrMask::TYPE)
        .union(AttrMask::SIZE)
        .union(AttrMask::FSID)
        .union(AttrMask::FILEID)
        .union(AttrMask::MODE)
        .union(AttrMask::NUMLINKS)
        .union(AttrMask::OWNER)
        .union(AttrMask::GROUP)
        .union(AttrMask::ATIME)
        .union(AttrMask::RAWDEV)
        .union(AttrMask::CTIME)
        .union(AttrMask::MTIME)
        .union(AttrMask::SPACEUSED)
        .union(AttrMask::CHGTIME);
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AclSupport: u32 {
        const ALLOW = 1 << 0;
        const DENY = 1 << 1;
    }
}

/// How long a handle stays valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleExpiry {
    /// Valid for the lifetime of the object.
    Persistent,
    Volatile,
}

/// Process-wide filesystem limits and behaviour flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCapabilities {
    pub max_file_size: u64,
    pub max_link: u32,
    pub max_name_len: u32,
    pub max_path_len: u32,
    pub no_trunc: bool,
    pub chown_restricted: bool,
    pub case_insensitive: bool,
    pub case_preserving: bool,
    pub handle_expiry: HandleExpiry,
    pub link_support: bool,
    pub symlink_support: bool,
    pub lock_support: bool,
    pub named_attr: bool,
    pub unique_handles: bool,
    pub lease_time: Duration,
    pub acl_support: AclSupport,
    pub can_set_time: bool,
    pub homogenous: bool,
    pub supported_attrs: AttrMask,
    pub max_read: u64,
    pub max_write: u64,
    pub umask: Bits,
    pub auth_export_path_xdev: bool,
    /// Default access for extended attributes: root read-write, owner read.
    pub xattr_access_rights: Bits,
}

impl FsCapabilities {
    /// Defaults of the VFS backend before configuration is applied.
    pub fn vfs_defaults() -> Self {
        Self {
            max_file_size: u64::MAX,
            max_link: POSIX_LINK_MAX,
            max_name_len: MAX_NAME_LEN,
            max_path_len: MAX_PATH_LEN,
            no_trunc: true,
            chown_restricted: true,
            case_insensitive: false,
            case_preserving: true,
            handle_expiry: HandleExpiry::Persistent,
            link_support: true,
            symlink_support: true,
            lock_support: false,
            named_attr: true,
            unique_handles: true,
            lease_time: Duration::from_secs(10),
            acl_support: AclSupport::ALLOW,
            can_set_time: true,
            homogenous: true,
            supported_attrs: AttrMask::VFS_SUPPORTED,
            max_read: 0,
            max_write: 0,
            umask: Bits(0),
            auth_export_path_xdev: false,
            xattr_access_rights: Bits(0o400),
        }
    }

    /// Defaults merged with `info`. Refuses overrides of fixed capabilities.
    pub fn from_init_info(info: &FsalInitInfo) -> FsalResult<Self> {
        let common = &info.common;
        let refused = common.fixed_overrides();
        if !refused.is_empty() {
            warn!(fields = ?refused, "configuration overrides fixed filesystem capabilities");
            return Err(FsalError::NotSupported);
        }

        let mut caps = Self::vfs_defaults();
        trace!(defaults = ?caps, "VFS capability defaults");

        merge_field(&mut caps.symlink_support, common.symlink_support.as_ref());
        merge_field(&mut caps.link_support, common.link_support.as_ref());
        merge_field(&mut caps.lock_support, common.lock_support.as_ref());
        merge_field(&mut caps.can_set_time, common.can_set_time.as_ref());
        merge_field(&mut caps.max_read, common.max_read.as_ref());
        merge_field(&mut caps.max_write, common.max_write.as_ref());
        merge_field(&mut caps.umask, common.umask.as_ref());
        merge_field(&mut caps.auth_export_path_xdev, common.auth_export_path_xdev.as_ref());
        merge_field(&mut caps.xattr_access_rights, common.xattr_access_rights.as_ref());

        debug!(
            supported_attrs = format_args!("{:#x}", caps.supported_attrs.bits()),
            umask = %caps.umask,
            max_read = caps.max_read,
            max_write = caps.max_write,
            "FSAL capability table ready"
        );
        Ok(caps)
    }
}

impl Default for FsCapabilities {
    fn default() -> Self {
        Self::vfs_defaults()
    }
}

/// Initialized FSAL state: immutable capability table plus the call throttle.
#[derive(Debug)]
pub struct FsalCore {
    capabilities: FsCapabilities,
    throttle: Arc<CallThrottle>,
    credential_lifetime: Duration,
}

impl FsalCore {
    pub fn init(info: &FsalInitInfo) -> FsalResult<Self> {
        let result = Self::build(info);
        stats::record_result(FsalOp::Init, &result);
        result
    }

    fn build(info: &FsalInitInfo) -> FsalResult<Self> {
        let throttle = if info.max_fs_calls > 0 {
            if info.max_fs_calls > MAX_THROTTLE_CAPACITY {
                return Err(FsalError::ServerFault(format!(
                    "cannot create call throttle with {} permits",
                    info.max_fs_calls
                )));
            }
            debug!(
                max_fs_calls = info.max_fs_calls,
                "simultaneous filesystem calls are limited"
            );
            CallThrottle::new(info.max_fs_calls)
        } else {
            debug!("simultaneous filesystem calls are unlimited");
            CallThrottle::unlimited()
        };

        let capabilities = FsCapabilities::from_init_info(info)?;

        Ok(Self {
            capabilities,
            throttle: Arc::new(throttle),
            credential_lifetime: Duration::from_secs(info.credential_lifetime_secs),
        })
    }

    pub fn capabilities(&self) -> &FsCapabilities {
        &self.capabilities
    }

    pub fn throttle(&self) -> &Arc<CallThrottle> {
        &self.throttle
    }

    pub fn credential_lifetime(&self) -> Duration {
        self.credential_lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommonInitInfo, FieldSetting, InitPolicy};

    #[test]
    fn defaults_without_configuration() {
        let core = FsalCore::init(&FsalInitInfo::default()).unwrap();
        assert_eq!(core.capabilities(), &FsCapabilities::vfs_defaults());
        assert!(!core.throttle().is_enabled());
        assert_eq!(core.credential_lifetime(), Duration::from_secs(3600));
    }

    #[test]
    fn throttle_capacity_from_max_fs_calls() {
        let info = FsalInitInfo {
            max_fs_calls: 4,
            ..Default::default()
        };
        let core = FsalCore::init(&info).unwrap();
        assert_eq!(core.throttle().capacity(), 4);
    }

    #[test]
    fn oversized_throttle_is_a_server_fault() {
        let info = FsalInitInfo {
            max_fs_calls: MAX_THROTTLE_CAPACITY + 1,
            ..Default::default()
        };
        assert!(matches!(FsalCore::init(&info), Err(FsalError::ServerFault(_))));
    }

    #[test]
    fn fixed_capability_override_is_refused() {
        let info = FsalInitInfo {
            common: CommonInitInfo {
                max_name_len: Some(FieldSetting::new(InitPolicy::MaxLimit, 64)),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(FsalCore::init(&info), Err(FsalError::NotSupported)));
    }

    #[test]
    fn configurable_fields_are_merged() {
        let info = FsalInitInfo {
            common: CommonInitInfo {
                lock_support: Some(FieldSetting::new(InitPolicy::MinLimit, true)),
                symlink_support: Some(FieldSetting::new(InitPolicy::MaxLimit, false)),
                max_read: Some(FieldSetting::force(1 << 20)),
                max_write: Some(FieldSetting::new(InitPolicy::MinLimit, 65536)),
                umask: Some(FieldSetting::force(Bits(0o022))),
                xattr_access_rights: Some(FieldSetting::new(InitPolicy::MinLimit, Bits(0o040))),
                ..Default::default()
            },
            ..Default::default()
        };
        let caps = FsCapabilities::from_init_info(&info).unwrap();
        assert!(caps.lock_support);
        assert!(!caps.symlink_support);
        assert!(caps.link_support);
        assert_eq!(caps.max_read, 1 << 20);
        assert_eq!(caps.max_write, 65536);
        assert_eq!(caps.umask, Bits(0o022));
        assert_eq!(caps.xattr_access_rights, Bits(0o440));
        assert_eq!(caps.max_name_len, MAX_NAME_LEN);
    }

    #[test]
    fn init_is_counted() {
        let before = stats::snapshot().get(FsalOp::Init);
        let _ = FsalCore::init(&FsalInitInfo::default());
        let after = stats::snapshot().get(FsalOp::Init);
        assert_eq!(after.successes, before.successes + 1);
    }

    #[test]
    fn vfs_supported_attrs_exclude_acl() {
        let attrs = FsCapabilities::vfs_defaults().supported_attrs;
        assert!(attrs.contains(AttrMask::MODE | AttrMask::OWNER | AttrMask::GROUP));
        assert!(!attrs.contains(AttrMask::ACL));
    }
}
