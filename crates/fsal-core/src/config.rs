// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FSAL init configuration.
//!
//! Each configurable capability carries a value and a merge policy. The
//! capability table starts from the filesystem defaults and folds the
//! configured values in with [`merge_field`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FsalError, FsalResult};

/// How a configured value combines with the filesystem default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// Overwrite the default unconditionally.
    Force,
    /// Numeric: lower the default to the configured value. Bitmask: AND. Boolean: AND.
    MaxLimit,
    /// Numeric: raise the default to the configured value. Bitmask: OR. Boolean: OR.
    MinLimit,
    /// Ignore the configured value.
    #[default]
    KeepDefault,
}

/// A configured value together with its merge policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSetting<T> {
    #[serde(default)]
    pub policy: InitPolicy,
    pub value: T,
}

impl<T> FieldSetting<T> {
    pub fn new(policy: InitPolicy, value: T) -> Self {
        Self { policy, value }
    }

    pub fn force(value: T) -> Self {
        Self::new(InitPolicy::Force, value)
    }
}

/// Bit set merged with bitwise semantics rather than numeric clamping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bits(pub u32);

impl Bits {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Bits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#o}", self.0)
    }
}

/// Semantic kind of a capability field: how MaxLimit/MinLimit combine values.
pub trait Mergeable: Copy {
    fn limit_max(self, configured: Self) -> Self;
    fn limit_min(self, configured: Self) -> Self;
}

macro_rules! numeric_mergeable {
    ($($t:ty),*) => {
        $(impl Mergeable for $t {
            fn limit_max(self, configured: Self) -> Self {
                self.min(configured)
            }

            fn limit_min(self, configured: Self) -> Self {
                self.max(configured)
            }
        })*
    };
}

numeric_mergeable!(u32, u64, usize);

impl Mergeable for Bits {
    fn limit_max(self, configured: Self) -> Self {
        Bits(self.0 & configured.0)
    }

    fn limit_min(self, configured: Self) -> Self {
        Bits(self.0 | configured.0)
    }
}

impl Mergeable for bool {
    fn limit_max(self, configured: Self) -> Self {
        self && configured
    }

    fn limit_min(self, configured: Self) -> Self {
        self || configured
    }
}

/// Fold an optional configured setting into `current`.
pub fn merge_field<T: Mergeable>(current: &mut T, setting: Option<&FieldSetting<T>>) {
    let Some(setting) = setting else {
        return;
    };
    *current = match setting.policy {
        InitPolicy::Force => setting.value,
        InitPolicy::MaxLimit => current.limit_max(setting.value),
        InitPolicy::MinLimit => current.limit_min(setting.value),
        InitPolicy::KeepDefault => *current,
    };
}

/// Capability overrides from configuration.
///
/// The first block names capabilities the VFS backend treats as fixed; any
/// policy other than `keep_default` on them is refused at init.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommonInitInfo {
    pub max_file_size: Option<FieldSetting<u64>>,
    pub max_link: Option<FieldSetting<u32>>,
    pub max_name_len: Option<FieldSetting<u32>>,
    pub max_path_len: Option<FieldSetting<u32>>,
    pub no_trunc: Option<FieldSetting<bool>>,
    pub case_insensitive: Option<FieldSetting<bool>>,
    pub case_preserving: Option<FieldSetting<bool>>,
    pub named_attr: Option<FieldSetting<bool>>,
    /// Seconds.
    pub lease_time: Option<FieldSetting<u64>>,
    pub supported_attrs: Option<FieldSetting<u64>>,
    pub homogenous: Option<FieldSetting<bool>>,

    pub symlink_support: Option<FieldSetting<bool>>,
    pub link_support: Option<FieldSetting<bool>>,
    pub lock_support: Option<FieldSetting<bool>>,
    pub can_set_time: Option<FieldSetting<bool>>,
    pub max_read: Option<FieldSetting<u64>>,
    pub max_write: Option<FieldSetting<u64>>,
    pub umask: Option<FieldSetting<Bits>>,
    pub auth_export_path_xdev: Option<FieldSetting<bool>>,
    pub xattr_access_rights: Option<FieldSetting<Bits>>,
}

fn overrides<T>(setting: &Option<FieldSetting<T>>) -> bool {
    setting
        .as_ref()
        .is_some_and(|s| s.policy != InitPolicy::KeepDefault)
}

impl CommonInitInfo {
    /// Names of fixed capabilities this configuration tries to override.
    pub fn fixed_overrides(&self) -> Vec<&'static str> {
        let checks = [
            ("max_file_size", overrides(&self.max_file_size)),
            ("max_link", overrides(&self.max_link)),
            ("max_name_len", overrides(&self.max_name_len)),
            ("max_path_len", overrides(&self.max_path_len)),
            ("no_trunc", overrides(&self.no_trunc)),
            ("case_insensitive", overrides(&self.case_insensitive)),
            ("case_preserving", overrides(&self.case_preserving)),
            ("named_attr", overrides(&self.named_attr)),
            ("lease_time", overrides(&self.lease_time)),
            ("supported_attrs", overrides(&self.supported_attrs)),
            ("homogenous", overrides(&self.homogenous)),
        ];
        checks
            .into_iter()
            .filter_map(|(name, hit)| hit.then_some(name))
            .collect()
    }
}

const fn default_credential_lifetime() -> u64 {
    3600
}

/// Everything the FSAL needs at process start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FsalInitInfo {
    /// Maximum simultaneous calls into the filesystem; 0 means unlimited.
    #[serde(default)]
    pub max_fs_calls: usize,
    /// Period after which a thread's credentials are renewed, in seconds.
    #[serde(default = "default_credential_lifetime")]
    pub credential_lifetime_secs: u64,
    #[serde(default)]
    pub common: CommonInitInfo,
}

impl Default for FsalInitInfo {
    fn default() -> Self {
        Self {
            max_fs_calls: 0,
            credential_lifetime_secs: default_credential_lifetime(),
            common: CommonInitInfo::default(),
        }
    }
}

impl FsalInitInfo {
    pub fn from_toml_str(s: &str) -> FsalResult<Self> {
        toml::from_str(s).map_err(|e| {
            tracing::warn!(error = %e, "rejecting FSAL configuration");
            FsalError::InvalidArgument
        })
    }

    pub fn from_json_bytes(bytes: &[u8]) -> FsalResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!(error = %e, "rejecting FSAL configuration");
            FsalError::InvalidArgument
        })
    }

    /// Load from a `.toml` or `.json` file, chosen by extension (TOML otherwise).
    pub fn load(path: &Path) -> FsalResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read FSAL configuration");
            FsalError::InvalidArgument
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_bytes(&bytes),
            _ => {
                let text = String::from_utf8(bytes).map_err(|_| FsalError::InvalidArgument)?;
                Self::from_toml_str(&text)
            }
        }
    }
}
