// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! pNFS data-server boundary.
//!
//! [`PnfsDispatch`] forwards each call unchanged to a [`DataServer`] client.
//! It holds no pNFS logic of its own.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::FsalResult;
use crate::types::{Handle, ObjectAttributes};

/// Where a file's data lives on the data servers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsLocation {
    pub server_index: u32,
    pub object_id: u64,
}

/// Data-server side reference to a created or looked up file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsFile {
    pub location: DsLocation,
    pub generation: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutHints {
    pub preferred_server: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutParams {
    pub stripe_unit: u64,
    pub data_servers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileLocation {
    pub ds: DsLocation,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PnfsFile {
    pub ds: DsFile,
}

/// Client of the data-server storage engine.
#[cfg_attr(test, mockall::automock)]
pub trait DataServer: Send + Sync {
    fn get_location(
        &self,
        handle: &Handle,
        attrs: &ObjectAttributes,
        hints: &LayoutHints,
    ) -> FsalResult<DsLocation>;
    fn create_file(&self, location: &DsLocation) -> FsalResult<DsFile>;
    fn lookup_file(&self, location: &DsLocation) -> FsalResult<DsFile>;
    fn unlink_file(&self, file: &DsFile) -> FsalResult<()>;
    fn truncate_file(&self, new_size: u64, file: &DsFile) -> FsalResult<()>;
    /// Encode GETDEVICEINFO into `buf`; returns the encoded length.
    fn encode_device_info(&self, buf: &mut [u8]) -> usize;
    /// Encode LAYOUTGET for `file` into `buf`; returns the encoded length.
    fn encode_layout(&self, file: &DsFile, buf: &mut [u8]) -> usize;
    fn init(&self, params: &LayoutParams) -> FsalResult<()>;
}

pub struct PnfsDispatch<D> {
    ds: D,
}

impl<D: DataServer> PnfsDispatch<D> {
    pub fn new(ds: D) -> Self {
        Self { ds }
    }

    pub fn get_location(
        &self,
        handle: &Handle,
        attrs: &ObjectAttributes,
        hints: &LayoutHints,
    ) -> FsalResult<FileLocation> {
        trace!(handle = %handle, "pnfs get_location");
        self.ds
            .get_location(handle, attrs, hints)
            .map(|ds| FileLocation { ds })
    }

    pub fn create_file(&self, location: &FileLocation) -> FsalResult<PnfsFile> {
        self.ds.create_file(&location.ds).map(|ds| PnfsFile { ds })
    }

    pub fn lookup_file(&self, location: &FileLocation) -> FsalResult<PnfsFile> {
        self.ds.lookup_file(&location.ds).map(|ds| PnfsFile { ds })
    }

    pub fn remove_file(&self, file: &PnfsFile) -> FsalResult<()> {
        self.ds.unlink_file(&file.ds)
    }

    pub fn truncate_file(&self, new_size: u64, file: &PnfsFile) -> FsalResult<()> {
        self.ds.truncate_file(new_size, &file.ds)
    }

    pub fn encode_getdeviceinfo(&self, buf: &mut [u8]) -> usize {
        self.ds.encode_device_info(buf)
    }

    pub fn encode_layoutget(&self, file: &PnfsFile, buf: &mut [u8]) -> usize {
        self.ds.encode_layout(&file.ds, buf)
    }

    pub fn init(&self, params: &LayoutParams) -> FsalResult<()> {
        trace!(data_servers = params.data_servers.len(), "pnfs init");
        self.ds.init(params)
    }

    pub fn terminate(&self) {
        trace!("pnfs terminate");
    }
}
