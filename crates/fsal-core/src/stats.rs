// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-thread call statistics.
//!
//! Every thread owns its own record. It is created zeroed on first use and
//! dropped by the thread-local destructor when the thread exits. Records are
//! never shared; a process-wide view is built by collecting [`snapshot`]s from
//! each thread and folding them with [`StatisticsRecord::merge`].

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::FsalResult;

/// Number of operation identifiers tracked per thread.
pub const OP_COUNT: usize = 32;

/// Operation identifiers used as statistics keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum FsalOp {
    Lookup = 0,
    Access,
    Create,
    Mkdir,
    Truncate,
    GetAttrs,
    SetAttrs,
    Link,
    OpenDir,
    ReadDir,
    CloseDir,
    Open,
    Read,
    Write,
    Close,
    ReadLink,
    Symlink,
    Rename,
    Unlink,
    MkNode,
    StaticFsInfo,
    DynamicFsInfo,
    Init,
    GetStats,
    LookupPath,
    TestAccess,
    OpenByHandle,
    HandleFromPath,
    HandleFromName,
    HandleFromFd,
    LinkAt,
    StatByHandle,
}

impl FsalOp {
    pub const ALL: [FsalOp; OP_COUNT] = [
        FsalOp::Lookup,
        FsalOp::Access,
        FsalOp::Create,
        FsalOp::Mkdir,
        FsalOp::Truncate,
        FsalOp::GetAttrs,
        FsalOp::SetAttrs,
        FsalOp::Link,
        FsalOp::OpenDir,
        FsalOp::ReadDir,
        FsalOp::CloseDir,
        FsalOp::Open,
        FsalOp::Read,
        FsalOp::Write,
        FsalOp::Close,
        FsalOp::ReadLink,
        FsalOp::Symlink,
        FsalOp::Rename,
        FsalOp::Unlink,
        FsalOp::MkNode,
        FsalOp::StaticFsInfo,
        FsalOp::DynamicFsInfo,
        FsalOp::Init,
        FsalOp::GetStats,
        FsalOp::LookupPath,
        FsalOp::TestAccess,
        FsalOp::OpenByHandle,
        FsalOp::HandleFromPath,
        FsalOp::HandleFromName,
        FsalOp::HandleFromFd,
        FsalOp::LinkAt,
        FsalOp::StatByHandle,
    ];

    pub fn id(self) -> usize {
        self as usize
    }

    pub fn from_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            FsalOp::Lookup => "lookup",
            FsalOp::Access => "access",
            FsalOp::Create => "create",
            FsalOp::Mkdir => "mkdir",
            FsalOp::Truncate => "truncate",
            FsalOp::GetAttrs => "getattrs",
            FsalOp::SetAttrs => "setattrs",
            FsalOp::Link => "link",
            FsalOp::OpenDir => "opendir",
            FsalOp::ReadDir => "readdir",
            FsalOp::CloseDir => "closedir",
            FsalOp::Open => "open",
            FsalOp::Read => "read",
            FsalOp::Write => "write",
            FsalOp::Close => "close",
            FsalOp::ReadLink => "readlink",
            FsalOp::Symlink => "symlink",
            FsalOp::Rename => "rename",
            FsalOp::Unlink => "unlink",
            FsalOp::MkNode => "mknode",
            FsalOp::StaticFsInfo => "static_fsinfo",
            FsalOp::DynamicFsInfo => "dynamic_fsinfo",
            FsalOp::Init => "init",
            FsalOp::GetStats => "get_stats",
            FsalOp::LookupPath => "lookup_path",
            FsalOp::TestAccess => "test_access",
            FsalOp::OpenByHandle => "open_by_handle",
            FsalOp::HandleFromPath => "handle_from_path",
            FsalOp::HandleFromName => "handle_from_name",
            FsalOp::HandleFromFd => "handle_from_fd",
            FsalOp::LinkAt => "link_at",
            FsalOp::StatByHandle => "stat_by_handle",
        }
    }
}

/// Classified result of one call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable,
    Unrecoverable,
}

impl<T> From<&FsalResult<T>> for Outcome {
    fn from(result: &FsalResult<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => e.outcome(),
        }
    }
}

/// Counters for a single operation identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpCounters {
    pub calls: u64,
    pub successes: u64,
    pub retryable_errors: u64,
    pub unrecoverable_errors: u64,
}

impl OpCounters {
    fn bump(&mut self, outcome: Outcome) {
        self.calls += 1;
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::Retryable => self.retryable_errors += 1,
            Outcome::Unrecoverable => self.unrecoverable_errors += 1,
        }
    }

    /// `calls == successes + retryable + unrecoverable`
    pub fn is_consistent(&self) -> bool {
        self.calls == self.successes + self.retryable_errors + self.unrecoverable_errors
    }
}

/// One thread's statistics, indexed by operation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    counters: Vec<OpCounters>,
}

impl Default for StatisticsRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsRecord {
    pub fn new() -> Self {
        Self {
            counters: vec![OpCounters::default(); OP_COUNT],
        }
    }

    pub fn get(&self, op: FsalOp) -> OpCounters {
        self.counters[op.id()]
    }

    pub fn get_id(&self, id: usize) -> Option<OpCounters> {
        self.counters.get(id).copied()
    }

    pub fn total_calls(&self) -> u64 {
        self.counters.iter().map(|c| c.calls).sum()
    }

    pub fn is_consistent(&self) -> bool {
        self.counters.iter().all(OpCounters::is_consistent)
    }

    /// Fold another thread's snapshot into this one.
    pub fn merge(&mut self, other: &StatisticsRecord) {
        for (mine, theirs) in self.counters.iter_mut().zip(other.counters.iter()) {
            mine.calls += theirs.calls;
            mine.successes += theirs.successes;
            mine.retryable_errors += theirs.retryable_errors;
            mine.unrecoverable_errors += theirs.unrecoverable_errors;
        }
    }

    /// Non-zero entries, for reporting.
    pub fn iter_active(&self) -> impl Iterator<Item = (FsalOp, OpCounters)> + '_ {
        FsalOp::ALL
            .iter()
            .map(move |op| (*op, self.counters[op.id()]))
            .filter(|(_, c)| c.calls > 0)
    }
}

thread_local! {
    static THREAD_STATS: RefCell<Option<StatisticsRecord>> = const { RefCell::new(None) };
}

/// Count one call of `op_id` on the current thread. Out-of-range ids are ignored.
pub fn record(op_id: usize, outcome: Outcome) {
    if op_id >= OP_COUNT {
        return;
    }
    // try_with: the slot is gone while the thread is being torn down.
    let _ = THREAD_STATS.try_with(|cell| {
        let mut slot = cell.borrow_mut();
        let stats = slot.get_or_insert_with(StatisticsRecord::new);
        stats.counters[op_id].bump(outcome);
    });
}

pub fn record_result<T>(op: FsalOp, result: &FsalResult<T>) {
    record(op.id(), Outcome::from(result));
}

/// Copy of the calling thread's record, creating a zeroed one first if needed.
pub fn snapshot() -> StatisticsRecord {
    THREAD_STATS
        .try_with(|cell| {
            cell.borrow_mut()
                .get_or_insert_with(StatisticsRecord::new)
                .clone()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsalError;
    use std::thread;

    #[test]
    fn op_ids_are_dense() {
        for (idx, op) in FsalOp::ALL.iter().enumerate() {
            assert_eq!(op.id(), idx);
            assert_eq!(FsalOp::from_id(idx), Some(*op));
        }
        assert_eq!(FsalOp::from_id(OP_COUNT), None);
    }

    #[test]
    fn record_counts_each_outcome_once() {
        let before = snapshot().get(FsalOp::Lookup);
        record(FsalOp::Lookup.id(), Outcome::Success);
        record(FsalOp::Lookup.id(), Outcome::Retryable);
        record(FsalOp::Lookup.id(), Outcome::Unrecoverable);
        let after = snapshot().get(FsalOp::Lookup);

        assert_eq!(after.calls - before.calls, 3);
        assert_eq!(after.successes - before.successes, 1);
        assert_eq!(after.retryable_errors - before.retryable_errors, 1);
        assert_eq!(after.unrecoverable_errors - before.unrecoverable_errors, 1);
        assert!(after.is_consistent());
    }

    #[test]
    fn out_of_range_id_is_ignored() {
        let before = snapshot();
        record(OP_COUNT, Outcome::Success);
        record(usize::MAX, Outcome::Unrecoverable);
        assert_eq!(snapshot(), before);
    }

    #[test]
    fn records_are_thread_local() {
        record(FsalOp::Read.id(), Outcome::Success);
        let other = thread::spawn(|| {
            let fresh = snapshot();
            record(FsalOp::Write.id(), Outcome::Success);
            (fresh, snapshot())
        })
        .join()
        .unwrap();

        assert_eq!(other.0.total_calls(), 0);
        assert_eq!(other.1.get(FsalOp::Write).calls, 1);
        assert_eq!(other.1.get(FsalOp::Read).calls, 0);
        assert!(snapshot().get(FsalOp::Read).calls >= 1);
    }

    #[test]
    fn record_result_uses_error_class() {
        let before = snapshot().get(FsalOp::TestAccess);
        record_result::<()>(FsalOp::TestAccess, &Err(FsalError::AccessDenied));
        record_result(FsalOp::TestAccess, &Ok(()));
        let after = snapshot().get(FsalOp::TestAccess);
        assert_eq!(after.unrecoverable_errors - before.unrecoverable_errors, 1);
        assert_eq!(after.successes - before.successes, 1);
    }

    #[test]
    fn merge_adds_counters() {
        let mut a = StatisticsRecord::new();
        a.counters[FsalOp::Open.id()].bump(Outcome::Success);
        let mut b = StatisticsRecord::new();
        b.counters[FsalOp::Open.id()].bump(Outcome::Retryable);
        a.merge(&b);
        let open = a.get(FsalOp::Open);
        assert_eq!(open.calls, 2);
        assert!(a.is_consistent());
        assert_eq!(a.iter_active().count(), 1);
    }
}
