// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! POSIX permission evaluation, independent of the filesystem's own checks.

use tracing::trace;

use crate::context::OpContext;
use crate::error::{FsalError, FsalResult};
use crate::stats::{self, FsalOp};
use crate::types::{AccessMask, Credential, FileStat, ObjectAttributes};

const OWNER_SHIFT: u32 = 6;
const GROUP_SHIFT: u32 = 3;

fn granted(mode: u32, shift: u32) -> AccessMask {
    AccessMask::from_triad(mode >> shift)
}

fn verdict(missing: AccessMask) -> FsalResult<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FsalError::AccessDenied)
    }
}

/// Decide whether `cred` may perform `requested` on an object with `meta`.
///
/// Precedence, first match wins:
/// 1. `EXISTS` is refused with `InvalidArgument`; existence is a lookup concern.
/// 2. uid 0 is always allowed.
/// 3. The owner is checked against the owner triad. `OWNER` is satisfied for
///    the owner whatever the mode says, so a freshly created object with mode
///    `0000` still passes owner-only checks.
/// 4. Anyone else has `OWNER` dropped, then is checked against the group triad
///    when the object's group is the primary or a supplementary group, or the
///    other triad otherwise.
pub fn evaluate(cred: &Credential, requested: AccessMask, meta: &ObjectAttributes) -> FsalResult<()> {
    if requested.contains(AccessMask::EXISTS) {
        return Err(FsalError::InvalidArgument);
    }
    if cred.is_superuser() {
        trace!(requested = ?requested, "access granted to superuser");
        return Ok(());
    }

    let mut missing = requested;
    if cred.uid == meta.owner {
        missing.remove(granted(meta.mode, OWNER_SHIFT) | AccessMask::OWNER);
        trace!(uid = cred.uid, mode = format_args!("{:o}", meta.mode), missing = ?missing, "owner check");
        return verdict(missing);
    }

    missing.remove(AccessMask::OWNER);
    if cred.in_group(meta.group) {
        missing.remove(granted(meta.mode, GROUP_SHIFT));
        trace!(gid = meta.group, mode = format_args!("{:o}", meta.mode), missing = ?missing, "group check");
    } else {
        missing.remove(granted(meta.mode, 0));
        trace!(mode = format_args!("{:o}", meta.mode), missing = ?missing, "other check");
    }
    verdict(missing)
}

/// Access test entry point used by the operation layer.
///
/// `attrs` wins over `stat` when both are supplied. A missing context, or no
/// metadata at all, is a `Fault`. The outcome is counted under
/// [`FsalOp::TestAccess`].
pub fn check_access(
    ctx: Option<&OpContext>,
    requested: AccessMask,
    attrs: Option<&ObjectAttributes>,
    stat: Option<&FileStat>,
) -> FsalResult<()> {
    let result = (|| {
        let ctx = ctx.ok_or(FsalError::Fault)?;
        match (attrs, stat) {
            (Some(attrs), _) => evaluate(&ctx.credential, requested, attrs),
            (None, Some(stat)) => evaluate(&ctx.credential, requested, &ObjectAttributes::from(stat)),
            (None, None) => Err(FsalError::Fault),
        }
    })();
    stats::record_result(FsalOp::TestAccess, &result);
    result
}
