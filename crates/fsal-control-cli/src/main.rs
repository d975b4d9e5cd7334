// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fsal_core::stats;
use fsal_core::{
    check_access, global, AccessMask, Credential, ExportContext, FsalCore, FsalError, FsalInitInfo,
    Handle, HandleResolver, KernelHandleFacility, ObjectAttributes, OpContext,
};
use fsal_logging::CliLoggingArgs;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Inspect an export through the FSAL handle and access layer"
)]
struct Cli {
    /// Root directory of the export
    #[arg(long)]
    export: PathBuf,

    /// FSAL init configuration (TOML, or JSON with a .json extension)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print this invocation's call statistics after the command
    #[arg(long)]
    stats: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the handle of a path (relative paths start at the export root)
    Handle { path: PathBuf },
    /// Stat the object behind a hex handle
    Stat { handle: String },
    /// Print the target of the symlink behind a hex handle
    Readlink {
        handle: String,
        #[arg(long, default_value_t = 4096)]
        max_len: usize,
    },
    /// Evaluate POSIX access to a path for a credential
    Access {
        path: PathBuf,
        #[arg(long)]
        uid: u32,
        #[arg(long)]
        gid: u32,
        /// Supplementary groups
        #[arg(long, value_delimiter = ',')]
        groups: Vec<u32>,
        #[arg(long)]
        read: bool,
        #[arg(long)]
        write: bool,
        #[arg(long)]
        exec: bool,
        /// Owner-only semantic check
        #[arg(long)]
        owner: bool,
    },
    /// Print the capability table as JSON
    Caps,
}

impl Command {
    fn access_mask(read: bool, write: bool, exec: bool, owner: bool) -> AccessMask {
        let mut mask = AccessMask::empty();
        mask.set(AccessMask::READ, read);
        mask.set(AccessMask::WRITE, write);
        mask.set(AccessMask::EXEC, exec);
        mask.set(AccessMask::OWNER, owner);
        mask
    }
}

fn parse_handle(hex: &str) -> Result<Handle> {
    Handle::from_hex(hex).map_err(|_| anyhow!("invalid handle: {hex}"))
}

fn load_config(path: Option<&Path>) -> Result<FsalInitInfo> {
    match path {
        Some(path) => FsalInitInfo::load(path)
            .with_context(|| format!("failed to load FSAL configuration from {}", path.display())),
        None => Ok(FsalInitInfo::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.logging.clone().init("fsal-ctl")?;

    let info = load_config(cli.config.as_deref())?;
    let core = global::init(&info).context("FSAL initialization failed")?;
    let export = Arc::new(
        ExportContext::open(&cli.export)
            .with_context(|| format!("cannot open export root {}", cli.export.display()))?,
    );
    let resolver = HandleResolver::new(KernelHandleFacility::new(), Arc::clone(core.throttle()));
    debug!(export = %cli.export.display(), "fsal-ctl ready");

    let root_ctx = OpContext::new(Credential::root(), Arc::clone(&export));
    let result = run(&cli.command, &resolver, &root_ctx, core);

    if cli.stats {
        for (op, counters) in stats::snapshot().iter_active() {
            println!(
                "STAT\t{}\tcalls={}\tok={}\tretryable={}\tunrecoverable={}",
                op.name(),
                counters.calls,
                counters.successes,
                counters.retryable_errors,
                counters.unrecoverable_errors
            );
        }
    }
    global::terminate()?;
    result
}

fn run(
    command: &Command,
    resolver: &HandleResolver<KernelHandleFacility>,
    root_ctx: &OpContext,
    core: &FsalCore,
) -> Result<()> {
    match command {
        Command::Handle { path } => {
            let handle = resolver
                .handle_from_path(root_ctx, path)
                .with_context(|| format!("name_to_handle failed for {}", path.display()))?;
            println!(
                "HANDLE={}\tTYPE={}\tLEN={}",
                handle.to_hex(),
                handle.handle_type(),
                handle.len()
            );
        }
        Command::Stat { handle } => {
            let handle = parse_handle(handle)?;
            let st = resolver
                .stat_by_handle(root_ctx, &handle)
                .context("stat_by_handle failed")?;
            println!(
                "INO={}\tMODE={:o}\tUID={}\tGID={}\tSIZE={}\tNLINK={}",
                st.ino, st.mode, st.uid, st.gid, st.size, st.nlink
            );
        }
        Command::Readlink { handle, max_len } => {
            let handle = parse_handle(handle)?;
            let target = resolver
                .readlink_by_handle(root_ctx, &handle, *max_len)
                .context("readlink_by_handle failed")?;
            println!("TARGET={}", String::from_utf8_lossy(target.as_bytes()));
        }
        Command::Access {
            path,
            uid,
            gid,
            groups,
            read,
            write,
            exec,
            owner,
        } => {
            let full = root_ctx.export.root_path().join(path);
            let meta = std::fs::symlink_metadata(&full)
                .with_context(|| format!("cannot stat {}", full.display()))?;
            let attrs = ObjectAttributes {
                owner: meta.uid(),
                group: meta.gid(),
                mode: meta.mode() & 0o7777,
                size: meta.size(),
                nlink: meta.nlink(),
            };
            let ctx = OpContext::new(
                Credential::new(*uid, *gid, groups.clone()),
                Arc::clone(&root_ctx.export),
            );
            let mask = Command::access_mask(*read, *write, *exec, *owner);
            match check_access(Some(&ctx), mask, Some(&attrs), None) {
                Ok(()) => println!("ACCESS=granted"),
                Err(FsalError::AccessDenied) => println!("ACCESS=denied"),
                Err(e) => return Err(anyhow!("access check failed: {e}")),
            }
        }
        Command::Caps => {
            let caps = serde_json::to_string_pretty(core.capabilities())?;
            println!("{caps}");
        }
    }
    Ok(())
}
