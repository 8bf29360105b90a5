//  zfsync: ZFS dataset replication over SSH
//  Copyright (C) 2026  The zfsync authors

//  This program is free software: you can redistribute it and/or modify
//  it under the terms of the GNU General Public License as published by
//  the Free Software Foundation, either version 3 of the License, or
//  (at your option) any later version.

//  This program is distributed in the hope that it will be useful,
//  but WITHOUT ANY WARRANTY; without even the implied warranty of
//  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//  GNU General Public License for more details.

//  You should have received a copy of the GNU General Public License
//  along with this program.  If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use log::{debug, error, info, warn};
use std::process::exit;
use zfsync::sync::args::{self, Args};
use zfsync::sync::capabilities::Capabilities;
use zfsync::sync::cmd::{Cmd, CmdTarget};
use zfsync::sync::compress::{Compress, CompressCommand};
use zfsync::sync::endpoint::Endpoint;
use zfsync::sync::error::SyncError;
use zfsync::sync::pipeline::{self, PipelineEnv, RecvSpec, SendSpec};
use zfsync::sync::plan::{self, SyncPlan};
use zfsync::sync::snaps;
use zfsync::sync::ssh::SshMaster;
use zfsync::sync::sys;
use zfsync::sync::util::ReadableBytes;
use zfsync::sync::zfs::{self, ReadonlyGuard, Snapshot, Zfs};

struct SyncCtx<'run> {
    args: &'run Args,
    compressor: Option<CompressCommand>,
    caps: Capabilities,
    source_ct: &'run CmdTarget<'run>,
    target_ct: &'run CmdTarget<'run>,
    local_ct: &'run CmdTarget<'run>,
    source_zfs: Zfs<'run>,
    target_zfs: Zfs<'run>,
    hostname: String,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.quiet {
        "error"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    // exit() skips destructors, so everything drop-guarded (ssh masters,
    // readonly restores) lives inside run()
    exit(run(&args))
}

fn run(args: &Args) -> i32 {
    let source = match Endpoint::parse(&args.source) {
        Ok(ep) => ep,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };
    let target = match Endpoint::parse(&args.target) {
        Ok(ep) => ep,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };

    let compressor = Compress::from_flag(&args.compress).to_cmd();
    let ssh_options = args.ssh_config_options();
    let local_ct = CmdTarget::new_local();

    if (source.is_remote() || target.is_remote()) && !args.no_command_checks {
        let ssh_exists = Cmd::new(&local_ct, false, "ssh")
            .to_check()
            .output()
            .is_ok_and(|output| output.status.success());
        if !ssh_exists {
            error!("there are remote endpoints, but ssh does not exist on the local system");
            return 1;
        }
    }

    let source_master = match open_master(&source, &ssh_options) {
        Ok(master) => master,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    let target_master = match open_master(&target, &ssh_options) {
        Ok(master) => master,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    let source_ct = CmdTarget::new(
        source.host.as_deref(),
        source_master.as_ref().map(SshMaster::socket),
        &ssh_options,
    );
    let target_ct = CmdTarget::new(
        target.host.as_deref(),
        target_master.as_ref().map(SshMaster::socket),
        &ssh_options,
    );

    let caps = match Capabilities::detect(
        &source_ct,
        &target_ct,
        &local_ct,
        compressor.as_ref(),
        !args.quiet,
        args.no_command_checks,
    ) {
        Ok(caps) => caps,
        Err(e) => {
            error!("failed to probe helper commands: {e}");
            return 1;
        }
    };

    let hostname = match sys::hostname() {
        Ok(hostname) => hostname,
        Err(e) => {
            error!("failed to determine local hostname: {e}");
            return 1;
        }
    };

    let ctx = SyncCtx {
        args,
        compressor,
        caps,
        source_ct: &source_ct,
        target_ct: &target_ct,
        local_ct: &local_ct,
        source_zfs: Zfs::new(&source_ct, source.is_root),
        target_zfs: Zfs::new(&target_ct, target.is_root),
        hostname,
    };

    if !args.recursive {
        match sync_dataset(&ctx, &source, &target) {
            Ok(()) => 0,
            Err(e) => {
                error!("{e}");
                e.exit_code()
            }
        }
    } else {
        let children = match ctx.source_zfs.list_children(&source.fs) {
            Ok(children) => children,
            Err(e) => {
                error!("{e}");
                return e.exit_code();
            }
        };
        let mut worst = 0;
        for child in &children {
            let Some(suffix) = child.strip_prefix(&source.fs) else {
                warn!("skipping {child}: not a child of {}", source.fs);
                continue;
            };
            let child_source = source.with_fs(child.clone());
            let child_target = target.with_fs(format!("{}{}", target.fs, suffix));
            if let Err(e) = sync_dataset(&ctx, &child_source, &child_target) {
                error!("failed to sync {child_source}: {e}");
                worst = worst.max(e.exit_code());
            }
        }
        worst
    }
}

fn open_master(
    endpoint: &Endpoint,
    ssh_options: &[String],
) -> Result<Option<SshMaster>, std::io::Error> {
    endpoint
        .host
        .as_deref()
        .map(|host| SshMaster::open(host, ssh_options))
        .transpose()
}

/// The full single-dataset procedure: busy probe, target detection,
/// inventories, sync snapshot, plan, transfer, prune.
fn sync_dataset(ctx: &SyncCtx, source: &Endpoint, target: &Endpoint) -> Result<(), SyncError> {
    let source_fs = source.fs.as_str();
    let target_fs = target.fs.as_str();
    debug!("syncing {source} to {target}");

    if zfs::receive_in_progress(ctx.target_ct, target_fs)? {
        return Err(SyncError::TargetBusy(target_fs.to_string()));
    }

    let target_exists = ctx.target_zfs.dataset_exists(target_fs)?;
    let source_snaps = ctx.source_zfs.snapshots(source_fs)?;
    let target_snaps = if target_exists {
        Some(ctx.target_zfs.snapshots(target_fs)?)
    } else {
        None
    };

    if ctx.args.dump_snaps {
        dump_inventory(source_fs, &source_snaps, target_fs, target_snaps.as_deref());
    }

    let new_sync = snaps::sync_snap_name(&ctx.hostname);
    debug!("creating sync snapshot {source_fs}@{new_sync}");
    ctx.source_zfs.snapshot(source_fs, &new_sync)?;

    let plan = plan::plan_sync(
        &source_snaps,
        target_snaps.as_deref(),
        &new_sync,
        source_fs,
        target_fs,
    )?;

    // Force the target read-only for the transfer; the guard puts the saved
    // value back on every path out of this function.
    let guard = if target_exists {
        Some(ReadonlyGuard::set(&ctx.target_zfs, target_fs)?)
    } else {
        None
    };

    let transferred = run_plan(ctx, source_fs, target_fs, &plan);

    if let Some(guard) = guard {
        if let Err(e) = guard.restore() {
            warn!("failed to restore readonly on {target_fs}: {e}");
        }
    }

    // a failed transfer keeps every snapshot in place for the next attempt
    transferred?;

    prune_side(&ctx.source_zfs, source_fs, &source_snaps, ctx, &new_sync);
    if let Some(target_snaps) = &target_snaps {
        prune_side(&ctx.target_zfs, target_fs, target_snaps, ctx, &new_sync);
    }

    Ok(())
}

fn run_plan(
    ctx: &SyncCtx,
    source_fs: &str,
    target_fs: &str,
    plan: &SyncPlan,
) -> Result<(), SyncError> {
    match plan {
        SyncPlan::InitialOnly { oldest } => {
            send_step(ctx, source_fs, target_fs, None, oldest, true)
        }
        SyncPlan::InitialThenIncremental { oldest, new_sync } => {
            send_step(ctx, source_fs, target_fs, None, oldest, true)?;
            send_step(ctx, source_fs, target_fs, Some(oldest), new_sync, false)
        }
        SyncPlan::IncrementalFromMatch { base, new_sync } => {
            send_step(ctx, source_fs, target_fs, Some(base), new_sync, false)
        }
    }
}

/// One send/receive pass. The receive probe runs again right before the
/// pipeline starts to close the race with planning.
fn send_step(
    ctx: &SyncCtx,
    source_fs: &str,
    target_fs: &str,
    from: Option<&str>,
    to: &str,
    force: bool,
) -> Result<(), SyncError> {
    if zfs::receive_in_progress(ctx.target_ct, target_fs)? {
        return Err(SyncError::TargetBusy(target_fs.to_string()));
    }

    let estimate = ctx.source_zfs.estimate_send(source_fs, from, to);
    match from {
        None => info!(
            "sending full {source_fs}@{to} to {target_fs} (~ {})",
            ReadableBytes(estimate)
        ),
        Some(from) => info!(
            "sending incremental {source_fs}@{from} .. @{to} to {target_fs} (~ {})",
            ReadableBytes(estimate)
        ),
    }

    let env = pipeline_env(ctx, estimate);
    let send = SendSpec {
        fs: source_fs,
        from,
        to,
    };
    let recv = RecvSpec {
        fs: target_fs,
        force,
    };
    let pipeline = pipeline::assemble(
        ctx.source_ct,
        ctx.source_zfs.sudo(),
        ctx.target_ct,
        ctx.target_zfs.sudo(),
        ctx.local_ct,
        &ctx.caps,
        &env,
        &send,
        &recv,
    );
    let status = pipeline.run()?;
    if !status.success() {
        return Err(SyncError::Pipeline {
            fs: target_fs.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

fn pipeline_env<'a>(ctx: &'a SyncCtx, estimate: u64) -> PipelineEnv<'a> {
    let source_mbuffer_args = ctx.args.source_mbuffer_args();
    let target_mbuffer_args = ctx.args.target_mbuffer_args();
    let local_mbuffer_args = if ctx.args.source_bwlimit.is_some() {
        source_mbuffer_args.clone()
    } else {
        target_mbuffer_args.clone()
    };
    PipelineEnv {
        compressor: ctx.compressor.as_ref(),
        source_mbuffer_args,
        target_mbuffer_args,
        plain_mbuffer_args: args::mbuffer_standard_args(&ctx.args.mbuffer_size),
        local_mbuffer_args,
        pv_opts: ctx
            .args
            .pv_options
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        estimate,
    }
}

fn dump_inventory(
    source_fs: &str,
    source_snaps: &[Snapshot],
    target_fs: &str,
    target_snaps: Option<&[Snapshot]>,
) {
    for snap in source_snaps {
        info!(
            "source {source_fs}@{} creation {}",
            snap.name, snap.creation
        );
    }
    for snap in target_snaps.unwrap_or_default() {
        info!(
            "target {target_fs}@{} creation {}",
            snap.name, snap.creation
        );
    }
}

fn prune_side(zfs: &Zfs, fs: &str, snaps_list: &[Snapshot], ctx: &SyncCtx, keep: &str) {
    let victims = snaps::prune_candidates(snaps_list, &ctx.hostname, keep);
    if victims.is_empty() {
        return;
    }
    let destroyed = zfs.destroy_snapshots(fs, &victims);
    info!("pruned {destroyed} old sync snapshot(s) on {fs}");
}
