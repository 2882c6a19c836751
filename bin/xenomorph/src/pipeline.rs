// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The pivot pipeline: strictly sequential stages, each gated on the one
//! before it. Everything before `pivot::prepare` only touches the work and
//! cache directories; everything after runs inside a private mount
//! namespace until the commit point.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use tracing::{info, warn};

#[derive(clap::Args, Debug)]
pub struct PivotArgs {
    /// Image reference: a registry image, an OCI layout directory, or a
    /// tarball.
    #[arg(value_name = "IMAGE")]
    pub image: Option<String>,

    /// Image reference (alternative to the positional form).
    #[arg(long = "image", value_name = "REF", conflicts_with = "image")]
    pub image_flag: Option<String>,

    /// Command to exec in the new root.
    #[arg(long, value_name = "CMD", default_value = "/bin/sh")]
    pub exec: String,

    /// Absolute mount point for the old root inside the new root.
    #[arg(long, value_name = "PATH", default_value = "/mnt/oldroot")]
    pub keep_old_root: String,

    /// Tear the old root down after the pivot instead of keeping it
    /// mounted.
    #[arg(long)]
    pub no_keep_old_root: bool,

    /// Skip the confirmation prompt.
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Seconds to wait for service shutdown and init quiescence.
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub timeout: u64,

    /// Skip init-system coordination entirely.
    #[arg(long)]
    pub no_init_coord: bool,

    /// Skip root filesystem verification.
    #[arg(long)]
    pub skip_verify: bool,

    /// OCI layer cache directory.
    #[arg(long, value_name = "PATH", default_value = rootfs::DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    /// Directory where the new root filesystem is materialized.
    #[arg(long, value_name = "PATH", default_value = "/var/lib/xenomorph/rootfs")]
    pub work_dir: PathBuf,

    /// Print the planned steps and exit without side effects.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Arguments appended to the exec command.
    #[arg(last = true, value_name = "ARGS")]
    pub exec_args: Vec<String>,
}

/// `--keep-old-root` is user-facing as an absolute path; pivot_root wants
/// it relative to the new root.
fn old_root_mount_from(keep_old_root: &str) -> Result<PathBuf> {
    let path = Path::new(keep_old_root);
    ensure!(
        path.is_absolute(),
        "--keep-old-root must be an absolute path, got {:?}",
        keep_old_root
    );
    let relative = path.strip_prefix("/")?;
    ensure!(
        !relative.as_os_str().is_empty(),
        "--keep-old-root cannot be / itself"
    );
    Ok(relative.to_path_buf())
}

fn render_plan(args: &PivotArgs, image: &str) -> Vec<String> {
    let skipped = |skip: bool| if skip { " (skipped)" } else { "" };
    vec![
        "1. Check privileges (euid 0, CAP_SYS_ADMIN)".to_string(),
        format!("2. Mount a sized tmpfs at {}", args.work_dir.display()),
        format!("3. Build a root filesystem from {}", image),
        format!("4. Verify the root filesystem{}", skipped(args.skip_verify)),
        format!(
            "5. Coordinate with the init system{}",
            skipped(args.no_init_coord)
        ),
        "6. Terminate non-essential processes".to_string(),
        "7. Prepare the new root (mount namespace, /dev /proc /sys /run)".to_string(),
        format!(
            "8. Pivot to the new root, {}",
            if args.no_keep_old_root {
                "discarding the old root".to_string()
            } else {
                format!("keeping the old root at {}", args.keep_old_root)
            }
        ),
        format!("9. Exec {}", args.exec),
    ]
}

fn confirm(image: &str) -> Result<bool> {
    print!(
        "About to replace the running root filesystem with {}. Continue? [y/N] ",
        image
    );
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

const CAP_SYS_ADMIN_BIT: u32 = 21;

/// Reads the effective capability mask out of `/proc/self/status` text.
fn capeff_has_sys_admin(status: &str) -> Option<bool> {
    let line = status.lines().find(|line| line.starts_with("CapEff:"))?;
    let hex = line.split_whitespace().nth(1)?;
    let caps = u64::from_str_radix(hex, 16).ok()?;
    Some(caps & (1 << CAP_SYS_ADMIN_BIT) != 0)
}

fn check_privileges() -> Result<()> {
    ensure!(
        nix::unistd::Uid::effective().is_root(),
        "xenomorph must run as root (euid 0)"
    );
    let status = std::fs::read_to_string("/proc/self/status")
        .context("Failed to read /proc/self/status")?;
    ensure!(
        capeff_has_sys_admin(&status).unwrap_or(false),
        "CAP_SYS_ADMIN is required for mount, unshare, and pivot_root"
    );
    Ok(())
}

pub fn run_pivot(args: &PivotArgs) -> Result<()> {
    let image = args
        .image
        .as_deref()
        .or(args.image_flag.as_deref())
        .context("an image reference is required (positional IMAGE or --image)")?;
    ensure!(args.timeout > 0, "--timeout must be positive");
    check_privileges()?;
    let old_root_mount = old_root_mount_from(&args.keep_old_root)?;

    if args.dry_run {
        println!("Would pivot onto {}:", image);
        for line in render_plan(args, image) {
            println!("  {}", line);
        }
        return Ok(());
    }

    if !args.force && !confirm(image)? {
        bail!("aborted by user");
    }

    // A tmpfs sized from the image estimate keeps a runaway extraction from
    // eating all memory; the memory check keeps the tmpfs itself honest.
    let required = rootfs::estimate_image_size(image)?;
    rootfs::check_available_memory(required)?;
    mountutil::ensure_dir(&args.work_dir)?;
    if mountutil::is_mount_point(&args.work_dir)? {
        warn!(
            "{} is already a mount point; building onto it as-is",
            args.work_dir.display()
        );
    } else {
        info!(
            "Mounting {} byte tmpfs at {}",
            required,
            args.work_dir.display()
        );
        mountutil::mount_tmpfs(&args.work_dir, required)?;
    }

    let build_options = rootfs::BuildOptions {
        cache_dir: args.cache_dir.clone(),
        ..Default::default()
    };
    let built = rootfs::build(
        image,
        &args.work_dir,
        &build_options,
        &ociimage::OfflineRegistry,
    )?;
    info!(
        "Built root filesystem: {} layers, {} bytes",
        built.layer_count, built.total_size
    );
    if let Some(config) = &built.image_config {
        if let Some(entrypoint) = &config.config.entrypoint {
            info!("Image entrypoint: {:?}", entrypoint);
        }
    }

    if !args.skip_verify {
        let report = rootfs::verify(&built.rootfs_path);
        for warning in &report.warnings {
            warn!("New root: {}", warning);
        }
        if !report.valid {
            bail!(
                "root filesystem verification failed: {}",
                report.errors.join("; ")
            );
        }
    }

    if args.no_init_coord {
        info!("Init coordination skipped by request");
    } else if initcoord::running_in_container() {
        info!("Container environment detected; skipping init coordination");
    } else {
        let init = initcoord::detect();
        info!(
            "Coordinating with {} (pid1: {})",
            init.system, init.pid1_comm
        );
        let coordinator =
            initcoord::Coordinator::new(init, Duration::from_secs(args.timeout));
        // Advisory only: the terminator below is the authoritative stopper.
        if let Err(e) = coordinator.quiesce() {
            warn!("Init coordination incomplete: {:#}", e);
        }
    }

    let report = processes::terminate_all(&processes::TerminateOptions::default())?;
    info!(
        "Terminated {} processes ({} needed SIGKILL)",
        report.terminated_count, report.killed_count
    );
    if !report.stubborn_pids.is_empty() {
        warn!("Processes that refused to die: {:?}", report.stubborn_pids);
    }

    let prepared = pivot::prepare(
        &args.work_dir,
        &pivot::PrepareOptions {
            skip_verify: args.skip_verify,
            create_namespace: true,
        },
    )?;
    info!(
        "Prepared {} (namespace created: {})",
        prepared.new_root.display(),
        prepared.namespace_created
    );

    // The point of no return.
    pivot::execute(&pivot::PivotConfig {
        new_root: prepared.new_root,
        old_root_mount,
        exec_cmd: Some(args.exec.clone()),
        exec_args: args.exec_args.clone(),
        keep_old_root: !args.no_keep_old_root,
    })
}
