//! polboot CLI entry point.
//!
//! Provides `boot` and `load` subcommands: the full boot-time enforcement
//! mode resolution plus initial policy load, or a standalone policy reload
//! against an already-mounted kernel interface.
//!
//! Exit code is 0 only on a fully successful load; every other outcome,
//! including intentional runtime disable, exits non-zero so the boot
//! caller knows not to proceed. Cause lives in the logged diagnostics.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};

use polboot::boot::{self, BootOptions, BootOutcome, MountError, PolicyFsMount};
use polboot::config::{load_config, Config};
use polboot::kernel::Kernel;
use polboot::negotiate::{self, LoadOptions};

/// polboot — boot-time security policy loader.
#[derive(Parser)]
#[command(name = "polboot", version, about)]
struct Cli {
    /// Path to the polboot configuration file.
    #[arg(long, default_value = "/etc/polboot/polboot.toml")]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Resolve the enforcement mode, mount the policy filesystem, and
    /// perform the initial policy load.
    Boot,
    /// Load policy into an already-mounted kernel interface.
    Load {
        /// Carry currently active boolean values across the reload.
        #[arg(long)]
        preserve_booleans: bool,

        /// Merge site-local boolean and user definitions.
        #[arg(long)]
        local_defs: bool,
    },
}

fn main() -> ExitCode {
    polboot::logging::init_cli();
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        match load_config(&cli.config) {
            Ok(config) => config,
            Err(error) => {
                error!(path = %cli.config.display(), %error, "could not load configuration");
                return ExitCode::FAILURE;
            }
        }
    } else {
        debug!(path = %cli.config.display(), "no config file, using defaults");
        Config::default()
    };

    match cli.command {
        Command::Boot => handle_boot(&config),
        Command::Load {
            preserve_booleans,
            local_defs,
        } => handle_load(&config, preserve_booleans, local_defs),
    }
}

/// Run the full boot path: resolve mode, mount, reconcile, load.
fn handle_boot(config: &Config) -> ExitCode {
    let mut kernel = Kernel::unconfigured();
    let mounter = SysMounter;
    let boot_opts = BootOptions {
        cmdline_path: config.kernel.cmdline.clone(),
        mount_point: config.kernel.mount_point.clone(),
        config_mode: config.enforce.mode,
    };
    let load_opts = load_options(config, false, false);

    // No transform provider is linked into this binary; the pipeline runs
    // in degraded mode and accepts only the kernel's own policy version.
    match boot::init_enforcement(&mut kernel, &mounter, &boot_opts, None, &load_opts) {
        BootOutcome::Loaded { policy, enforcing } => {
            info!(
                version = policy.version,
                source = %policy.source.display(),
                enforcing,
                "initial policy load complete"
            );
            ExitCode::SUCCESS
        }
        BootOutcome::Disabled => {
            info!("enforcement disabled by configuration, nothing loaded");
            ExitCode::FAILURE
        }
        BootOutcome::NotLoaded { enforcing } => {
            warn!(enforcing, "no policy loaded");
            ExitCode::FAILURE
        }
    }
}

/// Reload policy against an already-mounted kernel interface.
fn handle_load(config: &Config, preserve_booleans: bool, local_defs: bool) -> ExitCode {
    let kernel = Kernel::at_mount(&config.kernel.mount_point);
    let set_local_defs = local_defs || config.policy.local_definitions;
    let load_opts = load_options(config, set_local_defs, preserve_booleans);

    match negotiate::load_policy(&kernel, None, &load_opts) {
        Ok(policy) => {
            info!(
                version = policy.version,
                source = %policy.source.display(),
                "policy loaded"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "policy load failed");
            ExitCode::FAILURE
        }
    }
}

/// Build pipeline options from the configuration.
fn load_options(config: &Config, set_local_defs: bool, preserve_booleans: bool) -> LoadOptions {
    LoadOptions {
        base_path: config.policy.store.clone(),
        set_local_defs,
        preserve_booleans,
        users_dir: config.policy.users_dir.clone(),
        booleans_path: config.policy.booleans.clone(),
        kernel_release: std::fs::read_to_string(&config.kernel.osrelease)
            .ok()
            .map(|s| s.trim().to_owned()),
    }
}

/// Mounts the policy pseudo-filesystem by shelling out to `mount(8)`.
struct SysMounter;

impl PolicyFsMount for SysMounter {
    fn mount(&self, target: &Path) -> Result<(), MountError> {
        let output = std::process::Command::new("mount")
            .args(["-t", "selinuxfs", "none"])
            .arg(target)
            .output()
            .map_err(|e| MountError::Failed {
                path: target.to_owned(),
                reason: e.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("unknown filesystem type") || stderr.contains("No such device") {
            return Err(MountError::DeviceAbsent);
        }
        // An already-mounted policy filesystem is fine to reuse.
        if stderr.contains("already mounted") || stderr.contains("busy") {
            return Ok(());
        }
        Err(MountError::Failed {
            path: target.to_owned(),
            reason: stderr.trim().to_owned(),
        })
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let output = std::process::Command::new("umount")
            .arg(target)
            .output()
            .map_err(|e| MountError::Failed {
                path: target.to_owned(),
                reason: e.to_string(),
            })?;
        if output.status.success() {
            return Ok(());
        }
        Err(MountError::Failed {
            path: target.to_owned(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}
