//! Configuration loading for polboot.
//!
//! Loads `polboot.toml` with per-section defaults. All sections use
//! `#[serde(default)]` so a minimal or empty config file is valid, and a
//! missing config file yields the defaults entirely.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::boot::ConfigMode;

/// Top-level polboot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Desired enforcement mode at boot.
    #[serde(default)]
    pub enforce: EnforceConfig,

    /// Policy store and local-definition paths.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Kernel interface paths.
    #[serde(default)]
    pub kernel: KernelConfig,
}

/// Desired enforcement mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnforceConfig {
    /// Tri-state default mode. Absent means unspecified: the kernel
    /// command line or the permissive default decides.
    #[serde(default)]
    pub mode: Option<ConfigMode>,
}

/// Policy store and local-definition paths.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Base path of the binary policy store; versioned files live at
    /// `<store>.<version>`.
    #[serde(default = "default_store")]
    pub store: PathBuf,

    /// Merge site-local boolean and user definitions on reload.
    #[serde(default)]
    pub local_definitions: bool,

    /// Directory holding local user/role definitions.
    #[serde(default = "default_users_dir")]
    pub users_dir: PathBuf,

    /// File holding local boolean definitions.
    #[serde(default = "default_booleans_path")]
    pub booleans: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            local_definitions: false,
            users_dir: default_users_dir(),
            booleans: default_booleans_path(),
        }
    }
}

/// Kernel interface paths.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelConfig {
    /// Mount point for the policy pseudo-filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// File holding the kernel command line.
    #[serde(default = "default_cmdline_path")]
    pub cmdline: PathBuf,

    /// File holding the running kernel release string.
    #[serde(default = "default_osrelease_path")]
    pub osrelease: PathBuf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            cmdline: default_cmdline_path(),
            osrelease: default_osrelease_path(),
        }
    }
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if any configured path is not absolute.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.policy.store.is_absolute(),
            "policy.store must be an absolute path"
        );
        anyhow::ensure!(
            self.kernel.mount_point.is_absolute(),
            "kernel.mount_point must be an absolute path"
        );
        anyhow::ensure!(
            self.kernel.cmdline.is_absolute(),
            "kernel.cmdline must be an absolute path"
        );
        Ok(())
    }
}

/// Load polboot configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails
/// validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

// Default value functions for serde.

fn default_store() -> PathBuf {
    PathBuf::from("/etc/selinux/policy/policy")
}

fn default_users_dir() -> PathBuf {
    PathBuf::from("/etc/selinux/users")
}

fn default_booleans_path() -> PathBuf {
    PathBuf::from("/etc/selinux/booleans")
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("/sys/fs/selinux")
}

fn default_cmdline_path() -> PathBuf {
    PathBuf::from("/proc/cmdline")
}

fn default_osrelease_path() -> PathBuf {
    PathBuf::from("/proc/sys/kernel/osrelease")
}
