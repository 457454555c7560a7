//! Boot-time enforcement mode resolution.
//!
//! Runs before the first policy load: layers the kernel command line over
//! the persistent configuration to decide the desired enforcement mode,
//! mounts the policy pseudo-filesystem, handles runtime disable, brings
//! the kernel's enforcement state in line with the decision, and then
//! hands off to the version negotiation pipeline.
//!
//! The terminal contract is strict: only a fully successful
//! mount + resolve + load sequence counts as success. Intentional disable
//! and every failure route both prevent the caller from proceeding, but
//! are logged differently.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::kernel::Kernel;
use crate::negotiate::{self, LoadOptions, LoadedPolicy};
use crate::provider::PolicyTransformer;

/// Default mode requested by the persistent configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    /// Runtime-disable the enforcement kernel; no policy is loaded.
    Disabled,
    /// Load policy but only log violations.
    Permissive,
    /// Load policy and block violations.
    Enforcing,
}

/// Which layered source decided the enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// An `enforcing=` token on the kernel command line.
    CommandLine,
    /// The persistent configuration file.
    ConfigFile,
    /// The kernel has enforcement support compiled out or boot-disabled.
    KernelDisabled,
    /// Neither source specified a mode; permissive by default.
    Default,
}

/// The resolved enforcement mode, computed once per boot invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementDecision {
    /// Whether the kernel should enforce.
    pub enforcing: bool,
    /// The source that won the layering.
    pub source: DecisionSource,
}

/// Mounting the policy pseudo-filesystem failed.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// The running kernel has no enforcement support (compiled out or
    /// disabled at boot). Overrides every configured mode.
    #[error("policy filesystem is not supported by the running kernel")]
    DeviceAbsent,

    /// Any other mount or unmount failure.
    #[error("mount operation failed at {path}: {reason}")]
    Failed {
        /// The mount point involved.
        path: PathBuf,
        /// Description of the failure.
        reason: String,
    },
}

/// Mount operations for the policy pseudo-filesystem.
///
/// Mounting mechanics are an external collaborator; implementations must
/// treat an already-mounted target as success and report a missing kernel
/// device as [`MountError::DeviceAbsent`].
pub trait PolicyFsMount {
    /// Mount the policy filesystem at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::DeviceAbsent`] when the kernel lacks
    /// enforcement support, or [`MountError::Failed`] otherwise.
    fn mount(&self, target: &Path) -> Result<(), MountError>;

    /// Unmount the policy filesystem at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::Failed`] if the unmount fails.
    fn unmount(&self, target: &Path) -> Result<(), MountError>;
}

/// Inputs to the boot-time resolver.
#[derive(Debug, Clone)]
pub struct BootOptions {
    /// File holding the kernel command line (normally `/proc/cmdline`).
    pub cmdline_path: PathBuf,
    /// Where to mount the policy pseudo-filesystem.
    pub mount_point: PathBuf,
    /// Mode requested by the persistent configuration, if any.
    pub config_mode: Option<ConfigMode>,
}

/// Terminal outcome of the boot-time resolver.
#[derive(Debug)]
pub enum BootOutcome {
    /// Mount, reconcile, and policy load all succeeded.
    Loaded {
        /// The committed policy.
        policy: LoadedPolicy,
        /// Final enforcement state.
        enforcing: bool,
    },
    /// Enforcement was intentionally disabled at runtime; the policy
    /// filesystem was unmounted and no load occurred.
    Disabled,
    /// No policy was loaded. Carries the resolved desired mode so the
    /// caller can decide how hard to fail.
    NotLoaded {
        /// The desired enforcement state at the point of failure.
        enforcing: bool,
    },
}

impl BootOutcome {
    /// Whether the full mount + resolve + load sequence succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, BootOutcome::Loaded { .. })
    }
}

/// Parse an `enforcing=<int>` override from the kernel command line.
///
/// The token is recognized only at line start or after whitespace. The
/// value is the leading (optionally signed) decimal run after the `=`; an
/// empty run is malformed and the token is ignored.
pub fn parse_cmdline_enforcing(line: &str) -> Option<i64> {
    const TOKEN: &str = "enforcing=";
    let mut search = line;
    let mut base = 0usize;
    while let Some(pos) = search.find(TOKEN) {
        let absolute = base.checked_add(pos)?;
        let at_boundary = absolute == 0
            || line[..absolute]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
        let value_start = absolute.checked_add(TOKEN.len())?;
        if at_boundary {
            if let Some(value) = leading_integer(&line[value_start..]) {
                return Some(value);
            }
        }
        search = &line[value_start..];
        base = value_start;
    }
    None
}

/// Leading optionally-signed decimal integer of `s`, if any.
fn leading_integer(s: &str) -> Option<i64> {
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    value.checked_mul(sign)
}

/// Layer the command-line override over the configured mode.
///
/// A non-negative command-line value wins outright; otherwise the config
/// file decides between enforcing and permissive; with neither, the
/// default is permissive. A configured `disabled` mode does not set a
/// desired enforcement state here — the disable path is handled
/// separately.
pub fn resolve_mode(cmdline: Option<i64>, config: Option<ConfigMode>) -> EnforcementDecision {
    if let Some(value) = cmdline.filter(|v| *v >= 0) {
        return EnforcementDecision {
            enforcing: value != 0,
            source: DecisionSource::CommandLine,
        };
    }
    match config {
        Some(ConfigMode::Enforcing) => EnforcementDecision {
            enforcing: true,
            source: DecisionSource::ConfigFile,
        },
        Some(ConfigMode::Permissive) => EnforcementDecision {
            enforcing: false,
            source: DecisionSource::ConfigFile,
        },
        Some(ConfigMode::Disabled) | None => EnforcementDecision {
            enforcing: false,
            source: DecisionSource::Default,
        },
    }
}

/// Resolve the enforcement mode and drive the initial policy load.
///
/// Local customization and boolean preservation are both disabled on this
/// path; the boot load always commits the stock policy.
pub fn init_enforcement(
    kernel: &mut Kernel,
    mounter: &dyn PolicyFsMount,
    boot: &BootOptions,
    transformer: Option<&dyn PolicyTransformer>,
    load: &LoadOptions,
) -> BootOutcome {
    let cmdline_override = match fs::read_to_string(&boot.cmdline_path) {
        Ok(line) => parse_cmdline_enforcing(&line),
        Err(error) => {
            debug!(
                path = %boot.cmdline_path.display(),
                %error,
                "kernel command line unavailable"
            );
            None
        }
    };

    let decision = resolve_mode(cmdline_override, boot.config_mode);
    debug!(
        enforcing = decision.enforcing,
        source = ?decision.source,
        "resolved desired enforcement mode"
    );

    match mounter.mount(&boot.mount_point) {
        Ok(()) => kernel.set_mount(&boot.mount_point),
        Err(MountError::DeviceAbsent) => {
            // Kernel support is absent; this overrides any configured or
            // command-line mode.
            let decision = EnforcementDecision {
                enforcing: false,
                source: DecisionSource::KernelDisabled,
            };
            info!(
                source = ?decision.source,
                "enforcement support absent from kernel, nothing to load"
            );
            return BootOutcome::NotLoaded {
                enforcing: decision.enforcing,
            };
        }
        Err(error) => {
            error!(
                mount_point = %boot.mount_point.display(),
                %error,
                "could not mount policy filesystem"
            );
            return BootOutcome::NotLoaded {
                enforcing: decision.enforcing,
            };
        }
    }

    if boot.config_mode == Some(ConfigMode::Disabled) {
        return match kernel.disable() {
            Ok(()) => {
                info!("enforcement disabled at runtime by configuration");
                if let Err(error) = mounter.unmount(&boot.mount_point) {
                    warn!(%error, "could not unmount policy filesystem after disable");
                }
                kernel.clear_mount();
                BootOutcome::Disabled
            }
            Err(error) => {
                // A failed disable still leaves the kernel effectively
                // permissive, since no policy is loaded.
                warn!(%error, "runtime disable failed");
                BootOutcome::NotLoaded { enforcing: false }
            }
        };
    }

    let current = match kernel.current_enforce() {
        Ok(current) => current,
        Err(error) => {
            error!(%error, "could not query current enforcement state");
            return BootOutcome::NotLoaded {
                enforcing: decision.enforcing,
            };
        }
    };

    if current != decision.enforcing {
        if let Err(error) = kernel.set_enforce(decision.enforcing) {
            if decision.enforcing {
                // Do not proceed to a domain transition without being
                // certain of enforcing mode.
                error!(%error, "unable to switch to enforcing mode");
                return BootOutcome::NotLoaded { enforcing: true };
            }
            warn!(%error, "unable to switch to permissive mode, continuing");
        }
    }

    let mut boot_load = load.clone();
    boot_load.set_local_defs = false;
    boot_load.preserve_booleans = false;

    match negotiate::load_policy(kernel, transformer, &boot_load) {
        Ok(policy) => BootOutcome::Loaded {
            policy,
            enforcing: decision.enforcing,
        },
        Err(error) => {
            error!(%error, "initial policy load failed");
            BootOutcome::NotLoaded {
                enforcing: decision.enforcing,
            }
        }
    }
}
