//! Policy version negotiation and loading.
//!
//! Given a set of on-disk policy files named `<base>.<version>` and a
//! kernel that enforces one version, find a mutually acceptable version,
//! downgrade a newer policy through the transform provider when possible,
//! layer in local customizations, and commit the final image.
//!
//! The search walks versions downward. A downgrade failure is a retry
//! signal, not a fatal error: the ceiling drops below the rejected file and
//! the scan restarts, until the window `[min, ceiling]` is exhausted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::image::PolicyImage;
use crate::kernel::{Kernel, KernelError};
use crate::provider::{PolicyTransformer, TransformError};

/// The load pipeline failed.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// No policy file exists in the admissible version window.
    #[error("no usable policy file found at or below {base}.{max_version}")]
    NoCandidate {
        /// Base path of the policy store.
        base: PathBuf,
        /// Highest version attempted.
        max_version: u32,
    },

    /// Opening a candidate file failed with something other than "not
    /// found". The scan stops immediately.
    #[error("failed to open policy file {path}: {source}")]
    Open {
        /// The candidate file.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Reading an opened candidate file failed.
    #[error("failed to read policy file {path}: {source}")]
    Read {
        /// The candidate file.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A kernel interface operation failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// The version window negotiated between kernel and transform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Version the running kernel enforces.
    pub kernel: u32,
    /// Lowest version the provider can produce.
    pub min: u32,
    /// Highest version the provider can produce.
    pub max: u32,
}

impl VersionRange {
    /// Query the kernel and provider for the usable version window.
    ///
    /// Without a provider the window collapses to exactly the kernel's
    /// version: no downgrade capability, no merges.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel version query fails.
    pub fn resolve(
        kernel: &Kernel,
        transformer: Option<&dyn PolicyTransformer>,
    ) -> Result<Self, LoadError> {
        let kernel_version = kernel.policy_version()?;
        Ok(match transformer {
            Some(t) => Self {
                kernel: kernel_version,
                min: t.min_version(),
                max: t.max_version(),
            },
            None => Self {
                kernel: kernel_version,
                min: kernel_version,
                max: kernel_version,
            },
        })
    }

    /// Version at which the downward file search starts.
    ///
    /// When local customization or boolean preservation is requested the
    /// search starts at the provider's ceiling, so a newer on-disk policy
    /// can still be found and customized in place. Otherwise the kernel's
    /// own version also caps the start, which avoids a downgrade when the
    /// kernel is ahead of the provider.
    pub fn starting_version(&self, customize: bool) -> u32 {
        if customize {
            self.max
        } else {
            self.max.max(self.kernel)
        }
    }
}

/// How a policy load should behave.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Base path of the policy store; files are named `<base>.<version>`.
    pub base_path: PathBuf,
    /// Merge site-local boolean and user definitions into the image.
    pub set_local_defs: bool,
    /// Carry currently active boolean values across the reload.
    pub preserve_booleans: bool,
    /// Directory holding local user/role definitions.
    pub users_dir: PathBuf,
    /// File holding local boolean definitions.
    pub booleans_path: PathBuf,
    /// Running kernel release string, when known. Kernels at or above
    /// 2.6.22 preserve boolean values across a reload themselves, making
    /// userspace preservation unnecessary.
    pub kernel_release: Option<String>,
}

/// A successfully committed policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPolicy {
    /// Format version of the committed image.
    pub version: u32,
    /// The on-disk file the image was derived from.
    pub source: PathBuf,
}

/// A policy file found during the version scan.
#[derive(Debug)]
struct Candidate {
    image: PolicyImage,
    version: u32,
    path: PathBuf,
}

/// Negotiate, customize, and commit a policy image.
///
/// This is the single entry point of the load pipeline. It fails fast if
/// the kernel handle is unconfigured, resolves the version window, scans
/// for the newest usable policy file, downgrades it when it is newer than
/// the kernel (retrying at older versions when a downgrade fails), applies
/// local customization or boolean preservation, and hands the final image
/// to the kernel.
///
/// # Errors
///
/// Returns an error on configuration absence, I/O failure, version
/// exhaustion, or commit failure. Best-effort merge failures are swallowed
/// and the prior image is kept.
pub fn load_policy(
    kernel: &Kernel,
    transformer: Option<&dyn PolicyTransformer>,
    opts: &LoadOptions,
) -> Result<LoadedPolicy, LoadError> {
    if !kernel.is_configured() {
        return Err(KernelError::NotConfigured.into());
    }

    let mut set_local_defs = opts.set_local_defs;
    if set_local_defs && !has_local_definitions(&opts.booleans_path, &opts.users_dir) {
        debug!("no local definition files present, skipping local customization");
        set_local_defs = false;
    }

    let mut preserve_booleans = opts.preserve_booleans;
    if preserve_booleans {
        if let Some(release) = opts.kernel_release.as_deref() {
            if release_preserves_booleans(release) {
                debug!(release, "kernel preserves booleans across reload");
                preserve_booleans = false;
            }
        }
    }

    let range = VersionRange::resolve(kernel, transformer)?;
    let customize = set_local_defs || preserve_booleans;
    let start = range.starting_version(customize);
    debug!(
        kernel_version = range.kernel,
        min = range.min,
        max = range.max,
        start,
        "resolved policy version window"
    );

    let mut ceiling = start;
    let (mut image, version, path) = loop {
        let candidate = open_at_or_below(&opts.base_path, ceiling, range.min)?;

        if candidate.version <= range.kernel {
            break (candidate.image, candidate.version, candidate.path);
        }
        let Some(t) = transformer else {
            // Without a provider the window is {kernel}, so a newer
            // candidate cannot have been selected.
            break (candidate.image, candidate.version, candidate.path);
        };

        match downgrade(t, &candidate.image, range.kernel) {
            Ok(downgraded) => {
                info!(
                    path = %candidate.path.display(),
                    from = candidate.version,
                    to = range.kernel,
                    "downgraded policy to kernel version"
                );
                break (downgraded, range.kernel, candidate.path);
            }
            Err(error) => {
                warn!(
                    path = %candidate.path.display(),
                    %error,
                    "could not downgrade policy, searching for an older version"
                );
                match candidate.version.checked_sub(1) {
                    Some(lower) => ceiling = lower,
                    None => {
                        return Err(LoadError::NoCandidate {
                            base: opts.base_path.clone(),
                            max_version: start,
                        })
                    }
                }
            }
        }
    };

    if let Some(t) = transformer {
        if set_local_defs {
            match t.merge_users(image.bytes(), &opts.users_dir) {
                Ok(bytes) => {
                    debug!(users_dir = %opts.users_dir.display(), "merged local users");
                    image = PolicyImage::transformed(bytes);
                }
                Err(error) => {
                    // Best effort: keep the pre-merge image.
                    debug!(%error, "local user merge failed, keeping unmerged image");
                }
            }
        }

        if preserve_booleans {
            match kernel.boolean_states() {
                Ok(states) => {
                    if let Err(error) = t.set_booleans(image.bytes_mut(), &states) {
                        debug!(%error, "could not re-apply boolean snapshot");
                    }
                }
                Err(error) => {
                    debug!(%error, "could not snapshot boolean states, skipping preservation");
                }
            }
        } else if set_local_defs {
            if let Err(error) = t.merge_booleans(image.bytes_mut(), &opts.booleans_path) {
                debug!(%error, "local boolean merge failed");
            }
        }
    }

    kernel.load_policy(&image)?;
    info!(path = %path.display(), version, "policy committed to kernel");
    Ok(LoadedPolicy {
        version,
        source: path,
    })
}

/// Open the newest policy file in `[min, start]`, walking versions
/// downward.
///
/// "Not found" decrements the version and retries; any other open error is
/// fatal immediately. Exhausting the window is the single place where the
/// search converts into the fatal [`LoadError::NoCandidate`].
fn open_at_or_below(base: &Path, start: u32, min: u32) -> Result<Candidate, LoadError> {
    let mut version = start;
    while version >= min {
        let path = versioned_path(base, version);
        match fs::File::open(&path) {
            Ok(file) => {
                let image = PolicyImage::from_open_file(file, &path)
                    .map_err(|source| LoadError::Read {
                        path: path.clone(),
                        source,
                    })?;
                return Ok(Candidate {
                    image,
                    version,
                    path,
                });
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                match version.checked_sub(1) {
                    Some(lower) => version = lower,
                    None => break,
                }
            }
            Err(source) => return Err(LoadError::Open { path, source }),
        }
    }
    Err(LoadError::NoCandidate {
        base: base.to_owned(),
        max_version: start,
    })
}

/// `<base>.<version>`, preserving the base path's encoding.
fn versioned_path(base: &Path, version: u32) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(format!(".{version}"));
    PathBuf::from(os)
}

/// Re-encode a parsed policy at the kernel's version into a new heap image.
///
/// The original file-backed bytes are never mutated.
fn downgrade(
    transformer: &dyn PolicyTransformer,
    image: &PolicyImage,
    target: u32,
) -> Result<PolicyImage, TransformError> {
    let mut parsed = transformer.parse(image.bytes())?;
    parsed.set_version(target)?;
    let bytes = parsed.to_bytes()?;
    Ok(PolicyImage::transformed(bytes))
}

/// Whether any site-local definition file exists.
///
/// Probes the booleans file, its `.local` companion, and `local.users`
/// under the users directory.
fn has_local_definitions(booleans_path: &Path, users_dir: &Path) -> bool {
    if booleans_path.exists() {
        return true;
    }
    if versioned_suffix(booleans_path, "local").exists() {
        return true;
    }
    users_dir.join("local.users").exists()
}

/// `<path>.<suffix>`, preserving the path's encoding.
fn versioned_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(format!(".{suffix}"));
    PathBuf::from(os)
}

/// Whether a kernel at `release` preserves boolean values across a policy
/// reload (true for 2.6.22 and later).
///
/// Compares the leading `major.minor.patch` of the release string. An
/// unparsable release is treated as old, keeping userspace preservation.
fn release_preserves_booleans(release: &str) -> bool {
    match parse_release(release) {
        Some(version) => version >= (2, 6, 22),
        None => false,
    }
}

/// Leading `major.minor[.patch]` of a kernel release string.
fn parse_release(release: &str) -> Option<(u32, u32, u32)> {
    let mut parts = release.trim().split('.');
    let major = leading_number(parts.next()?)?;
    let minor = leading_number(parts.next()?)?;
    let patch = parts.next().and_then(leading_number).unwrap_or(0);
    Some((major, minor, patch))
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
