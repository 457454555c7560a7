//! Enforcement kernel interface.
//!
//! Talks to the kernel's policy pseudo-filesystem through a [`Kernel`]
//! handle that carries the mount path. The handle starts unconfigured at
//! boot; every operation fails fast with [`KernelError::NotConfigured`]
//! until the policy filesystem has been mounted and the path recorded.
//!
//! Uses synchronous `std::fs` reads and writes since these are quick
//! pseudo-file operations.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::image::PolicyImage;

/// A named boolean toggle and its currently active value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanState {
    /// Boolean name as exposed by the kernel.
    pub name: String,
    /// Currently active value.
    pub active: bool,
}

/// A kernel interface operation failed.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// The policy filesystem mount path has not been established.
    #[error("kernel policy interface is not configured (policy filesystem not mounted)")]
    NotConfigured,

    /// An I/O operation on a kernel pseudo-file failed.
    #[error("{op} failed at {path}: {source}")]
    Io {
        /// Short name of the failed operation.
        op: &'static str,
        /// The pseudo-file involved.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A kernel pseudo-file held something other than the expected value.
    #[error("unexpected contents in {path}: {reason}")]
    Parse {
        /// The pseudo-file involved.
        path: PathBuf,
        /// What was wrong with the contents.
        reason: String,
    },

    /// The policy load write was short.
    ///
    /// A short write means the image failed to load; there is no partial
    /// commit state and no retry.
    #[error("policy load truncated: wrote {written} of {len} bytes")]
    ShortWrite {
        /// Bytes the kernel accepted.
        written: usize,
        /// Full image length.
        len: usize,
    },
}

/// Handle to the kernel's policy interface.
///
/// Holds the mount path of the policy pseudo-filesystem, set once during
/// boot after a successful mount. Cloning is cheap; callers serialize
/// policy loads themselves.
#[derive(Debug, Clone)]
pub struct Kernel {
    mount: Option<PathBuf>,
}

impl Kernel {
    /// A handle with no mount path established yet.
    pub fn unconfigured() -> Self {
        Self { mount: None }
    }

    /// A handle for an already-mounted policy filesystem.
    pub fn at_mount(path: impl Into<PathBuf>) -> Self {
        Self {
            mount: Some(path.into()),
        }
    }

    /// Record the mount path after a successful mount.
    pub fn set_mount(&mut self, path: impl Into<PathBuf>) {
        self.mount = Some(path.into());
    }

    /// Forget the mount path, after unmounting on runtime disable.
    pub fn clear_mount(&mut self) {
        self.mount = None;
    }

    /// Whether a mount path has been established.
    pub fn is_configured(&self) -> bool {
        self.mount.is_some()
    }

    fn mount(&self) -> Result<&Path, KernelError> {
        self.mount.as_deref().ok_or(KernelError::NotConfigured)
    }

    /// Policy format version the running kernel enforces.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured or the `policyvers`
    /// pseudo-file cannot be read or parsed.
    pub fn policy_version(&self) -> Result<u32, KernelError> {
        let path = self.mount()?.join("policyvers");
        let contents = fs::read_to_string(&path).map_err(|source| KernelError::Io {
            op: "policy version query",
            path: path.clone(),
            source,
        })?;
        contents
            .trim()
            .parse()
            .map_err(|_| KernelError::Parse {
                path,
                reason: format!("expected an integer version, got {:?}", contents.trim()),
            })
    }

    /// Whether the kernel is currently enforcing (as opposed to permissive).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured or the `enforce`
    /// pseudo-file cannot be read or parsed.
    pub fn current_enforce(&self) -> Result<bool, KernelError> {
        let path = self.mount()?.join("enforce");
        let contents = fs::read_to_string(&path).map_err(|source| KernelError::Io {
            op: "enforce query",
            path: path.clone(),
            source,
        })?;
        let value: i32 = contents.trim().parse().map_err(|_| KernelError::Parse {
            path,
            reason: format!("expected 0 or 1, got {:?}", contents.trim()),
        })?;
        Ok(value != 0)
    }

    /// Switch the kernel between enforcing and permissive mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured or the write to the
    /// `enforce` pseudo-file fails.
    pub fn set_enforce(&self, enforcing: bool) -> Result<(), KernelError> {
        let path = self.mount()?.join("enforce");
        let value = if enforcing { "1" } else { "0" };
        fs::write(&path, value).map_err(|source| KernelError::Io {
            op: "enforce change",
            path,
            source,
        })
    }

    /// Runtime-disable the enforcement kernel.
    ///
    /// Only valid before any policy has been loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured or the write to the
    /// `disable` pseudo-file fails.
    pub fn disable(&self) -> Result<(), KernelError> {
        let path = self.mount()?.join("disable");
        fs::write(&path, "1").map_err(|source| KernelError::Io {
            op: "runtime disable",
            path,
            source,
        })
    }

    /// Snapshot every named boolean and its currently active value.
    ///
    /// Each entry under `booleans/` holds the active value as the first
    /// whitespace-separated token.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured or the booleans
    /// directory or any entry cannot be read or parsed.
    pub fn boolean_states(&self) -> Result<Vec<BooleanState>, KernelError> {
        let dir = self.mount()?.join("booleans");
        let entries = fs::read_dir(&dir).map_err(|source| KernelError::Io {
            op: "boolean listing",
            path: dir.clone(),
            source,
        })?;

        let mut states = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| KernelError::Io {
                op: "boolean listing",
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let contents = fs::read_to_string(&path).map_err(|source| KernelError::Io {
                op: "boolean query",
                path: path.clone(),
                source,
            })?;
            let first = contents.split_whitespace().next().unwrap_or("");
            let value: i32 = first.parse().map_err(|_| KernelError::Parse {
                path,
                reason: format!("expected an integer value, got {first:?}"),
            })?;
            states.push(BooleanState {
                name,
                active: value != 0,
            });
        }
        states.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(states)
    }

    /// Commit a policy image to the kernel in one bulk write.
    ///
    /// Opens the `load` pseudo-file read-write and writes the whole image
    /// with a single call. A short write is reported as a failed load;
    /// there is no retry with a truncated buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unconfigured, the `load` interface
    /// cannot be opened, or the write fails or is short.
    pub fn load_policy(&self, image: &PolicyImage) -> Result<(), KernelError> {
        let path = self.mount()?.join("load");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| KernelError::Io {
                op: "policy load open",
                path: path.clone(),
                source,
            })?;
        let written = file.write(image.bytes()).map_err(|source| KernelError::Io {
            op: "policy load write",
            path,
            source,
        })?;
        if written != image.len() {
            return Err(KernelError::ShortWrite {
                written,
                len: image.len(),
            });
        }
        Ok(())
    }
}
