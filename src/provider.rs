//! Transform provider contract.
//!
//! The policy compiler library that parses and re-serializes binary policy
//! images is an external, optional collaborator. Its absence is a supported
//! degraded mode: the pipeline then only accepts the kernel's own policy
//! version and never attempts a downgrade or merge.
//!
//! Callers hand the pipeline `Option<&dyn PolicyTransformer>`. A provider
//! that cannot resolve its full contract must not be constructed at all —
//! there is no partially-bound state representable here.

use std::path::Path;

use thiserror::Error;

use crate::kernel::BooleanState;

/// A transform step failed.
///
/// Transform failures during a downgrade are retry signals (the caller
/// searches for an older on-disk policy); merge failures are best-effort
/// and swallowed by the caller.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The image could not be parsed into the provider's representation.
    #[error("failed to parse policy image: {reason}")]
    Parse {
        /// Provider-supplied description of the parse failure.
        reason: String,
    },

    /// The provider cannot re-encode at the requested version.
    #[error("cannot re-encode policy at version {version}: {reason}")]
    SetVersion {
        /// The rejected target version.
        version: u32,
        /// Provider-supplied description of the failure.
        reason: String,
    },

    /// Serializing the parsed policy back to bytes failed.
    #[error("failed to serialize policy image: {reason}")]
    Serialize {
        /// Provider-supplied description of the failure.
        reason: String,
    },

    /// Merging local definitions into the image failed.
    #[error("failed to merge local definitions: {reason}")]
    Merge {
        /// Provider-supplied description of the failure.
        reason: String,
    },
}

/// A policy image parsed into the provider's internal representation.
pub trait ParsedPolicy {
    /// Set the target format version for re-serialization.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot represent the policy at
    /// `version`.
    fn set_version(&mut self, version: u32) -> Result<(), TransformError>;

    /// Serialize the policy at its current target version.
    ///
    /// # Errors
    ///
    /// Returns an error if re-serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, TransformError>;
}

/// The external policy transform provider.
///
/// Implementations wrap whatever policy compiler library is linked in.
/// Every method must be available on a constructed provider; version
/// queries are infallible by contract.
pub trait PolicyTransformer {
    /// Lowest policy format version the provider can produce.
    fn min_version(&self) -> u32;

    /// Highest policy format version the provider can produce.
    fn max_version(&self) -> u32;

    /// Parse an image for downgrading.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a policy the provider
    /// understands.
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn ParsedPolicy>, TransformError>;

    /// Merge local user/role definitions from `users_dir`, producing a new
    /// image.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge fails; the caller falls back to the
    /// pre-merge image.
    fn merge_users(&self, bytes: &[u8], users_dir: &Path) -> Result<Vec<u8>, TransformError>;

    /// Merge local boolean definitions from `booleans_path` into the image
    /// in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the merge fails; the caller ignores the result.
    fn merge_booleans(&self, bytes: &mut [u8], booleans_path: &Path)
        -> Result<(), TransformError>;

    /// Apply a snapshot of boolean states to the image in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be applied; the caller
    /// ignores the result.
    fn set_booleans(
        &self,
        bytes: &mut [u8],
        settings: &[BooleanState],
    ) -> Result<(), TransformError>;
}
